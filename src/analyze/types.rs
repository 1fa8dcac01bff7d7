// src/analyze/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub const ALL: [SentimentLabel; 3] = [Self::Positive, Self::Negative, Self::Neutral];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }

    /// Lenient parse for capability output; unknown strings are neutral.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "pos" => Self::Positive,
            "negative" | "neg" => Self::Negative,
            _ => Self::Neutral,
        }
    }

    /// Emotions attached when no extractor supplied any.
    pub fn default_emotions(self) -> Vec<String> {
        let v: &[&str] = match self {
            Self::Positive => &["satisfaction", "appreciation"],
            Self::Negative => &["frustration", "concern"],
            Self::Neutral => &["neutral"],
        };
        v.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aspect {
    pub name: String,
    pub sentiment: SentimentLabel,
    pub quote: String,
}

/// Output of the fast classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: SentimentLabel,
    /// Confidence in [0, 1].
    pub score: f32,
}

/// Output of the aspect extraction capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub label: Option<SentimentLabel>,
    pub score: Option<f32>,
    #[serde(default)]
    pub emotions: Vec<String>,
    pub intent: Option<String>,
    #[serde(default)]
    pub aspects: Vec<Aspect>,
}

/// Which path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    Fast,
    Hybrid,
}

/// Produced once per distinct ContentKey, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sentiment: SentimentLabel,
    /// Confidence in [0, 1].
    pub score: f32,
    pub emotions: Vec<String>,
    pub intent: Option<String>,
    #[serde(default)]
    pub aspects: Vec<Aspect>,
    pub method: AnalysisMethod,
}

impl AnalysisResult {
    /// Fast-only result: default emotions, intent `feedback`, no aspects.
    pub fn from_classification(c: Classification) -> Self {
        Self {
            sentiment: c.label,
            score: clamp_score(c.score),
            emotions: c.label.default_emotions(),
            intent: Some("feedback".to_string()),
            aspects: Vec::new(),
            method: AnalysisMethod::Fast,
        }
    }

    /// Label and score stay with the classifier; aspects come from the extractor.
    /// Extractor emotions/intent replace the defaults only when non-empty.
    pub fn merge(c: Classification, x: Extraction) -> Self {
        let mut r = Self::from_classification(c);
        if !x.emotions.is_empty() {
            r.emotions = x.emotions;
        }
        if let Some(intent) = x.intent.filter(|i| !i.trim().is_empty()) {
            r.intent = Some(intent);
        }
        r.aspects = x.aspects;
        r.method = AnalysisMethod::Hybrid;
        r
    }
}

pub fn clamp_score(s: f32) -> f32 {
    if s.is_finite() {
        s.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
