// src/analyze/classifier.rs
//! Fast, deterministic sentiment classification from a bundled lexicon.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::types::{Classification, SentimentLabel};

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../../sentiment_lexicon.json");
    // Bundled at compile time; covered by `lexicon_parses`.
    serde_json::from_str::<HashMap<String, i32>>(raw).unwrap_or_default()
});

/// Low-latency classifier. Runs outside the extraction limiter.
pub trait FastClassifier: Send + Sync {
    fn classify<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Classification> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn FastClassifier>;

#[derive(Debug, Clone, Default)]
pub struct LexiconClassifier;

impl LexiconClassifier {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_score(&self, w: &str) -> i32 {
        *LEXICON.get(w).unwrap_or(&0)
    }

    /// Returns (summed polarity, sum of absolute polarities, polar tokens, tokens).
    /// A negator within the previous 1..=3 tokens flips the sign of a word.
    pub fn score_text(&self, text: &str) -> (i32, i32, usize, usize) {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut sum = 0i32;
        let mut sum_abs = 0i32;
        let mut polar = 0usize;

        for i in 0..tokens.len() {
            let base = self.word_score(tokens[i].as_str());
            if base == 0 {
                continue;
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            sum += if negated { -base } else { base };
            sum_abs += base.abs();
            polar += 1;
        }

        (sum, sum_abs, polar, tokens.len())
    }

    pub fn classify_sync(&self, text: &str) -> Classification {
        let (sum, sum_abs, polar, tokens) = self.score_text(text);
        let label = match sum {
            s if s > 0 => SentimentLabel::Positive,
            s if s < 0 => SentimentLabel::Negative,
            _ => SentimentLabel::Neutral,
        };
        let score = match label {
            // agreement of the polar evidence with the winning side
            SentimentLabel::Positive | SentimentLabel::Negative => {
                0.5 + 0.5 * (sum.abs() as f32 / sum_abs.max(1) as f32)
            }
            SentimentLabel::Neutral => {
                let share = polar as f32 / tokens.max(1) as f32;
                0.5 + 0.5 * (1.0 - share)
            }
        };
        Classification {
            label,
            score: score.clamp(0.0, 1.0),
        }
    }
}

impl FastClassifier for LexiconClassifier {
    fn classify<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Classification> + Send + 'a>> {
        let out = self.classify_sync(text);
        Box::pin(async move { out })
    }
    fn name(&self) -> &'static str {
        "lexicon"
    }
}

/// Lower-cased alphanumeric tokens; apostrophes stay inside words ("isn't").
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .map(|t| t.trim_matches(|c| c == '\'' || c == '\u{2019}'))
        .filter(|t| !t.is_empty())
        .map(|t| t.replace('\u{2019}', "'").to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "won't"
            | "can't"
            | "cannot"
            | "don't"
            | "doesn't"
            | "didn't"
            | "hardly"
            | "without"
    )
}
