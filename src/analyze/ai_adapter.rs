//! AI capabilities: aspect extraction and summarization over an
//! OpenAI-compatible chat-completions API (Groq by default), plus mock and
//! disabled variants.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::classifier::LexiconClassifier;
use super::types::{Aspect, Extraction, SentimentLabel};
use crate::config::{AiConfig, PipelineConfig};
use crate::error::{PipelineError, Result};

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// High-cost structured extraction. Always called through the limiter.
pub trait AspectExtractor: Send + Sync {
    fn extract<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction>> + Send + 'a>>;
    fn provider_name(&self) -> &'static str;
}

/// Structured summary of one polarity sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryData {
    pub overview: String,
    #[serde(rename = "keyInsights", default)]
    pub key_insights: Vec<String>,
    #[serde(rename = "overallSentiment")]
    pub overall_sentiment: SentimentLabel,
}

pub trait Summarizer: Send + Sync {
    /// `context` is the polarity the documents were sampled for.
    fn summarize<'a>(
        &'a self,
        documents: &'a [String],
        context: SentimentLabel,
    ) -> Pin<Box<dyn Future<Output = Result<SummaryData>> + Send + 'a>>;
    fn provider_name(&self) -> &'static str;
}

pub type DynExtractor = Arc<dyn AspectExtractor>;
pub type DynSummarizer = Arc<dyn Summarizer>;

#[derive(Clone)]
pub struct Capabilities {
    pub extractor: DynExtractor,
    pub summarizer: DynSummarizer,
}

/// Factory.
///
/// * `AI_TEST_MODE=mock` → deterministic mocks.
/// * disabled config or empty key → disabled capabilities.
/// * otherwise the chat-completions client for the configured provider.
pub fn build_capabilities(ai: &AiConfig, pipeline: &PipelineConfig) -> Capabilities {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Capabilities {
            extractor: Arc::new(MockExtractor::new(pipeline.aspect_keywords.clone())),
            summarizer: Arc::new(MockSummarizer),
        };
    }

    if !ai.enabled || ai.api_key.trim().is_empty() {
        return disabled();
    }

    match ChatClient::from_config(ai) {
        Ok(chat) => {
            let chat = Arc::new(chat);
            Capabilities {
                extractor: Arc::new(LlmExtractor {
                    chat: Arc::clone(&chat),
                }),
                summarizer: Arc::new(LlmSummarizer {
                    chat,
                    doc_chars: pipeline.summary_doc_chars,
                    max_docs: pipeline.summary_max_docs,
                }),
            }
        }
        Err(e) => {
            tracing::warn!(target: "analysis", error = %e, "chat client unavailable, AI disabled");
            disabled()
        }
    }
}

pub fn disabled() -> Capabilities {
    Capabilities {
        extractor: Arc::new(DisabledClient),
        summarizer: Arc::new(DisabledClient),
    }
}

// ------------------------------------------------------------
// Chat-completions client
// ------------------------------------------------------------

const SYSTEM_PROMPT_ASPECTS: &str = r#"You perform aspect-based sentiment analysis on product feedback.
Extract only concrete product or service attributes that are explicitly mentioned (for example "battery", "camera", "price", "customer support").
Skip vague overall statements that are not tied to an attribute.
Answer with one JSON object and nothing else:
{"aspects":[{"aspect":"<attribute>","sentiment":"positive|negative|neutral","quote":"<shortest exact supporting snippet>"}],
 "emotions":["<emotion>"],"intent":"<complaint|praise|question|feedback>"}
Use an empty "aspects" array when nothing qualifies."#;

const SYSTEM_PROMPT_SUMMARY: &str = r#"You consolidate a batch of user comments into a short strategic summary.
Answer with one JSON object and nothing else:
{"overview":"<1-2 neutral sentences on what users discuss>",
 "keyInsights":["<distinct, actionable finding>"],
 "overallSentiment":"positive|negative|neutral"}
Use "neutral" when the batch is mixed or balanced."#;

/// Minimal OpenAI-compatible client in JSON mode.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    provider: &'static str,
}

impl ChatClient {
    pub fn from_config(cfg: &AiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::ingest::providers::USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::CapabilityUnavailable(format!("http client: {e}")))?;
        let provider = match cfg.provider.as_str() {
            "openai" => "openai",
            _ => "groq",
        };
        Ok(Self {
            http,
            base_url: cfg.base_url().to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model_name(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            provider,
        })
    }

    /// Returns the raw JSON content of the first choice.
    pub async fn complete_json(&self, system: &str, user: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| PipelineError::CapabilityUnavailable(format!("http: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::CapabilityRateLimited(format!(
                "{} returned 429",
                self.provider
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::CapabilityUnavailable(format!(
                "{} returned {status}",
                self.provider
            )));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| PipelineError::CapabilityMalformed(format!("response body: {e}")))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PipelineError::CapabilityMalformed("empty completion".into()))
    }
}

// ------------------------------------------------------------
// Extraction
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ExtractionWire {
    aspects: Vec<AspectWire>,
    #[serde(default)]
    emotions: Vec<String>,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct AspectWire {
    #[serde(default)]
    aspect: String,
    #[serde(default)]
    sentiment: String,
    #[serde(default)]
    quote: String,
}

/// Parse and clean extractor output. Non-JSON or a missing `aspects` array is
/// malformed; empty aspect names are dropped, names are lower-cased.
pub fn parse_extraction(raw: &str) -> Result<Extraction> {
    let wire: ExtractionWire = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| PipelineError::CapabilityMalformed(format!("extraction json: {e}")))?;

    let aspects = wire
        .aspects
        .into_iter()
        .filter_map(|a| {
            let name = a.aspect.trim().to_lowercase();
            if name.is_empty() {
                return None;
            }
            Some(Aspect {
                name,
                sentiment: SentimentLabel::parse_lenient(&a.sentiment),
                quote: a.quote.trim().to_string(),
            })
        })
        .collect();

    let emotions = wire
        .emotions
        .into_iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    Ok(Extraction {
        label: wire.sentiment.as_deref().map(SentimentLabel::parse_lenient),
        score: wire.score.filter(|s| s.is_finite() && (0.0..=1.0).contains(s)),
        emotions,
        intent: wire
            .intent
            .map(|i| i.trim().to_lowercase())
            .filter(|i| !i.is_empty()),
        aspects,
    })
}

/// Some models wrap JSON mode output in a markdown fence anyway.
fn strip_code_fence(raw: &str) -> &str {
    let t = raw.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    t.strip_suffix("```").unwrap_or(t).trim()
}

pub struct LlmExtractor {
    chat: Arc<ChatClient>,
}

impl AspectExtractor for LlmExtractor {
    fn extract<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction>> + Send + 'a>> {
        Box::pin(async move {
            let raw = self.chat.complete_json(SYSTEM_PROMPT_ASPECTS, text).await?;
            parse_extraction(&raw)
        })
    }
    fn provider_name(&self) -> &'static str {
        self.chat.provider
    }
}

// ------------------------------------------------------------
// Summarization
// ------------------------------------------------------------

pub struct LlmSummarizer {
    chat: Arc<ChatClient>,
    doc_chars: usize,
    max_docs: usize,
}

/// `Context: <label>` header, then one bullet per document, each truncated.
pub fn build_summary_prompt(
    documents: &[String],
    context: SentimentLabel,
    doc_chars: usize,
    max_docs: usize,
) -> String {
    let mut out = format!("Context: {context}\nComments:\n");
    for d in documents.iter().take(max_docs) {
        let snippet: String = d.chars().take(doc_chars).collect();
        out.push_str("- ");
        out.push_str(&snippet);
        out.push('\n');
    }
    out
}

pub fn parse_summary(raw: &str) -> Result<SummaryData> {
    let mut s: SummaryData = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| PipelineError::CapabilityMalformed(format!("summary json: {e}")))?;
    s.overview = s.overview.trim().to_string();
    s.key_insights.retain(|k| !k.trim().is_empty());
    if s.overview.is_empty() {
        return Err(PipelineError::CapabilityMalformed("empty overview".into()));
    }
    Ok(s)
}

impl Summarizer for LlmSummarizer {
    fn summarize<'a>(
        &'a self,
        documents: &'a [String],
        context: SentimentLabel,
    ) -> Pin<Box<dyn Future<Output = Result<SummaryData>> + Send + 'a>> {
        Box::pin(async move {
            let prompt = build_summary_prompt(documents, context, self.doc_chars, self.max_docs);
            let raw = self.chat.complete_json(SYSTEM_PROMPT_SUMMARY, &prompt).await?;
            parse_summary(&raw)
        })
    }
    fn provider_name(&self) -> &'static str {
        self.chat.provider
    }
}

// ------------------------------------------------------------
// Disabled + mock
// ------------------------------------------------------------

/// Fails every call with `CapabilityUnavailable`; used when AI is disabled.
pub struct DisabledClient;

impl AspectExtractor for DisabledClient {
    fn extract<'a>(
        &'a self,
        _text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction>> + Send + 'a>> {
        Box::pin(async { Err(PipelineError::CapabilityUnavailable("AI disabled".into())) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

impl Summarizer for DisabledClient {
    fn summarize<'a>(
        &'a self,
        _documents: &'a [String],
        _context: SentimentLabel,
    ) -> Pin<Box<dyn Future<Output = Result<SummaryData>> + Send + 'a>> {
        Box::pin(async { Err(PipelineError::CapabilityUnavailable("AI disabled".into())) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic extractor for tests/local runs: one aspect per keyword found,
/// labelled by the lexicon classifier over the sentence that mentions it.
#[derive(Clone)]
pub struct MockExtractor {
    keywords: Vec<String>,
    classifier: LexiconClassifier,
}

impl MockExtractor {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            classifier: LexiconClassifier::new(),
        }
    }

    pub fn extract_sync(&self, text: &str) -> Extraction {
        let mut aspects = Vec::new();
        for sentence in text.split(['.', '!', '?']) {
            let lower = sentence.to_lowercase();
            for k in &self.keywords {
                if lower.contains(k.as_str()) && !aspects.iter().any(|a: &Aspect| &a.name == k) {
                    aspects.push(Aspect {
                        name: k.clone(),
                        sentiment: self.classifier.classify_sync(sentence).label,
                        quote: sentence.trim().to_string(),
                    });
                }
            }
        }
        Extraction {
            aspects,
            ..Default::default()
        }
    }
}

impl AspectExtractor for MockExtractor {
    fn extract<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction>> + Send + 'a>> {
        let out = self.extract_sync(text);
        Box::pin(async move { Ok(out) })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

pub struct MockSummarizer;

impl Summarizer for MockSummarizer {
    fn summarize<'a>(
        &'a self,
        documents: &'a [String],
        context: SentimentLabel,
    ) -> Pin<Box<dyn Future<Output = Result<SummaryData>> + Send + 'a>> {
        Box::pin(async move {
            Ok(SummaryData {
                overview: format!("{} {context} comments summarized (mock).", documents.len()),
                key_insights: documents
                    .iter()
                    .take(3)
                    .map(|d| d.chars().take(80).collect())
                    .collect(),
                overall_sentiment: context,
            })
        })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_is_cleaned() {
        let raw = r#"```json
{"aspects":[
  {"aspect":" Battery Life ","sentiment":"NEGATIVE","quote":"drains fast"},
  {"aspect":"","sentiment":"positive","quote":"x"},
  {"aspect":"camera","sentiment":"mixed","quote":"ok-ish"}
],"emotions":["Frustration"," "],"intent":"Complaint"}
```"#;
        let x = parse_extraction(raw).unwrap();
        assert_eq!(x.aspects.len(), 2);
        assert_eq!(x.aspects[0].name, "battery life");
        assert_eq!(x.aspects[0].sentiment, SentimentLabel::Negative);
        assert_eq!(x.aspects[1].sentiment, SentimentLabel::Neutral);
        assert_eq!(x.emotions, vec!["frustration"]);
        assert_eq!(x.intent.as_deref(), Some("complaint"));
    }

    #[test]
    fn schema_violations_are_malformed() {
        for raw in ["not json", r#"{"emotions":[]}"#, r#"{"aspects":"battery"}"#] {
            assert!(matches!(
                parse_extraction(raw),
                Err(PipelineError::CapabilityMalformed(_))
            ));
        }
    }

    #[test]
    fn summary_prompt_truncates_and_caps() {
        let docs: Vec<String> = (0..30).map(|i| format!("{i} {}", "x".repeat(200))).collect();
        let p = build_summary_prompt(&docs, SentimentLabel::Negative, 100, 20);
        assert!(p.starts_with("Context: negative\nComments:\n"));
        assert_eq!(p.lines().filter(|l| l.starts_with("- ")).count(), 20);
        assert!(p.lines().skip(2).all(|l| l.chars().count() <= 102));
    }

    #[test]
    fn summary_requires_overview() {
        let ok = parse_summary(
            r#"{"overview":"Users discuss battery.","keyInsights":["Battery drains"],"overallSentiment":"negative"}"#,
        )
        .unwrap();
        assert_eq!(ok.overall_sentiment, SentimentLabel::Negative);
        assert!(parse_summary(r#"{"overview":" ","overallSentiment":"neutral"}"#).is_err());
    }

    #[tokio::test]
    async fn mock_extractor_labels_aspects_per_sentence() {
        let m = MockExtractor::new(vec!["camera".into(), "battery".into()]);
        let x = m
            .extract("The camera is amazing. But the battery is terrible!")
            .await
            .unwrap();
        assert_eq!(x.aspects.len(), 2);
        assert_eq!(x.aspects[0].name, "camera");
        assert_eq!(x.aspects[0].sentiment, SentimentLabel::Positive);
        assert_eq!(x.aspects[1].name, "battery");
        assert_eq!(x.aspects[1].sentiment, SentimentLabel::Negative);
    }

    #[tokio::test]
    async fn disabled_client_is_unavailable() {
        let caps = disabled();
        assert!(matches!(
            caps.extractor.extract("text").await,
            Err(PipelineError::CapabilityUnavailable(_))
        ));
        assert_eq!(caps.summarizer.provider_name(), "disabled");
    }
}
