// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";

fn default_provider() -> String {
    "groq".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    /// "groq" | "openai" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model override; provider default when absent.
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from GROQ_API_KEY / OPENAI_API_KEY (by provider)
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: None,
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Missing file → disabled defaults; a present but broken file is an error.
    pub fn load_default() -> anyhow::Result<Self> {
        let p = Path::new(DEFAULT_AI_CONFIG_PATH);
        if !p.exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(p)
    }

    pub fn from_json_str(data: &str) -> anyhow::Result<Self> {
        let mut cfg: AiConfig = serde_json::from_str(data)?;

        cfg.provider = cfg.provider.trim().to_lowercase();

        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = match cfg.provider.as_str() {
                "groq" => env::var("GROQ_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing GROQ_API_KEY env var"))?,
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if !(0.0..=2.0).contains(&cfg.temperature) {
            cfg.temperature = default_temperature();
        }
        if cfg.max_tokens == 0 {
            cfg.max_tokens = default_max_tokens();
        }

        Ok(cfg)
    }

    pub fn base_url(&self) -> &'static str {
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1",
            _ => "https://api.groq.com/openai/v1",
        }
    }

    pub fn model_name(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.provider.as_str() {
            "openai" => "gpt-4o-mini".to_string(),
            _ => "llama-3.3-70b-versatile".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_by_provider() {
        env::set_var("GROQ_API_KEY", "gsk_test");
        let cfg = AiConfig::from_json_str(r#"{"enabled":true,"provider":"GROQ","api_key":"ENV"}"#)
            .unwrap();
        assert_eq!(cfg.provider, "groq");
        assert_eq!(cfg.api_key, "gsk_test");
        assert_eq!(cfg.model_name(), "llama-3.3-70b-versatile");
        env::remove_var("GROQ_API_KEY");
    }

    #[serial_test::serial]
    #[test]
    fn missing_env_key_is_an_error() {
        env::remove_var("OPENAI_API_KEY");
        let res = AiConfig::from_json_str(r#"{"enabled":true,"provider":"openai","api_key":"env"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn out_of_range_temperature_falls_back() {
        let cfg =
            AiConfig::from_json_str(r#"{"enabled":false,"api_key":"k","temperature":9.0}"#).unwrap();
        assert!((cfg.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(cfg.base_url(), "https://api.groq.com/openai/v1");
    }
}
