//! session settings and environment-driven client configuration.
//!
//! generation parameters and safety settings are forwarded verbatim to the
//! endpoint when a session is started. credentials are read once at startup
//! and only checked when a session is actually built.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.0-pro-001";

pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// sampling parameters for the remote model (gemini wire names).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            top_k: 1,
            top_p: 1.0,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmCategory {
    HarmCategoryHarassment,
    HarmCategorySexuallyExplicit,
    HarmCategoryHateSpeech,
    HarmCategoryDangerousContent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

/// everything handed to `ChatEndpoint::start_session` besides the history.
#[derive(Resource, Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub generation: GenerationConfig,
    pub safety: Vec<SafetySetting>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let safety = [
            HarmCategory::HarmCategoryHarassment,
            HarmCategory::HarmCategorySexuallyExplicit,
            HarmCategory::HarmCategoryHateSpeech,
            HarmCategory::HarmCategoryDangerousContent,
        ]
        .into_iter()
        .map(|category| SafetySetting {
            category,
            threshold: HarmBlockThreshold::BlockMediumAndAbove,
        })
        .collect();

        Self {
            generation: GenerationConfig::default(),
            safety,
        }
    }
}

/// which remote service the app talks to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    /// google generative language rest api.
    Gemini,
    /// any backend the `llm` crate knows by name (e.g. "openai", "ollama").
    Llm(String),
}

/// client configuration, read once at startup.
#[derive(Resource, Clone, Debug)]
pub struct ChatConfig {
    pub backend: Backend,
    /// overrides the backend's default endpoint url.
    pub base_url: Option<String>,
    pub model: String,
    /// absent keys surface as `ChatError::MissingApiKey` when a session starts.
    pub api_key: Option<String>,
    /// label shown above assistant messages.
    pub assistant_label: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Gemini,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            assistant_label: "Gemini".to_string(),
        }
    }
}

impl ChatConfig {
    /// reads `LLM_BACKEND`, `LLM_BASE_URL`, `LLM_MODEL` and the backend's key.
    pub fn from_env() -> Self {
        Self::from_lookup(read_var)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let backend = match lookup("LLM_BACKEND").map(|b| b.trim().to_ascii_lowercase()) {
            None => Backend::Gemini,
            Some(b) if b.is_empty() || b == "gemini" => Backend::Gemini,
            Some(b) => Backend::Llm(b),
        };

        let (key_var, label) = match &backend {
            Backend::Gemini => (GEMINI_API_KEY_VAR, "Gemini".to_string()),
            Backend::Llm(name) => (OPENAI_API_KEY_VAR, name.clone()),
        };

        let base_url = lookup("LLM_BASE_URL").filter(|u| !u.trim().is_empty());
        let model = lookup("LLM_MODEL").unwrap_or_else(|| match &backend {
            Backend::Gemini => DEFAULT_MODEL.to_string(),
            Backend::Llm(_) => "gpt-4o-mini".to_string(),
        });
        let api_key = lookup(key_var).filter(|k| !k.trim().is_empty());

        Self {
            backend,
            base_url,
            model,
            api_key,
            assistant_label: label,
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self.backend {
            Backend::Gemini => GEMINI_API_KEY_VAR,
            Backend::Llm(_) => OPENAI_API_KEY_VAR,
        }
    }
}

// browsers have no process environment; keys are baked in at build time there.
#[cfg(not(target_arch = "wasm32"))]
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().or_else(|| compile_time_var(name))
}

#[cfg(target_arch = "wasm32")]
fn read_var(name: &str) -> Option<String> {
    compile_time_var(name)
}

fn compile_time_var(name: &str) -> Option<String> {
    let v = match name {
        "LLM_BACKEND" => option_env!("LLM_BACKEND"),
        "LLM_BASE_URL" => option_env!("LLM_BASE_URL"),
        "LLM_MODEL" => option_env!("LLM_MODEL"),
        GEMINI_API_KEY_VAR => option_env!("GEMINI_API_KEY"),
        OPENAI_API_KEY_VAR => option_env!("OPENAI_API_KEY"),
        _ => None,
    };
    v.map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_target_gemini_without_key() {
        let cfg = ChatConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.backend, Backend::Gemini);
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert!(cfg.base_url.is_none());
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn llm_backend_reads_openai_key() {
        let cfg = ChatConfig::from_lookup(lookup(&[
            ("LLM_BACKEND", "OpenAI"),
            ("OPENAI_API_KEY", "sk-test"),
            ("GEMINI_API_KEY", "ignored"),
        ]));
        assert_eq!(cfg.backend, Backend::Llm("openai".into()));
        assert_eq!(cfg.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.api_key_var(), OPENAI_API_KEY_VAR);
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let cfg = ChatConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")]));
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn settings_serialize_to_gemini_wire_names() {
        let settings = SessionSettings::default();
        let generation = serde_json::to_value(&settings.generation).unwrap();
        assert_eq!(
            generation,
            serde_json::json!({
                "temperature": 0.5,
                "topK": 1,
                "topP": 1.0,
                "maxOutputTokens": 2048,
            })
        );
        let first = serde_json::to_value(settings.safety[0]).unwrap();
        assert_eq!(
            first,
            serde_json::json!({
                "category": "HARM_CATEGORY_HARASSMENT",
                "threshold": "BLOCK_MEDIUM_AND_ABOVE",
            })
        );
        assert_eq!(settings.safety.len(), 4);
    }
}
