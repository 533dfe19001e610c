//! `llm` crate backend: openai-compatible and the other providers it ships.
//!
//! the handle owns the message list and replays it on every call; the
//! provider itself stays stateless (no builder memory).

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bevy::prelude::*;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::{ChatMessage, ChatProvider, ChatRole};
use llm::LLMProvider;

use crate::config::{ChatConfig, OPENAI_API_KEY_VAR, SessionSettings};
use crate::endpoint::{ChatEndpoint, ChatError, HistoryTurn, SessionHandle, TurnRole};

/// provider requires base to include `/v1` (this avoids 404s on chat endpoints).
fn normalize_oai_base(base: &str) -> String {
    let b = base.trim_end_matches('/');
    if b.ends_with("/v1") {
        format!("{b}/")
    } else {
        format!("{b}/v1/")
    }
}

fn to_chat_message(turn: &HistoryTurn) -> ChatMessage {
    match turn.role {
        TurnRole::User => ChatMessage::user().content(turn.text.clone()).build(),
        TurnRole::Model => ChatMessage::assistant().content(turn.text.clone()).build(),
    }
}

pub struct LlmEndpoint {
    backend_name: String,
    backend: LLMBackend,
    base_url: Option<String>,
    model: String,
    api_key: Option<String>,
}

impl LlmEndpoint {
    /// fails when `llm` does not know the backend name.
    pub fn new(backend_name: &str, config: &ChatConfig) -> Result<Self, ChatError> {
        let backend = LLMBackend::from_str(backend_name)?;
        let base_url = config.base_url.as_deref().map(|b| match backend {
            LLMBackend::OpenAI => normalize_oai_base(b),
            _ => b.to_string(),
        });
        Ok(Self {
            backend_name: backend_name.to_string(),
            backend,
            base_url,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn build_provider(&self, settings: &SessionSettings) -> Result<Arc<dyn LLMProvider>, ChatError> {
        let g = &settings.generation;
        let mut b = LLMBuilder::new()
            .backend(self.backend.clone())
            .model(self.model.clone())
            .temperature(g.temperature)
            .top_p(g.top_p)
            .top_k(g.top_k)
            .max_tokens(g.max_output_tokens);
        if let Some(url) = &self.base_url {
            b = b.base_url(url.clone());
        }
        match (&self.api_key, &self.backend) {
            (Some(key), _) => b = b.api_key(key.clone()),
            (None, LLMBackend::Ollama) => {}
            (None, _) => return Err(ChatError::MissingApiKey(OPENAI_API_KEY_VAR)),
        }
        Ok(b.build()?.into())
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl ChatEndpoint for LlmEndpoint {
    async fn start_session(
        &self,
        settings: &SessionSettings,
        history: Vec<HistoryTurn>,
    ) -> Result<Arc<dyn SessionHandle>, ChatError> {
        let provider = self.build_provider(settings)?;
        if !settings.safety.is_empty() {
            debug!(target: "bevy_genai_chat",
                "llm backend '{}' has no safety settings; ignoring {} entries",
                self.backend_name, settings.safety.len()
            );
        }
        info!(target: "bevy_genai_chat",
            "llm: session ready backend={} model={} history_turns={}",
            self.backend_name, self.model, history.len()
        );
        Ok(Arc::new(LlmSession {
            provider,
            messages: Mutex::new(history.iter().map(to_chat_message).collect()),
        }))
    }

    fn name(&self) -> &str {
        &self.backend_name
    }
}

struct LlmSession {
    provider: Arc<dyn LLMProvider>,
    messages: Mutex<Vec<ChatMessage>>,
}

impl LlmSession {
    fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SessionHandle for LlmSession {
    async fn send(&self, prompt: &str) -> Result<String, ChatError> {
        let user = ChatMessage::user().content(prompt.to_string()).build();
        let mut messages = self.snapshot();
        messages.push(user);

        let resp = self.provider.chat(&messages).await?;
        let text = resp.text().unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        messages.push(ChatMessage::assistant().content(text.clone()).build());
        let user_turns = messages.iter().filter(|m| matches!(m.role, ChatRole::User)).count();
        debug!(target: "bevy_genai_chat", "llm: exchange done, user_turns={}", user_turns);
        *self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = messages;
        Ok(text)
    }
}
