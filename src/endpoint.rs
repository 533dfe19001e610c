//! the remote chat endpoint seam.
//!
//! a `ChatEndpoint` builds `SessionHandle`s seeded with prior turns; a handle
//! owns the remote conversation and answers one prompt per `send`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SessionSettings;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("missing api key: set {0}")]
    MissingApiKey(&'static str),
    #[error("no chat session is available")]
    SessionUnavailable,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("endpoint returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("response blocked: {0}")]
    Blocked(String),
    #[error("endpoint returned an empty response")]
    EmptyResponse,
    #[error("provider error: {0}")]
    Provider(String),
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

impl From<llm::error::LLMError> for ChatError {
    fn from(err: llm::error::LLMError) -> Self {
        Self::Provider(err.to_string())
    }
}

/// who produced a history turn, in endpoint terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: TurnRole,
    pub text: String,
}

impl HistoryTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: TurnRole::User, text: text.into() }
    }
    pub fn model(text: impl Into<String>) -> Self {
        Self { role: TurnRole::Model, text: text.into() }
    }
}

/// a stateful remote conversation. history grows inside the handle.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait SessionHandle: Send + Sync {
    async fn send(&self, prompt: &str) -> Result<String, ChatError>;
}

/// builds session handles. installed as the `Endpoint` resource.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait ChatEndpoint: Send + Sync {
    async fn start_session(
        &self,
        settings: &SessionSettings,
        history: Vec<HistoryTurn>,
    ) -> Result<Arc<dyn SessionHandle>, ChatError>;

    /// short name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod testing {
    //! scripted in-memory endpoint used across the crate's tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct Script {
        pub start_error: Option<ChatError>,
        pub replies: VecDeque<Result<String, ChatError>>,
        pub sent: Vec<String>,
        pub seeded: Vec<Vec<HistoryTurn>>,
    }

    #[derive(Clone, Default)]
    pub struct ScriptedEndpoint {
        pub script: Arc<Mutex<Script>>,
    }

    impl ScriptedEndpoint {
        pub fn replying(replies: impl IntoIterator<Item = Result<String, ChatError>>) -> Self {
            let ep = Self::default();
            ep.script.lock().unwrap().replies = replies.into_iter().collect();
            ep
        }

        pub fn failing_start(err: ChatError) -> Self {
            let ep = Self::default();
            ep.script.lock().unwrap().start_error = Some(err);
            ep
        }

        pub fn sent(&self) -> Vec<String> {
            self.script.lock().unwrap().sent.clone()
        }

        pub fn seeded(&self) -> Vec<Vec<HistoryTurn>> {
            self.script.lock().unwrap().seeded.clone()
        }
    }

    struct ScriptedHandle {
        script: Arc<Mutex<Script>>,
    }

    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    impl SessionHandle for ScriptedHandle {
        async fn send(&self, prompt: &str) -> Result<String, ChatError> {
            let mut s = self.script.lock().unwrap();
            s.sent.push(prompt.to_string());
            s.replies.pop_front().unwrap_or(Err(ChatError::EmptyResponse))
        }
    }

    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    impl ChatEndpoint for ScriptedEndpoint {
        async fn start_session(
            &self,
            _settings: &SessionSettings,
            history: Vec<HistoryTurn>,
        ) -> Result<Arc<dyn SessionHandle>, ChatError> {
            let mut s = self.script.lock().unwrap();
            s.seeded.push(history);
            if let Some(err) = s.start_error.clone() {
                return Err(err);
            }
            Ok(Arc::new(ScriptedHandle { script: self.script.clone() }))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedEndpoint;
    use super::*;

    #[test]
    fn scripted_session_replays_in_order() {
        let ep = ScriptedEndpoint::replying([Ok("one".into()), Err(ChatError::EmptyResponse)]);
        let handle = pollster::block_on(
            ep.start_session(&SessionSettings::default(), vec![HistoryTurn::user("hi")]),
        )
        .expect("session");

        assert_eq!(pollster::block_on(handle.send("a")), Ok("one".to_string()));
        assert_eq!(pollster::block_on(handle.send("b")), Err(ChatError::EmptyResponse));
        assert_eq!(ep.sent(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(ep.seeded(), vec![vec![HistoryTurn::user("hi")]]);
    }

    #[test]
    fn error_messages_name_the_failure() {
        let err = ChatError::Status { status: 403, message: "API key not valid".into() };
        assert_eq!(err.to_string(), "endpoint returned status 403: API key not valid");
        assert_eq!(
            ChatError::MissingApiKey("GEMINI_API_KEY").to_string(),
            "missing api key: set GEMINI_API_KEY"
        );
    }
}
