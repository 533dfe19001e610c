//! conversation state: transcript, session handle and ui interaction state.
//!
//! the transcript is append-only and alternates user/assistant. it may end
//! with a user message only while that message's reply is pending.

use std::sync::Arc;

use bevy::prelude::*;

use crate::endpoint::{ChatError, HistoryTurn, SessionHandle};

/// shown in place of any failed exchange; the real error only goes to the log.
pub const SEND_FAILURE_TEXT: &str = "Failed to send message";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    text: String,
    role: Role,
}

impl Message {
    pub fn text(&self) -> &str {
        &self.text
    }
    pub fn role(&self) -> Role {
        self.role
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChatPhase {
    #[default]
    Idle,
    AwaitingReply,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitRejected {
    EmptyPrompt,
    AwaitingReply,
}

/// an accepted submission, ready to be sent off-thread.
pub struct Exchange {
    pub prompt: String,
    pub session: Option<Arc<dyn SessionHandle>>,
}

/// the single owner of chat state. only the methods below mutate it.
#[derive(Resource, Default)]
pub struct Conversation {
    transcript: Vec<Message>,
    session: Option<Arc<dyn SessionHandle>>,
    draft: String,
    phase: ChatPhase,
    epoch: u64,
}

impl Conversation {
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn phase(&self) -> ChatPhase {
        self.phase
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.phase == ChatPhase::AwaitingReply
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// the draft stays editable while a reply is pending.
    pub fn edit_draft(&mut self, f: impl FnOnce(&mut String)) {
        f(&mut self.draft);
    }

    /// starts a new session build; results from older builds are stale.
    pub fn begin_session(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn session_epoch(&self) -> u64 {
        self.epoch
    }

    /// installs a freshly built handle, replacing any previous one.
    /// returns false (and drops the handle) when `epoch` is stale.
    pub fn install_session(&mut self, epoch: u64, handle: Arc<dyn SessionHandle>) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.session = Some(handle);
        true
    }

    /// a failed build for the current `epoch` leaves no handle behind.
    /// returns false when `epoch` is stale.
    pub fn fail_session(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.session = None;
        true
    }

    /// appends the user message and enters `AwaitingReply`.
    ///
    /// the stored message is the trimmed prompt; the endpoint receives the
    /// prompt as typed.
    pub fn submit(&mut self, prompt: &str) -> Result<Exchange, SubmitRejected> {
        if self.is_awaiting_reply() {
            return Err(SubmitRejected::AwaitingReply);
        }
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return Err(SubmitRejected::EmptyPrompt);
        }

        self.transcript.push(Message {
            text: trimmed.to_string(),
            role: Role::User,
        });
        self.draft.clear();
        self.phase = ChatPhase::AwaitingReply;

        Ok(Exchange {
            prompt: prompt.to_string(),
            session: self.session.clone(),
        })
    }

    /// appends exactly one assistant message for the pending exchange and
    /// returns to `Idle`. returns false if nothing was pending.
    pub fn resolve(&mut self, outcome: Result<String, ChatError>) -> bool {
        if !self.is_awaiting_reply() {
            return false;
        }
        let text = match outcome {
            Ok(text) if !text.trim().is_empty() => text,
            _ => SEND_FAILURE_TEXT.to_string(),
        };
        self.transcript.push(Message {
            text,
            role: Role::Assistant,
        });
        self.phase = ChatPhase::Idle;
        true
    }
}

/// transcript to endpoint history. a trailing unanswered user turn is left
/// out so the seeded history always alternates.
pub fn to_endpoint_history(transcript: &[Message]) -> Vec<HistoryTurn> {
    let complete = match transcript.last() {
        Some(m) if m.role == Role::User => &transcript[..transcript.len() - 1],
        _ => transcript,
    };
    complete
        .iter()
        .map(|m| match m.role {
            Role::User => HistoryTurn::user(m.text.clone()),
            Role::Assistant => HistoryTurn::model(m.text.clone()),
        })
        .collect()
}
