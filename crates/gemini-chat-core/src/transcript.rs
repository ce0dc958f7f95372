//! UI-agnostic conversation transcript
//!
//! The transcript is an append-only log of messages. Only the trailing model
//! message may change, and only while it is "open" (a request is in flight).
//! Every mutation publishes a fresh snapshot: consumers holding an earlier
//! [`Snapshot`] keep seeing the old value, and can detect a change by comparing
//! versions or with [`Snapshot::ptr_eq`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// The author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(default, rename = "isWorkflow", skip_serializing_if = "std::ops::Not::not")]
    pub is_workflow: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            is_workflow: false,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            is_workflow: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("transcript is empty")]
    Empty,
    #[error("last message is not a model message")]
    NotModelMessage,
    #[error("a model message is still open")]
    MessageOpen,
    #[error("no model message is open")]
    NoOpenMessage,
}

/// An immutable view of the transcript at one version
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: u64,
    messages: Arc<Vec<Message>>,
}

impl Snapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True when both snapshots share the same underlying message list
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.messages, &other.messages)
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    messages: Arc<Vec<Message>>,
    version: u64,
    open: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: self.version,
            messages: Arc::clone(&self.messages),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the trailing message is still being filled by a request
    pub fn has_open_message(&self) -> bool {
        self.open
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent user message, searching backward from the end
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    pub fn append(&mut self, message: Message) -> Result<(), TranscriptError> {
        if self.open {
            return Err(TranscriptError::MessageOpen);
        }
        self.publish(|messages| messages.push(message));
        Ok(())
    }

    /// Append an empty model message that stays open until closed or dropped
    pub fn append_placeholder(&mut self, is_workflow: bool) -> Result<(), TranscriptError> {
        if self.open {
            return Err(TranscriptError::MessageOpen);
        }
        self.publish(|messages| {
            messages.push(Message {
                role: Role::Model,
                text: String::new(),
                is_workflow,
            })
        });
        self.open = true;
        Ok(())
    }

    /// Concatenate `delta` onto the trailing model message
    pub fn patch_last(&mut self, delta: &str) -> Result<(), TranscriptError> {
        let last = self.last_model()?;
        let mut text = String::with_capacity(last.text.len() + delta.len());
        text.push_str(&last.text);
        text.push_str(delta);
        self.replace_last(text);
        Ok(())
    }

    /// Replace the trailing model message's text wholesale
    pub fn set_last_text(&mut self, full: impl Into<String>) -> Result<(), TranscriptError> {
        self.last_model()?;
        self.replace_last(full.into());
        Ok(())
    }

    /// Mark the open message as final. It becomes immutable from here on.
    pub fn close_last(&mut self) -> Result<(), TranscriptError> {
        if !self.open {
            return Err(TranscriptError::NoOpenMessage);
        }
        self.open = false;
        Ok(())
    }

    /// Remove the trailing message (rollback after a failed request)
    pub fn drop_last(&mut self) -> Result<Message, TranscriptError> {
        let mut removed = None;
        if self.messages.is_empty() {
            return Err(TranscriptError::Empty);
        }
        self.publish(|messages| removed = messages.pop());
        self.open = false;
        removed.ok_or(TranscriptError::Empty)
    }

    fn last_model(&self) -> Result<&Message, TranscriptError> {
        match self.messages.last() {
            None => Err(TranscriptError::Empty),
            Some(m) if m.role != Role::Model => Err(TranscriptError::NotModelMessage),
            Some(_) if !self.open => Err(TranscriptError::NoOpenMessage),
            Some(m) => Ok(m),
        }
    }

    // The trailing element is swapped for a new value rather than edited.
    fn replace_last(&mut self, text: String) {
        self.publish(|messages| {
            if let Some(last) = messages.pop() {
                messages.push(Message { text, ..last });
            }
        });
    }

    fn publish(&mut self, mutate: impl FnOnce(&mut Vec<Message>)) {
        let mut next = Vec::with_capacity(self.messages.len() + 1);
        next.extend(self.messages.iter().cloned());
        mutate(&mut next);
        self.messages = Arc::new(next);
        self.version += 1;
    }
}
