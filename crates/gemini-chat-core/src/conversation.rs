//! Conversation state and the lifecycle of a single turn
//!
//! A turn is started with [`Conversation::begin_chat`] or
//! [`Conversation::begin_workflow`], which enforce the busy gate and insert the
//! placeholder, and ended with the matching `finish_*` call, which either
//! keeps the reply or rolls the placeholder back. Nothing here awaits; the
//! coordinator or a UI event loop drives the service calls in between.

use crate::error::ChatError;
use crate::transcript::{Message, Snapshot, Transcript, TranscriptError};
use crate::workflow::workflow_prompt;

/// Everything the service needs to stream one chat reply
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub prompt: String,
    /// Turns before the new user message
    pub history: Vec<Message>,
}

/// A structured workflow request for the latest user message
#[derive(Debug, Clone)]
pub struct WorkflowTurn {
    pub task: String,
}

impl WorkflowTurn {
    pub fn prompt(&self) -> String {
        workflow_prompt(&self.task)
    }
}

#[derive(Debug, Default)]
pub struct Conversation {
    transcript: Transcript,
    is_loading: bool,
    error: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.transcript.snapshot()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// A workflow can be requested once any user message exists
    pub fn can_create_workflow(&self) -> bool {
        !self.is_loading && self.transcript.last_user_message().is_some()
    }

    /// Start a chat turn. Returns `None` (and changes nothing) when busy or
    /// when the prompt is blank.
    pub fn begin_chat(&mut self, prompt: &str) -> Option<ChatTurn> {
        if self.is_loading || prompt.trim().is_empty() {
            return None;
        }

        let history = self.transcript.messages().to_vec();
        self.transcript.append(Message::user(prompt)).ok()?;
        if let Err(e) = self.transcript.append_placeholder(false) {
            tracing::error!("could not open reply placeholder: {}", e);
            let _ = self.transcript.drop_last();
            return None;
        }

        self.error = None;
        self.is_loading = true;
        tracing::debug!(history = history.len(), "chat turn started");

        Some(ChatTurn {
            prompt: prompt.to_string(),
            history,
        })
    }

    /// Append one streamed fragment to the open reply. Empty fragments are
    /// skipped.
    pub fn apply_chunk(&mut self, chunk: &str) -> Result<(), TranscriptError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.transcript.patch_last(chunk)
    }

    /// End a chat turn, keeping the accumulated reply or rolling it back
    pub fn finish_chat(&mut self, outcome: Result<(), ChatError>) {
        match outcome {
            Ok(()) => self.close_reply(),
            Err(e) => self.fail(format!("Error: {}", e)),
        }
        self.is_loading = false;
    }

    /// Start a workflow turn for the most recent user message
    pub fn begin_workflow(&mut self) -> Option<WorkflowTurn> {
        if self.is_loading {
            return None;
        }
        let task = self.transcript.last_user_message()?.text.clone();

        if let Err(e) = self.transcript.append_placeholder(true) {
            tracing::error!("could not open workflow placeholder: {}", e);
            return None;
        }

        self.error = None;
        self.is_loading = true;
        tracing::debug!("workflow turn started");

        Some(WorkflowTurn { task })
    }

    /// End a workflow turn with the rendered workflow or the failure
    pub fn finish_workflow(&mut self, outcome: Result<String, ChatError>) {
        let result = outcome.and_then(|text| self.transcript.set_last_text(text).map_err(ChatError::from));
        match result {
            Ok(()) => self.close_reply(),
            Err(e) => self.fail(format!("Error generating workflow: Failed to generate workflow. {}", e)),
        }
        self.is_loading = false;
    }

    fn close_reply(&mut self) {
        if let Err(e) = self.transcript.close_last() {
            tracing::error!("reply was not open at completion: {}", e);
        }
    }

    fn fail(&mut self, message: String) {
        tracing::warn!("{}; rolling back placeholder", message);
        if self.transcript.has_open_message() {
            let _ = self.transcript.drop_last();
        }
        self.error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Role;

    #[test]
    fn test_begin_chat_appends_user_and_placeholder() {
        let mut c = Conversation::new();
        let turn = c.begin_chat("hello").unwrap();

        assert!(turn.history.is_empty());
        assert_eq!(turn.prompt, "hello");
        assert_eq!(c.messages().len(), 2);
        assert_eq!(c.messages()[0], Message::user("hello"));
        assert_eq!(c.messages()[1].role, Role::Model);
        assert_eq!(c.messages()[1].text, "");
        assert!(c.is_loading());
    }

    #[test]
    fn test_history_excludes_live_prompt() {
        let mut c = Conversation::new();
        c.begin_chat("one").unwrap();
        c.apply_chunk("first reply").unwrap();
        c.finish_chat(Ok(()));

        let turn = c.begin_chat("two").unwrap();
        assert_eq!(turn.history, vec![Message::user("one"), Message::model("first reply")]);
    }

    #[test]
    fn test_blank_or_busy_prompt_is_ignored() {
        let mut c = Conversation::new();
        assert!(c.begin_chat("   \n\t").is_none());
        assert!(c.messages().is_empty());

        c.begin_chat("first").unwrap();
        let version = c.transcript().version();
        assert!(c.begin_chat("second").is_none());
        assert!(c.begin_workflow().is_none());
        assert_eq!(c.transcript().version(), version);
        assert_eq!(c.messages().len(), 2);
    }

    #[test]
    fn test_failure_rolls_back_one_entry() {
        let mut c = Conversation::new();
        c.begin_chat("hi").unwrap();
        c.apply_chunk("par").unwrap();
        c.apply_chunk("tial").unwrap();
        c.finish_chat(Err(ChatError::Api {
            status: 500,
            body: "boom".into(),
        }));

        assert_eq!(c.messages(), &[Message::user("hi")]);
        assert!(!c.is_loading());
        assert_eq!(c.error(), Some("Error: Gemini API error 500: boom"));
    }

    #[test]
    fn test_new_turn_clears_error() {
        let mut c = Conversation::new();
        c.begin_chat("hi").unwrap();
        c.finish_chat(Err(ChatError::MissingApiKey));
        assert!(c.error().is_some());

        c.begin_chat("again").unwrap();
        assert!(c.error().is_none());
    }

    #[test]
    fn test_workflow_uses_latest_user_message() {
        let mut c = Conversation::new();
        assert!(!c.can_create_workflow());
        assert!(c.begin_workflow().is_none());

        c.begin_chat("bake bread").unwrap();
        c.finish_chat(Ok(()));
        assert!(c.can_create_workflow());

        let turn = c.begin_workflow().unwrap();
        assert_eq!(turn.task, "bake bread");
        assert!(turn.prompt().ends_with("bake bread"));
        assert!(c.messages().last().unwrap().is_workflow);

        c.finish_workflow(Ok("**Bread**".to_string()));
        let last = c.messages().last().unwrap();
        assert_eq!(last.text, "**Bread**");
        assert!(!c.transcript().has_open_message());
        assert!(!c.is_loading());
    }

    #[test]
    fn test_workflow_failure_restores_transcript() {
        let mut c = Conversation::new();
        c.begin_chat("bake bread").unwrap();
        c.apply_chunk("ok").unwrap();
        c.finish_chat(Ok(()));
        let before = c.messages().to_vec();

        c.begin_workflow().unwrap();
        c.finish_workflow(Err(ChatError::MalformedResponse("missing `steps`".into())));

        assert_eq!(c.messages(), before.as_slice());
        let error = c.error().unwrap();
        assert!(error.starts_with("Error generating workflow: "));
        assert!(error.contains("missing `steps`"));
    }

    #[test]
    fn test_chunk_after_completion_is_rejected() {
        let mut c = Conversation::new();
        c.begin_chat("hi").unwrap();
        c.finish_chat(Ok(()));
        assert_eq!(c.apply_chunk("late"), Err(TranscriptError::NoOpenMessage));
        assert_eq!(c.apply_chunk(""), Ok(()));
    }
}
