use std::sync::Arc;

use futures_util::StreamExt;

use crate::ai::CompletionService;
use crate::conversation::{ChatTurn, Conversation, WorkflowTurn};
use crate::error::ChatError;
use crate::transcript::TranscriptError;
use crate::workflow::{workflow_schema, Workflow};

/// Drives chat and workflow turns against an injected completion service.
///
/// `send_prompt` and `create_workflow` run a whole turn inline. A UI that must
/// keep rendering while a request is out can instead begin the turn on its
/// [`Conversation`], spawn [`ChatCoordinator::stream_turn`] or
/// [`ChatCoordinator::generate_workflow`], and feed the results back.
#[derive(Clone)]
pub struct ChatCoordinator {
    service: Arc<dyn CompletionService>,
}

impl ChatCoordinator {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    /// Run one chat turn. Returns false when the prompt was ignored.
    pub async fn send_prompt(&self, conversation: &mut Conversation, prompt: &str) -> bool {
        let Some(turn) = conversation.begin_chat(prompt) else {
            return false;
        };
        let outcome = self
            .stream_turn(&turn, |chunk| conversation.apply_chunk(chunk))
            .await;
        conversation.finish_chat(outcome);
        true
    }

    /// Run one workflow turn. Returns false when there was nothing to do.
    pub async fn create_workflow(&self, conversation: &mut Conversation) -> bool {
        let Some(turn) = conversation.begin_workflow() else {
            return false;
        };
        let outcome = self.generate_workflow(&turn).await;
        conversation.finish_workflow(outcome);
        true
    }

    /// Stream a reply, handing each non-empty chunk to `on_chunk` in arrival
    /// order. Stops at the first error from the service or from `on_chunk`.
    pub async fn stream_turn<F>(&self, turn: &ChatTurn, mut on_chunk: F) -> Result<(), ChatError>
    where
        F: FnMut(&str) -> Result<(), TranscriptError>,
    {
        let mut stream = self
            .service
            .stream_completion(&turn.prompt, &turn.history)
            .await?;

        let mut received = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            on_chunk(&chunk)?;
            received += 1;
        }

        tracing::debug!(chunks = received, "chat stream completed");
        Ok(())
    }

    /// Request, validate, and render a workflow for the turn's task
    pub async fn generate_workflow(&self, turn: &WorkflowTurn) -> Result<String, ChatError> {
        let text = self
            .service
            .structured_completion(&turn.prompt(), &workflow_schema())
            .await?;
        let workflow = Workflow::parse(&text)?;
        tracing::debug!(steps = workflow.steps.len(), "workflow generated");
        Ok(workflow.render())
    }
}
