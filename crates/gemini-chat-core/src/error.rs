use thiserror::Error;

use crate::transcript::TranscriptError;

/// Failure of a single chat or workflow turn.
///
/// Every variant is terminal for the current turn only; the conversation
/// stays usable afterwards.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gemini API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Prompt was blocked by the model provider ({0})")]
    Blocked(String),

    #[error("Malformed stream chunk: {0}")]
    MalformedStream(String),

    #[error("Invalid workflow data structure from API: {0}")]
    MalformedResponse(String),

    #[error("GEMINI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error(transparent)]
    Transcript(#[from] TranscriptError),
}
