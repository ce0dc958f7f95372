pub mod ai;
pub mod config;
pub mod conversation;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod transcript;
pub mod workflow;

// Re-export main types for convenience
pub use ai::{ChunkStream, CompletionService, GeminiClient};
pub use config::Config;
pub use conversation::{ChatTurn, Conversation, WorkflowTurn};
pub use coordinator::ChatCoordinator;
pub use error::ChatError;
pub use export::{export_file_name, format_transcript, save_transcript};
pub use transcript::{Message, Role, Snapshot, Transcript, TranscriptError};
pub use workflow::{Workflow, WorkflowStep};
