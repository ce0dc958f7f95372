use std::path::PathBuf;

use gemini_chat_core::{save_transcript, ChatCoordinator, ChatError, Conversation};
use ratatui::layout::Rect;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::tui::AppEvent;

pub struct App {
    // Core state
    pub should_quit: bool,
    pub conversation: Conversation,
    pub coordinator: ChatCoordinator,
    pub model: String,
    pub export_dir: PathBuf,

    // Prompt input
    pub input: String,
    pub input_cursor: usize, // cursor position in chars

    // Chat view
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub follow_tail: bool,
    pub chat_area: Option<Rect>,

    // Transient notice in the footer (export results and the like)
    pub status: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    events: mpsc::UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        coordinator: ChatCoordinator,
        model: String,
        export_dir: PathBuf,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            should_quit: false,
            conversation: Conversation::new(),
            coordinator,
            model,
            export_dir,

            input: String::new(),
            input_cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            follow_tail: true,
            chat_area: None,

            status: None,
            animation_frame: 0,

            events,
        }
    }

    /// Send the current input as a chat turn. Ignored while busy or blank;
    /// the input is kept in that case.
    pub fn submit_prompt(&mut self) {
        let Some(turn) = self.conversation.begin_chat(&self.input) else {
            return;
        };
        self.input.clear();
        self.input_cursor = 0;
        self.status = None;
        self.follow_tail = true;
        self.scroll_chat_to_bottom();

        let coordinator = self.coordinator.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let chunk_tx = tx.clone();
            let outcome = coordinator
                .stream_turn(&turn, |chunk| {
                    // The UI loop owns the transcript; chunks are applied there
                    let _ = chunk_tx.send(AppEvent::Chunk(chunk.to_string()));
                    Ok(())
                })
                .await;
            let _ = tx.send(AppEvent::ChatFinished(outcome));
        });
    }

    /// Generate a workflow from the most recent user message
    pub fn request_workflow(&mut self) {
        let Some(turn) = self.conversation.begin_workflow() else {
            return;
        };
        self.status = None;
        self.follow_tail = true;
        self.scroll_chat_to_bottom();

        let coordinator = self.coordinator.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let outcome = coordinator.generate_workflow(&turn).await;
            let _ = tx.send(AppEvent::WorkflowFinished(outcome));
        });
    }

    pub fn on_chunk(&mut self, chunk: &str) {
        if let Err(e) = self.conversation.apply_chunk(chunk) {
            tracing::error!("dropped chunk: {}", e);
            return;
        }
        if self.follow_tail {
            self.scroll_chat_to_bottom();
        }
    }

    pub fn on_chat_finished(&mut self, outcome: Result<(), ChatError>) {
        self.conversation.finish_chat(outcome);
        if self.follow_tail {
            self.scroll_chat_to_bottom();
        }
    }

    pub fn on_workflow_finished(&mut self, outcome: Result<String, ChatError>) {
        self.conversation.finish_workflow(outcome);
        if self.follow_tail {
            self.scroll_chat_to_bottom();
        }
    }

    /// Export the transcript as a timestamped text file
    pub fn save_history(&mut self) {
        let messages = self.conversation.messages();
        self.status = match save_transcript(messages, &self.export_dir, OffsetDateTime::now_utc()) {
            Ok(Some(path)) => Some(format!("Saved: {}", path.display())),
            Ok(None) => Some("Nothing to save yet".to_string()),
            Err(e) => {
                tracing::warn!("export failed: {:#}", e);
                Some(format!("Save failed: {}", e))
            }
        };
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.conversation.is_loading() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_tail = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max_scroll = self.max_chat_scroll();
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max_scroll);
        self.follow_tail = self.chat_scroll >= max_scroll;
    }

    pub fn scroll_chat_to_bottom(&mut self) {
        self.chat_scroll = self.max_chat_scroll();
    }

    fn max_chat_scroll(&self) -> u16 {
        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };
        self.chat_line_count().saturating_sub(visible_height)
    }

    /// Rendered height of the chat log, accounting for wrapping
    pub fn chat_line_count(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for msg in self.conversation.messages() {
            total_lines = total_lines.saturating_add(1); // Role line
            let text = if msg.text.is_empty() { " " } else { msg.text.as_str() };
            for line in text.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                let wrapped = (char_count / wrap_width + 1) as u16;
                total_lines = total_lines.saturating_add(wrapped);
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }
        total_lines
    }
}
