use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use clap::Parser;
use gemini_chat_core::{ChatCoordinator, Config, Conversation, GeminiClient};
use tracing_subscriber::EnvFilter;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "gemini-chat")]
#[command(about = "Chat with Gemini in the terminal, with streaming replies and workflow generation")]
#[command(version)]
struct Cli {
    /// Gemini model to use (overrides config)
    #[arg(short, long)]
    model: Option<String>,
    /// Directory for exported transcripts (overrides config)
    #[arg(long)]
    export_dir: Option<PathBuf>,
    /// Log level for this application (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
    /// Send a single prompt, print the streamed reply, and exit
    #[arg(short, long)]
    prompt: Option<String>,
    /// With --prompt, also print a step-by-step workflow for it
    #[arg(long, requires = "prompt")]
    workflow: bool,
    /// Persist --model and --export-dir into the config file
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let interactive = cli.prompt.is_none();
    init_logging(cli.log_level.as_deref(), interactive)?;

    let mut config = Config::load()?;
    if let Some(model) = &cli.model {
        config.model = Some(model.clone());
    }
    if let Some(dir) = &cli.export_dir {
        config.export_dir = Some(dir.clone());
    }
    if cli.save_config {
        config.save()?;
        tracing::info!("saved config to {:?}", Config::config_dir()?);
    }

    // The service client is built once and handed to the coordinator
    let client = GeminiClient::from_config(&config)?;
    let model = client.model().to_string();
    let coordinator = ChatCoordinator::new(Arc::new(client));
    tracing::info!(model = %model, interactive, "gemini-chat starting");

    match cli.prompt {
        Some(prompt) => run_once(&coordinator, &prompt, cli.workflow).await,
        None => run_tui(coordinator, model, config.export_dir_or_default()).await,
    }
}

/// Log to stderr in one-shot mode; the TUI owns the terminal, so there logs go
/// to a file in the config directory.
fn init_logging(level: Option<&str>, to_file: bool) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(format!(
            "gemini_chat_core={level},gemini_chat_tui={level}"
        ))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gemini_chat_core=info,gemini_chat_tui=info")),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if to_file {
        let dir = Config::config_dir()?;
        fs::create_dir_all(&dir)?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("gemini-chat.log"))?;
        builder.with_ansi(false).with_writer(Mutex::new(log_file)).try_init()
    } else {
        builder.with_writer(std::io::stderr).try_init()
    };
    installed.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

async fn run_once(coordinator: &ChatCoordinator, prompt: &str, workflow: bool) -> Result<()> {
    let mut stdout = std::io::stdout();
    print_reply(coordinator, prompt, workflow, &mut stdout).await
}

/// Stream one reply (and optionally a workflow) to `out`. The first write
/// failure stops further output and is reported once the turn settles.
async fn print_reply<W: Write>(
    coordinator: &ChatCoordinator,
    prompt: &str,
    workflow: bool,
    out: &mut W,
) -> Result<()> {
    let mut conversation = Conversation::new();
    let turn = conversation
        .begin_chat(prompt)
        .ok_or_else(|| anyhow!("Prompt is empty"))?;

    let mut write_error: Option<std::io::Error> = None;
    let outcome = coordinator
        .stream_turn(&turn, |chunk| {
            if write_error.is_none() {
                if let Err(e) = write!(out, "{}", chunk).and_then(|_| out.flush()) {
                    write_error = Some(e);
                }
            }
            conversation.apply_chunk(chunk)
        })
        .await;
    conversation.finish_chat(outcome);

    if let Some(e) = write_error {
        return Err(anyhow!("Failed to write reply: {}", e));
    }
    writeln!(out)?;
    if let Some(error) = conversation.error() {
        // main adds its own "Error: " prefix
        return Err(anyhow!("{}", error.trim_start_matches("Error: ")));
    }

    if workflow {
        coordinator.create_workflow(&mut conversation).await;
        if let Some(error) = conversation.error() {
            return Err(anyhow!("{}", error));
        }
        if let Some(last) = conversation.messages().last() {
            writeln!(out, "\n{}", last.text)?;
        }
    }

    out.flush()?;
    Ok(())
}

async fn run_tui(coordinator: ChatCoordinator, model: String, export_dir: PathBuf) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let mut app = App::new(coordinator, model, export_dir, events.sender());

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event)?,
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    result
}
