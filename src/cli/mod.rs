//! Command-line front end for Dasi.

use std::path::{Path, PathBuf};

use base64::Engine;
use clap::{Args, Parser, Subcommand};

use crate::conversation::Mode;
use crate::error::{DasiError, Result};
use crate::types::ImageContent;

/// Dasi desktop assistant
#[derive(Parser, Debug)]
#[command(name = "dasi", version, about = "Dasi: a desktop assistant with human-approved tools")]
pub struct Cli {
    /// Config file (defaults to ~/.dasi/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question; tool requests are confirmed on the terminal
    Ask(AskArgs),
    /// Inspect or clear session history
    History(HistoryArgs),
    /// List the tools offered to the model
    Tools,
}

/// Arguments for `dasi ask`.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The query
    pub query: String,

    /// chat or compose
    #[arg(long, default_value = "chat")]
    pub mode: Mode,

    /// Session whose history is used and extended
    #[arg(long, default_value = crate::conversation::state::DEFAULT_SESSION_ID)]
    pub session: String,

    /// Text selected on screen
    #[arg(long)]
    pub selected_text: Option<String>,

    /// Image file to attach (a screenshot)
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Search the web before answering
    #[arg(long)]
    pub web: bool,

    /// Approve every tool request without asking
    #[arg(long)]
    pub auto_approve: bool,

    /// Model id override
    #[arg(short, long)]
    pub model: Option<String>,

    /// Print a suggested filename for the answer to stderr
    #[arg(long)]
    pub suggest_filename: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[command(subcommand)]
    pub command: HistoryCommands,
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    /// Print stored messages
    Show {
        #[arg(long, default_value = crate::conversation::state::DEFAULT_SESSION_ID)]
        session: String,
        /// Only the most recent N messages
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete a session's history
    Clear {
        #[arg(long, default_value = crate::conversation::state::DEFAULT_SESSION_ID)]
        session: String,
    },
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Read an image file into base64 content, guessing the MIME type from the
/// extension.
pub fn load_image(path: &Path) -> Result<ImageContent> {
    let bytes = std::fs::read(path).map_err(|e| {
        DasiError::InvalidArgument(format!("cannot read image {}: {e}", path.display()))
    })?;
    let mime_type = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    Ok(ImageContent {
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
        mime_type: mime_type.to_string(),
    })
}

/// `y`/`yes` (any case) approves; anything else rejects.
pub fn parse_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
