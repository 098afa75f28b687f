use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "textify")]
#[command(version)]
#[command(about = "Room-based chat with an @AI assistant")]
pub struct Cli {
    /// Path to a textify.toml configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat HTTP server
    Serve {
        /// Listen address (overrides [server].bind)
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database file (overrides [server].database)
        #[arg(long)]
        database: Option<PathBuf>,

        /// Keep everything in memory; nothing survives a restart
        #[arg(long, conflicts_with = "database")]
        ephemeral: bool,
    },

    /// Join a room and chat from the terminal
    Chat {
        /// Display name
        #[arg(long, short)]
        name: String,

        /// Room code; the room is created if it does not exist
        #[arg(long, short)]
        room: String,

        /// Server URL (overrides [client].server_url)
        #[arg(long)]
        server: Option<String>,

        /// Disable sound cues
        #[arg(long)]
        mute: bool,
    },

    /// Check or create a room on a running server
    Room {
        #[command(subcommand)]
        action: RoomAction,

        /// Server URL (overrides [client].server_url)
        #[arg(long, global = true)]
        server: Option<String>,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum RoomAction {
    /// Report whether a room with this code exists
    Check { code: String },
    /// Create a room; a random code is used when none is given
    Create { code: Option<String> },
}

// ---------------------------------------------------------------------------
// Interactive input
// ---------------------------------------------------------------------------

/// One line typed into `textify chat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Message(String),
    /// `/reply <n>`: reply to the n-th message from the end.
    Reply(usize),
    /// `/cancel`: drop the reply target.
    CancelReply,
    Quit,
    Help,
    Empty,
    Unknown(String),
}

pub const CHAT_HELP: &str = "commands: /reply <n>  /cancel  /quit  /help   (start a message with @ai to ask the assistant)";

pub fn parse_input(line: &str) -> ChatInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command) = trimmed.strip_prefix('/') else {
        return ChatInput::Message(line.trim_end_matches(['\r', '\n']).to_string());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("reply"), None) => ChatInput::Reply(1),
        (Some("reply"), Some(n)) => match n.parse::<usize>() {
            Ok(n) if n > 0 => ChatInput::Reply(n),
            _ => ChatInput::Unknown(trimmed.to_string()),
        },
        (Some("cancel"), _) => ChatInput::CancelReply,
        (Some("quit" | "exit"), _) => ChatInput::Quit,
        (Some("help"), _) => ChatInput::Help,
        _ => ChatInput::Unknown(trimmed.to_string()),
    }
}
