use clap::{CommandFactory, Parser};
use colored::*;
use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use textify::assistant::Assistant;
use textify::cli::{parse_input, ChatInput, Cli, Command, RoomAction, CHAT_HELP};
use textify::client::{join_room, ChatApi, HttpChatApi};
use textify::config::{api_key_from_env, Config, API_KEY_ENV};
use textify::models::generate_room_code;
use textify::providers::GeminiBackend;
use textify::service::ChatService;
use textify::session::{ChatSession, SessionConfig};
use textify::sounds::{chat_sink, AudioOutput};
use textify::store::ChatStore;
use textify::transcript::{reply_candidate, Transcript};
use textify::web::Server;

fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn serve(
    config: &Config,
    bind: Option<String>,
    database: Option<PathBuf>,
    ephemeral: bool,
) -> Result<(), Box<dyn Error>> {
    let store = if ephemeral {
        ChatStore::open_in_memory()?
    } else {
        let path = database.unwrap_or_else(|| PathBuf::from(&config.server.database));
        ChatStore::open(&path)?
    };

    let models = config.assistant.models.clone();
    let assistant = match api_key_from_env() {
        Some(key) => Assistant::new(
            GeminiBackend::new(config.assistant.api_base.clone(), key, config.assistant.request_timeout()),
            models,
        ),
        None => {
            warn!(env = API_KEY_ENV, "no API key set, @ai requests will be answered with an apology");
            Assistant::unconfigured(models)
        }
    };

    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let server = Server::bind(&addr, config.server.max_body_bytes).await?;
    eprintln!(
        "{} http://{}",
        "textify listening on".bright_green().bold(),
        server.local_addr()?
    );
    server.run(Arc::new(ChatService::new(store, assistant))).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// room
// ---------------------------------------------------------------------------

async fn room(api: &HttpChatApi, action: RoomAction) -> Result<(), Box<dyn Error>> {
    match action {
        RoomAction::Check { code } => {
            let res = api.check_room(&code).await?;
            match res.room_id.filter(|_| res.exists) {
                Some(id) => println!("{} {} ({})", "exists".bright_green(), code, id),
                None => println!("{} {}", "no such room".bright_yellow(), code),
            }
        }
        RoomAction::Create { code } => {
            let code = code.unwrap_or_else(generate_room_code);
            let room = api.create_room(&code).await?;
            println!("{} {} ({})", "created".bright_green(), room.code.bright_white().bold(), room.id);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// chat
// ---------------------------------------------------------------------------

async fn chat(config: &Config, server_url: String, name: String, code: String, mute: bool) -> Result<(), Box<dyn Error>> {
    let name = name.trim().to_string();
    let code = code.trim().to_string();
    if name.is_empty() {
        return Err("display name must not be blank".into());
    }

    let api = Arc::new(HttpChatApi::new(server_url, config.client.request_timeout()));
    let room_id = join_room(api.as_ref(), &code).await?;

    let cues = chat_sink(AudioOutput::terminal(), mute);

    let mut session = ChatSession::new(api, name.clone(), cues, SessionConfig::from(&config.client));
    let mut changes = session.subscribe();
    let mut transcript = Transcript::new(name.clone());

    session.enter(room_id);
    println!(
        "{} {} as {}",
        "joined room".bright_green().bold(),
        code.bright_white().bold(),
        name.bright_white()
    );
    println!("{}", CHAT_HELP.dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                for line in transcript.render(&session.snapshot()) {
                    println!("{line}");
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    ChatInput::Message(text) => {
                        session.submit(&text);
                    }
                    ChatInput::Reply(n) => {
                        let snapshot = session.snapshot();
                        match reply_candidate(&snapshot, n) {
                            Some(target) => {
                                session.set_reply_target(Some(target));
                                println!("{} {}: {}", "replying to".dimmed(), target.user_name, target.content.dimmed());
                            }
                            None => println!("{}", format!("no message #{n} to reply to").yellow()),
                        }
                    }
                    ChatInput::CancelReply => {
                        session.set_reply_target(None);
                        println!("{}", "reply cancelled".dimmed());
                    }
                    ChatInput::Help => println!("{}", CHAT_HELP.dimmed()),
                    ChatInput::Quit => break,
                    ChatInput::Empty => {}
                    ChatInput::Unknown(cmd) => {
                        println!("{}", format!("unknown command {cmd}; /help lists commands").yellow());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.leave();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // The chat transcript owns stdout; keep diagnostics quiet there.
    init_tracing(match cli.command {
        Command::Serve { .. } => "textify=info",
        _ => "textify=warn",
    });

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { bind, database, ephemeral } => serve(&config, bind, database, ephemeral).await,
        Command::Chat { name, room: code, server, mute } => {
            let url = server.unwrap_or_else(|| config.client.server_url.clone());
            chat(&config, url, name, code, mute).await
        }
        Command::Room { action, server } => {
            let url = server.unwrap_or_else(|| config.client.server_url.clone());
            room(&HttpChatApi::new(url, config.client.request_timeout()), action).await
        }
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "textify", &mut io::stdout());
            Ok(())
        }
    }
}
