mod config;
mod coordinator;
mod engine;
mod error;
mod invoke;
mod llm;
mod position;
mod rate_limit;
mod reply;
mod state;
mod store;
mod util;
mod validator;

use std::{
    io::{self, Read},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{LevelFilter, debug, info};
use serde::Serialize;
use serde_json::json;

use crate::{
    config::Config,
    coordinator::{InboundThread, TurnCoordinator, phase},
    engine::{StockfishEngine, init_move_source},
    invoke::{InvokeRequest, InvokeResponse},
    llm::{ChatClient, TextGenerator},
    state::{Colour, Difficulty},
    store::JsonFileStore,
    validator::init_validator,
};

/// Plays one correspondence chess game over an email-like message thread.
#[derive(Debug, Parser)]
#[command(name = "mail-chess", version)]
struct Cli {
    /// Where the game state is kept between runs.
    #[arg(long, default_value = "mail_chess_state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Start a new game, discarding the current one.
    New {
        #[arg(long)]
        difficulty: Option<Difficulty>,
        #[arg(long)]
        colour: Option<Colour>,
    },
    /// Record the thread that carries the current game.
    Attach { conversation_ref: String },
    /// Process a thread's inbound message bodies, read from stdin as a JSON array of strings.
    Poll {
        #[arg(long)]
        thread: String,
    },
    /// Answer one opponent-invocation request read from stdin as JSON.
    Invoke,
    /// Print the stored game.
    Show,
}

fn setup_logging() -> Result<()> {
    let level = std::env::var("MAIL_CHESS_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    // stdout is reserved for results
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {:<5} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(io::stderr())
        .apply()?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("reading stdin")?;
    Ok(input)
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;
    let cli = Cli::parse();
    let config = Arc::new(Config::from_env()?);
    debug!(
        "opponent {:?}, validator {:?}, state file {}",
        config.opponent,
        config.validator,
        cli.state.display()
    );

    if let Cmd::Invoke = cli.command {
        let engine = StockfishEngine::new(config.clone());
        let response = match serde_json::from_str::<InvokeRequest>(&read_stdin()?) {
            Ok(request) => invoke::invoke(&engine, &config, &request).await,
            Err(e) => InvokeResponse::bad_input(format!("malformed request: {e}")),
        };
        return print_json(&response);
    }

    let generator: Arc<dyn TextGenerator> = Arc::new(ChatClient::new(&config)?);
    let coordinator = TurnCoordinator::new(
        config.clone(),
        init_validator(&config, generator.clone()),
        init_move_source(&config, generator),
        Box::new(JsonFileStore::new(&cli.state)),
    );

    match cli.command {
        Cmd::New { difficulty, colour } => {
            let notices = coordinator.new_game(difficulty, colour).await?;
            print_json(&notices)?;
        }
        Cmd::Attach { conversation_ref } => {
            coordinator.attach(&conversation_ref).await?;
            info!("game now follows thread {conversation_ref}");
        }
        Cmd::Poll { thread } => {
            let messages: Vec<String> =
                serde_json::from_str(&read_stdin()?).context("stdin must be a JSON array of strings")?;
            let report = coordinator
                .poll(&InboundThread {
                    conversation_ref: thread,
                    messages,
                })
                .await?;
            print_json(&report.notices)?;
            if let Some(failure) = report.failure {
                return Err(failure.into());
            }
        }
        Cmd::Show => {
            let state = coordinator.snapshot().await?;
            print_json(&json!({
                "gameToken": state.game_token,
                "phase": format!("{:?}", phase(&state)),
                "position": state.position.as_str(),
                "sideToMove": state.position.side_to_move(),
                "castling": state.position.castling(),
                "enPassant": state.position.en_passant(),
                "halfmoveClock": state.position.halfmoves(),
                "fullmoveNumber": state.position.fullmoves(),
                "moveHistory": state.history_line(),
                "plyNumber": state.ply_number,
                "difficulty": state.difficulty,
                "humanColour": state.human_colour,
                "conversationRef": state.conversation_ref,
                "lastConsumedCount": state.last_consumed_count,
            }))?;
        }
        Cmd::Invoke => {}
    }

    Ok(())
}
