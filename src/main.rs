//! JGPT console - terminal front end for the streaming chat client
//!
//! A line-oriented REPL over the session controller: plain input starts a
//! streaming turn (Ctrl-C stops generation without quitting), slash
//! commands cover conversation bookkeeping.

use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jgpt_client::api::ApiClient;
use jgpt_client::auth::TokenStore;
use jgpt_client::{Config, Notice, SessionController, TurnOutcome};

const HELP: &str = "\
commands:
  /new            start a new conversation
  /list           list stored conversations
  /open <id>      load a stored conversation
  /delete <id>    delete a conversation
  /reason         toggle the reasoning endpoint
  /quit           exit
anything else is sent as a chat message; Ctrl-C stops generation.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jgpt_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;

    let store = TokenStore::new(&config.data_dir);
    let (token, claims) = match store.load()? {
        Some(found) => found,
        None => match std::env::var("JGPT_TOKEN") {
            Ok(fresh) => {
                let claims = store.save(&fresh)?;
                (fresh, claims)
            }
            Err(_) => anyhow::bail!(
                "no stored session; set JGPT_TOKEN to a bearer token issued by the backend"
            ),
        },
    };

    tracing::info!(
        user = %claims.sub,
        role = claims.role.as_deref().unwrap_or("viewer"),
        api = %config.api_base,
        "JGPT console ready"
    );

    let api = ApiClient::new(&config, token)?;
    let (mut controller, mut notices) =
        SessionController::new(Arc::new(api), &config.default_persona, &config.default_model);

    controller.refresh_conversations().await;
    println!(
        "{} stored conversation(s). Type /help for commands.",
        controller.conversations().len()
    );

    // Streamed text and status lines render as they arrive; list refreshes
    // from the background task are applied on the next prompt.
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            match notice {
                Notice::AnswerDelta(text) => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                Notice::AgentStatus(status) => {
                    if !status.is_empty() {
                        eprintln!("  [{status}]");
                    }
                }
                Notice::StreamError(err) => eprintln!("  [stream error: {err}]"),
                Notice::SessionExpired => eprintln!("  [session expired: please log in again]"),
                Notice::Error(err) => eprintln!("  [error: {err}]"),
                Notice::ConversationsRefreshed(list) => {
                    tracing::debug!(count = list.len(), "conversation list updated");
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(&controller);
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();

        match line.split_once(' ').map_or((line.as_str(), ""), |(c, r)| (c, r.trim())) {
            ("/quit", _) | ("/exit", _) => break,
            ("/help", _) => println!("{HELP}"),
            ("/new", _) => {
                controller.new_conversation();
                println!("started a new conversation");
            }
            ("/list", _) => {
                controller.refresh_conversations().await;
                for conv in controller.conversations() {
                    println!("  {:>6}  {}  ({}, {})", conv.id, conv.title, conv.mode, conv.model);
                }
            }
            ("/open", arg) => match arg.parse() {
                Ok(id) => {
                    controller.load_conversation(id).await;
                    println!("{} message(s) loaded", controller.messages().len());
                }
                Err(_) => println!("usage: /open <id>"),
            },
            ("/delete", arg) => match arg.parse() {
                Ok(id) => controller.delete_conversation(id).await,
                Err(_) => println!("usage: /delete <id>"),
            },
            ("/reason", _) => {
                controller.reasoning = !controller.reasoning;
                println!(
                    "reasoning mode {}",
                    if controller.reasoning { "on" } else { "off" }
                );
            }
            _ => {
                run_turn(&mut controller, &line).await;
            }
        }
    }

    Ok(())
}

fn prompt(controller: &SessionController) {
    match controller.active_conversation() {
        Some(id) => print!("[{id}]> "),
        None => print!("> "),
    }
    let _ = std::io::stdout().flush();
}

/// Drive one streaming turn, mapping Ctrl-C to a stop of the in-flight
/// generation rather than process exit.
async fn run_turn(controller: &mut SessionController, input: &str) {
    let handle = controller.stop_handle();
    let stopper = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });

    let outcome = controller.send(input).await;
    stopper.abort();
    println!();

    match outcome {
        TurnOutcome::Stopped => println!("(generation stopped)"),
        TurnOutcome::Completed => {
            let state = controller.stream_state();
            if !state.citations.is_empty() {
                println!("-- {} citation(s) --", state.citations.len());
                for c in &state.citations {
                    println!("  [{}] {} ({})", c.chunk_id, c.source, c.domain);
                }
            }
        }
        TurnOutcome::Failed | TurnOutcome::Ignored => {}
    }
}
