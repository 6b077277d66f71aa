//! gptdrive: drive a ChatGPT web session from the terminal.

use std::io::Write;
use std::path::PathBuf;

use gptdrive_core::SessionConfig;
use gptdrive_session::{ChatSession, MessageOptions, RegenerateOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod repl;

use repl::ReplCommand;

fn resolve_config_path() -> PathBuf {
    std::env::var("GPTDRIVE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("gptdrive.json"))
}

fn print_help() {
    println!("gptdrive: drive a ChatGPT web session from the terminal");
    println!();
    println!("Usage: gptdrive <command>");
    println!();
    println!("Commands:");
    println!("  ask <message...>         Send one message and print the answer");
    println!("  chat                     Interactive chat on stdin (/help inside)");
    println!("  session                  Print the current account's session data");
    println!("  help                     Show this help message");
    println!();
    println!("Configuration is read from $GPTDRIVE_CONFIG (default ./gptdrive.json);");
    println!("GPTDRIVE_SESSION_TOKEN, GPTDRIVE_PROXY and GPTDRIVE_CHROME_PATH override it.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();
    let config = SessionConfig::load(&config_path);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    match command {
        "--help" | "-h" | "help" => {
            print_help();
            return Ok(());
        }
        "ask" if args.len() < 3 => {
            eprintln!("Usage: gptdrive ask <message...>");
            std::process::exit(1);
        }
        "ask" | "chat" | "session" => {}
        other => {
            eprintln!("Unknown command: {}. Use 'gptdrive help' for usage.", other);
            std::process::exit(1);
        }
    }

    info!("Using config {}", config_path.display());
    let mut session = ChatSession::launch(config).await?;

    let outcome = match command {
        "ask" => ask(&mut session, &args[2..].join(" ")).await,
        "chat" => chat(&mut session).await,
        _ => print_session(&session).await,
    };

    session.close().await;
    outcome
}

async fn ask(session: &mut ChatSession, message: &str) -> anyhow::Result<()> {
    let response = session
        .send_message(message, &MessageOptions::default())
        .await?;
    println!("{}", response.content);
    if let Some(id) = &response.conversation_id {
        eprintln!("conversation: {}", id);
    }
    Ok(())
}

async fn print_session(session: &ChatSession) -> anyhow::Result<()> {
    let data = session.get_session_data().await?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

async fn chat(session: &mut ChatSession) -> anyhow::Result<()> {
    println!("{}", repl::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match repl::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Invalid(reason) => {
                eprintln!("{}", reason);
                eprintln!("{}", repl::HELP);
            }
            ReplCommand::Message(text) => {
                match session.send_message(&text, &MessageOptions::default()).await {
                    Ok(response) => println!("{}\n", response.content),
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            ReplCommand::Regenerate => {
                match session
                    .regenerate_response(&RegenerateOptions::default())
                    .await
                {
                    Ok(response) => println!("{}\n", response.content),
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            ReplCommand::Reset => report(session.reset_conversation().await, "Conversation reset"),
            ReplCommand::Theme(theme) => {
                report(session.switch_theme(theme).await, "Theme request sent")
            }
            ReplCommand::History(enabled) => report(
                session.toggle_chat_history(enabled).await,
                "Chat history setting applied",
            ),
            ReplCommand::Session => match session.get_session_data().await {
                Ok(data) => println!("{}", data),
                Err(e) => eprintln!("error: {}", e),
            },
        }
    }
    Ok(())
}

fn report(result: gptdrive_core::Result<()>, done: &str) {
    match result {
        Ok(()) => println!("{}", done),
        Err(e) => warn!("{}", e),
    }
}
