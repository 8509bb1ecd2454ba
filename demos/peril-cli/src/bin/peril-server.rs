//! The Peril game server: pauses and resumes the game and keeps the war
//! log.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use peril::server::{GameLogWriter, ServerSession};
use peril::{PerilConfig, logging};
use peril_cli::Repl;
use peril_game::{GameError, SERVER_HELP, ServerCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("info");
    let config = PerilConfig::from_env()?;

    println!("Starting Peril server...");
    let conn = Arc::new(
        peril::connect(&config.broker_url)
            .await
            .context("could not reach the broker")?,
    );
    let writer = GameLogWriter::open(&config.game_log_path).await?.with_echo(true);
    let session = ServerSession::start(conn, Arc::new(writer), config.subscribe_options()).await?;
    println!("Connected. {SERVER_HELP}");

    let mut repl = Repl::new();
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    repl.prompt();
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                break;
            }
            _ = watchdog.tick() => {
                if session.has_stopped() {
                    tracing::error!("game log subscription stopped");
                    break;
                }
            }
            line = repl.next_line() => {
                let Some(line) = line? else { break };
                match ServerCommand::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(ServerCommand::Pause)) => {
                        println!("Sending pause message");
                        session.pause().await?;
                    }
                    Ok(Some(ServerCommand::Resume)) => {
                        println!("Sending resume message");
                        session.resume().await?;
                    }
                    Ok(Some(ServerCommand::Help)) => println!("{SERVER_HELP}"),
                    Ok(Some(ServerCommand::Quit)) => break,
                    Err(GameError::UnknownCommand(word)) => {
                        tracing::debug!(%word, "unknown command");
                        println!("I don't understand the command");
                    }
                    Err(e) => println!("{e}"),
                }
                repl.prompt();
            }
        }
    }

    println!("Shutting down Peril server...");
    session.shutdown().await?;
    Ok(())
}
