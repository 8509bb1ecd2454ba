//! The Peril player client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use peril::client::ClientSession;
use peril::{PerilConfig, PerilError, logging};
use peril_cli::Repl;
use peril_game::{CLIENT_HELP, ClientCommand, GameError};
use peril_pubsub::BrokerConnection;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("info");
    let config = PerilConfig::from_env()?;
    let mut repl = Repl::new();

    println!("Starting Peril client...");
    let Some(username) = ask_username(&mut repl).await? else {
        return Ok(());
    };

    let conn = Arc::new(
        peril::connect(&config.broker_url)
            .await
            .context("could not reach the broker")?,
    );
    let session = ClientSession::start(conn, &username, config.subscribe_options()).await?;
    println!("Welcome, {username}!\n{CLIENT_HELP}");

    let mut watchdog = tokio::time::interval(Duration::from_millis(500));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    repl.prompt();
    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                break Ok(());
            }
            _ = watchdog.tick() => {
                if session.has_stopped() {
                    tracing::error!("a subscription stopped");
                    break Ok(());
                }
            }
            line = repl.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                };
                match ClientCommand::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(ClientCommand::Quit)) => {
                        println!("Goodbye!");
                        break Ok(());
                    }
                    Ok(Some(command)) => {
                        if let Err(e) = run(&session, command).await {
                            break Err(e);
                        }
                    }
                    Err(GameError::UnknownCommand(word)) => {
                        tracing::debug!(%word, "unknown command");
                        println!("What ?!?");
                    }
                    Err(e) => println!("{e}"),
                }
                repl.prompt();
            }
        }
    };

    println!("Shutting down Peril client...");
    let closed = session.shutdown().await;
    outcome?;
    closed?;
    Ok(())
}

async fn ask_username(repl: &mut Repl) -> anyhow::Result<Option<String>> {
    loop {
        println!("Please enter your username:");
        repl.prompt();
        let Some(line) = repl.next_line().await? else {
            return Ok(None);
        };
        match line.split_whitespace().next() {
            Some(name) => return Ok(Some(name.to_string())),
            None => println!("The username can not be empty"),
        }
    }
}

/// Runs one command. Rejected commands are printed; broker failures end
/// the client.
async fn run<C: BrokerConnection>(
    session: &ClientSession<C>,
    command: ClientCommand,
) -> anyhow::Result<()> {
    match command {
        ClientCommand::Spawn { rank, location } => {
            let unit = session.spawn(rank, location).await;
            println!("Spawned a(n) {} in {} with id {}", unit.rank, unit.location, unit.id);
        }
        ClientCommand::Move { location, unit_ids } => match session.move_units(location, &unit_ids).await {
            Ok(mv) => println!("Moved {} unit(s) to {}", mv.units.len(), mv.to_location),
            Err(PerilError::Game(e)) => println!("{e}"),
            Err(e) => return Err(e.into()),
        },
        ClientCommand::Status => print!("{}", session.status().await),
        ClientCommand::Help => println!("{CLIENT_HELP}"),
        ClientCommand::Spam => println!("Spamming not allowed yet!"),
        ClientCommand::Quit => {}
    }
    Ok(())
}
