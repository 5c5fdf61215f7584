//! Headless frontends
//!
//! Wires the event listener, liveness monitor and coordinator together and
//! drives them from the terminal.

mod console;

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::common::{config::Config, Result};
use crate::events::EventServer;
use crate::session::{Coordinator, LivenessMonitor, Mode};

pub use console::{statement_cells, ConsoleCommand, ConsoleObserver, HELP};

/// How long background tasks get to wind down at exit
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the interactive debugger or the observe-only monitor
pub async fn run(config: Config, mode: Mode) -> Result<()> {
    let coordinator = Arc::new(Coordinator::new(&config, mode).with_observer(Arc::new(ConsoleObserver::new())));

    let server = EventServer::bind(&config.listen_addr(), coordinator.clone()).await?;
    let clients = server.clients();
    println!("{} port {}", "listening on".bold(), server.local_addr()?.port());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.run(shutdown_rx.clone()));
    let liveness = LivenessMonitor::new(config.liveness_interval(), clients);
    let liveness_task = tokio::spawn(liveness.run(coordinator.clone(), shutdown_rx));

    match mode {
        Mode::Control => {
            println!("type 'help' for commands");
            console_loop(&coordinator).await?;
        }
        Mode::ObserveOnly => {
            tokio::signal::ctrl_c().await?;
        }
    }

    tracing::info!("Shutting down");
    coordinator.shutdown().await;
    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, server_task).await.is_err() {
        tracing::debug!("Event listener did not stop in time");
    }
    if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, liveness_task).await.is_err() {
        tracing::debug!("Liveness monitor did not stop in time");
    }
    Ok(())
}

/// Read commands from stdin until quit, end of input or Ctrl-C
async fn console_loop(coordinator: &Coordinator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        match ConsoleCommand::parse(&line) {
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => execute(coordinator, command).await,
            Ok(None) => {}
            Err(message) => eprintln!("{}", message.red()),
        }
    }
    Ok(())
}

/// Run one console command and print its outcome
pub async fn execute(coordinator: &Coordinator, command: ConsoleCommand) {
    let outcome = match command {
        ConsoleCommand::Resume => coordinator.resume().await.map(|()| None),
        ConsoleCommand::Stop => coordinator.stop().await.map(|()| None),
        ConsoleCommand::FailTest => coordinator.fail_test().await.map(|()| None),
        ConsoleCommand::Ping => coordinator.ping().await.map(|()| Some("pong".to_string())),
        ConsoleCommand::Vars => coordinator.refresh_variables().await.map(|variables| {
            let lines: Vec<String> = variables
                .iter()
                .map(|(name, value)| format!("  {} = {}", name.cyan(), value))
                .collect();
            Some(lines.join("\n"))
        }),
        ConsoleCommand::RunKeyword { name, args } => coordinator
            .run_keyword(&name, &args)
            .await
            .map(|value| Some(crate::control::protocol::stringify(&value))),
        ConsoleCommand::Status => {
            let status = coordinator.status().await;
            Ok(Some(format!(
                "state: {}\npath: {}\ncontrol endpoint: {}",
                status.state, status.path, status.endpoint
            )))
        }
        ConsoleCommand::Help => Ok(Some(HELP.to_string())),
        ConsoleCommand::Quit => Ok(None),
    };

    match outcome {
        Ok(Some(text)) => println!("{}", text),
        Ok(None) => {}
        Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
    }
}
