//! Mock test runner for manual and integration testing
//!
//! Plays the role of a running test: streams a small suite to the debugger,
//! pauses in one breakpoint and waits to be released over the control channel.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use rwb::common::logging;
use rwb::control::{ControlCommand, Endpoint};
use rwb::remote::{ControlHandler, ControlServer, EventSender};
use rwb::session::marker::{break_marker, CONTINUE_MARKER};

#[derive(Parser)]
#[command(name = "mock_runner", about = "Simulated test run for the rwb debugger")]
struct Args {
    /// Debugger event listener address
    #[arg(long, default_value = "127.0.0.1:8910")]
    events: String,

    /// Port for the breakpoint control server (0 picks a free one)
    #[arg(long, default_value_t = 0)]
    control_port: u16,
}

/// How the debugger released the breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    Resume,
    Stop,
    FailTest,
}

struct MockHandler {
    release_tx: mpsc::UnboundedSender<Release>,
}

#[async_trait]
impl ControlHandler for MockHandler {
    async fn handle(&self, command: ControlCommand) -> Result<Value, String> {
        tracing::info!(%command, "Control command");
        let release = match command {
            ControlCommand::Ping => return Ok(json!("pong")),
            ControlCommand::Ready => return Ok(Value::Null),
            ControlCommand::GetVariables => {
                return Ok(json!({
                    "${SUITE NAME}": "Mock Suite",
                    "${TEST NAME}": "Paused Test",
                    "${count}": 3,
                    "@{items}": ["apple", "pear"],
                }))
            }
            ControlCommand::RunKeyword { name, args } => {
                return match name.as_str() {
                    "Log" | "Catenate" => Ok(json!(args.join(" "))),
                    "Get Variable Value" => Ok(json!(args.first().cloned().unwrap_or_default())),
                    other => Err(format!("No keyword with name '{}' found.", other)),
                };
            }
            ControlCommand::Resume => Release::Resume,
            ControlCommand::Stop => Release::Stop,
            ControlCommand::FailTest => Release::FailTest,
        };
        let _ = self.release_tx.send(release);
        Ok(Value::Null)
    }
}

#[tokio::main]
async fn main() {
    logging::init_cli();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> rwb::Result<()> {
    let mut events = EventSender::connect(&args.events).await?;

    events.send("pid", vec![json!(std::process::id())]).await?;
    events.send("start_suite", vec![json!("Mock Suite"), json!({"source": "mock.robot"})]).await?;
    events.send("start_test", vec![json!("Paused Test"), json!({})]).await?;
    events.send("start_keyword", vec![json!("Breakpoint"), json!({"args": []})]).await?;

    // The control server must be up before the marker goes out
    let (release_tx, mut release_rx) = mpsc::unbounded_channel();
    let server = ControlServer::bind(
        &format!("127.0.0.1:{}", args.control_port),
        Arc::new(MockHandler { release_tx }),
    )
    .await?;
    let endpoint = Endpoint::new("127.0.0.1", server.local_addr()?.port());
    let (stop_tx, stop_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.run(stop_rx));

    events.log("DEBUG", &break_marker(&endpoint)).await?;
    tracing::info!(%endpoint, "Paused in breakpoint");

    let release = release_rx.recv().await.unwrap_or(Release::Stop);
    tracing::info!(?release, "Released from breakpoint");
    let _ = stop_tx.send(true);
    let _ = server_task.await;

    events.log("DEBUG", CONTINUE_MARKER).await?;
    events.send("end_keyword", vec![json!("Breakpoint"), json!({"status": "PASS"})]).await?;

    let status = if release == Release::FailTest { "FAIL" } else { "PASS" };
    events.send("end_test", vec![json!("Paused Test"), json!({"status": status})]).await?;
    events.send("end_suite", vec![json!("Mock Suite"), json!({})]).await?;
    events.send("close", vec![]).await?;
    Ok(())
}
