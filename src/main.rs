//! rwb debugger - observe and steer a remote Robot Framework run
//!
//! Listens for execution events, follows the call stack and pauses in
//! breakpoints announced by the running test.

use clap::Parser;
use commands::Commands;
use rwb::common::{config::Config, logging, paths};
use rwb::session::Mode;
use rwb::{cli, commands};

#[derive(Parser)]
#[command(name = "rwb-debugger", about = "Remote test run debugger")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Debug { port, host } => {
            // The console owns the terminal; logs go to a file
            let _guard = logging::init_console().map(|(path, guard)| {
                eprintln!("logging to {}", path.display());
                guard
            });
            match Config::load() {
                Ok(mut config) => {
                    if let Some(port) = port {
                        config.listener.port = port;
                    }
                    if let Some(host) = host {
                        config.listener.host = host;
                    }
                    cli::run(config, Mode::Control).await
                }
                Err(e) => Err(e),
            }
        }
        Commands::Monitor { port } => {
            logging::init_cli();
            match Config::load() {
                Ok(mut config) => {
                    if let Some(port) = port {
                        config.listener.port = port;
                    }
                    cli::run(config, Mode::ObserveOnly).await
                }
                Err(e) => Err(e),
            }
        }
        Commands::ConfigPath => {
            match paths::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("no configuration directory on this platform"),
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
