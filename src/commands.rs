//! CLI command definitions
//!
//! Defines the clap commands for the debugger CLI.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Listen for a run and control it from the console
    Debug {
        /// Port for incoming events (default from config, 8910)
        #[arg(long, short)]
        port: Option<u16>,

        /// Address to bind the event listener to
        #[arg(long)]
        host: Option<String>,
    },

    /// Watch a run without controlling it
    Monitor {
        /// Port for incoming events (default from config, 8910)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the configuration file location
    ConfigPath,
}
