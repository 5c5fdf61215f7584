//! Interactive console: command parsing and event printing

use std::collections::BTreeMap;

use colored::Colorize;

use crate::events::{Event, EventKind};
use crate::session::{Observer, SessionState, Transition};

/// A line typed at the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Resume,
    Stop,
    FailTest,
    Vars,
    Ping,
    Status,
    Help,
    Quit,
    RunKeyword { name: String, args: Vec<String> },
}

pub const HELP: &str = "\
commands:
  continue | c          leave the breakpoint
  stop                  stop the run
  fail                  fail the current test and continue
  vars                  refresh and list variables
  run <keyword>  <arg>  run a keyword (cells separated by two spaces or a tab)
  ping                  check the control endpoint
  status                show state and call stack
  quit | exit           release the run and exit";

impl ConsoleCommand {
    /// Parse one input line; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "c" | "continue" | "resume" => Self::Resume,
            "stop" => Self::Stop,
            "fail" => Self::FailTest,
            "vars" => Self::Vars,
            "ping" => Self::Ping,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "run" | "eval" => {
                let mut cells = statement_cells(rest).into_iter();
                let name = cells.next().ok_or("run needs a keyword name")?;
                Self::RunKeyword {
                    name,
                    args: cells.collect(),
                }
            }
            other => return Err(format!("unknown command '{}' (try 'help')", other)),
        };
        Ok(Some(command))
    }
}

/// Split a plain-text statement into cells
///
/// A lone variable reference is turned into a variable lookup.
pub fn statement_cells(text: &str) -> Vec<String> {
    let mut cells: Vec<String> = text
        .replace('\t', "  ")
        .split("  ")
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(String::from)
        .collect();

    if cells.len() == 1 && is_variable(&cells[0]) {
        cells.insert(0, "Get Variable Value".to_string());
    }
    cells
}

fn is_variable(cell: &str) -> bool {
    (cell.starts_with("${") || cell.starts_with("@{")) && cell.ends_with('}')
}

/// Prints events and session changes to stdout
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl ConsoleObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Observer for ConsoleObserver {
    fn listen(&self, event: &Event) {
        match event.kind() {
            Ok(EventKind::Start { kind, name }) => {
                println!("{:>6} {} {}", event.id.to_string().dimmed(), "start".green(), format!("{kind} {name}"));
            }
            Ok(EventKind::End { kind }) => {
                println!("{:>6} {} {}", event.id.to_string().dimmed(), "end".blue(), kind);
            }
            Ok(EventKind::Log(message)) => {
                let level = match message.level.as_str() {
                    "FAIL" | "ERROR" => message.level.red().bold(),
                    "WARN" => message.level.yellow(),
                    _ => message.level.dimmed(),
                };
                println!("{:>6} [{}] {}", event.id.to_string().dimmed(), level, message.message);
            }
            _ => println!("{:>6} {}", event.id.to_string().dimmed(), event.command),
        }
    }

    fn state_changed(&self, transition: Transition) {
        let state = match transition.to {
            SessionState::Idle => "idle".normal(),
            SessionState::Running => "running".green(),
            SessionState::Break => "breakpoint".yellow().bold(),
        };
        println!("{} {}", "state:".bold(), state);
    }

    fn path_changed(&self, path: &str) {
        if !path.is_empty() {
            println!("       {} {}", "at".dimmed(), path.cyan());
        }
    }

    fn variables_changed(&self, variables: &BTreeMap<String, String>) {
        if !variables.is_empty() {
            println!("       {} variables in scope ('vars' to list)", variables.len());
        }
    }
}
