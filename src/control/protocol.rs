//! Control channel message types
//!
//! The remote test process exposes a small command surface. Every command is
//! one request/response pair; `run_keyword` is the only one with arguments.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::Error;

/// Host/port pair the control client targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address suitable for `TcpStream::connect`
    ///
    /// IPv6 literals are bracketed.
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr())
    }
}

/// Commands accepted by the remote control surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Leave the breakpoint and keep running
    Resume,
    /// Stop the whole run
    Stop,
    /// Fail the current test and continue
    FailTest,
    Ping,
    /// Acknowledge a breakpoint handshake
    Ready,
    GetVariables,
    /// Run a keyword inside the paused test context
    RunKeyword { name: String, args: Vec<String> },
}

impl ControlCommand {
    /// Remote method name
    pub fn method(&self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::FailTest => "fail_test",
            Self::Ping => "ping",
            Self::Ready => "ready",
            Self::GetVariables => "get_variables",
            Self::RunKeyword { .. } => "run_keyword",
        }
    }

    /// Positional parameters sent with the method
    pub fn params(&self) -> Vec<Value> {
        match self {
            Self::Resume
            | Self::Stop
            | Self::FailTest
            | Self::Ping
            | Self::Ready
            | Self::GetVariables => Vec::new(),
            Self::RunKeyword { name, args } => std::iter::once(name)
                .chain(args.iter())
                .map(|s| Value::String(s.clone()))
                .collect(),
        }
    }

    /// Rebuild a command from a method name and its parameters
    pub fn from_call(method: &str, params: &[Value]) -> Result<Self, Error> {
        let command = match method {
            "resume" => Self::Resume,
            "stop" => Self::Stop,
            "fail_test" => Self::FailTest,
            "ping" => Self::Ping,
            "ready" => Self::Ready,
            "get_variables" => Self::GetVariables,
            "run_keyword" => {
                let mut strings = params.iter().map(stringify);
                let name = strings.next().ok_or_else(|| {
                    Error::ControlProtocol("run_keyword requires a keyword name".to_string())
                })?;
                Self::RunKeyword {
                    name,
                    args: strings.collect(),
                }
            }
            other => {
                return Err(Error::ControlProtocol(format!("unknown method '{}'", other)));
            }
        };
        Ok(command)
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RunKeyword { name, args } if !args.is_empty() => {
                write!(f, "run_keyword({}, {})", name, args.join(", "))
            }
            Self::RunKeyword { name, .. } => write!(f, "run_keyword({})", name),
            other => write!(f, "{}", other.method()),
        }
    }
}

/// Request sent to the control endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlRequest {
    pub seq: u64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl ControlRequest {
    pub fn new(seq: u64, command: &ControlCommand) -> Self {
        Self {
            seq,
            method: command.method().to_string(),
            params: command.params(),
        }
    }
}

/// Reply from the control endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub request_seq: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Fault text when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ControlResponse {
    pub fn success(request_seq: u64, result: Value) -> Self {
        Self {
            request_seq,
            success: true,
            result: Some(result),
            message: None,
        }
    }

    pub fn fault(request_seq: u64, message: impl Into<String>) -> Self {
        Self {
            request_seq,
            success: false,
            result: None,
            message: Some(message.into()),
        }
    }
}

/// Render a remote value the way a variable list shows it
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}
