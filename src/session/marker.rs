//! Breakpoint markers carried in DEBUG log messages
//!
//! The remote `breakpoint` keyword logs `:break:<host>:<port>` before it
//! waits for the debugger, and `:continue:` once it is released.

use crate::control::Endpoint;
use crate::events::LogMessage;

/// Prefix of a break marker, including the separating colon
pub const BREAK_PREFIX: &str = ":break:";

/// Full text of the continue marker
pub const CONTINUE_MARKER: &str = ":continue:";

/// Level a marker must be logged at
const MARKER_LEVEL: &str = "DEBUG";

/// Signal extracted from a log message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Breakpoint hit; the control server is listening at the endpoint
    Break(Endpoint),
    Continue,
}

/// Text the remote logs to announce a breakpoint
pub fn break_marker(endpoint: &Endpoint) -> String {
    format!("{}{}:{}", BREAK_PREFIX, endpoint.host, endpoint.port)
}

/// Parse a log message into a marker
///
/// `default_host` fills in the host for the port-only form `:break:<port>`.
/// Malformed break markers are logged and yield `None`.
pub fn parse(message: &LogMessage, default_host: &str) -> Option<Marker> {
    if message.level != MARKER_LEVEL {
        return None;
    }

    let text = message.message.trim();
    if text == CONTINUE_MARKER {
        return Some(Marker::Continue);
    }

    let rest = text.strip_prefix(BREAK_PREFIX)?;
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host.trim_matches(|c| c == '[' || c == ']'), port),
        None => (default_host, rest),
    };

    match port.parse::<u16>() {
        Ok(port) if port != 0 && !host.is_empty() => Some(Marker::Break(Endpoint::new(host, port))),
        _ => {
            tracing::warn!(message = %text, "Ignoring malformed break marker");
            None
        }
    }
}
