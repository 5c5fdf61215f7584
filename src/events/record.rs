//! Event records and their classification
//!
//! Records arrive as `{command, args}`. The ingestion server stamps each one
//! with a local id; any identifier the sender included is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};
use crate::session::FrameKind;

/// Record as sent by the remote process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Acknowledgment written back after a record has been processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn delivered(id: u64) -> Self {
        Self {
            ok: true,
            id: Some(id),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            id: None,
            error: Some(error.into()),
        }
    }
}

/// An ingested event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Local, strictly increasing, starting at 1
    pub id: u64,
    pub command: String,
    pub args: Vec<Value>,
}

/// Payload of a `log_message` event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
}

/// What an event means to the session
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind<'a> {
    /// A new run announced its process id
    Pid,
    Ready,
    Close,
    Start { kind: FrameKind, name: &'a str },
    End { kind: FrameKind },
    Log(LogMessage),
    /// Traffic the session does not act on
    Other,
}

impl Event {
    pub fn new(id: u64, record: EventRecord) -> Self {
        Self {
            id,
            command: record.command,
            args: record.args,
        }
    }

    /// Classify the event, validating the arguments the session relies on
    pub fn kind(&self) -> Result<EventKind<'_>> {
        let kind = match self.command.as_str() {
            "pid" => EventKind::Pid,
            "ready" => EventKind::Ready,
            "close" => EventKind::Close,
            "start_suite" => self.start(FrameKind::Suite)?,
            "start_test" => self.start(FrameKind::Test)?,
            "start_keyword" => self.start(FrameKind::Keyword)?,
            "end_suite" => EventKind::End { kind: FrameKind::Suite },
            "end_test" => EventKind::End { kind: FrameKind::Test },
            "end_keyword" => EventKind::End { kind: FrameKind::Keyword },
            "log_message" => {
                let payload = self.args.first().cloned().ok_or_else(|| {
                    Error::EventProtocol(format!("event {}: log_message without payload", self.id))
                })?;
                let message = serde_json::from_value(payload).map_err(|e| {
                    Error::EventProtocol(format!("event {}: bad log_message payload: {}", self.id, e))
                })?;
                EventKind::Log(message)
            }
            _ => EventKind::Other,
        };
        Ok(kind)
    }

    fn start(&self, kind: FrameKind) -> Result<EventKind<'_>> {
        match self.args.first() {
            Some(Value::String(name)) => Ok(EventKind::Start { kind, name }),
            _ => Err(Error::EventProtocol(format!(
                "event {}: {} without a name argument",
                self.id, self.command
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(command: &str, args: Vec<Value>) -> Event {
        Event::new(
            1,
            EventRecord {
                command: command.to_string(),
                args,
            },
        )
    }

    #[test]
    fn test_record_ignores_sender_id() {
        let record: EventRecord =
            serde_json::from_str(r#"{"id": 99, "command": "start_test", "args": ["T1", {}]}"#).unwrap();
        let event = Event::new(7, record);
        assert_eq!(event.id, 7);
        assert_eq!(
            event.kind().unwrap(),
            EventKind::Start {
                kind: FrameKind::Test,
                name: "T1"
            }
        );
    }

    #[test]
    fn test_missing_args_defaults_empty() {
        let record: EventRecord = serde_json::from_str(r#"{"command": "close"}"#).unwrap();
        assert!(record.args.is_empty());
        assert_eq!(Event::new(1, record).kind().unwrap(), EventKind::Close);
    }

    #[test]
    fn test_log_message_payload() {
        let ev = event(
            "log_message",
            vec![json!({"level": "DEBUG", "message": ":continue:", "timestamp": "20240101 12:00:00"})],
        );
        assert_eq!(
            ev.kind().unwrap(),
            EventKind::Log(LogMessage {
                level: "DEBUG".to_string(),
                message: ":continue:".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_arguments() {
        assert!(event("start_suite", vec![]).kind().is_err());
        assert!(event("start_keyword", vec![json!(12)]).kind().is_err());
        assert!(event("log_message", vec![json!("just text")]).kind().is_err());
        assert_eq!(event("end_keyword", vec![]).kind().unwrap(), EventKind::End { kind: FrameKind::Keyword });
        assert_eq!(event("output_file", vec![json!("out.xml")]).kind().unwrap(), EventKind::Other);
    }

    #[test]
    fn test_ack_shapes() {
        assert_eq!(serde_json::to_value(Ack::delivered(3)).unwrap(), json!({"ok": true, "id": 3}));
        assert_eq!(
            serde_json::to_value(Ack::rejected("bad json")).unwrap(),
            json!({"ok": false, "error": "bad json"})
        );
    }
}
