//! Call-stack tracking from start/end events

use serde::Serialize;

use crate::common::{Error, Result};

/// Nesting level of an execution unit, outermost first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Suite,
    Test,
    Keyword,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suite => write!(f, "suite"),
            Self::Test => write!(f, "test"),
            Self::Keyword => write!(f, "keyword"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub kind: FrameKind,
    pub name: String,
}

/// LIFO stack of open frames
///
/// Pops are matched by position only; the kind of an end event is not
/// checked against the frame it closes.
#[derive(Debug, Clone, Default)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: FrameKind, name: impl Into<String>) {
        self.frames.push(Frame {
            kind,
            name: name.into(),
        });
    }

    /// Pop the innermost frame; an empty stack means the sender broke nesting
    pub fn pop(&mut self, command: &str) -> Result<Frame> {
        self.frames.pop().ok_or_else(|| Error::StackUnderflow {
            command: command.to_string(),
        })
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Frame names joined by `.`, empty for an empty stack
    pub fn path(&self) -> String {
        self.frames
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
            .trim()
            .to_string()
    }
}
