//! rwb debugger - control core for a remote Robot Framework run
//!
//! Ingests execution events pushed by the running test, tracks the
//! suite/test/keyword stack, and drives the idle/running/break session
//! including the breakpoint handshake over the control channel.

pub mod cli;
pub mod commands;
pub mod common;
pub mod control;
pub mod events;
pub mod remote;
pub mod session;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use control::{ControlCommand, Endpoint};
pub use session::{Coordinator, Mode, SessionState};
