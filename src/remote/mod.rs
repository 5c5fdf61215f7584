//! The test-process side of both channels
//!
//! Used by listener integrations and by the `mock_runner` test double.

pub mod sender;
pub mod server;

pub use sender::EventSender;
pub use server::{ControlHandler, ControlServer};
