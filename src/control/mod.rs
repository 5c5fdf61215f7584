//! Control channel to the remote test process
//!
//! Request/response commands over TCP, framed like the Debug Adapter Protocol.

pub mod client;
pub mod codec;
pub mod protocol;

pub use client::ControlClient;
pub use protocol::{ControlCommand, Endpoint};
