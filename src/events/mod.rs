//! Event channel from the remote test process
//!
//! Length-prefixed JSON records over TCP, acknowledged one by one.

pub mod codec;
pub mod record;
pub mod server;

pub use record::{Event, EventKind, EventRecord, LogMessage};
pub use server::{ClientGauge, EventServer, EventSink};
