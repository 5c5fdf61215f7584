//! Common utilities shared by the debugger, the monitor and the remote helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
