//! Session core: call stack, breakpoint markers, state machine and the
//! coordinator that ties them to the event and control channels.

mod coordinator;
mod liveness;
pub mod marker;
mod stack;
mod state;

pub use coordinator::{sorted_variables, Coordinator, Mode, Observer, SessionStatus};
pub use liveness::LivenessMonitor;
pub use stack::{CallStack, Frame, FrameKind};
pub use state::{Session, SessionState, Transition, Trigger};
