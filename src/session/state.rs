//! Session state machine
//!
//! `Session::transition` is the only place `state` changes. Side effects that
//! need the network (the break handshake) are run by the coordinator after a
//! transition has been applied.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::control::Endpoint;

use super::stack::CallStack;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No run is being observed
    Idle,
    /// A run is executing
    Running,
    /// The run is paused in a breakpoint and accepts control commands
    Break,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Break => write!(f, "break"),
        }
    }
}

/// What can move the session between states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// `pid` or `ready` event
    RunStarted,
    /// Break marker parsed
    BreakHit(Endpoint),
    /// Continue marker parsed
    Continued,
    /// `close` event
    Closed,
    /// Liveness monitor saw no connected sender
    ClientsGone,
    /// Fatal protocol violation from the sender
    Aborted,
}

/// An applied state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

/// The single process-wide session
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    endpoint: Endpoint,
    pub(crate) stack: CallStack,
    variables: BTreeMap<String, String>,
    /// Bumped on every entry to Break; identifies the current pause
    pause: u64,
}

impl Session {
    pub fn new(default_endpoint: Endpoint) -> Self {
        Self {
            state: SessionState::Idle,
            endpoint: default_endpoint,
            stack: CallStack::new(),
            variables: BTreeMap::new(),
            pause: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current control endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// The current pause while in Break, `None` otherwise
    pub fn pause(&self) -> Option<u64> {
        (self.state == SessionState::Break).then_some(self.pause)
    }

    pub(crate) fn set_variables(&mut self, variables: BTreeMap<String, String>) {
        self.variables = variables;
    }

    /// Apply a trigger; returns the change, or `None` if the trigger has no
    /// transition from the current state
    pub fn transition(&mut self, trigger: Trigger) -> Option<Transition> {
        use SessionState::*;

        let from = self.state;
        let to = match (from, trigger) {
            (Idle, Trigger::RunStarted) => {
                self.stack.clear();
                self.variables.clear();
                Running
            }
            (Running, Trigger::BreakHit(endpoint)) => {
                self.endpoint = endpoint;
                self.pause += 1;
                Break
            }
            (Break, Trigger::Continued) => Running,
            (_, Trigger::Closed) | (_, Trigger::ClientsGone) => Idle,
            (_, Trigger::Aborted) => {
                self.stack.clear();
                Idle
            }
            _ => return None,
        };

        if from == to {
            return None;
        }
        self.state = to;
        Some(Transition { from, to })
    }
}
