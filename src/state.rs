//! Lifecycle state of the service host.

use crate::error::HostError;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Shared state wrapper type.
pub type SharedState = Arc<RwLock<LifecycleState>>;

/// Create a new shared state instance.
pub fn new_shared_state() -> SharedState {
    Arc::new(RwLock::new(LifecycleState::new()))
}

/// Where the host is in its session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    /// Constructed, built-in handlers not yet installed.
    Uninitialized,
    /// Handlers installed, channel not started.
    Configured,
    /// Reading and dispatching messages.
    Running,
    /// Initialize tasks are running.
    Initializing,
    /// The shutdown request was received.
    ShuttingDown,
    /// The exit event was received or the host was stopped.
    Terminated,
}

impl HostState {
    /// Get the state name as used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Initializing => "initializing",
            Self::ShuttingDown => "shutting_down",
            Self::Terminated => "terminated",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: HostState) -> bool {
        use HostState::*;
        matches!(
            (self, next),
            (Uninitialized, Configured)
                | (Configured, Running)
                | (Configured, Terminated)
                | (Running, Initializing)
                | (Running, ShuttingDown)
                | (Running, Terminated)
                | (Initializing, Running)
                | (Initializing, ShuttingDown)
                | (Initializing, Terminated)
                | (ShuttingDown, Terminated)
        )
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle bookkeeping guarded by [`SharedState`].
#[derive(Debug)]
pub struct LifecycleState {
    current: HostState,
    initialized: bool,
    shutdown_requested: bool,
}

impl LifecycleState {
    /// Create a new state in [`HostState::Uninitialized`].
    pub fn new() -> Self {
        Self {
            current: HostState::Uninitialized,
            initialized: false,
            shutdown_requested: false,
        }
    }

    /// Current lifecycle state.
    pub fn current(&self) -> HostState {
        self.current
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&mut self, next: HostState) -> Result<HostState, HostError> {
        let previous = self.current;
        if !previous.can_transition_to(next) {
            return Err(HostError::InvalidTransition {
                from: previous.name(),
                to: next.name(),
            });
        }
        debug!(from = %previous, to = %next, "Lifecycle transition");
        self.current = next;
        match next {
            HostState::ShuttingDown => self.shutdown_requested = true,
            HostState::Running if previous == HostState::Initializing => self.initialized = true,
            _ => {}
        }
        Ok(previous)
    }

    /// Whether an initialize handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether the shutdown request was received before termination.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}
