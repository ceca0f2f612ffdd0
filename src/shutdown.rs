//! Stop signalling for the host.
//!
//! This module provides:
//! - A cooperative stop signal shared by the read loop, the writer and handlers
//! - Phase notifications while the host tears down its channel
//! - A completion latch that `wait_for_exit` awaits
//! - OS signal handling (SIGTERM, SIGINT, SIGHUP)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};

/// Stop signal that can be awaited.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the stop signal.
    ///
    /// Returns immediately once a stop was requested, and also if the
    /// controller has been dropped.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|&v| v).await;
    }

    /// Check if a stop has been signaled without blocking.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Phases of host teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Stop has been requested; the read loop is leaving.
    Initiated,

    /// Outstanding outgoing requests are being failed.
    RejectingPending,

    /// Queued outbound messages are being written.
    FlushingOutput,

    /// The channel is released.
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Initiated => write!(f, "initiated"),
            ShutdownPhase::RejectingPending => write!(f, "rejecting_pending"),
            ShutdownPhase::FlushingOutput => write!(f, "flushing_output"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Controller for stopping the host.
pub struct ShutdownController {
    /// Raised once a stop is requested.
    sender: watch::Sender<bool>,

    /// Flag indicating a stop is in progress.
    shutting_down: AtomicBool,

    /// Raised once teardown has finished.
    completed: watch::Sender<bool>,

    /// Broadcast sender for phase notifications.
    phase_sender: broadcast::Sender<ShutdownPhase>,
}

impl ShutdownController {
    /// Create a new controller.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        let (completed, _) = watch::channel(false);
        let (phase_sender, _) = broadcast::channel(16);

        Self {
            sender,
            shutting_down: AtomicBool::new(false),
            completed,
            phase_sender,
        }
    }

    /// Get a stop signal receiver.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to phase notifications.
    pub fn subscribe_phases(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.phase_sender.subscribe()
    }

    /// Check if a stop is in progress.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Request a stop. Idempotent.
    pub fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Stopping service host...");
            // send_replace updates the value even while nobody is subscribed
            self.sender.send_replace(true);
            let _ = self.phase_sender.send(ShutdownPhase::Initiated);
        }
    }

    /// Send a phase notification.
    pub(crate) fn notify_phase(&self, phase: ShutdownPhase) {
        debug!(%phase, "Shutdown phase");
        let _ = self.phase_sender.send(phase);
    }

    /// Mark teardown as finished and release every `wait_complete` caller.
    pub(crate) fn mark_complete(&self) {
        self.shutdown();
        if !self.completed.send_replace(true) {
            self.notify_phase(ShutdownPhase::Complete);
            info!("Service host stopped");
        }
    }

    /// Whether teardown has finished.
    pub fn is_complete(&self) -> bool {
        *self.completed.borrow()
    }

    /// Wait until teardown has finished.
    pub async fn wait_complete(&self) {
        let mut receiver = self.completed.subscribe();
        let _ = receiver.wait_for(|&v| v).await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared shutdown controller type.
pub type SharedShutdownController = Arc<ShutdownController>;

/// Create a new shared shutdown controller.
pub fn new_shutdown_controller() -> SharedShutdownController {
    Arc::new(ShutdownController::new())
}

/// Install OS signal handlers that stop the host.
///
/// This sets up handlers for:
/// - SIGINT (Ctrl+C)
/// - SIGTERM (Unix)
/// - SIGHUP (Unix), sent when the client's pipe goes away
pub async fn install_signal_handlers(controller: SharedShutdownController) {
    let ctrl_c_controller = controller.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping...");
                ctrl_c_controller.shutdown();
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C signal: {}", e);
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            let controller = controller.clone();
            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("Received {}, stopping...", name);
                        controller.shutdown();
                    }
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shutdown_signal() {
        let controller = ShutdownController::new();
        let signal = controller.signal();

        assert!(!signal.is_shutdown());

        controller.shutdown();
        assert!(controller.is_shutting_down());
        assert!(signal.is_shutdown());
    }

    #[test]
    fn test_signal_created_after_shutdown_sees_it() {
        let controller = ShutdownController::new();
        controller.shutdown();
        assert!(controller.signal().is_shutdown());
    }

    #[test]
    fn test_shutdown_idempotent() {
        let controller = ShutdownController::new();
        let mut phases = controller.subscribe_phases();

        controller.shutdown();
        controller.shutdown();

        assert_eq!(phases.try_recv().unwrap(), ShutdownPhase::Initiated);
        assert!(phases.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signal_recv_wakes_waiter() {
        let controller = new_shutdown_controller();
        let mut signal = controller.signal();

        let waiter = tokio::spawn(async move {
            signal.recv().await;
        });

        controller.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_complete_returns_after_mark() {
        let controller = new_shutdown_controller();
        assert!(!controller.is_complete());

        let waiting = controller.clone();
        let waiter = tokio::spawn(async move { waiting.wait_complete().await });

        controller.mark_complete();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_complete should return")
            .unwrap();

        assert!(controller.is_complete());
        assert!(controller.is_shutting_down());
        // Already complete: returns at once
        controller.wait_complete().await;
    }

    #[test]
    fn test_mark_complete_reports_phase_once() {
        let controller = ShutdownController::new();
        let mut phases = controller.subscribe_phases();

        controller.mark_complete();
        controller.mark_complete();

        assert_eq!(phases.try_recv().unwrap(), ShutdownPhase::Initiated);
        assert_eq!(phases.try_recv().unwrap(), ShutdownPhase::Complete);
        assert!(phases.try_recv().is_err());
    }

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Initiated.to_string(), "initiated");
        assert_eq!(
            ShutdownPhase::RejectingPending.to_string(),
            "rejecting_pending"
        );
        assert_eq!(ShutdownPhase::FlushingOutput.to_string(), "flushing_output");
        assert_eq!(ShutdownPhase::Complete.to_string(), "complete");
    }
}
