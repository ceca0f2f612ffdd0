//! Service host: the JSON-RPC host plus the session lifecycle.

use crate::config::HostConfig;
use crate::dispatcher::JsonRpcHost;
use crate::error::HostError;
use crate::handlers::register_builtin_handlers;
use crate::protocol::{EventContext, InitializeParams, InitializeResult};
use crate::shutdown::SharedShutdownController;
use crate::state::{new_shared_state, HostState, SharedState};
use crate::telemetry::SharedMetrics;
use crate::transport::Channel;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Callback run when the client sends `initialize`.
pub type InitializeTask = Arc<
    dyn Fn(InitializeParams, EventContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
>;

/// Callback run when the client sends `shutdown`.
pub type ShutdownTask =
    Arc<dyn Fn(EventContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Lifecycle data shared with the built-in handlers.
pub(crate) struct ServiceCore {
    pub(crate) config: HostConfig,
    pub(crate) state: SharedState,
    pub(crate) initialize_tasks: RwLock<Vec<InitializeTask>>,
    pub(crate) shutdown_tasks: RwLock<Vec<ShutdownTask>>,
    pub(crate) initialize_result: RwLock<InitializeResult>,
    pub(crate) controller: SharedShutdownController,
}

/// The SQL Tools service host.
///
/// Wraps a [`JsonRpcHost`] and answers the `initialize`, `shutdown`, `exit`
/// and `version` methods itself. Feature services hook into the session by
/// registering initialize and shutdown tasks, and add their own methods
/// through [`host`](Self::host).
///
/// This struct is cheap to clone; all clones share the same host.
#[derive(Clone)]
pub struct ServiceHost {
    host: JsonRpcHost,
    core: Arc<ServiceCore>,
}

impl ServiceHost {
    /// Create a service host with the built-in handlers installed.
    pub fn new(config: HostConfig) -> Result<Self, HostError> {
        let host = JsonRpcHost::new();
        let core = Arc::new(ServiceCore {
            config,
            state: new_shared_state(),
            initialize_tasks: RwLock::new(Vec::new()),
            shutdown_tasks: RwLock::new(Vec::new()),
            initialize_result: RwLock::new(InitializeResult::default()),
            controller: Arc::clone(host.shutdown_controller()),
        });

        register_builtin_handlers(&host, &core)?;
        core.state.write().transition(HostState::Configured)?;

        Ok(Self { host, core })
    }

    /// The underlying JSON-RPC host, for registering feature handlers.
    pub fn host(&self) -> &JsonRpcHost {
        &self.host
    }

    /// Configuration this host was built with.
    pub fn config(&self) -> &HostConfig {
        &self.core.config
    }

    /// Traffic counters.
    pub fn metrics(&self) -> &SharedMetrics {
        self.host.metrics()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HostState {
        self.core.state.read().current()
    }

    /// Whether `shutdown` was received; decides the process exit code.
    pub fn shutdown_requested(&self) -> bool {
        self.core.state.read().shutdown_requested()
    }

    /// Add a callback for the `initialize` request.
    ///
    /// All callbacks run concurrently; the response is sent once every one
    /// has finished. Failures are collected into a single error response.
    pub fn register_initialize_task<F, Fut>(&self, task: F)
    where
        F: Fn(InitializeParams, EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let wrapped: InitializeTask = Arc::new(
            move |params: InitializeParams, events: EventContext| task(params, events).boxed(),
        );
        self.core.initialize_tasks.write().push(wrapped);
    }

    /// Add a callback for the `shutdown` request.
    ///
    /// All callbacks run concurrently under the configured shutdown timeout.
    /// The response is sent whether they finish, fail or time out.
    pub fn register_shutdown_task<F, Fut>(&self, task: F)
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let wrapped: ShutdownTask = Arc::new(move |events: EventContext| task(events).boxed());
        self.core.shutdown_tasks.write().push(wrapped);
    }

    /// Replace the capabilities returned from `initialize`.
    pub fn set_initialize_result(&self, result: InitializeResult) {
        *self.core.initialize_result.write() = result;
    }

    /// Begin serving `channel`.
    ///
    /// Frames larger than the configured maximum message size are rejected.
    pub fn start(&self, channel: Channel) -> Result<(), HostError> {
        self.core.state.write().transition(HostState::Running)?;
        info!(service = %self.core.config.service_name, "Service host starting");
        self.host
            .start(channel.with_max_message_size(self.core.config.max_message_size))
    }

    /// Stop serving. Idempotent.
    pub fn stop(&self) {
        if let Err(e) = self.core.state.write().transition(HostState::Terminated) {
            debug!(error = %e, "Stop requested in a terminal state");
        }
        self.host.stop();
    }

    /// Wait until the channel has been released.
    pub async fn wait_for_exit(&self) {
        self.host.wait_for_exit().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_host_is_configured() {
        let service = ServiceHost::new(HostConfig::default()).unwrap();
        assert_eq!(service.state(), HostState::Configured);
        assert!(!service.shutdown_requested());
        assert_eq!(service.config().shutdown_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_tasks_are_collected() {
        let service = ServiceHost::new(HostConfig::default()).unwrap();
        service.register_initialize_task(|_, _| async { Ok::<_, anyhow::Error>(()) });
        service.register_shutdown_task(|_| async { Ok::<_, anyhow::Error>(()) });
        service.register_shutdown_task(|_| async { Ok::<_, anyhow::Error>(()) });

        assert_eq!(service.core.initialize_tasks.read().len(), 1);
        assert_eq!(service.core.shutdown_tasks.read().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_before_start_terminates() {
        let service = ServiceHost::new(HostConfig::default()).unwrap();
        service.stop();

        tokio::time::timeout(Duration::from_secs(1), service.wait_for_exit())
            .await
            .expect("stop should complete without a channel");
        assert_eq!(service.state(), HostState::Terminated);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let service = ServiceHost::new(HostConfig::default()).unwrap();
        service.stop();
        service.stop();

        tokio::time::timeout(Duration::from_secs(1), service.wait_for_exit())
            .await
            .unwrap();
        assert_eq!(service.state(), HostState::Terminated);
        assert!(!service.shutdown_requested());
    }
}
