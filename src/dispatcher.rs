//! The JSON-RPC host.
//!
//! [`JsonRpcHost`] owns the handler registries, the read loop that routes
//! inbound messages, the writer task that serialises outbound traffic onto the
//! channel, and the table of outgoing requests waiting for a reply.
//!
//! Every handler invocation runs on its own task, so a slow handler never
//! blocks the read loop or other handlers. The `exit` event is the exception:
//! it runs inline and the read loop stops right after it. All outbound frames go through one
//! queue drained by a single writer, which keeps frames from interleaving.

use crate::constants::EXIT_METHOD;
use crate::error::{ChannelError, HostError, RpcError};
use crate::protocol::context::ReplySlot;
use crate::protocol::{
    EventContext, EventType, Message, MessageKind, MessageSender, RequestContext, RequestId,
    RequestType,
};
use crate::shutdown::{
    new_shutdown_controller, SharedShutdownController, ShutdownPhase, ShutdownSignal,
};
use crate::telemetry::{generate_request_id, new_shared_metrics, HandlerTimer, SharedMetrics};
use crate::transport::{BoxedReader, BoxedWriter, Channel, MessageReader, MessageWriter};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a handler invocation receives besides the message.
#[derive(Clone)]
struct HandlerEnv {
    sender: MessageSender,
    stop: ShutdownSignal,
    metrics: SharedMetrics,
}

type RequestHandler =
    Arc<dyn Fn(RequestId, Message, HandlerEnv) -> BoxFuture<'static, ()> + Send + Sync>;
type EventHandler = Arc<dyn Fn(Message, HandlerEnv) -> BoxFuture<'static, ()> + Send + Sync>;
type PendingReply = oneshot::Sender<Result<Message, HostError>>;
type HandlerOutcome = Result<anyhow::Result<()>, Box<dyn Any + Send>>;

struct HostInner {
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    event_handlers: RwLock<HashMap<String, EventHandler>>,
    pending: Mutex<HashMap<RequestId, PendingReply>>,
    sender: MessageSender,
    outbound: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    started: AtomicBool,
    shutdown: SharedShutdownController,
    metrics: SharedMetrics,
}

/// Bidirectional JSON-RPC endpoint.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct JsonRpcHost {
    inner: Arc<HostInner>,
}

impl JsonRpcHost {
    /// Create a host with empty registries. Nothing is read until [`start`](Self::start).
    pub fn new() -> Self {
        let (queue, outbound) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(HostInner {
                request_handlers: RwLock::new(HashMap::new()),
                event_handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                sender: MessageSender::new(queue),
                outbound: Mutex::new(Some(outbound)),
                started: AtomicBool::new(false),
                shutdown: new_shutdown_controller(),
                metrics: new_shared_metrics(),
            }),
        }
    }

    /// Traffic counters of this host.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.inner.metrics
    }

    /// Controller that stops this host; hand it to OS signal handlers.
    pub fn shutdown_controller(&self) -> &SharedShutdownController {
        &self.inner.shutdown
    }

    /// An event context writing to this host's channel.
    pub fn event_context(&self) -> EventContext {
        EventContext::new(self.inner.sender.clone())
    }

    /// Whether the host has been started and not yet torn down.
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.shutdown.is_complete()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an async handler for `request_type`.
    ///
    /// The handler gets the decoded params and a [`RequestContext`] to answer
    /// through. Params that do not decode are answered with an invalid-params
    /// error without calling the handler. If the handler returns an error or
    /// panics before replying, the error is sent as the response. When the
    /// last copy of the context is dropped without a reply, an internal error
    /// is sent on the handler's behalf.
    pub fn set_async_request_handler<P, R, F, Fut>(
        &self,
        request_type: RequestType<P, R>,
        handler: F,
        override_existing: bool,
    ) -> Result<(), HostError>
    where
        P: DeserializeOwned + Default + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, RequestContext<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let method = request_type.method();
        let handler = Arc::new(handler);
        let wrapped: RequestHandler = Arc::new(
            move |id: RequestId, message: Message, env: HandlerEnv| {
                let handler = Arc::clone(&handler);
                async move {
                    let params = match message.typed_contents::<P>() {
                        Ok(params) => params,
                        Err(e) => {
                            warn!(%id, method, error = %e, "Rejecting invalid params");
                            ReplySlot::new(id, method, env.sender)
                                .fail_if_open(&RpcError::invalid_params(format!(
                                    "invalid params for '{method}': {e}"
                                )));
                            return;
                        }
                    };

                    let slot = ReplySlot::new(id, method, env.sender.clone());
                    let context = RequestContext::new(Arc::clone(&slot), env.stop.clone());
                    let timer = HandlerTimer::start(env.metrics.clone());
                    let outcome = AssertUnwindSafe(async move { handler(params, context).await })
                        .catch_unwind()
                        .await;
                    settle_request(&slot, method, outcome, timer);
                }
                .boxed()
            },
        );

        register(
            &self.inner.request_handlers,
            "request",
            method,
            wrapped,
            override_existing,
        )
    }

    /// Register a synchronous handler for `request_type`.
    ///
    /// Same reply rules as [`set_async_request_handler`](Self::set_async_request_handler).
    pub fn set_request_handler<P, R, F>(
        &self,
        request_type: RequestType<P, R>,
        handler: F,
        override_existing: bool,
    ) -> Result<(), HostError>
    where
        P: DeserializeOwned + Default + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, RequestContext<R>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.set_async_request_handler(
            request_type,
            move |params, context| std::future::ready(handler(params, context)),
            override_existing,
        )
    }

    /// Register an async handler for `event_type`.
    ///
    /// Failures are logged; events never produce a reply.
    pub fn set_async_event_handler<P, F, Fut>(
        &self,
        event_type: EventType<P>,
        handler: F,
        override_existing: bool,
    ) -> Result<(), HostError>
    where
        P: DeserializeOwned + Default + Send + 'static,
        F: Fn(P, EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let method = event_type.method();
        let handler = Arc::new(handler);
        let wrapped: EventHandler = Arc::new(
            move |message: Message, env: HandlerEnv| {
                let handler = Arc::clone(&handler);
                async move {
                    let params = match message.typed_contents::<P>() {
                        Ok(params) => params,
                        Err(e) => {
                            warn!(method, error = %e, "Dropping event with invalid params");
                            return;
                        }
                    };

                    let context = EventContext::new(env.sender.clone());
                    let timer = HandlerTimer::start(env.metrics.clone());
                    let outcome = AssertUnwindSafe(async move { handler(params, context).await })
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok(Ok(())) => {
                            timer.stop(true);
                        }
                        Ok(Err(err)) => {
                            timer.stop(false);
                            warn!(method, error = %format!("{err:#}"), "Event handler failed");
                        }
                        Err(panic) => {
                            timer.stop(false);
                            let message = panic_message(panic.as_ref());
                            error!(method, panic = %message, "Event handler panicked");
                        }
                    }
                }
                .boxed()
            },
        );

        register(
            &self.inner.event_handlers,
            "event",
            method,
            wrapped,
            override_existing,
        )
    }

    /// Register a synchronous handler for `event_type`.
    pub fn set_event_handler<P, F>(
        &self,
        event_type: EventType<P>,
        handler: F,
        override_existing: bool,
    ) -> Result<(), HostError>
    where
        P: DeserializeOwned + Default + Send + 'static,
        F: Fn(P, EventContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.set_async_event_handler(
            event_type,
            move |params, context| std::future::ready(handler(params, context)),
            override_existing,
        )
    }

    // =========================================================================
    // Outbound traffic
    // =========================================================================

    /// Send a request to the peer and wait for its reply.
    ///
    /// Resolves with the decoded result, [`HostError::Remote`] when the peer
    /// answers with an error, or [`HostError::ConnectionClosed`] when the
    /// channel goes away first.
    pub async fn send_request<P, R>(
        &self,
        request_type: RequestType<P, R>,
        params: &P,
    ) -> Result<R, HostError>
    where
        P: Serialize,
        R: DeserializeOwned + Default,
    {
        let id = RequestId::from(generate_request_id());
        let message = Message::request(&request_type, id.clone(), params)?;
        let reply = self.register_pending(id.clone())?;

        if let Err(e) = self.inner.sender.send(message) {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }
        debug!(%id, method = request_type.method(), "Sent request");

        let response = reply.await.map_err(|_| HostError::ConnectionClosed)??;
        match response.rpc_error() {
            Some(error) => Err(HostError::Remote(error)),
            None => response.typed_contents(),
        }
    }

    /// Send an event to the peer.
    pub fn send_event<P: Serialize>(
        &self,
        event_type: EventType<P>,
        params: &P,
    ) -> Result<(), HostError> {
        self.inner.sender.send_event(event_type, params)
    }

    fn register_pending(
        &self,
        id: RequestId,
    ) -> Result<oneshot::Receiver<Result<Message, HostError>>, HostError> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.inner.pending.lock();
        // Checked under the lock so teardown cannot miss this entry
        if self.inner.shutdown.is_shutting_down() {
            return Err(HostError::ConnectionClosed);
        }
        pending.insert(id, tx);
        Ok(rx)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Take ownership of `channel` and begin processing messages.
    ///
    /// Returns immediately; reading and writing happen on spawned tasks.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, channel: Channel) -> Result<(), HostError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(HostError::AlreadyStarted);
        }
        let outbound = self
            .inner
            .outbound
            .lock()
            .take()
            .ok_or(HostError::AlreadyStarted)?;

        let (reader, writer) = channel.into_parts();
        let writer_task = tokio::spawn(write_loop(
            writer,
            outbound,
            Arc::clone(&self.inner.shutdown),
            Arc::clone(&self.inner.metrics),
        ));

        let host = self.clone();
        tokio::spawn(async move {
            host.read_loop(reader).await;
            host.teardown(writer_task).await;
        });

        info!("Host started");
        Ok(())
    }

    /// Stop reading and release the channel. Idempotent.
    pub fn stop(&self) {
        self.inner.shutdown.shutdown();
        if !self.inner.started.load(Ordering::SeqCst) {
            self.reject_pending();
            self.inner.shutdown.mark_complete();
        }
    }

    /// Wait until the read loop has ended and the channel is released.
    pub async fn wait_for_exit(&self) {
        self.inner.shutdown.wait_complete().await;
    }

    async fn read_loop(&self, mut reader: MessageReader<BoxedReader>) {
        let mut stop = self.inner.shutdown.signal();
        loop {
            let next = tokio::select! {
                biased;
                _ = stop.recv() => {
                    debug!("Stop requested; leaving read loop");
                    break;
                }
                next = reader.read_message() => next,
            };

            match next {
                Ok(message) => {
                    self.dispatch(message).await;
                    if self.inner.shutdown.is_shutting_down() {
                        debug!("Host stopped while dispatching; leaving read loop");
                        break;
                    }
                }
                Err(e) if e.is_recoverable() => {
                    self.inner.metrics.record_parse_failure();
                    warn!(error = %e, "Dropping malformed message");
                }
                Err(ChannelError::Closed) => {
                    info!("Peer closed the channel");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Transport failure; stopping");
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, message: Message) {
        self.inner.metrics.record_received();
        match message.kind() {
            MessageKind::Request => self.dispatch_request(message),
            MessageKind::Event => self.dispatch_event(message).await,
            MessageKind::Response | MessageKind::ResponseError => self.complete_pending(message),
        }
    }

    fn dispatch_request(&self, message: Message) {
        let Message::Request { id, method, .. } = &message else {
            return;
        };
        let (id, method) = (id.clone(), method.clone());

        let handler = self.inner.request_handlers.read().get(&method).cloned();
        match handler {
            Some(handler) => {
                self.inner.metrics.record_request_dispatched();
                debug!(%id, %method, "Dispatching request");
                tokio::spawn(handler(id, message, self.env()));
            }
            None => {
                self.inner.metrics.record_unknown_method();
                warn!(%id, %method, "No handler registered for request");
                match Message::response_error(id, &RpcError::method_not_found(&method)) {
                    Ok(reply) => {
                        let _ = self.inner.sender.send(reply);
                    }
                    Err(e) => error!(error = %e, "Failed to build method-not-found reply"),
                }
            }
        }
    }

    async fn dispatch_event(&self, message: Message) {
        let Some(method) = message.method().map(str::to_string) else {
            return;
        };

        let handler = self.inner.event_handlers.read().get(&method).cloned();
        match handler {
            Some(handler) => {
                self.inner.metrics.record_event_dispatched();
                debug!(%method, "Dispatching event");
                let task = handler(message, self.env());
                if method == EXIT_METHOD {
                    // Inline so nothing queued behind `exit` is dispatched
                    task.await;
                } else {
                    tokio::spawn(task);
                }
            }
            None => {
                self.inner.metrics.record_unknown_method();
                debug!(%method, "No handler registered for event; ignoring");
            }
        }
    }

    fn complete_pending(&self, message: Message) {
        let Some(id) = message.id().cloned() else {
            return;
        };

        let waiter = self.inner.pending.lock().remove(&id);
        match waiter {
            Some(waiter) => {
                debug!(%id, kind = %message.kind(), "Routing reply to pending request");
                if waiter.send(Ok(message)).is_err() {
                    debug!(%id, "Caller stopped waiting for the reply");
                }
            }
            None => {
                self.inner.metrics.record_orphaned_response();
                warn!(%id, "Dropping reply for unknown request id");
            }
        }
    }

    fn env(&self) -> HandlerEnv {
        HandlerEnv {
            sender: self.inner.sender.clone(),
            stop: self.inner.shutdown.signal(),
            metrics: Arc::clone(&self.inner.metrics),
        }
    }

    fn reject_pending(&self) {
        let pending: Vec<_> = self.inner.pending.lock().drain().collect();
        if !pending.is_empty() {
            warn!(count = pending.len(), "Rejecting outstanding requests");
        }
        for (_, waiter) in pending {
            let _ = waiter.send(Err(HostError::ConnectionClosed));
        }
    }

    async fn teardown(&self, writer_task: JoinHandle<()>) {
        let controller = &self.inner.shutdown;
        controller.shutdown();

        controller.notify_phase(ShutdownPhase::RejectingPending);
        self.reject_pending();

        controller.notify_phase(ShutdownPhase::FlushingOutput);
        if let Err(e) = writer_task.await {
            error!(error = %e, "Writer task failed");
        }

        let snapshot = self.inner.metrics.snapshot();
        info!(
            received = snapshot.messages_received,
            dispatched = snapshot.requests_dispatched + snapshot.events_dispatched,
            parse_failures = snapshot.parse_failures,
            "Channel released"
        );
        controller.mark_complete();
    }
}

impl Default for JsonRpcHost {
    fn default() -> Self {
        Self::new()
    }
}

fn register<H>(
    registry: &RwLock<HashMap<String, H>>,
    kind: &'static str,
    method: &str,
    handler: H,
    override_existing: bool,
) -> Result<(), HostError> {
    let mut handlers = registry.write();
    if !override_existing && handlers.contains_key(method) {
        return Err(HostError::HandlerAlreadyRegistered {
            kind,
            method: method.to_string(),
        });
    }
    if handlers.insert(method.to_string(), handler).is_some() {
        debug!(kind, method, "Replaced existing handler");
    }
    Ok(())
}

fn settle_request(
    slot: &Arc<ReplySlot>,
    method: &str,
    outcome: HandlerOutcome,
    timer: HandlerTimer,
) {
    match outcome {
        // An unanswered slot sends an error once its last holder drops it
        Ok(Ok(())) => {
            timer.stop(true);
        }
        Ok(Err(err)) => {
            timer.stop(false);
            let message = format!("{err:#}");
            if slot.fail_if_open(&RpcError::from_handler_error(&err)) {
                warn!(method, error = %message, "Request handler failed");
            } else {
                warn!(method, error = %message, "Request handler failed after responding");
            }
        }
        Err(panic) => {
            timer.stop(false);
            let message = panic_message(panic.as_ref());
            error!(method, panic = %message, "Request handler panicked");
            slot.fail_if_open(&RpcError::internal(format!(
                "handler for '{method}' panicked: {message}"
            )));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn write_loop(
    mut writer: MessageWriter<BoxedWriter>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    controller: SharedShutdownController,
    metrics: SharedMetrics,
) {
    let mut stop = controller.signal();
    loop {
        let message = tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => message,
                None => return,
            },
            _ = stop.recv() => break,
        };
        if !write_one(&mut writer, &message, &metrics).await {
            controller.shutdown();
            return;
        }
    }

    // Flush what was queued before the stop
    while let Ok(message) = outbound.try_recv() {
        if !write_one(&mut writer, &message, &metrics).await {
            return;
        }
    }
}

async fn write_one(
    writer: &mut MessageWriter<BoxedWriter>,
    message: &Message,
    metrics: &SharedMetrics,
) -> bool {
    match writer.write_message(message).await {
        Ok(bytes) => {
            metrics.record_sent(message.kind(), bytes);
            true
        }
        Err(ChannelError::Encode(e)) => {
            error!(error = %e, kind = %message.kind(), "Dropping unencodable message");
            true
        }
        Err(e) => {
            error!(error = %e, "Failed to write message; stopping");
            false
        }
    }
}
