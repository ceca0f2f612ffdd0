//! Reply handles given to request and event handlers.

use crate::error::{HostError, RpcError};
use crate::protocol::contracts::EventType;
use crate::protocol::message::{Message, RequestId};
use crate::shutdown::ShutdownSignal;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Enqueues outbound messages for the host's writer task.
#[derive(Clone, Debug)]
pub struct MessageSender {
    queue: mpsc::UnboundedSender<Message>,
}

impl MessageSender {
    pub(crate) fn new(queue: mpsc::UnboundedSender<Message>) -> Self {
        Self { queue }
    }

    /// Queue a message. Fails once the writer has stopped.
    pub fn send(&self, message: Message) -> Result<(), HostError> {
        self.queue
            .send(message)
            .map_err(|_| HostError::ConnectionClosed)
    }

    /// Queue an event.
    pub fn send_event<P: Serialize>(
        &self,
        event_type: EventType<P>,
        params: &P,
    ) -> Result<(), HostError> {
        self.send(Message::event(&event_type, params)?)
    }
}

/// Lets event handlers and lifecycle tasks push events to the peer.
#[derive(Clone, Debug)]
pub struct EventContext {
    sender: MessageSender,
}

impl EventContext {
    pub(crate) fn new(sender: MessageSender) -> Self {
        Self { sender }
    }

    /// Send an event to the peer.
    pub fn send_event<P: Serialize>(
        &self,
        event_type: EventType<P>,
        params: &P,
    ) -> Result<(), HostError> {
        self.sender.send_event(event_type, params)
    }
}

/// The single terminal reply slot of one inbound request.
#[derive(Debug)]
pub(crate) struct ReplySlot {
    id: RequestId,
    method: String,
    sender: MessageSender,
    completed: AtomicBool,
}

impl ReplySlot {
    pub(crate) fn new(
        id: RequestId,
        method: impl Into<String>,
        sender: MessageSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            method: method.into(),
            sender,
            completed: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Claim the slot. Only the first caller wins.
    fn claim(&self) -> bool {
        !self.completed.swap(true, Ordering::SeqCst)
    }

    fn already_sent(&self) -> HostError {
        warn!(id = %self.id, method = %self.method, "Response already sent; dropping second reply");
        HostError::ResponseAlreadySent {
            id: self.id.to_string(),
        }
    }

    fn send_result<R: Serialize>(&self, result: &R) -> Result<(), HostError> {
        if self.is_completed() {
            return Err(self.already_sent());
        }
        // Encode before claiming so a bad result leaves the slot open for an error reply
        let message = Message::response(self.id.clone(), result)?;
        if !self.claim() {
            return Err(self.already_sent());
        }
        self.sender.send(message)
    }

    pub(crate) fn send_error(&self, error: &RpcError) -> Result<(), HostError> {
        if !self.claim() {
            return Err(self.already_sent());
        }
        self.sender.send(Message::response_error(self.id.clone(), error)?)
    }

    /// Send an error only if nothing was sent yet. Used by the dispatcher
    /// after the handler has finished.
    pub(crate) fn fail_if_open(&self, error: &RpcError) -> bool {
        if !self.claim() {
            return false;
        }
        match Message::response_error(self.id.clone(), error) {
            Ok(message) => self.sender.send(message).is_ok(),
            Err(_) => false,
        }
    }
}

impl Drop for ReplySlot {
    fn drop(&mut self) {
        if self.is_completed() {
            return;
        }
        warn!(id = %self.id, method = %self.method, "Request finished without sending a response");
        self.fail_if_open(&RpcError::internal(format!(
            "handler for '{}' completed without sending a response",
            self.method
        )));
    }
}

/// Reply handle for one inbound request with result type `R`.
///
/// Exactly one of [`send_result`](Self::send_result) or
/// [`send_error`](Self::send_error) reaches the peer; later attempts return
/// [`HostError::ResponseAlreadySent`]. Events may be sent any number of times
/// before or after the reply. Dropping the last copy of the context without
/// replying sends an internal error.
#[derive(Debug)]
pub struct RequestContext<R> {
    slot: Arc<ReplySlot>,
    stop: ShutdownSignal,
    _result: PhantomData<fn(R)>,
}

impl<R: Serialize> RequestContext<R> {
    pub(crate) fn new(slot: Arc<ReplySlot>, stop: ShutdownSignal) -> Self {
        Self {
            slot,
            stop,
            _result: PhantomData,
        }
    }

    /// Id of the request being answered.
    pub fn id(&self) -> &RequestId {
        &self.slot.id
    }

    /// Method of the request being answered.
    pub fn method(&self) -> &str {
        &self.slot.method
    }

    /// Answer the request successfully.
    pub fn send_result(&self, result: R) -> Result<(), HostError> {
        self.slot.send_result(&result)
    }

    /// Answer the request with an error.
    pub fn send_error(&self, error: impl Into<RpcError>) -> Result<(), HostError> {
        self.slot.send_error(&error.into())
    }

    /// Send an event to the peer.
    pub fn send_event<P: Serialize>(
        &self,
        event_type: EventType<P>,
        params: &P,
    ) -> Result<(), HostError> {
        self.slot.sender.send_event(event_type, params)
    }

    /// Whether a terminal reply has been sent.
    pub fn is_completed(&self) -> bool {
        self.slot.is_completed()
    }

    /// An event context sharing this request's outbound queue.
    pub fn event_context(&self) -> EventContext {
        EventContext::new(self.slot.sender.clone())
    }

    /// Signal raised when the host is stopping. Long-running handlers should
    /// watch it and finish early.
    pub fn stop_signal(&self) -> ShutdownSignal {
        self.stop.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::INTERNAL_ERROR;
    use crate::protocol::MessageKind;
    use crate::shutdown::ShutdownController;
    use serde::ser::Error as _;

    const PROGRESS: EventType<u32> = EventType::new("query/progress");

    fn context<R: Serialize>(
        id: &str,
    ) -> (
        RequestContext<R>,
        mpsc::UnboundedReceiver<Message>,
        ShutdownController,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = ShutdownController::new();
        let slot = ReplySlot::new(RequestId::from(id), "query/execute", MessageSender::new(tx));
        (RequestContext::new(slot, controller.signal()), rx, controller)
    }

    #[test]
    fn test_only_first_reply_is_sent() {
        let (ctx, mut rx, _controller) = context::<String>("1");

        ctx.send_result("done".to_string()).unwrap();
        let err = ctx.send_error(RpcError::internal("late")).unwrap_err();
        assert!(matches!(err, HostError::ResponseAlreadySent { ref id } if id == "1"));
        assert!(ctx.send_result("again".to_string()).is_err());

        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.kind(), MessageKind::Response);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_events_around_reply() {
        let (ctx, mut rx, _controller) = context::<()>("2");

        ctx.send_event(PROGRESS, &10).unwrap();
        ctx.send_result(()).unwrap();
        ctx.send_event(PROGRESS, &100).unwrap();

        let kinds: Vec<MessageKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![MessageKind::Event, MessageKind::Response, MessageKind::Event]
        );
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("cannot encode"))
        }
    }

    #[test]
    fn test_failed_encoding_keeps_slot_open() {
        let (ctx, mut rx, _controller) = context::<Unencodable>("3");

        assert!(matches!(
            ctx.send_result(Unencodable),
            Err(HostError::Serialization(_))
        ));
        assert!(!ctx.is_completed());

        ctx.send_error(RpcError::internal("fallback")).unwrap();
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.rpc_error().unwrap().code, INTERNAL_ERROR);
    }

    #[test]
    fn test_fail_if_open_respects_prior_reply() {
        let (ctx, mut rx, _controller) = context::<bool>("4");
        ctx.send_result(true).unwrap();

        assert!(!ctx.slot.fail_if_open(&RpcError::internal("x")));
        assert_eq!(rx.try_recv().unwrap().kind(), MessageKind::Response);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_writer_gone_reports_closed() {
        let (ctx, rx, _controller) = context::<bool>("5");
        drop(rx);
        assert!(matches!(
            ctx.send_result(true),
            Err(HostError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_dropped_context_sends_error() {
        let (ctx, mut rx, _controller) = context::<bool>("7");
        ctx.send_event(PROGRESS, &1).unwrap();
        drop(ctx);

        assert_eq!(rx.try_recv().unwrap().kind(), MessageKind::Event);
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.id(), Some(&RequestId::from("7")));
        assert_eq!(sent.rpc_error().unwrap().code, INTERNAL_ERROR);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_context_after_reply_sends_nothing_more() {
        let (ctx, mut rx, _controller) = context::<bool>("8");
        ctx.send_result(false).unwrap();
        drop(ctx);

        assert_eq!(rx.try_recv().unwrap().kind(), MessageKind::Response);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_signal_follows_controller() {
        let (ctx, _rx, controller) = context::<bool>("6");
        let signal = ctx.stop_signal();
        assert!(!signal.is_shutdown());
        controller.shutdown();
        assert!(signal.is_shutdown());
    }
}
