//! ---
//! album_section: "05-networking-external-interfaces"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Channel adaptor, correlator and retry engine."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use r_album_common::TransportConfig;
use r_album_logging::{log_lifecycle_event, rpc_info, rpc_warn, LifecycleOutcome, LogContext};
use r_album_msg::{
    log_message, DropReason, Envelope, Frame, MessageDirection, MessagingMetricsExporter, Request,
    RequestId, Response,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::{NOT_IMPLEMENTED, NO_RESPONSE};
use crate::retry::{deliver, RetryPolicy, SendOutcome};
use crate::sink::{ErrorSink, TracingErrorSink};
use crate::{
    CallError, Channel, ChannelKind, Middleware, PendingCall, PendingCalls, TransportError,
};

type HandlerFn = Arc<dyn Fn(Value, Responder) -> BoxFuture<'static, ()> + Send + Sync>;
type DisconnectFn = Box<dyn FnOnce() + Send>;

/// Settings shared by every adaptor a binding creates.
#[derive(Clone, Default)]
pub struct AdaptorOptions {
    /// Retry and reply-wait settings.
    pub transport: TransportConfig,
    /// Optional envelope traffic metrics.
    pub metrics: Option<MessagingMetricsExporter>,
    /// Where canned replies that fail to send are reported. Logs when unset.
    pub error_sink: Option<Arc<dyn ErrorSink>>,
}

impl AdaptorOptions {
    /// Options built from a transport configuration section.
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            metrics: None,
            error_sink: None,
        }
    }

    /// Record envelope traffic with `metrics`.
    pub fn with_metrics(mut self, metrics: MessagingMetricsExporter) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Report canned replies that fail to send to `sink`.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }
}

struct Inner {
    id: String,
    channel: Arc<dyn Channel>,
    handlers: RwLock<HashMap<String, Vec<(u64, HandlerFn)>>>,
    next_registration: AtomicU64,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    pending: PendingCalls,
    retry: Mutex<RetryPolicy>,
    reply_budget: Duration,
    expire_pending: bool,
    metrics: Option<MessagingMetricsExporter>,
    error_sink: Arc<dyn ErrorSink>,
    closed: watch::Sender<bool>,
    on_disconnect: Mutex<Vec<DisconnectFn>>,
}

/// Per-channel RPC endpoint: registers handlers, issues calls and correlates
/// replies regardless of the binding underneath.
///
/// Cloning is cheap; every clone drives the same channel.
#[derive(Clone)]
pub struct Adaptor {
    inner: Arc<Inner>,
}

impl fmt::Debug for Adaptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adaptor")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.channel.kind())
            .field("closed", &self.is_closed())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl Adaptor {
    /// Wrap `channel` and start consuming `inbound` on the current Tokio runtime.
    pub fn spawn(
        channel: Arc<dyn Channel>,
        inbound: mpsc::UnboundedReceiver<Frame>,
        options: AdaptorOptions,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            id: Uuid::new_v4().to_string(),
            channel,
            handlers: RwLock::new(HashMap::new()),
            next_registration: AtomicU64::new(1),
            middleware: RwLock::new(Vec::new()),
            pending: PendingCalls::new(),
            retry: Mutex::new(RetryPolicy::from_config(&options.transport)),
            reply_budget: options.transport.reply_budget,
            expire_pending: options.transport.expire_pending,
            metrics: options.metrics,
            error_sink: options
                .error_sink
                .unwrap_or_else(|| Arc::new(TracingErrorSink)),
            closed,
            on_disconnect: Mutex::new(Vec::new()),
        });
        let adaptor = Self { inner };
        log_lifecycle_event(
            Some(&adaptor.log_context()),
            "adaptor.connected",
            "channel attached",
            LifecycleOutcome::Success,
        );
        tokio::spawn(read_loop(adaptor.clone(), inbound));
        adaptor
    }

    /// Connection identifier, unique per adaptor.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Binding kind of the underlying channel.
    pub fn kind(&self) -> ChannelKind {
        self.inner.channel.kind()
    }

    /// Register `handler` for inbound requests naming `action`.
    ///
    /// The most recent registration for an action handles it; unregistering
    /// it reinstates the previous one.
    pub fn on<F, Fut>(&self, action: impl Into<String>, handler: F) -> Registration
    where
        F: Fn(Value, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let action = action.into();
        let id = self.inner.next_registration.fetch_add(1, Ordering::Relaxed);
        let handler: HandlerFn =
            Arc::new(move |payload, responder| handler(payload, responder).boxed());
        self.inner
            .handlers
            .write()
            .entry(action.clone())
            .or_default()
            .push((id, handler));
        Registration {
            inner: Arc::downgrade(&self.inner),
            action,
            id,
        }
    }

    /// Actions with at least one handler, sorted.
    pub fn registered_actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.inner.handlers.read().keys().cloned().collect();
        actions.sort();
        actions
    }

    /// Add an observer run on every inbound request.
    pub fn use_middleware<M: Middleware>(&self, middleware: M) {
        self.inner.middleware.write().push(Arc::new(middleware));
    }

    /// Send a request that expects no reply.
    pub async fn notify(&self, action: impl Into<String>, payload: Value) -> SendOutcome {
        let envelope = Envelope::from(Request::notification(action, payload));
        self.send(&envelope).await
    }

    /// Send a tracked request. Completes once the send is done; the returned
    /// call resolves when the correlated reply arrives.
    pub async fn emit(&self, action: impl Into<String>, payload: Value) -> PendingCall {
        let action = action.into();
        let request_id = RequestId::new();
        let receiver = self.inner.pending.register(request_id.clone(), &action);
        let envelope = Envelope::from(Request::call(request_id.clone(), action, payload));
        let outcome = self.send(&envelope).await;
        match &outcome {
            SendOutcome::Abandoned { attempts, .. } => {
                self.inner.pending.fail(
                    &request_id,
                    CallError::Abandoned {
                        attempts: *attempts,
                    },
                );
            }
            SendOutcome::Delivered { .. } if self.inner.expire_pending => {
                self.arm_expiry(request_id.clone());
            }
            SendOutcome::Delivered { .. } => {}
        }
        PendingCall::new(request_id, outcome, receiver)
    }

    /// Send a tracked request and wait for its reply.
    pub async fn call(&self, action: impl Into<String>, payload: Value) -> Result<Value, CallError> {
        self.emit(action, payload).await.await
    }

    /// Run `callback` once the channel is disconnected. Runs immediately when
    /// it already is.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callbacks = self.inner.on_disconnect.lock();
        if self.is_closed() {
            drop(callbacks);
            callback();
            return;
        }
        callbacks.push(Box::new(callback));
    }

    /// Close the channel and fire disconnect callbacks.
    pub fn disconnect(&self) {
        self.shutdown("disconnected locally");
    }

    /// Whether the adaptor has been disconnected.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Wait until the adaptor is disconnected.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Change the number of readiness checks made before a send is abandoned.
    pub fn set_max_retries(&self, max_retries: u32) {
        let mut retry = self.inner.retry.lock();
        *retry = retry.clone().with_max_retries(max_retries);
    }

    /// Current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry.lock().clone()
    }

    /// Reply-wait budget derived from configuration.
    pub fn reply_budget(&self) -> Duration {
        self.inner.reply_budget
    }

    /// Tracked calls still awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    fn log_context(&self) -> LogContext<'_> {
        LogContext::new()
            .with_connection(&self.inner.id)
            .with_channel(self.inner.channel.kind().as_str())
    }

    async fn send(&self, envelope: &Envelope) -> SendOutcome {
        let policy = self.retry_policy();
        let context = self
            .log_context()
            .with_action(envelope.action().unwrap_or(""))
            .with_request_id(envelope.request_id().map(|id| id.as_str()));
        let outcome = deliver(self.inner.channel.as_ref(), envelope, &policy, &context).await;
        if let Some(metrics) = &self.inner.metrics {
            let channel = self.inner.channel.kind().as_str();
            if outcome.is_delivered() {
                metrics.observe_sent(channel, envelope);
            } else {
                metrics.observe_dropped(channel, DropReason::Undeliverable);
            }
        }
        outcome
    }

    fn write_response(&self, response: Response) -> Result<(), TransportError> {
        let envelope = Envelope::from(response);
        let channel = &self.inner.channel;
        let written = if channel.ready() {
            channel.write(&envelope)
        } else {
            Err(TransportError::Disconnected)
        };
        if let Some(metrics) = &self.inner.metrics {
            let kind = channel.kind().as_str();
            match &written {
                Ok(()) => metrics.observe_sent(kind, &envelope),
                Err(_) => metrics.observe_dropped(kind, DropReason::Undeliverable),
            }
        }
        if written.is_ok() {
            log_message(MessageDirection::Outbound, &envelope);
        }
        written
    }

    fn report_reply_failure(&self, action: &str, err: TransportError, what: &'static str) {
        let err = anyhow::Error::new(err).context(what);
        self.inner.error_sink.capture(action, &err);
    }

    fn arm_expiry(&self, request_id: RequestId) {
        let inner = Arc::downgrade(&self.inner);
        let budget = self.inner.reply_budget;
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.pending.expire(&request_id) {
                rpc_warn!(
                    context = LogContext::new()
                        .with_connection(&inner.id)
                        .with_request_id(Some(request_id.as_str())),
                    "no response within {:?}, pending call expired",
                    budget
                );
            }
        });
    }

    fn shutdown(&self, reason: &str) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        self.inner.channel.close();
        let callbacks = std::mem::take(&mut *self.inner.on_disconnect.lock());
        log_lifecycle_event(
            Some(&self.log_context()),
            "adaptor.disconnected",
            reason,
            LifecycleOutcome::Success,
        );
        for callback in callbacks {
            callback();
        }
    }

    fn accept(&self, frame: Frame) {
        let envelope = match frame.into_envelope() {
            Ok(envelope) => envelope,
            Err(err) => {
                rpc_warn!(
                    context = self.log_context(),
                    "failed parsing message, unable to respond: {}",
                    err
                );
                if let Some(metrics) = &self.inner.metrics {
                    metrics.observe_dropped(self.kind().as_str(), DropReason::Undecodable);
                }
                return;
            }
        };
        if let Some(metrics) = &self.inner.metrics {
            metrics.observe_received(self.kind().as_str(), &envelope);
        }
        log_message(MessageDirection::Inbound, &envelope);

        match envelope {
            Envelope::Response(response) => match self.inner.pending.resolve(response) {
                Some(elapsed) => {
                    if let Some(metrics) = &self.inner.metrics {
                        metrics.observe_latency(self.kind().as_str(), elapsed);
                    }
                }
                None => {
                    if let Some(metrics) = &self.inner.metrics {
                        metrics.observe_dropped(self.kind().as_str(), DropReason::Unmatched);
                    }
                }
            },
            Envelope::Request(request) => {
                tokio::spawn(self.clone().dispatch(request));
            }
        }
    }

    async fn dispatch(self, request: Request) {
        let middleware: Vec<Arc<dyn Middleware>> = self.inner.middleware.read().clone();
        join_all(middleware.iter().map(|m| m.observe(&request))).await;

        let handler = self
            .inner
            .handlers
            .read()
            .get(&request.action)
            .and_then(|handlers| handlers.last())
            .map(|(_, handler)| handler.clone());

        let Request {
            request_id,
            action,
            payload,
        } = request;
        let responder = Responder::new(self.clone(), request_id, action);

        match handler {
            Some(handler) => handler(payload, responder).await,
            None => {
                rpc_info!(
                    context = self
                        .log_context()
                        .with_action(responder.action())
                        .with_request_id(responder.request_id().map(|id| id.as_str())),
                    "handler not implemented"
                );
                let action = responder.action().to_owned();
                if let Err(err) = responder.reply(Err(NOT_IMPLEMENTED.to_owned())) {
                    self.report_reply_failure(
                        &action,
                        err,
                        "unable to send not-implemented response",
                    );
                }
            }
        }
    }
}

async fn read_loop(adaptor: Adaptor, mut inbound: mpsc::UnboundedReceiver<Frame>) {
    let mut closed = adaptor.inner.closed.subscribe();
    loop {
        let frame = tokio::select! {
            frame = inbound.recv() => frame,
            _ = closed.wait_for(|closed| *closed) => None,
        };
        let Some(frame) = frame else {
            break;
        };
        adaptor.accept(frame);
    }
    adaptor.shutdown("inbound stream ended");
}

/// Handle returned by [`Adaptor::on`].
#[derive(Debug)]
pub struct Registration {
    inner: Weak<Inner>,
    action: String,
    id: u64,
}

impl Registration {
    /// Action the handler was registered for.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Remove exactly this handler. Returns `false` when it was already gone.
    pub fn unregister(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut handlers = inner.handlers.write();
        let Some(list) = handlers.get_mut(&self.action) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&self.action);
        }
        removed
    }
}

/// Single-use reply slot handed to a handler with each inbound request.
///
/// Dropping it without replying sends `"no response produced"` to a tracked
/// caller.
pub struct Responder {
    adaptor: Adaptor,
    request_id: Option<RequestId>,
    action: String,
    replied: bool,
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("action", &self.action)
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl Responder {
    fn new(adaptor: Adaptor, request_id: Option<RequestId>, action: String) -> Self {
        Self {
            adaptor,
            request_id,
            action,
            replied: false,
        }
    }

    /// Adaptor the request arrived on, for calls back to the peer.
    pub fn adaptor(&self) -> &Adaptor {
        &self.adaptor
    }

    /// Action named by the request.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Correlation id, absent for notifications.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Whether the caller is waiting for a reply.
    pub fn expects_reply(&self) -> bool {
        self.request_id.is_some()
    }

    /// Send the reply. Notifications produce nothing on the wire.
    pub fn reply(mut self, result: Result<Value, String>) -> Result<(), TransportError> {
        self.replied = true;
        self.send(result)
    }

    fn send(&self, result: Result<Value, String>) -> Result<(), TransportError> {
        let Some(request_id) = self.request_id.clone() else {
            return Ok(());
        };
        let response = match result {
            Ok(payload) => Response::success(request_id, payload),
            Err(message) => Response::failure(request_id, message),
        };
        self.adaptor.write_response(response)
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.replied || self.request_id.is_none() {
            return;
        }
        rpc_warn!(
            context = self
                .adaptor
                .log_context()
                .with_action(&self.action)
                .with_request_id(self.request_id.as_ref().map(|id| id.as_str())),
            "handler finished without replying"
        );
        if let Err(err) = self.send(Err(NO_RESPONSE.to_owned())) {
            self.adaptor
                .report_reply_failure(&self.action, err, "unable to send fallback response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{socket, thread, ActionRateCounter, RequestLogger, DISCONNECTED};
    use crate::retry::AbandonReason;
    use prometheus::Registry;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    fn echo(adaptor: &Adaptor) -> Registration {
        adaptor.on("Echo:repeat", |payload, responder: Responder| async move {
            let _ = responder.reply(Ok(payload["text"].clone()));
        })
    }

    #[tokio::test]
    async fn call_resolves_with_handler_result() {
        let (client, server) = socket::pair(AdaptorOptions::default());
        echo(&server);

        let reply = client
            .call("Echo:repeat", json!({"text": "hi"}))
            .await
            .expect("reply");
        assert_eq!(reply, json!("hi"));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_action_gets_not_implemented() {
        let (client, _server) = thread::port_pair(AdaptorOptions::default());
        let err = client
            .call("Album:explode", json!({}))
            .await
            .expect_err("no handler");
        assert_eq!(err, CallError::Remote(NOT_IMPLEMENTED.into()));
    }

    #[tokio::test]
    async fn notifications_run_handler_without_reply() {
        let (client, server) = socket::pair(AdaptorOptions::default());
        let (seen_tx, seen_rx) = oneshot::channel();
        let seen_tx = Mutex::new(Some(seen_tx));
        server.on("Album:changed", move |payload, responder: Responder| {
            assert!(!responder.expects_reply());
            if let Some(tx) = seen_tx.lock().take() {
                let _ = tx.send(payload);
            }
            async move {
                let _ = responder.reply(Ok(json!("ignored")));
            }
        });

        let outcome = client.notify("Album:changed", json!({"key": "a"})).await;
        assert!(outcome.is_delivered());
        assert_eq!(seen_rx.await.expect("handled"), json!({"key": "a"}));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn newest_registration_wins_until_unregistered() {
        let (client, server) = socket::pair(AdaptorOptions::default());
        let _first = server.on("Album:name", |_, responder: Responder| async move {
            let _ = responder.reply(Ok(json!("first")));
        });
        let second = server.on("Album:name", |_, responder: Responder| async move {
            let _ = responder.reply(Ok(json!("second")));
        });

        assert_eq!(client.call("Album:name", json!({})).await, Ok(json!("second")));
        assert!(second.unregister());
        assert_eq!(client.call("Album:name", json!({})).await, Ok(json!("first")));
        assert_eq!(server.registered_actions(), vec!["Album:name".to_owned()]);
    }

    #[tokio::test]
    async fn dropped_responder_sends_fallback_error() {
        let (client, server) = thread::port_pair(AdaptorOptions::default());
        server.on("Album:forgetful", |_, responder: Responder| async move {
            drop(responder);
        });
        let err = client
            .call("Album:forgetful", json!({}))
            .await
            .expect_err("fallback");
        assert_eq!(err.remote_message(), Some(NO_RESPONSE));
    }

    #[tokio::test]
    async fn concurrent_calls_are_correlated_independently() {
        let (client, server) = socket::pair(AdaptorOptions::default());
        server.on("Album:slow", |payload, responder: Responder| async move {
            let delay = payload["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let _ = responder.reply(Ok(payload["tag"].clone()));
        });

        let slow = client.emit("Album:slow", json!({"delay_ms": 80, "tag": "slow"})).await;
        let fast = client.emit("Album:slow", json!({"delay_ms": 5, "tag": "fast"})).await;
        assert_ne!(slow.request_id(), fast.request_id());

        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow, Ok(json!("slow")));
        assert_eq!(fast, Ok(json!("fast")));
    }

    #[tokio::test]
    async fn middleware_observes_every_request() {
        let (client, server) = socket::pair(AdaptorOptions::default());
        let registry = Registry::new();
        let counter = ActionRateCounter::register(&registry).expect("register");
        server.use_middleware(RequestLogger);
        server.use_middleware(counter.clone());
        echo(&server);

        client.call("Echo:repeat", json!({"text": "a"})).await.ok();
        client.call("Album:missing", json!({})).await.ok();
        assert_eq!(counter.count("Echo:repeat"), 1);
        assert_eq!(counter.count("Album:missing"), 1);
    }

    #[tokio::test]
    async fn disconnect_fires_callbacks_on_both_sides_once() {
        let (client, server) = socket::pair(AdaptorOptions::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let (server_tx, server_rx) = oneshot::channel();

        let counter = fired.clone();
        client.on_disconnect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        server.on_disconnect(move || {
            let _ = server_tx.send(());
        });

        client.disconnect();
        client.disconnect();
        server_rx.await.expect("server noticed");
        assert!(client.is_closed());
        assert!(server.is_closed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let late = fired.clone();
        client.on_disconnect(move || {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn emit_on_closed_channel_is_abandoned() {
        let (client, _server) = socket::pair(AdaptorOptions::default());
        client.disconnect();
        let call = client.emit("Echo:repeat", json!({"text": "x"})).await;
        assert_eq!(
            call.send_outcome(),
            &SendOutcome::Abandoned {
                attempts: 1,
                reason: AbandonReason::Closed
            }
        );
        assert_eq!(call.await, Err(CallError::Abandoned { attempts: 1 }));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn reply_after_disconnect_reports_failure() {
        let (client, server) = thread::port_pair(AdaptorOptions::default());
        let (result_tx, result_rx) = oneshot::channel();
        let result_tx = Mutex::new(Some(result_tx));
        server.on("Album:late", move |_, responder: Responder| {
            let tx = result_tx.lock().take();
            async move {
                responder.adaptor().disconnect();
                let result = responder.reply(Ok(json!(1)));
                if let Some(tx) = tx {
                    let _ = tx.send(result.map_err(|err| err.to_string()));
                }
            }
        });
        let _pending = client.emit("Album:late", json!({})).await;
        assert_eq!(
            result_rx.await.expect("handler ran"),
            Err(DISCONNECTED.to_owned())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lost_reply_stays_pending_without_expiry() {
        let (client, server) = socket::pair(AdaptorOptions::default());
        server.on("Album:hang", |_, responder: Responder| async move {
            std::future::pending::<()>().await;
            drop(responder);
        });
        let call = client.emit("Album:hang", json!({})).await;
        let waited = tokio::time::timeout(Duration::from_secs(600), call).await;
        assert!(waited.is_err());
        assert_eq!(client.pending_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn opt_in_expiry_times_out_pending_calls() {
        let options = AdaptorOptions::new(TransportConfig {
            expire_pending: true,
            ..TransportConfig::default()
        });
        let (client, server) = socket::pair(options);
        server.on("Album:hang", |_, responder: Responder| async move {
            std::future::pending::<()>().await;
            drop(responder);
        });
        let started = tokio::time::Instant::now();
        let result = client.call("Album:hang", json!({})).await;
        assert_eq!(result, Err(CallError::TimedOut));
        assert!(started.elapsed() >= Duration::from_secs(180));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn max_retries_can_be_changed_at_runtime() {
        let (client, _server) = socket::pair(AdaptorOptions::default());
        assert_eq!(client.retry_policy().max_retries, 10);
        client.set_max_retries(3);
        assert_eq!(client.retry_policy().max_retries, 3);
        assert_eq!(client.reply_budget(), Duration::from_secs(180));
    }

    struct StalledChannel;

    impl Channel for StalledChannel {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Socket
        }

        fn ready(&self) -> bool {
            false
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn write(&self, _envelope: &Envelope) -> Result<(), TransportError> {
            Err(TransportError::Disconnected)
        }

        fn close(&self) {}
    }

    struct ChannelSink(mpsc::UnboundedSender<(String, String)>);

    impl ErrorSink for ChannelSink {
        fn capture(&self, action: &str, error: &anyhow::Error) {
            let _ = self.0.send((action.to_owned(), format!("{error:#}")));
        }
    }

    #[tokio::test]
    async fn unsendable_canned_replies_reach_the_error_sink() {
        let (sink_tx, mut captured) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let options = AdaptorOptions::default().with_error_sink(Arc::new(ChannelSink(sink_tx)));
        let adaptor = Adaptor::spawn(Arc::new(StalledChannel), inbound_rx, options);
        adaptor.on("Album:forget", |_, responder: Responder| async move {
            drop(responder);
        });

        let missing = Request::call(RequestId::new(), "Album:missing", json!({}));
        inbound_tx
            .send(Frame::structured(Envelope::from(missing)))
            .expect("inbound open");
        let (action, error) = captured.recv().await.expect("captured");
        assert_eq!(action, "Album:missing");
        assert!(error.starts_with("unable to send not-implemented response"));

        let forgotten = Request::call(RequestId::new(), "Album:forget", json!({}));
        inbound_tx
            .send(Frame::structured(Envelope::from(forgotten)))
            .expect("inbound open");
        let (action, error) = captured.recv().await.expect("captured");
        assert_eq!(action, "Album:forget");
        assert!(error.starts_with("unable to send fallback response"));
    }
}
