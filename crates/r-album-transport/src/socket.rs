//! ---
//! album_section: "05-networking-external-interfaces"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Channel adaptor, correlator and retry engine."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
//! Text-framed binding over WebSockets.
//!
//! Writes go through an unbounded queue drained by a pump task that owns the
//! sink; a reader task forwards text frames to the adaptor. An unready socket
//! is retried; only a local close or the end of either task marks it closed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use r_album_msg::{encode_text, Envelope, Frame};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::{debug, warn};

use crate::{Adaptor, AdaptorOptions, Channel, ChannelKind, TransportError};

enum Outgoing {
    Text(String),
    Close,
}

/// Outbound half of a text-framed socket.
pub struct SocketChannel {
    outbound: mpsc::UnboundedSender<Outgoing>,
    open: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl SocketChannel {
    fn new(outbound: mpsc::UnboundedSender<Outgoing>, closed: Arc<AtomicBool>) -> Self {
        Self {
            outbound,
            open: Arc::new(AtomicBool::new(true)),
            closed,
        }
    }
}

impl Channel for SocketChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Socket
    }

    fn ready(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.is_closed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.outbound.is_closed()
    }

    fn write(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if !self.ready() {
            return Err(TransportError::Disconnected);
        }
        let text = encode_text(envelope)?;
        self.outbound.send(Outgoing::Text(text)).map_err(|_| {
            self.closed.store(true, Ordering::SeqCst);
            TransportError::Disconnected
        })
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.outbound.send(Outgoing::Close);
        }
    }
}

enum Incoming {
    Text(String),
    Binary,
    Close,
    Control,
}

trait WireMessage: Send + Sized + 'static {
    fn from_text(text: String) -> Self;
    fn classify(self) -> Incoming;
}

impl WireMessage for AxumMessage {
    fn from_text(text: String) -> Self {
        AxumMessage::Text(text)
    }

    fn classify(self) -> Incoming {
        match self {
            AxumMessage::Text(text) => Incoming::Text(text),
            AxumMessage::Binary(_) => Incoming::Binary,
            AxumMessage::Close(_) => Incoming::Close,
            AxumMessage::Ping(_) | AxumMessage::Pong(_) => Incoming::Control,
        }
    }
}

impl WireMessage for TungsteniteMessage {
    fn from_text(text: String) -> Self {
        TungsteniteMessage::Text(text)
    }

    fn classify(self) -> Incoming {
        match self {
            TungsteniteMessage::Text(text) => Incoming::Text(text),
            TungsteniteMessage::Binary(_) => Incoming::Binary,
            TungsteniteMessage::Close(_) => Incoming::Close,
            TungsteniteMessage::Ping(_)
            | TungsteniteMessage::Pong(_)
            | TungsteniteMessage::Frame(_) => Incoming::Control,
        }
    }
}

/// Bind an upgraded server-side WebSocket.
pub fn accept(socket: WebSocket, options: AdaptorOptions) -> Adaptor {
    bind(socket, options)
}

/// Open a client WebSocket to `url` and bind it.
pub async fn connect(url: &str, options: AdaptorOptions) -> Result<Adaptor, TransportError> {
    let (socket, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|err| TransportError::Connect(format!("{url}: {err}")))?;
    debug!(url, "websocket client connected");
    Ok(bind(socket, options))
}

/// Two adaptors joined by an in-memory text-framed link.
///
/// Every envelope is serialized and parsed exactly as on a real socket.
pub fn pair(options: AdaptorOptions) -> (Adaptor, Adaptor) {
    let (left_out_tx, left_out_rx) = mpsc::unbounded_channel();
    let (right_out_tx, right_out_rx) = mpsc::unbounded_channel();
    let (left_in_tx, left_in_rx) = mpsc::unbounded_channel();
    let (right_in_tx, right_in_rx) = mpsc::unbounded_channel();

    let left_closed = Arc::new(AtomicBool::new(false));
    let right_closed = Arc::new(AtomicBool::new(false));

    tokio::spawn(relay(left_out_rx, right_in_tx, left_closed.clone()));
    tokio::spawn(relay(right_out_rx, left_in_tx, right_closed.clone()));

    let left = Adaptor::spawn(
        Arc::new(SocketChannel::new(left_out_tx, left_closed)),
        left_in_rx,
        options.clone(),
    );
    let right = Adaptor::spawn(
        Arc::new(SocketChannel::new(right_out_tx, right_closed)),
        right_in_rx,
        options,
    );
    (left, right)
}

async fn relay(
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    peer: mpsc::UnboundedSender<Frame>,
    closed: Arc<AtomicBool>,
) {
    while let Some(outgoing) = outbound.recv().await {
        match outgoing {
            Outgoing::Text(text) => {
                if peer.send(Frame::Text(text)).is_err() {
                    break;
                }
            }
            Outgoing::Close => break,
        }
    }
    closed.store(true, Ordering::SeqCst);
}

fn bind<S, M, E>(socket: S, options: AdaptorOptions) -> Adaptor
where
    S: Stream<Item = Result<M, E>> + Sink<M> + Send + Unpin + 'static,
    <S as Sink<M>>::Error: fmt::Display,
    M: WireMessage,
    E: fmt::Display + Send,
{
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    let pump_closed = closed.clone();
    tokio::spawn(async move {
        while let Some(outgoing) = outbound_rx.recv().await {
            match outgoing {
                Outgoing::Text(text) => {
                    if let Err(err) = sink.send(M::from_text(text)).await {
                        warn!(error = %err, "websocket send failed");
                        break;
                    }
                }
                Outgoing::Close => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
        pump_closed.store(true, Ordering::SeqCst);
    });

    let reader_closed = closed.clone();
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    debug!(error = %err, "websocket receive failed");
                    break;
                }
            };
            match message.classify() {
                Incoming::Text(text) => {
                    if inbound_tx.send(Frame::Text(text)).is_err() {
                        break;
                    }
                }
                Incoming::Binary => warn!("binary websocket frames are not supported; ignoring"),
                Incoming::Close => break,
                Incoming::Control => {}
            }
        }
        reader_closed.store(true, Ordering::SeqCst);
    });

    Adaptor::spawn(
        Arc::new(SocketChannel::new(outbound_tx, closed)),
        inbound_rx,
        options,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{deliver, AbandonReason, RetryPolicy, SendOutcome};
    use crate::{CallError, Responder, NOT_IMPLEMENTED};
    use axum::extract::WebSocketUpgrade;
    use axum::routing::get;
    use axum::Router;
    use futures_util::{SinkExt, StreamExt};
    use r_album_logging::LogContext;
    use r_album_msg::Request;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::connect_async;

    async fn serve_echo() -> std::net::SocketAddr {
        let app = Router::new().route(
            "/cmd",
            get(|ws: WebSocketUpgrade| async move {
                ws.on_upgrade(|socket| async move {
                    let adaptor = accept(socket, AdaptorOptions::default());
                    adaptor.on("Echo:repeat", |payload: Value, responder: Responder| async move {
                        let _ = responder.reply(Ok(payload["text"].clone()));
                    });
                    adaptor.on("Server:hangup", |_, responder: Responder| async move {
                        let adaptor = responder.adaptor().clone();
                        let _ = responder.reply(Ok(json!("bye")));
                        adaptor.disconnect();
                    });
                })
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        address
    }

    #[tokio::test]
    async fn client_and_server_adaptors_talk_over_websocket() {
        let address = serve_echo().await;
        let client = connect(&format!("ws://{address}/cmd"), AdaptorOptions::default())
            .await
            .expect("connect");
        assert_eq!(client.kind(), ChannelKind::Socket);

        let reply = client.call("Echo:repeat", json!({"text": "hi"})).await;
        assert_eq!(reply, Ok(json!("hi")));
        let missing = client.call("Echo:shout", json!({})).await;
        assert_eq!(missing, Err(CallError::Remote(NOT_IMPLEMENTED.into())));
        client.disconnect();
    }

    #[tokio::test]
    async fn raw_clients_see_wire_format_and_garbage_is_dropped() {
        let address = serve_echo().await;
        let (mut socket, _) = connect_async(format!("ws://{address}/cmd"))
            .await
            .expect("connect");

        socket
            .send(TungsteniteMessage::Text("not json".into()))
            .await
            .expect("send garbage");
        socket
            .send(TungsteniteMessage::Binary(vec![1, 2, 3]))
            .await
            .expect("send binary");
        socket
            .send(TungsteniteMessage::Text(
                json!({
                    "type": "request",
                    "requestId": "r-1",
                    "action": "Echo:repeat",
                    "payload": {"text": "raw"}
                })
                .to_string(),
            ))
            .await
            .expect("send request");

        let reply = loop {
            match socket.next().await.expect("open").expect("frame") {
                TungsteniteMessage::Text(text) => break text,
                _ => continue,
            }
        };
        let reply: Value = serde_json::from_str(&reply).expect("json");
        assert_eq!(
            reply,
            json!({"type": "response", "requestId": "r-1", "payload": "raw"})
        );
    }

    #[tokio::test]
    async fn server_disconnect_is_observed_by_client() {
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        let closed_tx = parking_lot::Mutex::new(Some(closed_tx));
        let address = serve_echo().await;
        let client = connect(&format!("ws://{address}/cmd"), AdaptorOptions::default())
            .await
            .expect("connect");
        client.on_disconnect(move || {
            if let Some(tx) = closed_tx.lock().take() {
                let _ = tx.send(());
            }
        });

        assert_eq!(
            client.call("Server:hangup", json!({})).await,
            Ok(json!("bye"))
        );
        closed_rx.await.expect("disconnect observed");
        assert!(client.is_closed());
        assert!(!client.notify("Echo:repeat", json!({})).await.is_delivered());
    }

    fn unready_socket() -> (SocketChannel, mpsc::UnboundedReceiver<Outgoing>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let channel = SocketChannel {
            outbound,
            open: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        (channel, receiver)
    }

    fn notification() -> Envelope {
        Envelope::from(Request::notification("Album:changed", json!({})))
    }

    #[tokio::test(start_paused = true)]
    async fn unready_socket_backs_off_for_every_check() {
        let (channel, _receiver) = unready_socket();
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();

        let outcome = deliver(&channel, &notification(), &policy, &LogContext::new()).await;

        assert_eq!(
            outcome,
            SendOutcome::Abandoned {
                attempts: 10,
                reason: AbandonReason::NotReady
            }
        );
        let expected: Duration = policy.delays().sum();
        assert!(started.elapsed() >= expected);
        assert!(!channel.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn socket_becoming_ready_gets_the_queued_send() {
        let (channel, mut receiver) = unready_socket();
        let open = channel.open.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            open.store(true, Ordering::SeqCst);
        });

        let outcome = deliver(
            &channel,
            &notification(),
            &RetryPolicy::default(),
            &LogContext::new(),
        )
        .await;

        assert_eq!(outcome, SendOutcome::Delivered { attempts: 3 });
        assert!(matches!(receiver.try_recv(), Ok(Outgoing::Text(_))));
    }

    #[tokio::test]
    async fn closed_socket_is_not_retried() {
        let (channel, _receiver) = unready_socket();
        channel.close();
        let outcome = deliver(
            &channel,
            &notification(),
            &RetryPolicy::default(),
            &LogContext::new(),
        )
        .await;
        assert_eq!(
            outcome,
            SendOutcome::Abandoned {
                attempts: 1,
                reason: AbandonReason::Closed
            }
        );
    }
}
