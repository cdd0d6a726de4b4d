//! ---
//! album_section: "05-networking-external-interfaces"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Channel adaptor, correlator and retry engine."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
//! Structured binding between threads.
//!
//! Envelopes are passed by value; nothing is serialized. Each endpoint owns
//! the sender into its peer's inbound queue, so closing an endpoint ends the
//! peer's stream and the peer disconnects in turn.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use r_album_logging::{log_lifecycle_event, rpc_error, LifecycleOutcome, LogContext};
use r_album_msg::{Envelope, Frame};
use tokio::sync::mpsc;

use crate::{Adaptor, AdaptorOptions, Channel, ChannelKind, TransportError};

/// Outbound half of a thread port.
pub struct ThreadPortChannel {
    peer: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    attached: Arc<AtomicBool>,
}

impl ThreadPortChannel {
    fn new(peer: mpsc::UnboundedSender<Frame>, attached: Arc<AtomicBool>) -> Self {
        Self {
            peer: Mutex::new(Some(peer)),
            attached,
        }
    }
}

impl Channel for ThreadPortChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::ThreadPort
    }

    fn ready(&self) -> bool {
        self.attached.load(Ordering::SeqCst) && !self.is_closed()
    }

    fn is_closed(&self) -> bool {
        self.peer
            .lock()
            .as_ref()
            .map_or(true, |peer| peer.is_closed())
    }

    fn write(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let peer = self.peer.lock();
        let Some(peer) = peer.as_ref() else {
            return Err(TransportError::Disconnected);
        };
        peer.send(Frame::Structured(envelope.clone()))
            .map_err(|_| TransportError::Disconnected)
    }

    fn close(&self) {
        self.peer.lock().take();
    }
}

/// Two adaptors joined by an in-process structured port.
pub fn port_pair(options: AdaptorOptions) -> (Adaptor, Adaptor) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    let attached = Arc::new(AtomicBool::new(true));
    let left = Adaptor::spawn(
        Arc::new(ThreadPortChannel::new(right_tx, attached.clone())),
        left_rx,
        options.clone(),
    );
    let right = Adaptor::spawn(
        Arc::new(ThreadPortChannel::new(left_tx, attached)),
        right_rx,
        options,
    );
    (left, right)
}

/// Handle on a worker thread started by [`spawn_worker`].
pub struct WorkerHandle {
    name: String,
    parent: Adaptor,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker thread is still running.
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Close the port. The worker winds down once it notices; the parent's
    /// disconnect callbacks fire immediately.
    pub fn terminate(&self) {
        self.parent.disconnect();
    }

    /// Wait for the worker thread to exit.
    pub async fn join(mut self) -> Result<(), TransportError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|err| TransportError::Worker(err.to_string()))?
            .map_err(|_| TransportError::Worker(format!("worker {name} panicked")))
    }
}

/// Start an OS thread running its own current-thread runtime and connect it
/// to the caller with a structured port.
///
/// `init` receives the worker-side adaptor and registers the worker's
/// handlers. The parent side reports not-ready until `init` has succeeded,
/// so early calls back off through the retry engine. If `init` fails the
/// port closes and the parent disconnects. Must be called within a Tokio
/// runtime.
pub fn spawn_worker<F, Fut>(
    name: impl Into<String>,
    options: AdaptorOptions,
    init: F,
) -> Result<(Adaptor, WorkerHandle), TransportError>
where
    F: FnOnce(Adaptor) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + 'static,
{
    let name = name.into();
    let (to_worker_tx, to_worker_rx) = mpsc::unbounded_channel();
    let (to_parent_tx, to_parent_rx) = mpsc::unbounded_channel();
    let attached = Arc::new(AtomicBool::new(false));

    let worker_channel = ThreadPortChannel::new(to_parent_tx, Arc::new(AtomicBool::new(true)));
    let worker_options = options.clone();
    let worker_attached = attached.clone();
    let worker_name = name.clone();
    let thread = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            run_worker(
                worker_name,
                worker_channel,
                to_worker_rx,
                worker_options,
                worker_attached,
                init,
            )
        })
        .map_err(|err| TransportError::Worker(err.to_string()))?;

    let parent = Adaptor::spawn(
        Arc::new(ThreadPortChannel::new(to_worker_tx, attached)),
        to_parent_rx,
        options,
    );
    Ok((
        parent.clone(),
        WorkerHandle {
            name,
            parent,
            thread: Some(thread),
        },
    ))
}

fn run_worker<F, Fut>(
    name: String,
    channel: ThreadPortChannel,
    inbound: mpsc::UnboundedReceiver<Frame>,
    options: AdaptorOptions,
    attached: Arc<AtomicBool>,
    init: F,
) where
    F: FnOnce(Adaptor) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let context = LogContext::new().with_channel(ChannelKind::ThreadPort.as_str());
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            rpc_error!(context = context, "worker {} runtime failed to start: {}", name, err);
            return;
        }
    };

    runtime.block_on(async move {
        let adaptor = Adaptor::spawn(Arc::new(channel), inbound, options);
        if let Err(err) = init(adaptor.clone()).await {
            rpc_error!(
                context = context.clone().with_connection(adaptor.id()),
                "worker {} failed to initialise: {:#}",
                name,
                err
            );
            adaptor.disconnect();
            return;
        }
        attached.store(true, Ordering::SeqCst);
        log_lifecycle_event(
            Some(&context.clone().with_connection(adaptor.id())),
            "worker.ready",
            &name,
            LifecycleOutcome::Success,
        );
        adaptor.closed().await;
        log_lifecycle_event(
            Some(&context.with_connection(adaptor.id())),
            "worker.exit",
            &name,
            LifecycleOutcome::Success,
        );
    });
}
