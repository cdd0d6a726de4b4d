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
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use r_album_msg::{RequestId, Response};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{CallError, SendOutcome};

type Completion = oneshot::Sender<Result<Value, CallError>>;

struct PendingEntry {
    action: String,
    started: Instant,
    completion: Completion,
}

/// Outstanding tracked calls keyed by request id.
///
/// Entries are removed before their caller is completed, so each caller is
/// completed at most once.
#[derive(Default)]
pub struct PendingCalls {
    entries: Mutex<HashMap<RequestId, PendingEntry>>,
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a call and return the receiving half of its completion.
    pub fn register(
        &self,
        request_id: RequestId,
        action: &str,
    ) -> oneshot::Receiver<Result<Value, CallError>> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(
            request_id,
            PendingEntry {
                action: action.to_owned(),
                started: Instant::now(),
                completion: tx,
            },
        );
        rx
    }

    /// Complete the call `response` answers. Returns the elapsed round trip,
    /// or `None` when no entry matched (stale, duplicate or foreign ids).
    pub fn resolve(&self, response: Response) -> Option<Duration> {
        let entry = self.entries.lock().remove(&response.request_id);
        let Some(entry) = entry else {
            debug!(
                request_id = %response.request_id,
                "dropping response without a pending call"
            );
            return None;
        };
        let elapsed = entry.started.elapsed();
        let result = response.into_result().map_err(CallError::Remote);
        // The caller may have stopped waiting; that is not an error here.
        let _ = entry.completion.send(result);
        Some(elapsed)
    }

    /// Remove an entry and complete its caller with `error`.
    pub fn fail(&self, request_id: &RequestId, error: CallError) -> bool {
        let entry = self.entries.lock().remove(request_id);
        match entry {
            Some(entry) => {
                debug!(
                    request_id = %request_id,
                    action = %entry.action,
                    error = %error,
                    "pending call failed locally"
                );
                let _ = entry.completion.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drop an entry whose reply budget ran out.
    pub fn expire(&self, request_id: &RequestId) -> bool {
        self.fail(request_id, CallError::TimedOut)
    }

    /// Whether `request_id` is still awaiting a response.
    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.entries.lock().contains_key(request_id)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no call is outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Tracked call returned by `emit`; resolves with the correlated reply.
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    request_id: RequestId,
    outcome: SendOutcome,
    receiver: oneshot::Receiver<Result<Value, CallError>>,
}

impl PendingCall {
    pub(crate) fn new(
        request_id: RequestId,
        outcome: SendOutcome,
        receiver: oneshot::Receiver<Result<Value, CallError>>,
    ) -> Self {
        Self {
            request_id,
            outcome,
            receiver,
        }
    }

    /// Correlation id carried by the request.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// How the request send went.
    pub fn send_outcome(&self) -> &SendOutcome {
        &self.outcome
    }
}

impl Future for PendingCall {
    type Output = Result<Value, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CallError::Disconnected)))
    }
}
