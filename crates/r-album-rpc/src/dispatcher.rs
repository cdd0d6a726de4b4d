//! ---
//! album_section: "07-service-dispatch"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Service registry, argument validation and dispatch."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use r_album_logging::{rpc_debug, rpc_warn, LogContext};
use r_album_transport::{ErrorSink, Responder, TracingErrorSink};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::activity::{ActivityTracker, NoopActivity};
use crate::context::{CallContext, Dependencies};
use crate::descriptor::MethodDescriptor;
use crate::locks::{CallLock, NoopLocks};
use crate::metrics::DispatchMetrics;
use crate::schema::Args;

/// Validates inbound calls, runs their handler and sends exactly one reply.
#[derive(Clone)]
pub struct Dispatcher {
    dependencies: Dependencies,
    activity: Arc<dyn ActivityTracker>,
    locks: Arc<dyn CallLock>,
    sink: Arc<dyn ErrorSink>,
    metrics: Option<DispatchMetrics>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Dependencies::default())
    }
}

impl Dispatcher {
    /// Dispatcher with no-op bookkeeping and a tracing error sink.
    pub fn new(dependencies: Dependencies) -> Self {
        Self {
            dependencies,
            activity: Arc::new(NoopActivity),
            locks: Arc::new(NoopLocks),
            sink: Arc::new(TracingErrorSink),
            metrics: None,
        }
    }

    /// Replace the collaborators handed to handlers.
    pub fn with_dependencies(mut self, dependencies: Dependencies) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Report call start and finish to `activity`.
    pub fn with_activity(mut self, activity: Arc<dyn ActivityTracker>) -> Self {
        self.activity = activity;
        self
    }

    /// Hold a per-call key from `locks` while the call runs.
    pub fn with_locks(mut self, locks: Arc<dyn CallLock>) -> Self {
        self.locks = locks;
        self
    }

    /// Send reply failures to `sink`.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Count calls and failures.
    pub fn with_metrics(mut self, metrics: DispatchMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shared collaborators handed to handlers.
    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    /// Serve one inbound request for `method`.
    pub async fn dispatch(&self, method: &MethodDescriptor, payload: Value, responder: Responder) {
        let action = responder.action().to_owned();
        let _lock = self
            .locks
            .acquire(&format!("{}/{}", action, Uuid::new_v4()))
            .await;
        let _busy = BusyGuard::enter(self.activity.clone(), self.metrics.clone());

        let context = CallContext::new(
            responder.adaptor().clone(),
            action.clone(),
            responder.request_id().cloned(),
            self.dependencies.clone(),
        );
        let result = self.run(method, context, &payload).await;
        if result.is_err() {
            if let Some(metrics) = &self.metrics {
                metrics.observe_failure(&action);
            }
        }

        if let Err(err) = responder.reply(result) {
            let err = anyhow::Error::new(err).context("unable to send response");
            self.sink.capture(&action, &err);
        }
    }

    async fn run(
        &self,
        method: &MethodDescriptor,
        context: CallContext,
        payload: &Value,
    ) -> Result<Value, String> {
        let request_id = context.request_id().map(|id| id.as_str().to_owned());
        let log = LogContext::new()
            .with_connection(context.connection_id())
            .with_action(context.action())
            .with_request_id(request_id.as_deref());

        let args = match Args::validate(method.args(), payload) {
            Ok(args) => args,
            Err(err) => {
                rpc_debug!(context = log, "rejected call: {}", err);
                return Err(err.to_string());
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.observe_call(context.action());
        }

        let invocation = method.invoke(context.clone(), args);
        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(_)) if method.is_no_payload() => Ok(json!({})),
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                rpc_warn!(context = log, "handler failed: {:#}", err);
                Err(err.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                rpc_warn!(context = log, "handler panicked: {}", message);
                Err(message)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}

struct BusyGuard {
    activity: Arc<dyn ActivityTracker>,
    metrics: Option<DispatchMetrics>,
}

impl BusyGuard {
    fn enter(activity: Arc<dyn ActivityTracker>, metrics: Option<DispatchMetrics>) -> Self {
        activity.enter();
        if let Some(metrics) = &metrics {
            metrics.enter();
        }
        Self { activity, metrics }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.activity.exit();
        if let Some(metrics) = &self.metrics {
            metrics.exit();
        }
    }
}
