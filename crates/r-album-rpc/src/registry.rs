//! ---
//! album_section: "07-service-dispatch"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Service registry, argument validation and dispatch."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::sync::Arc;

use r_album_logging::{rpc_debug, LogContext};
use r_album_transport::{Adaptor, ErrorSink, Registration};

use crate::activity::ActivityTracker;
use crate::context::Dependencies;
use crate::descriptor::{ServiceDescriptor, ServiceSchema};
use crate::dispatcher::Dispatcher;
use crate::locks::CallLock;
use crate::metrics::DispatchMetrics;

/// Services plus the dispatcher that serves them, attachable to any number
/// of adaptors.
#[derive(Clone)]
pub struct ServiceRegistry {
    services: Arc<Vec<ServiceDescriptor>>,
    dispatcher: Dispatcher,
}

impl ServiceRegistry {
    /// Registry serving `services` with default bookkeeping.
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self {
            services: Arc::new(services),
            dispatcher: Dispatcher::default(),
        }
    }

    /// See [`Dispatcher::with_dependencies`].
    pub fn with_dependencies(mut self, dependencies: Dependencies) -> Self {
        self.dispatcher = self.dispatcher.with_dependencies(dependencies);
        self
    }

    /// See [`Dispatcher::with_activity`].
    pub fn with_activity(mut self, activity: Arc<dyn ActivityTracker>) -> Self {
        self.dispatcher = self.dispatcher.with_activity(activity);
        self
    }

    /// See [`Dispatcher::with_locks`].
    pub fn with_locks(mut self, locks: Arc<dyn CallLock>) -> Self {
        self.dispatcher = self.dispatcher.with_locks(locks);
        self
    }

    /// See [`Dispatcher::with_error_sink`].
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.dispatcher = self.dispatcher.with_error_sink(sink);
        self
    }

    /// See [`Dispatcher::with_metrics`].
    pub fn with_metrics(mut self, metrics: DispatchMetrics) -> Self {
        self.dispatcher = self.dispatcher.with_metrics(metrics);
        self
    }

    /// Registered services.
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Every `<Service>:<method>` action served.
    pub fn actions(&self) -> Vec<String> {
        self.services
            .iter()
            .flat_map(|service| service.functions().map(|(name, _)| service.action(name)))
            .collect()
    }

    /// Schemas of every service, for stub generation.
    pub fn schemas(&self) -> Vec<ServiceSchema> {
        self.services.iter().map(ServiceDescriptor::schema).collect()
    }

    /// Register every method of every service on `adaptor`.
    pub fn attach(&self, adaptor: &Adaptor) -> Vec<Registration> {
        let mut registrations = Vec::new();
        for service in self.services.iter() {
            for (name, method) in service.functions() {
                let dispatcher = self.dispatcher.clone();
                let method = method.clone();
                registrations.push(adaptor.on(service.action(name), move |payload, responder| {
                    let dispatcher = dispatcher.clone();
                    let method = method.clone();
                    async move { dispatcher.dispatch(&method, payload, responder).await }
                }));
            }
        }
        rpc_debug!(
            context = LogContext::new().with_connection(adaptor.id()),
            "registered {} actions from {} services",
            registrations.len(),
            self.services.len()
        );
        registrations
    }
}

/// Register every method of `services` on `adaptor`, handing `dependencies`
/// to each handler.
pub fn register_services(
    adaptor: &Adaptor,
    services: Vec<ServiceDescriptor>,
    dependencies: Dependencies,
) -> Vec<Registration> {
    ServiceRegistry::new(services)
        .with_dependencies(dependencies)
        .attach(adaptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MethodDescriptor;
    use r_album_transport::{thread, AdaptorOptions, CallError, NOT_IMPLEMENTED};
    use serde_json::{json, Value};

    struct Greeting(&'static str);

    fn greeter() -> ServiceDescriptor {
        ServiceDescriptor::new("Greeter")
            .method(
                "hello",
                MethodDescriptor::new(&["name:string"], |context, args| async move {
                    let greeting = context.dependency::<Greeting>()?;
                    Ok(Value::String(format!(
                        "{} {}",
                        greeting.0,
                        args.str("name").unwrap_or_default()
                    )))
                })
                .expect("hello"),
            )
            .method(
                "whoami",
                MethodDescriptor::new(&[], |context, _args| async move {
                    Ok(json!(context.connection_id()))
                })
                .expect("whoami"),
            )
    }

    #[tokio::test]
    async fn registers_every_method_with_dependencies() {
        let (client, server) = thread::port_pair(AdaptorOptions::default());
        let registrations = register_services(
            &server,
            vec![greeter()],
            Dependencies::new().with(Greeting("hello")),
        );
        assert_eq!(registrations.len(), 2);
        assert_eq!(
            server.registered_actions(),
            ["Greeter:hello", "Greeter:whoami"]
        );

        let reply = client
            .call("Greeter:hello", json!({ "name": "ada" }))
            .await
            .expect("hello");
        assert_eq!(reply, json!("hello ada"));
        let reply = client.call("Greeter:whoami", json!({})).await.expect("whoami");
        assert_eq!(reply, json!(server.id()));
    }

    #[tokio::test]
    async fn missing_dependency_is_a_handler_failure() {
        let (client, server) = thread::port_pair(AdaptorOptions::default());
        ServiceRegistry::new(vec![greeter()]).attach(&server);

        let err = client
            .call("Greeter:hello", json!({ "name": "ada" }))
            .await
            .expect_err("no greeting");
        assert!(err.remote_message().unwrap_or_default().contains("not registered"));
    }

    #[tokio::test]
    async fn unregistered_actions_fall_back_to_not_implemented() {
        let (client, server) = thread::port_pair(AdaptorOptions::default());
        let registry = ServiceRegistry::new(vec![greeter()]);
        assert_eq!(registry.actions(), ["Greeter:hello", "Greeter:whoami"]);
        for registration in registry.attach(&server) {
            assert!(registration.unregister());
        }

        let err = client.call("Greeter:whoami", json!({})).await.expect_err("gone");
        assert_eq!(err, CallError::Remote(NOT_IMPLEMENTED.into()));
    }
}
