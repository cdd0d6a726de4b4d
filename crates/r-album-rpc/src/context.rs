//! ---
//! album_section: "07-service-dispatch"
//! album_subsection: "module"
//! album_type: "source"
//! album_scope: "code"
//! album_description: "Service registry, argument validation and dispatch."
//! album_version: "v0.0.0-prealpha"
//! album_owner: "tbd"
//! ---
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use r_album_msg::RequestId;
use r_album_transport::Adaptor;

/// Shared collaborators handed to every handler, looked up by type.
#[derive(Clone, Default)]
pub struct Dependencies {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Dependencies {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value`, replacing any earlier value of the same type.
    pub fn with<T: Send + Sync + 'static>(self, value: T) -> Self {
        self.with_shared(Arc::new(value))
    }

    /// Add an already shared value.
    pub fn with_shared<T: Send + Sync + 'static>(self, value: Arc<T>) -> Self {
        let mut entries = Arc::try_unwrap(self.entries).unwrap_or_else(|shared| (*shared).clone());
        entries.insert(TypeId::of::<T>(), value);
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Value of type `T`, if registered.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|entry| entry.downcast::<T>().ok())
    }

    /// Number of registered values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Everything a handler knows about the call it serves.
#[derive(Debug, Clone)]
pub struct CallContext {
    adaptor: Adaptor,
    action: String,
    request_id: Option<RequestId>,
    dependencies: Dependencies,
}

impl CallContext {
    /// Assemble a context.
    pub fn new(
        adaptor: Adaptor,
        action: impl Into<String>,
        request_id: Option<RequestId>,
        dependencies: Dependencies,
    ) -> Self {
        Self {
            adaptor,
            action: action.into(),
            request_id,
            dependencies,
        }
    }

    /// Adaptor the call arrived on; use it to call back to the peer.
    pub fn adaptor(&self) -> &Adaptor {
        &self.adaptor
    }

    /// Identifier of the connection serving the call.
    pub fn connection_id(&self) -> &str {
        self.adaptor.id()
    }

    /// `Service:method` action of the call.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Correlation id, absent for notifications.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Shared collaborators.
    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    /// Collaborator of type `T`, or an error naming the missing type.
    pub fn dependency<T: Send + Sync + 'static>(&self) -> anyhow::Result<Arc<T>> {
        self.dependencies
            .get::<T>()
            .ok_or_else(|| anyhow!("dependency {} is not registered", type_name::<T>()))
    }
}
