use serde::Serialize;
use tokio::time::Instant;

use crate::remote::RemoteObject;

/// What happened to a watched object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
    /// Synthesized locally for every object returned by a full list.
    Resync,
}

/// Uniquely names one watched object across all resource kinds.
///
/// Ordered by kind, then namespace, then name, which is the tie-break the
/// dispatcher uses between identities that settle at the same instant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceIdentity {
    pub resource_kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(resource_kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            resource_kind: resource_kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.resource_kind, self.namespace, self.name)
    }
}

/// A normalized change of one remote object, as it travels through the
/// [`EventQueue`](crate::queue::EventQueue).
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub event_kind: EventKind,
    pub resource_kind: String,
    pub namespace: String,
    pub name: String,
    /// Opaque, never parsed or compared for ordering.
    pub resource_version: String,
    /// Local receipt time, only used to age pending updates.
    pub observed_at: Instant,
}

impl ChangeEvent {
    pub fn new(event_kind: EventKind, resource_kind: &str, object: &RemoteObject) -> Self {
        Self {
            event_kind,
            resource_kind: resource_kind.to_string(),
            namespace: object.namespace.clone(),
            name: object.name.clone(),
            resource_version: object.resource_version.clone(),
            observed_at: Instant::now(),
        }
    }

    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(&self.resource_kind, &self.namespace, &self.name)
    }

    /// The version a consumer should be told about, `None` for deletions.
    pub fn version_or_none(&self) -> Option<&str> {
        match self.event_kind {
            EventKind::Deleted => None,
            _ => Some(self.resource_version.as_str()),
        }
    }
}

/// A settled change delivered to the consumer callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    #[serde(flatten)]
    pub identity: ResourceIdentity,
    /// `None` if the object has been deleted.
    pub new_version: Option<String>,
    /// `None` if nothing was delivered for this object before (or the
    /// last delivery was its deletion).
    pub previous_version: Option<String>,
}

impl Notification {
    pub fn resource_kind(&self) -> &str {
        &self.identity.resource_kind
    }

    pub fn namespace(&self) -> &str {
        &self.identity.namespace
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn is_deletion(&self) -> bool {
        self.new_version.is_none()
    }
}
