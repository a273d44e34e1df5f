//! A resilient change feed for Kubernetes resources.
//!
//! A [`ChangeFeed`] lists and watches resource kinds through a
//! [`RemoteApi`], resumes watches from the last seen resource version and
//! delivers debounced, deduplicated [`Notification`]s to one callback.

#[macro_use]
extern crate log;

pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod feed;
pub mod kube_remote;
pub(crate) mod metrics;
pub mod namespace_filter;
pub mod prometheus_exporter;
pub mod queue;
pub mod remote;
pub mod session;

pub use config::{Configuration, ResourceTarget};
pub use errors::{ConfigError, FeedError, WatchError};
pub use events::{ChangeEvent, EventKind, Notification, ResourceIdentity};
pub use feed::{ChangeFeed, FeedSettings};
pub use kube_remote::{KubeRemote, discover_api_resource};
pub use namespace_filter::NamespaceFilter;
pub use remote::{ObjectList, RemoteApi, RemoteEvent, RemoteObject};
