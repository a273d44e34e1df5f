//! The upstream contract consumed by [`WatchSession`](crate::session::WatchSession)s.
//!
//! Calls are blocking: every session owns a dedicated thread and may block
//! on the network for as long as the server keeps a watch open.

use crate::errors::WatchError;

/// The identifying part of a remote object, everything else of its payload
/// is irrelevant to the change feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteObject {
    pub namespace: String,
    pub name: String,
    pub resource_version: String,
}

/// Result of a full list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectList {
    pub items: Vec<RemoteObject>,
    /// The collection's resource version, used to start watching right
    /// after the list.
    pub resource_version: String,
}

/// A single event of a watch stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteEvent {
    Added(RemoteObject),
    Modified(RemoteObject),
    Deleted(RemoteObject),
    /// Only advances the resumption point, no object changed.
    Bookmark { resource_version: String },
}

impl RemoteEvent {
    pub fn resource_version(&self) -> &str {
        match self {
            RemoteEvent::Added(o) | RemoteEvent::Modified(o) | RemoteEvent::Deleted(o) => {
                o.resource_version.as_str()
            }
            RemoteEvent::Bookmark { resource_version } => resource_version.as_str(),
        }
    }
}

/// An open watch. Yields [`WatchError::Malformed`] for single undecodable
/// events and keeps going; any other error ends the stream. `None` means
/// the server closed the watch normally.
pub type RemoteEventStream = Box<dyn Iterator<Item = Result<RemoteEvent, WatchError>> + Send>;

pub trait RemoteApi: Send + Sync {
    /// List all objects of `kind`, optionally restricted to one namespace.
    fn list(&self, kind: &str, namespace: Option<&str>) -> Result<ObjectList, WatchError>;

    /// Watch `kind` starting after resource version `since`, with bookmark
    /// events enabled.
    fn watch(
        &self,
        kind: &str,
        namespace: Option<&str>,
        since: &str,
    ) -> Result<RemoteEventStream, WatchError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::{
        collections::{HashMap, VecDeque},
        sync::Mutex,
    };

    pub(crate) fn obj(namespace: &str, name: &str, resource_version: &str) -> RemoteObject {
        RemoteObject {
            namespace: namespace.to_string(),
            name: name.to_string(),
            resource_version: resource_version.to_string(),
        }
    }

    pub(crate) fn list(items: Vec<RemoteObject>, resource_version: &str) -> ObjectList {
        ObjectList {
            items,
            resource_version: resource_version.to_string(),
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) enum Call {
        List {
            kind: String,
            namespace: Option<String>,
        },
        Watch {
            kind: String,
            namespace: Option<String>,
            since: String,
        },
    }

    #[derive(Default)]
    struct Script {
        lists: VecDeque<Result<ObjectList, WatchError>>,
        watches: VecDeque<Result<Vec<Result<RemoteEvent, WatchError>>, WatchError>>,
    }

    /// Replays scripted list and watch results per kind. Once a script is
    /// exhausted every further call fails with a transport error.
    #[derive(Default)]
    pub(crate) struct ScriptedRemote {
        scripts: Mutex<HashMap<String, Script>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedRemote {
        pub(crate) fn push_list(&self, kind: &str, result: Result<ObjectList, WatchError>) {
            let mut scripts = self.scripts.lock().unwrap();
            scripts
                .entry(kind.to_string())
                .or_default()
                .lists
                .push_back(result);
        }

        pub(crate) fn push_watch(
            &self,
            kind: &str,
            result: Result<Vec<Result<RemoteEvent, WatchError>>, WatchError>,
        ) {
            let mut scripts = self.scripts.lock().unwrap();
            scripts
                .entry(kind.to_string())
                .or_default()
                .watches
                .push_back(result);
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RemoteApi for ScriptedRemote {
        fn list(&self, kind: &str, namespace: Option<&str>) -> Result<ObjectList, WatchError> {
            self.calls.lock().unwrap().push(Call::List {
                kind: kind.to_string(),
                namespace: namespace.map(|v| v.to_string()),
            });
            let mut scripts = self.scripts.lock().unwrap();
            scripts
                .get_mut(kind)
                .and_then(|s| s.lists.pop_front())
                .unwrap_or_else(|| Err(WatchError::Transport("no more lists".to_string())))
        }

        fn watch(
            &self,
            kind: &str,
            namespace: Option<&str>,
            since: &str,
        ) -> Result<RemoteEventStream, WatchError> {
            self.calls.lock().unwrap().push(Call::Watch {
                kind: kind.to_string(),
                namespace: namespace.map(|v| v.to_string()),
                since: since.to_string(),
            });
            let mut scripts = self.scripts.lock().unwrap();
            let events = scripts
                .get_mut(kind)
                .and_then(|s| s.watches.pop_front())
                .unwrap_or_else(|| Err(WatchError::Transport("no more watches".to_string())))?;
            Ok(Box::new(events.into_iter()))
        }
    }
}
