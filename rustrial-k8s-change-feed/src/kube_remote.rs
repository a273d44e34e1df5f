//! [`RemoteApi`] backed by a Kubernetes API server.

use std::collections::HashMap;

use futures::{StreamExt, stream::BoxStream};
use kube::{
    Api, Client, ResourceExt,
    discovery,
    api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, WatchEvent, WatchParams},
};
use tokio::runtime::Handle;

use crate::{
    config::ResourceTarget,
    errors::{FeedError, WatchError},
    remote::{ObjectList, RemoteApi, RemoteEvent, RemoteEventStream, RemoteObject},
};

/// Lists and watches [`DynamicObject`]s of the registered kinds.
///
/// The blocking [`RemoteApi`] calls drive the async client on `runtime`, so
/// they must not be made from within an async task.
#[derive(Clone)]
pub struct KubeRemote {
    client: Client,
    runtime: Handle,
    resources: HashMap<String, ApiResource>,
}

impl KubeRemote {
    pub fn new(client: Client, runtime: Handle) -> Self {
        Self {
            client,
            runtime,
            resources: Default::default(),
        }
    }

    /// Make the kind of `api_resource` available to the change feed.
    pub fn with_resource(mut self, api_resource: ApiResource) -> Self {
        debug!(
            "registered {} as {}/{}",
            api_resource.kind, api_resource.api_version, api_resource.plural
        );
        self.resources.insert(api_resource.kind.clone(), api_resource);
        self
    }

    pub fn with_gvk(self, gvk: &GroupVersionKind) -> Self {
        self.with_resource(ApiResource::from_gvk(gvk))
    }

    fn api(&self, kind: &str, namespace: Option<&str>) -> Result<Api<DynamicObject>, WatchError> {
        let ar = self.resources.get(kind).ok_or_else(|| {
            WatchError::Denied(format!("resource kind {} is not registered", kind))
        })?;
        Ok(match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        })
    }
}

/// Resolve `target` to its API resource, using the preferred version of
/// its group if no version is given.
pub async fn discover_api_resource(
    client: &Client,
    target: &ResourceTarget,
) -> Result<ApiResource, FeedError> {
    let failed = |reason: String| FeedError::ApiDiscovery(format!("{}: {}", target, reason));
    match &target.version {
        Some(version) => {
            let gvk = GroupVersionKind::gvk(&target.group, version, &target.kind);
            let (ar, _) = discovery::pinned_kind(client, &gvk)
                .await
                .map_err(|e| failed(e.to_string()))?;
            Ok(ar)
        }
        None => {
            let group = discovery::group(client, &target.group)
                .await
                .map_err(|e| failed(e.to_string()))?;
            let (ar, _) = group
                .recommended_kind(&target.kind)
                .ok_or_else(|| failed("kind not served by the API group".to_string()))?;
            Ok(ar)
        }
    }
}

pub(crate) fn remote_object(o: &DynamicObject) -> Result<RemoteObject, WatchError> {
    let name = o
        .metadata
        .name
        .clone()
        .ok_or_else(|| WatchError::Malformed("object without name".to_string()))?;
    let resource_version = o.resource_version().ok_or_else(|| {
        WatchError::Malformed(format!("object {} without resource version", name))
    })?;
    Ok(RemoteObject {
        namespace: o.namespace().unwrap_or_default(),
        name,
        resource_version,
    })
}

pub(crate) fn remote_event(event: WatchEvent<DynamicObject>) -> Result<RemoteEvent, WatchError> {
    match event {
        WatchEvent::Added(o) => Ok(RemoteEvent::Added(remote_object(&o)?)),
        WatchEvent::Modified(o) => Ok(RemoteEvent::Modified(remote_object(&o)?)),
        WatchEvent::Deleted(o) => Ok(RemoteEvent::Deleted(remote_object(&o)?)),
        WatchEvent::Bookmark(bm) => Ok(RemoteEvent::Bookmark {
            resource_version: bm.metadata.resource_version,
        }),
        // HTTP GONE, the resumption point has been compacted away.
        WatchEvent::Error(e) if e.code == 410 => Err(WatchError::Expired(e.message)),
        WatchEvent::Error(e) if e.code == 401 || e.code == 403 => {
            Err(WatchError::Denied(e.message))
        }
        WatchEvent::Error(e) => Err(WatchError::Transport(format!("{} ({})", e.message, e.code))),
    }
}

/// Bookmarks are requested by default.
fn watch_params() -> WatchParams {
    WatchParams::default()
}

/// Blocking view of an open watch.
struct KubeEventStream {
    runtime: Handle,
    stream: BoxStream<'static, kube::Result<WatchEvent<DynamicObject>>>,
}

impl Iterator for KubeEventStream {
    type Item = Result<RemoteEvent, WatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.runtime.block_on(self.stream.next())?;
        Some(next.map_err(WatchError::from).and_then(remote_event))
    }
}

impl RemoteApi for KubeRemote {
    fn list(&self, kind: &str, namespace: Option<&str>) -> Result<ObjectList, WatchError> {
        let api = self.api(kind, namespace)?;
        let list = self
            .runtime
            .block_on(async move { api.list(&ListParams::default()).await })?;
        let mut items = Vec::with_capacity(list.items.len());
        for o in list.items.iter() {
            match remote_object(o) {
                Ok(v) => items.push(v),
                Err(e) => warn!("skipping listed {} object: {}", kind, e),
            }
        }
        Ok(ObjectList {
            items,
            resource_version: list.metadata.resource_version.unwrap_or_default(),
        })
    }

    fn watch(
        &self,
        kind: &str,
        namespace: Option<&str>,
        since: &str,
    ) -> Result<RemoteEventStream, WatchError> {
        let api = self.api(kind, namespace)?;
        let since = since.to_string();
        let stream = self.runtime.block_on(async move {
            api.watch(&watch_params(), &since).await.map(|s| s.boxed())
        })?;
        Ok(Box::new(KubeEventStream {
            runtime: self.runtime.clone(),
            stream,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> Result<RemoteEvent, WatchError> {
        remote_event(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn objects() {
        let pod: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web", "namespace": "ns1", "resourceVersion": "7" }
        }))
        .unwrap();
        assert_eq!(
            RemoteObject {
                namespace: "ns1".to_string(),
                name: "web".to_string(),
                resource_version: "7".to_string(),
            },
            remote_object(&pod).unwrap()
        );
        let node: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": { "name": "node-1", "resourceVersion": "8" }
        }))
        .unwrap();
        assert_eq!("", remote_object(&node).unwrap().namespace);
        let unversioned: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web", "namespace": "ns1" }
        }))
        .unwrap();
        assert!(matches!(
            remote_object(&unversioned),
            Err(WatchError::Malformed(_))
        ));
    }

    #[test]
    fn events() {
        let e = event(json!({
            "type": "MODIFIED",
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "name": "web", "namespace": "ns1", "resourceVersion": "9" }
            }
        }))
        .unwrap();
        assert!(matches!(e, RemoteEvent::Modified(_)));
        assert_eq!("9", e.resource_version());
        let e = event(json!({
            "type": "BOOKMARK",
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "resourceVersion": "12" }
            }
        }))
        .unwrap();
        assert_eq!(
            RemoteEvent::Bookmark {
                resource_version: "12".to_string()
            },
            e
        );
    }

    #[test]
    fn watches_request_bookmarks() {
        let wp = watch_params();
        assert!(wp.bookmarks);
    }

    #[test]
    fn error_events() {
        let status = |code: u16| {
            json!({
                "type": "ERROR",
                "object": {
                    "apiVersion": "v1",
                    "kind": "Status",
                    "status": "Failure",
                    "message": "too old resource version: 5 (10)",
                    "reason": "Expired",
                    "code": code
                }
            })
        };
        assert!(matches!(event(status(410)), Err(WatchError::Expired(_))));
        assert!(matches!(event(status(403)), Err(WatchError::Denied(_))));
        assert!(matches!(event(status(500)), Err(WatchError::Transport(_))));
    }

    #[tokio::test]
    async fn unregistered_kinds_are_denied() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let config = kube::Config::new("http://127.0.0.1:6443".parse().unwrap());
        let client = Client::try_from(config).unwrap();
        let remote = KubeRemote::new(client, Handle::current()).with_gvk(&GroupVersionKind::gvk(
            "",
            "v1",
            "Pod",
        ));
        assert!(remote.resources.contains_key("Pod"));
        assert!(matches!(
            remote.list("Deployment", None),
            Err(WatchError::Denied(_))
        ));
        assert!(matches!(
            remote.watch("Deployment", Some("ns1"), "1"),
            Err(WatchError::Denied(_))
        ));
    }
}
