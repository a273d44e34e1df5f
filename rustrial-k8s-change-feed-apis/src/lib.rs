use kube::CustomResource;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const API_GROUP: &'static str = "registry.rustrial.org";

pub const API_VERSION: &'static str = "v1alpha1";

/// We maintain our own copy of Condition as the one from k8s_openapi does not implement JsonSchema.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Condition {
    /// lastTransitionTime is the last time the condition transitioned from one status to another.
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// message is a human readable message indicating details about the transition. This may be an empty string.
    pub message: String,

    /// observedGeneration represents the .metadata.generation that the condition was set based upon.
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// reason contains a programmatic identifier indicating the reason for the condition's last transition.
    pub reason: String,

    /// status of the condition, one of True, False, Unknown.
    pub status: String,

    /// type of condition in CamelCase or in foo.example.com/CamelCase.
    #[serde(rename = "type")]
    pub type_: String,
}

/// A component registered with the component registry. Operators watch
/// components to expose their APIs through ingress controllers and API
/// gateways and to provision security clients for them.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "registry.rustrial.org",
    version = "v1alpha1",
    kind = "Component",
    derive = "PartialEq",
    status = "ComponentStatus",
    namespaced,
    printcolumn = r#"{
        "name":"Version",
        "type": "string",
        "jsonPath": ".spec.version",
        "description": "The released version of the component."
    }"#,
    printcolumn = r#"{
        "name":"Ready",
        "type": "string",
        "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status",
        "description": "Whether all exposed APIs of the component are reconciled."
    }"#
)]
pub struct ComponentSpec {
    /// Human readable name, defaults to `metadata.name`.
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Team or person owning the component.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// The released version of the component.
    pub version: String,
    /// APIs the component exposes to other components.
    #[serde(rename = "exposedApis", default)]
    pub exposed_apis: Vec<ExposedApi>,
    /// APIs of other components this component depends on.
    #[serde(rename = "dependsOn", default)]
    pub depends_on: Vec<ApiDependency>,
}

/// An API exposed by a [`Component`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, JsonSchema)]
pub struct ExposedApi {
    /// Name of the API, unique within the component.
    pub name: String,
    /// The public path prefix, defaults to `/<component>/<api>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// In-cluster URL of the service implementing the API.
    pub upstream: String,
    /// Whether callers need a security client to access the API.
    #[serde(default)]
    pub secured: bool,
}

/// Reference to an API exposed by another [`Component`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, JsonSchema)]
pub struct ApiDependency {
    /// Name of the component exposing the API.
    pub component: String,
    /// Namespace of that component, defaults to the namespace of the dependent component.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Name of the API.
    pub api: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default, JsonSchema)]
pub struct ComponentStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    /// The `metadata.generation` last reconciled.
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn component() -> Component {
        Component {
            metadata: ObjectMeta {
                name: Some("foo".to_string()),
                namespace: Some("ns1".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: ComponentSpec {
                display_name: None,
                description: None,
                owner: None,
                version: "1.0.0".to_string(),
                exposed_apis: vec![],
                depends_on: vec![],
            },
            status: None,
        }
    }

    #[test]
    fn it_works() {
        let c = component();
        assert_eq!(
            r#"{"version":"1.0.0","exposedApis":[],"dependsOn":[]}"#,
            serde_json::to_string(&c.spec).unwrap()
        );
        let parsed: ComponentSpec = serde_json::from_str(r#"{"version":"2"}"#).unwrap();
        assert!(parsed.exposed_apis.is_empty());
        assert!(parsed.depends_on.is_empty());
    }

    #[test]
    fn crd_group() {
        use kube::{CustomResourceExt, Resource};
        assert_eq!(API_GROUP, Component::group(&()));
        assert_eq!(API_VERSION, Component::version(&()));
        assert_eq!("components.registry.rustrial.org", Component::crd_name());
    }
}
