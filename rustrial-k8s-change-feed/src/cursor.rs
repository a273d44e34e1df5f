/// Last known resource version of one resource kind, optionally scoped to a
/// single namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumptionState {
    pub resource_kind: String,
    pub namespace: Option<String>,
    /// Empty if nothing has been observed yet.
    pub resource_version: String,
}

impl std::fmt::Display for ResumptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.resource_kind,
            self.namespace.as_deref().unwrap_or("*"),
            self.resource_version
        )
    }
}

/// Resumption point of a [`WatchSession`](crate::session::WatchSession).
///
/// Starts empty, is advanced with every consumed list, event and bookmark,
/// and is only ever reset when the server reports the version as expired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchCursor {
    state: ResumptionState,
}

impl WatchCursor {
    pub fn new(resource_kind: &str, namespace: Option<&str>) -> Self {
        Self {
            state: ResumptionState {
                resource_kind: resource_kind.to_string(),
                namespace: namespace.map(|v| v.to_string()),
                resource_version: String::new(),
            },
        }
    }

    /// `true` if the next step must be a full list.
    pub fn is_fresh(&self) -> bool {
        self.state.resource_version.is_empty()
    }

    pub fn resource_version(&self) -> &str {
        self.state.resource_version.as_str()
    }

    /// Move the cursor to `resource_version`. Empty versions (e.g. a list
    /// response without collection version) are ignored, the cursor must
    /// only become empty through [`reset`](Self::reset).
    pub fn advance(&mut self, resource_version: &str) {
        if !resource_version.is_empty() {
            self.state.resource_version = resource_version.to_string();
        }
    }

    pub fn reset(&mut self) {
        self.state.resource_version.clear();
    }

    pub fn state(&self) -> &ResumptionState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        let mut cursor = WatchCursor::new("Pod", Some("default"));
        assert!(cursor.is_fresh());
        cursor.advance("10");
        assert!(!cursor.is_fresh());
        assert_eq!("10", cursor.resource_version());
        cursor.advance("");
        assert_eq!("10", cursor.resource_version());
        cursor.advance("11");
        assert_eq!("11", cursor.resource_version());
        cursor.reset();
        assert!(cursor.is_fresh());
        assert_eq!("Pod/default@", cursor.state().to_string());
    }

    #[test]
    fn display_cluster_wide() {
        let mut cursor = WatchCursor::new("Component", None);
        cursor.advance("abc");
        assert_eq!("Component/*@abc", cursor.state().to_string());
    }
}
