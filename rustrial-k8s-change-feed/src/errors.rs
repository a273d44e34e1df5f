/// Extension methods for Kubernetes API errors.
pub(crate) trait ExtKubeApiError {
    fn is_not_found(&self) -> bool;
    fn is_gone(&self) -> bool;
    fn is_forbidden(&self) -> bool;
}

impl ExtKubeApiError for kube::Error {
    fn is_not_found(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 404 => true,
            _ => false,
        }
    }

    fn is_gone(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 410 => true,
            _ => false,
        }
    }

    fn is_forbidden(&self) -> bool {
        match self {
            kube::Error::Api(e) if e.code == 401 || e.code == 403 => true,
            _ => false,
        }
    }
}

/// Failure of a single list or watch call against the remote API.
///
/// The variants decide the recovery path of a
/// [`WatchSession`](crate::session::WatchSession): [`WatchError::Expired`]
/// forces a full resync, [`WatchError::Transport`] a reconnect from the
/// current cursor, and [`WatchError::Malformed`] only drops one event.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// The resource version used to resume the watch has been compacted
    /// away by the server (HTTP 410 Gone).
    #[error("resource version is too old: {0}")]
    Expired(String),
    /// Connection reset, protocol error or any other temporary failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// A single event or list item could not be decoded.
    #[error("malformed event: {0}")]
    Malformed(String),
    /// Access denied or resource type unknown to the API server, retrying
    /// will not help.
    #[error("access denied: {0}")]
    Denied(String),
}

impl WatchError {
    pub fn is_permanent(&self) -> bool {
        match self {
            WatchError::Denied(_) => true,
            _ => false,
        }
    }
}

impl From<kube::Error> for WatchError {
    fn from(e: kube::Error) -> Self {
        if e.is_gone() {
            WatchError::Expired(e.to_string())
        } else if e.is_forbidden() || e.is_not_found() {
            WatchError::Denied(e.to_string())
        } else {
            match e {
                kube::Error::SerdeError(e) => WatchError::Malformed(e.to_string()),
                e => WatchError::Transport(e.to_string()),
            }
        }
    }
}

/// Invalid configuration, always detected before any watch is started.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid namespace pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("debounce window must be a positive number of seconds, got {0}")]
    InvalidDebounce(f64),
    #[error("resource kind must not be empty")]
    EmptyKind,
    #[error("resource kind {0} is already watched")]
    DuplicateKind(String),
    #[error("no callback registered, call register_callback before start")]
    MissingCallback,
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum FeedError {
    /// Configuration error
    #[error("{0}")]
    Config(#[from] ConfigError),
    /// The remote API refused to serve the resource kind
    #[error("failed to start watching {kind}: {source}")]
    Remote {
        kind: String,
        #[source]
        source: WatchError,
    },
    /// Failed to discover the API resource of a kind
    #[error("{0}")]
    ApiDiscovery(String),
    /// Failed to spawn the watch thread
    #[error("{0}")]
    Spawn(#[from] std::io::Error),
    /// The startup list task failed
    #[error("{0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_errors() {
        assert!(WatchError::Denied("forbidden".to_string()).is_permanent());
        assert!(!WatchError::Expired("1".to_string()).is_permanent());
        assert!(!WatchError::Transport("reset".to_string()).is_permanent());
        assert!(!WatchError::Malformed("{".to_string()).is_permanent());
    }

    #[test]
    fn serde_errors_are_malformed() {
        let e = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let e = WatchError::from(kube::Error::SerdeError(e));
        assert!(matches!(e, WatchError::Malformed(_)));
    }

    #[test]
    fn messages() {
        let e = FeedError::Remote {
            kind: "Pod".to_string(),
            source: WatchError::Denied("pods is forbidden".to_string()),
        };
        assert_eq!(
            "failed to start watching Pod: access denied: pods is forbidden",
            e.to_string()
        );
        let e: FeedError = ConfigError::InvalidDebounce(0.0).into();
        assert_eq!(
            "debounce window must be a positive number of seconds, got 0",
            e.to_string()
        );
    }
}
