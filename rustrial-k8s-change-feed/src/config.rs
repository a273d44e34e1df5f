use std::{fmt::Display, net::SocketAddr, str::FromStr, time::Duration};

use crate::{
    errors::ConfigError,
    feed::{FeedSettings, debounce_window},
};

/// An additional resource kind to watch, given as `Kind`, `group/Kind` or
/// `group/version/Kind`. Kinds without a group belong to the core API group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceTarget {
    pub group: String,
    /// Discovered (preferred version) if not set.
    pub version: Option<String>,
    pub kind: String,
}

impl FromStr for ResourceTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            name: "WATCH_RESOURCES".to_string(),
            value: s.to_string(),
            reason: reason.to_string(),
        };
        let parts: Vec<&str> = s.trim().split('/').map(|v| v.trim()).collect();
        let (group, version, kind) = match parts.as_slice() {
            [kind] => ("", None, *kind),
            [group, kind] => (*group, None, *kind),
            [group, version, kind] if !version.is_empty() => (*group, Some(*version), *kind),
            _ => return Err(invalid("expected Kind, group/Kind or group/version/Kind")),
        };
        if kind.is_empty() {
            return Err(invalid("kind must not be empty"));
        }
        Ok(Self {
            group: group.to_string(),
            version: version.map(|v| v.to_string()),
            kind: kind.to_string(),
        })
    }
}

impl Display for ResourceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}/{}", self.group, version, self.kind),
            None if self.group.is_empty() => write!(f, "{}", self.kind),
            None => write!(f, "{}/{}", self.group, self.kind),
        }
    }
}

/// Process configuration, read from environment variables.
#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    /// Namespace patterns, empty watches all namespaces.
    pub watch_namespaces: Vec<String>,
    pub debounce_seconds: f64,
    pub reconnect_backoff: Duration,
    pub callback_retry: Option<Duration>,
    /// Kinds watched in addition to `Component`.
    pub watch_resources: Vec<ResourceTarget>,
    pub metrics_addr: SocketAddr,
}

impl Configuration {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_var = |name: &str| env_var(&lookup, name);
        let seconds = |name: &str| -> Result<Option<f64>, ConfigError> {
            env_var(name)
                .map(|v| {
                    v.parse::<f64>().map_err(|e| ConfigError::InvalidValue {
                        name: name.to_string(),
                        value: v.clone(),
                        reason: e.to_string(),
                    })
                })
                .transpose()
        };
        let duration = |name: &str, value: f64| {
            Duration::try_from_secs_f64(value).map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            })
        };

        let watch_namespaces: Vec<String> = env_var("WATCH_NAMESPACES")
            .map(|v| v.split(",").map(|v| v.trim().to_string()).collect())
            .unwrap_or_default();
        let debounce_seconds = seconds("DEBOUNCE_SECONDS")?.unwrap_or(1.0);
        debounce_window(debounce_seconds)?;
        let positive = |name: &str, value: f64| {
            if value > 0.0 {
                duration(name, value)
            } else {
                Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    value: value.to_string(),
                    reason: "must be positive".to_string(),
                })
            }
        };
        let reconnect_backoff = positive(
            "RECONNECT_BACKOFF_SECONDS",
            seconds("RECONNECT_BACKOFF_SECONDS")?.unwrap_or(2.0),
        )?;
        let callback_retry = seconds("CALLBACK_RETRY_SECONDS")?
            .map(|v| positive("CALLBACK_RETRY_SECONDS", v))
            .transpose()?;
        let watch_resources = env_var("WATCH_RESOURCES")
            .map(|v| {
                v.split(",")
                    .filter(|v| !v.trim().is_empty())
                    .map(ResourceTarget::from_str)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();
        let metrics_addr = env_var("METRICS_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0".to_string());
        let metrics_port = env_var("METRICS_LISTEN_PORT").unwrap_or_else(|| "9000".to_string());
        let metrics_addr = format!("{}:{}", metrics_addr, metrics_port);
        let metrics_addr = metrics_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue {
                name: "METRICS_LISTEN_ADDR".to_string(),
                value: metrics_addr.clone(),
                reason: e.to_string(),
            })?;
        Ok(Configuration {
            watch_namespaces,
            debounce_seconds,
            reconnect_backoff,
            callback_retry,
            watch_resources,
            metrics_addr,
        })
    }

    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            reconnect_backoff: self.reconnect_backoff,
            callback_retry: self.callback_retry,
        }
    }
}

fn env_var<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
