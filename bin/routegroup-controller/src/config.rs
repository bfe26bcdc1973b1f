//! Controller configuration read from the environment

use routegroup_core::PoolMemberType;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub global_spec_namespace: String,
    pub global_spec_name: String,
    pub watch_namespaces: Vec<String>,
    pub namespace_label: Option<String>,
    pub pool_member_type: PoolMemberType,
    pub share_nodes: bool,
    pub default_route_domain: i32,
    pub default_client_ssl: Option<String>,
    pub default_server_ssl: Option<String>,
    pub metrics_addr: SocketAddr,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let spec_cm = get("ROUTE_SPEC_CONFIGMAP").ok_or(ConfigError::Missing("ROUTE_SPEC_CONFIGMAP"))?;
        let (global_spec_namespace, global_spec_name) = match spec_cm.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => (ns.to_string(), name.to_string()),
            _ => {
                return Err(ConfigError::Invalid {
                    name: "ROUTE_SPEC_CONFIGMAP",
                    value: spec_cm,
                    reason: "expected namespace/name".to_string(),
                })
            }
        };

        let watch_namespaces: Vec<String> = get("WATCH_NAMESPACES")
            .map(|v| {
                v.split(',')
                    .map(|ns| ns.trim().to_string())
                    .filter(|ns| !ns.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let namespace_label = get("NAMESPACE_LABEL");
        if watch_namespaces.is_empty() && namespace_label.is_none() {
            return Err(ConfigError::Invalid {
                name: "WATCH_NAMESPACES",
                value: String::new(),
                reason: "set WATCH_NAMESPACES or NAMESPACE_LABEL".to_string(),
            });
        }

        let pool_member_type = match get("POOL_MEMBER_TYPE") {
            Some(value) => value.parse::<PoolMemberType>().map_err(|reason| ConfigError::Invalid {
                name: "POOL_MEMBER_TYPE",
                value,
                reason,
            })?,
            None => PoolMemberType::Cluster,
        };

        Ok(Self {
            global_spec_namespace,
            global_spec_name,
            watch_namespaces,
            namespace_label,
            pool_member_type,
            share_nodes: parse_or("SHARE_NODES", get("SHARE_NODES"), false)?,
            default_route_domain: parse_or("DEFAULT_ROUTE_DOMAIN", get("DEFAULT_ROUTE_DOMAIN"), 0)?,
            default_client_ssl: get("DEFAULT_CLIENT_SSL"),
            default_server_ssl: get("DEFAULT_SERVER_SSL"),
            metrics_addr: parse_or(
                "METRICS_ADDR",
                get("METRICS_ADDR"),
                SocketAddr::from(([0, 0, 0, 0], 8080)),
            )?,
            retry_base: Duration::from_millis(parse_or("RETRY_BASE_MS", get("RETRY_BASE_MS"), 5)?),
            retry_max: Duration::from_millis(parse_or("RETRY_MAX_MS", get("RETRY_MAX_MS"), 30_000)?),
        })
    }

    /// `namespace/name` of the global extended spec ConfigMap
    pub fn global_spec_key(&self) -> String {
        format!("{}/{}", self.global_spec_namespace, self.global_spec_name)
    }
}

fn parse_or<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
