//! Virtual server configuration model pushed to the device agent

use routegroup_api::GroupSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_HTTP_PORT: i32 = 80;
pub const DEFAULT_HTTPS_PORT: i32 = 443;
pub const DEFAULT_SNAT: &str = "auto";

/// Kubernetes resource kinds the controller reacts to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Route,
    Service,
    Endpoints,
    ConfigMap,
    Namespace,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Route => "Route",
            ResourceKind::Service => "Service",
            ResourceKind::Endpoints => "Endpoints",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Namespace => "Namespace",
        };
        f.write_str(name)
    }
}

/// Listener protocol of a virtual server
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

/// A canonical listener a route group may need
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VirtualPort {
    pub protocol: Protocol,
    pub port: i32,
}

/// Both canonical listeners, plain first
pub fn basic_virtual_ports() -> [VirtualPort; 2] {
    [
        VirtualPort { protocol: Protocol::Http, port: DEFAULT_HTTP_PORT },
        VirtualPort { protocol: Protocol::Https, port: DEFAULT_HTTPS_PORT },
    ]
}

/// How pool members are derived from a Service
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMemberType {
    /// Node addresses with the Service's node port
    NodePort,
    /// Endpoint (pod) addresses with the endpoint port
    #[default]
    Cluster,
}

impl FromStr for PoolMemberType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nodeport" => Ok(PoolMemberType::NodePort),
            "cluster" => Ok(PoolMemberType::Cluster),
            other => Err(format!("unknown pool member type: {}", other)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolMember {
    pub address: String,
    pub port: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub name: String,
    pub partition: String,
    pub service_name: String,
    pub service_port: i32,
    pub member_type: PoolMemberType,
    pub members: Vec<PoolMember>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Wildcard,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum RuleCondition {
    HostEquals(String),
    HostEndsWith(String),
    PathStartsWith(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    Forward { pool: String },
    Redirect { location: String },
}

/// One LTM policy rule matching `host + path`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    pub uri: String,
    pub pool_name: String,
    pub ordinal: u32,
    pub match_kind: MatchKind,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<RuleAction>,
}

/// The single policy attached to a virtual server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub name: String,
    pub partition: String,
    pub strategy: String,
    pub rules: Vec<Rule>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsContext {
    Client,
    Server,
}

/// Reference to an SSL profile on the device
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TlsProfile {
    pub context: TlsContext,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualAddress {
    pub address: String,
    pub port: i32,
}

/// Everything the device needs to build one virtual server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServerConfig {
    pub partition: String,
    pub name: String,
    pub protocol: Protocol,
    pub enabled: bool,
    pub destination: VirtualAddress,
    pub snat: String,
    pub waf: String,
    pub irules: Vec<String>,
    pub pools: Vec<Pool>,
    pub policies: Vec<Policy>,
    pub tls_profiles: BTreeSet<TlsProfile>,
    pub hosts: Vec<String>,
    pub base_resources: BTreeMap<String, ResourceKind>,
}

impl VirtualServerConfig {
    /// A fresh config seeded from the group's effective spec
    pub fn new(partition: &str, name: &str, port: VirtualPort, spec: &GroupSpec) -> Self {
        let snat = if spec.snat.is_empty() {
            DEFAULT_SNAT.to_string()
        } else {
            spec.snat.clone()
        };

        Self {
            partition: partition.to_string(),
            name: name.to_string(),
            protocol: port.protocol,
            enabled: true,
            destination: VirtualAddress {
                address: spec.virtual_server_address.clone(),
                port: port.port,
            },
            snat,
            waf: spec.waf.clone(),
            irules: spec.irules.clone(),
            pools: Vec::new(),
            policies: Vec::new(),
            tls_profiles: BTreeSet::new(),
            hosts: Vec::new(),
            base_resources: BTreeMap::new(),
        }
    }

    /// Add a pool unless one for the same service and port already exists.
    /// Returns the name of the pool the caller should reference.
    pub fn add_pool(&mut self, pool: Pool) -> String {
        if let Some(existing) = self
            .pools
            .iter()
            .find(|p| p.service_name == pool.service_name && p.service_port == pool.service_port)
        {
            return existing.name.clone();
        }
        let name = pool.name.clone();
        self.pools.push(pool);
        name
    }

    pub fn add_host(&mut self, host: &str) {
        if !self.hosts.iter().any(|h| h == host) {
            self.hosts.push(host.to_string());
        }
    }

    /// Total number of rules across all policies
    pub fn rule_count(&self) -> usize {
        self.policies.iter().map(|p| p.rules.len()).sum()
    }
}

/// Replace characters the device does not accept in object names
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '*' => out.push_str("wildcard"),
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => out.push(c),
            _ => out.push('_'),
        }
    }
    out
}

pub fn format_virtual_server_name(base: &str, port: i32) -> String {
    sanitize_name(&format!("{}_{}", base, port))
}

/// Name of the virtual server a route group gets on `port`
pub fn frame_route_vs_name(route_group: &str, spec: &GroupSpec, port: VirtualPort) -> String {
    if spec.virtual_server_name.is_empty() {
        format_virtual_server_name(&format!("routes_{}", route_group), port.port)
    } else {
        format_virtual_server_name(&spec.virtual_server_name, port.port)
    }
}

/// Pools are keyed by backend so routes sharing a service share a pool
pub fn format_pool_name(namespace: &str, service: &str, port: i32) -> String {
    sanitize_name(&format!("{}_{}_{}", service, port, namespace))
}

pub fn format_policy_name(vs_name: &str) -> String {
    sanitize_name(&format!("{}_policy", vs_name))
}

pub fn format_rule_name(host: &str, route_group: &str, path: &str, pool_name: &str) -> String {
    sanitize_name(&format!("{}_{}{}_{}", route_group, host, path, pool_name))
}
