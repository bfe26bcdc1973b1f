//! Shared resource store of synthesized virtual servers

use crate::resource::VirtualServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// partition -> virtual server name -> config
pub type LtmConfig = BTreeMap<String, BTreeMap<String, VirtualServerConfig>>;

/// DNS (GTM) objects keyed by domain name. Route groups do not produce any;
/// the map travels with every snapshot so the agent sees a complete request.
pub type DnsConfig = BTreeMap<String, serde_json::Value>;

/// Snapshot handed to the device agent on every drain cycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRequest {
    pub ltm_config: LtmConfig,
    pub dns_config: DnsConfig,
    pub share_nodes: bool,
    pub default_route_domain: i32,
    pub request_id: u64,
}

/// ResourceStore holds the live virtual server configs. It is owned by the
/// reconciler and mutated only from the worker; readers get deep copies.
#[derive(Debug, Default)]
pub struct ResourceStore {
    ltm: LtmConfig,
    dns: DnsConfig,
    updated: bool,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_virtual_server(&self, partition: &str, name: &str) -> Option<&VirtualServerConfig> {
        self.ltm.get(partition).and_then(|vs| vs.get(name))
    }

    /// Publish a config, replacing any prior entry with the same key
    pub fn set_virtual_server(&mut self, config: VirtualServerConfig) {
        let partition = self.ltm.entry(config.partition.clone()).or_default();
        if partition.get(&config.name) == Some(&config) {
            return;
        }
        debug!("Publishing virtual server {}/{}", config.partition, config.name);
        partition.insert(config.name.clone(), config);
        self.updated = true;
    }

    /// Remove a config. The partition entry is kept, even when it becomes
    /// empty, so the next snapshot tells the agent to clear it.
    pub fn delete_virtual_server(&mut self, partition: &str, name: &str) -> bool {
        let removed = self
            .ltm
            .get_mut(partition)
            .map(|vs| vs.remove(name).is_some())
            .unwrap_or(false);
        if removed {
            debug!("Removed virtual server {}/{}", partition, name);
            self.updated = true;
        }
        removed
    }

    pub fn virtual_servers(&self, partition: &str) -> Vec<&VirtualServerConfig> {
        self.ltm
            .get(partition)
            .map(|vs| vs.values().collect())
            .unwrap_or_default()
    }

    pub fn virtual_server_count(&self) -> usize {
        self.ltm.values().map(|vs| vs.len()).sum()
    }

    pub fn ltm_deep_copy(&self) -> LtmConfig {
        self.ltm.clone()
    }

    pub fn dns_copy(&self) -> DnsConfig {
        self.dns.clone()
    }

    /// Whether configs changed since the last snapshot was taken
    pub fn is_config_updated(&self) -> bool {
        self.updated
    }

    pub fn mark_flushed(&mut self) {
        self.updated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::basic_virtual_ports;
    use routegroup_api::GroupSpec;

    fn config(partition: &str, name: &str) -> VirtualServerConfig {
        VirtualServerConfig::new(partition, name, basic_virtual_ports()[0], &GroupSpec::default())
    }

    #[test]
    fn test_set_and_get() {
        let mut store = ResourceStore::new();
        assert!(!store.is_config_updated());

        store.set_virtual_server(config("ns1", "vs1_80"));
        assert!(store.is_config_updated());
        assert!(store.get_virtual_server("ns1", "vs1_80").is_some());
        assert_eq!(store.virtual_server_count(), 1);
    }

    #[test]
    fn test_identical_publish_does_not_mark_updated() {
        let mut store = ResourceStore::new();
        store.set_virtual_server(config("ns1", "vs1_80"));
        store.mark_flushed();

        store.set_virtual_server(config("ns1", "vs1_80"));
        assert!(!store.is_config_updated());
    }

    #[test]
    fn test_delete_keeps_empty_partition() {
        let mut store = ResourceStore::new();
        store.set_virtual_server(config("ns1", "vs1_80"));
        store.mark_flushed();

        assert!(store.delete_virtual_server("ns1", "vs1_80"));
        assert!(store.is_config_updated());
        assert!(!store.delete_virtual_server("ns1", "vs1_80"));

        let snapshot = store.ltm_deep_copy();
        assert!(snapshot.get("ns1").map(|vs| vs.is_empty()).unwrap_or(false));
    }

    #[test]
    fn test_deep_copy_is_detached() {
        let mut store = ResourceStore::new();
        store.set_virtual_server(config("ns1", "vs1_80"));
        let snapshot = store.ltm_deep_copy();

        store.delete_virtual_server("ns1", "vs1_80");
        assert!(snapshot["ns1"].contains_key("vs1_80"));
    }
}
