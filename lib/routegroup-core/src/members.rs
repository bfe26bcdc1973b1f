//! Pool member strategies

use crate::index::ResourceIndex;
use crate::resource::{PoolMember, PoolMemberType, VirtualServerConfig};
use k8s_openapi::api::core::v1::ServicePort;
use tracing::debug;

/// Recompute the members of every pool in `config` with the given strategy.
/// Pools whose Service or Endpoints are not known yet end up empty.
pub async fn update_pool_members(
    config: &mut VirtualServerConfig,
    index: &dyn ResourceIndex,
    member_type: PoolMemberType,
) {
    let namespace = config.partition.clone();
    for pool in config.pools.iter_mut() {
        pool.member_type = member_type;

        let service_port = match index.service(&namespace, &pool.service_name).await {
            Some(service) => service
                .spec
                .as_ref()
                .and_then(|spec| spec.ports.as_ref())
                .and_then(|ports| ports.iter().find(|p| p.port == pool.service_port).cloned()),
            None => None,
        };

        let mut members = match (member_type, service_port) {
            (_, None) => Vec::new(),
            (PoolMemberType::NodePort, Some(port)) => node_port_members(index, &port).await,
            (PoolMemberType::Cluster, Some(port)) => {
                cluster_members(index, &namespace, &pool.service_name, &port).await
            }
        };
        members.sort();
        members.dedup();

        debug!("Pool {} has {} members", pool.name, members.len());
        pool.members = members;
    }
}

async fn node_port_members(index: &dyn ResourceIndex, port: &ServicePort) -> Vec<PoolMember> {
    let Some(node_port) = port.node_port else {
        return Vec::new();
    };

    index
        .nodes()
        .await
        .iter()
        .filter_map(|node| node.status.as_ref()?.addresses.as_ref())
        .flat_map(|addresses| addresses.iter())
        .filter(|addr| addr.type_ == "InternalIP")
        .map(|addr| PoolMember {
            address: addr.address.clone(),
            port: node_port,
        })
        .collect()
}

async fn cluster_members(
    index: &dyn ResourceIndex,
    namespace: &str,
    service_name: &str,
    port: &ServicePort,
) -> Vec<PoolMember> {
    let Some(endpoints) = index.endpoints(namespace, service_name).await else {
        return Vec::new();
    };

    let mut members = Vec::new();
    for subset in endpoints.subsets.iter().flatten() {
        let ports = subset.ports.as_deref().unwrap_or_default();
        // An unnamed service port pairs with the subset's only port.
        let endpoint_port = ports
            .iter()
            .find(|p| p.name == port.name)
            .or_else(|| if ports.len() == 1 && port.name.is_none() { ports.first() } else { None });
        let Some(endpoint_port) = endpoint_port else {
            continue;
        };

        for address in subset.addresses.iter().flatten() {
            members.push(PoolMember {
                address: address.ip.clone(),
                port: endpoint_port.port,
            });
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::resource::{basic_virtual_ports, format_pool_name, Pool};
    use crate::testing::{endpoints, node, service};
    use routegroup_api::GroupSpec;

    fn config_with_pool(service_port: i32) -> VirtualServerConfig {
        let mut cfg = VirtualServerConfig::new("ns1", "vs1_80", basic_virtual_ports()[0], &GroupSpec::default());
        cfg.add_pool(Pool {
            name: format_pool_name("ns1", "svc", service_port),
            partition: "ns1".to_string(),
            service_name: "svc".to_string(),
            service_port,
            member_type: PoolMemberType::Cluster,
            members: Vec::new(),
        });
        cfg
    }

    async fn populated_index() -> MemoryIndex {
        let index = MemoryIndex::new();
        index.upsert_service(service("ns1", "svc", &[("http", 80, Some(30080))])).await;
        index
            .upsert_endpoints(endpoints("ns1", "svc", &["10.0.0.2", "10.0.0.1"], &[("http", 8080)]))
            .await;
        index.upsert_node(node("node-a", "192.168.0.10")).await;
        index.upsert_node(node("node-b", "192.168.0.11")).await;
        index
    }

    #[tokio::test]
    async fn test_cluster_members_from_endpoints() {
        let index = populated_index().await;
        let mut cfg = config_with_pool(80);
        update_pool_members(&mut cfg, &index, PoolMemberType::Cluster).await;

        assert_eq!(
            cfg.pools[0].members,
            vec![
                PoolMember { address: "10.0.0.1".to_string(), port: 8080 },
                PoolMember { address: "10.0.0.2".to_string(), port: 8080 },
            ]
        );
    }

    #[tokio::test]
    async fn test_node_port_members_from_nodes() {
        let index = populated_index().await;
        let mut cfg = config_with_pool(80);
        update_pool_members(&mut cfg, &index, PoolMemberType::NodePort).await;

        assert_eq!(cfg.pools[0].member_type, PoolMemberType::NodePort);
        assert_eq!(
            cfg.pools[0].members,
            vec![
                PoolMember { address: "192.168.0.10".to_string(), port: 30080 },
                PoolMember { address: "192.168.0.11".to_string(), port: 30080 },
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_service_port_leaves_pool_empty() {
        let index = populated_index().await;
        let mut cfg = config_with_pool(9999);
        update_pool_members(&mut cfg, &index, PoolMemberType::Cluster).await;
        assert!(cfg.pools[0].members.is_empty());
    }
}
