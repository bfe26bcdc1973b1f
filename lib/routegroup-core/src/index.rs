//! Read-only lookups over the informer caches

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Node, Service};
use kube::ResourceExt;
use routegroup_api::v1::TargetPort;
use routegroup_api::Route;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Indexed view of the cluster objects the synthesizer reads
#[async_trait]
pub trait ResourceIndex: Send + Sync {
    /// Routes of a namespace; `None` when the namespace is not watched
    async fn routes(&self, namespace: &str) -> Option<Vec<Arc<Route>>>;

    async fn service(&self, namespace: &str, name: &str) -> Option<Arc<Service>>;

    async fn endpoints(&self, namespace: &str, name: &str) -> Option<Arc<Endpoints>>;

    async fn nodes(&self) -> Vec<Arc<Node>>;
}

/// Resolve a port of a Service: the named port when `port_name` is set,
/// otherwise the first declared port.
pub async fn get_service_port(
    index: &dyn ResourceIndex,
    namespace: &str,
    service_name: &str,
    port_name: Option<&str>,
) -> std::result::Result<i32, String> {
    let service = index
        .service(namespace, service_name)
        .await
        .ok_or_else(|| format!("service {}/{} not found", namespace, service_name))?;

    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .cloned()
        .unwrap_or_default();

    let found = match port_name {
        Some(name) => ports.iter().find(|p| p.name.as_deref() == Some(name)),
        None => ports.first(),
    };

    found.map(|p| p.port).ok_or_else(|| match port_name {
        Some(name) => format!("port {} not found in service {}/{}", name, namespace, service_name),
        None => format!("service {}/{} has no ports", namespace, service_name),
    })
}

/// Backend port for a route: a numeric target port is used as is, a named
/// one is looked up on the Service, and no port block means the Service's
/// first port.
pub async fn route_service_port(index: &dyn ResourceIndex, route: &Route) -> Result<i32> {
    let namespace = route.namespace().unwrap_or_default();
    let service_name = &route.spec.to.name;
    debug!("Finding port for route {}", route.name_any());

    let resolved = match route.spec.port.as_ref().map(|p| &p.target_port) {
        Some(TargetPort::Number(port)) => Ok(*port),
        Some(TargetPort::Name(name)) if name.is_empty() => {
            get_service_port(index, &namespace, service_name, None).await
        }
        Some(TargetPort::Name(name)) => get_service_port(index, &namespace, service_name, Some(name)).await,
        None => get_service_port(index, &namespace, service_name, None).await,
    };

    resolved.map_err(|reason| CoreError::PortResolution {
        route: format!("{}/{}", namespace, route.name_any()),
        reason,
    })
}

#[derive(Default)]
struct MemoryIndexState {
    routes: BTreeMap<String, BTreeMap<String, Arc<Route>>>,
    services: BTreeMap<(String, String), Arc<Service>>,
    endpoints: BTreeMap<(String, String), Arc<Endpoints>>,
    nodes: BTreeMap<String, Arc<Node>>,
}

/// In-memory index, used where no informers run
#[derive(Default)]
pub struct MemoryIndex {
    state: RwLock<MemoryIndexState>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a namespace as watched, even before it has any routes
    pub async fn watch_namespace(&self, namespace: &str) {
        let mut state = self.state.write().await;
        state.routes.entry(namespace.to_string()).or_default();
    }

    pub async fn unwatch_namespace(&self, namespace: &str) {
        let mut state = self.state.write().await;
        state.routes.remove(namespace);
    }

    pub async fn upsert_route(&self, route: Route) {
        let namespace = route.namespace().unwrap_or_default();
        let mut state = self.state.write().await;
        state
            .routes
            .entry(namespace)
            .or_default()
            .insert(route.name_any(), Arc::new(route));
    }

    pub async fn delete_route(&self, namespace: &str, name: &str) {
        let mut state = self.state.write().await;
        if let Some(routes) = state.routes.get_mut(namespace) {
            routes.remove(name);
        }
    }

    pub async fn upsert_service(&self, service: Service) {
        let key = (service.namespace().unwrap_or_default(), service.name_any());
        self.state.write().await.services.insert(key, Arc::new(service));
    }

    pub async fn upsert_endpoints(&self, endpoints: Endpoints) {
        let key = (endpoints.namespace().unwrap_or_default(), endpoints.name_any());
        self.state.write().await.endpoints.insert(key, Arc::new(endpoints));
    }

    pub async fn upsert_node(&self, node: Node) {
        self.state.write().await.nodes.insert(node.name_any(), Arc::new(node));
    }
}

#[async_trait]
impl ResourceIndex for MemoryIndex {
    async fn routes(&self, namespace: &str) -> Option<Vec<Arc<Route>>> {
        let state = self.state.read().await;
        state
            .routes
            .get(namespace)
            .map(|routes| routes.values().cloned().collect())
    }

    async fn service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        let state = self.state.read().await;
        state
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    async fn endpoints(&self, namespace: &str, name: &str) -> Option<Arc<Endpoints>> {
        let state = self.state.read().await;
        state
            .endpoints
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    async fn nodes(&self) -> Vec<Arc<Node>> {
        self.state.read().await.nodes.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{route, service};
    use routegroup_api::v1::RoutePort;

    #[tokio::test]
    async fn test_unwatched_namespace_has_no_routes() {
        let index = MemoryIndex::new();
        assert!(index.routes("ns1").await.is_none());

        index.watch_namespace("ns1").await;
        assert_eq!(index.routes("ns1").await.map(|r| r.len()), Some(0));
    }

    #[tokio::test]
    async fn test_named_port_lookup() {
        let index = MemoryIndex::new();
        index.upsert_service(service("ns1", "svc", &[("http", 80, None), ("admin", 9000, None)])).await;

        assert_eq!(get_service_port(&index, "ns1", "svc", Some("admin")).await, Ok(9000));
        assert_eq!(get_service_port(&index, "ns1", "svc", None).await, Ok(80));
        assert!(get_service_port(&index, "ns1", "svc", Some("grpc")).await.is_err());
        assert!(get_service_port(&index, "ns1", "other", None).await.is_err());
    }

    #[tokio::test]
    async fn test_route_numeric_port_skips_lookup() {
        let index = MemoryIndex::new();
        let mut rt = route("ns1", "r1", "a.com", "/", 1);
        rt.spec.port = Some(RoutePort { target_port: TargetPort::Number(8443) });

        assert_eq!(route_service_port(&index, &rt).await.unwrap(), 8443);
    }

    #[tokio::test]
    async fn test_route_named_port_missing_is_port_resolution_error() {
        let index = MemoryIndex::new();
        index.upsert_service(service("ns1", "svc", &[("http", 80, None)])).await;
        let mut rt = route("ns1", "r1", "a.com", "/", 1);
        rt.spec.port = Some(RoutePort { target_port: TargetPort::Name("https".to_string()) });

        let err = route_service_port(&index, &rt).await.unwrap_err();
        assert!(matches!(err, CoreError::PortResolution { .. }));
    }
}
