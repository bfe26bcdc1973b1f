//! Ordering, deduplication and port derivation for a route group

use crate::resource::{basic_virtual_ports, Protocol, VirtualPort, DEFAULT_HTTP_PORT};
use kube::ResourceExt;
use routegroup_api::Route;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// A route dropped because an earlier route already claims its host and path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteConflict {
    pub namespace: String,
    pub discarded: String,
    pub kept: String,
    pub host: String,
    pub path: String,
}

fn is_root_path(path: &str) -> bool {
    path.is_empty() || path == "/"
}

/// Order routes by host, then path, then age. Root paths ("" and "/") lead
/// their host and are ordered among themselves by age alone, so the older
/// of the two root routes wins. Name breaks remaining ties.
pub fn compare_routes(a: &Route, b: &Route) -> Ordering {
    let created = |r: &Route| r.metadata.creation_timestamp.as_ref().map(|t| t.0);

    a.spec
        .host
        .cmp(&b.spec.host)
        .then_with(|| {
            match (is_root_path(&a.spec.path), is_root_path(&b.spec.path)) {
                (true, true) => created(a)
                    .cmp(&created(b))
                    .then_with(|| a.spec.path.cmp(&b.spec.path)),
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => a
                    .spec
                    .path
                    .cmp(&b.spec.path)
                    .then_with(|| created(a).cmp(&created(b))),
            }
        })
        .then_with(|| a.name_any().cmp(&b.name_any()))
}

pub fn order_routes(routes: &mut [Arc<Route>]) {
    routes.sort_by(|a, b| compare_routes(a, b));
}

/// Keep the first route of every `(host, path)` in order; report the rest.
/// "" and "/" match the same requests and count as one path.
pub fn group_routes(ordered: Vec<Arc<Route>>) -> (Vec<Arc<Route>>, Vec<RouteConflict>) {
    let mut seen: HashMap<(String, String), String> = HashMap::new();
    let mut kept = Vec::with_capacity(ordered.len());
    let mut conflicts = Vec::new();

    for route in ordered {
        let path = if is_root_path(&route.spec.path) { "/" } else { route.spec.path.as_str() };
        let key = (route.spec.host.clone(), path.to_string());
        match seen.get(&key) {
            Some(winner) => conflicts.push(RouteConflict {
                namespace: route.namespace().unwrap_or_default(),
                discarded: route.name_any(),
                kept: winner.clone(),
                host: key.0,
                path: route.spec.path.clone(),
            }),
            None => {
                seen.insert(key, route.name_any());
                kept.push(route);
            }
        }
    }

    (kept, conflicts)
}

/// The plain port always; the secure port too once any route has TLS
pub fn virtual_ports_for_routes(routes: &[Arc<Route>]) -> Vec<VirtualPort> {
    if routes.iter().any(|r| r.is_secure()) {
        basic_virtual_ports().to_vec()
    } else {
        vec![VirtualPort { protocol: Protocol::Http, port: DEFAULT_HTTP_PORT }]
    }
}

/// Whether any route accepts plain-text traffic
pub fn routes_handle_http(routes: &[Arc<Route>]) -> bool {
    routes.iter().any(|r| r.handles_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{route, secure_route};
    use routegroup_api::InsecureEdgeTerminationPolicy;

    fn names(routes: &[Arc<Route>]) -> Vec<String> {
        routes.iter().map(|r| r.name_any()).collect()
    }

    #[test]
    fn test_order_by_host_path_age() {
        let mut routes = vec![
            Arc::new(route("ns1", "b-api", "b.com", "/api", 1)),
            Arc::new(route("ns1", "a-web-new", "a.com", "/web", 5)),
            Arc::new(route("ns1", "a-api", "a.com", "/api", 9)),
            Arc::new(route("ns1", "a-web-old", "a.com", "/web", 2)),
        ];
        order_routes(&mut routes);
        assert_eq!(names(&routes), vec!["a-api", "a-web-old", "a-web-new", "b-api"]);
    }

    #[test]
    fn test_root_paths_ordered_by_age() {
        let mut routes = vec![
            Arc::new(route("ns1", "slash", "a.com", "/", 1)),
            Arc::new(route("ns1", "empty", "a.com", "", 7)),
            Arc::new(route("ns1", "api", "a.com", "/api", 0)),
        ];
        order_routes(&mut routes);
        assert_eq!(names(&routes), vec!["slash", "empty", "api"]);
    }

    #[test]
    fn test_duplicates_keep_oldest() {
        let mut routes = vec![
            Arc::new(route("ns1", "newer", "a.com", "/", 10)),
            Arc::new(route("ns1", "older", "a.com", "/", 3)),
            Arc::new(route("ns1", "newest", "a.com", "/", 20)),
            Arc::new(route("ns1", "other", "a.com", "/x", 1)),
        ];
        order_routes(&mut routes);
        let (kept, conflicts) = group_routes(routes);

        assert_eq!(names(&kept), vec!["older", "other"]);
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts.iter().all(|c| c.kept == "older"));
        assert_eq!(conflicts[0].discarded, "newer");
        assert_eq!(conflicts[1].discarded, "newest");
    }

    #[test]
    fn test_empty_and_slash_paths_are_duplicates() {
        let mut routes = vec![
            Arc::new(route("ns1", "slash", "a.com", "/", 2)),
            Arc::new(route("ns1", "empty", "a.com", "", 1)),
        ];
        order_routes(&mut routes);
        let (kept, conflicts) = group_routes(routes);

        assert_eq!(names(&kept), vec!["empty"]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].discarded, "slash");
        assert_eq!(conflicts[0].path, "/");
    }

    #[test]
    fn test_ports_plain_only() {
        let routes = vec![Arc::new(route("ns1", "r1", "a.com", "/", 1))];
        let ports = virtual_ports_for_routes(&routes);
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].protocol, Protocol::Http);
        assert!(routes_handle_http(&routes));
    }

    #[test]
    fn test_ports_with_secure_route() {
        let routes = vec![
            Arc::new(route("ns1", "r1", "a.com", "/", 1)),
            Arc::new(secure_route("ns1", "r2", "b.com", "/", 1, None)),
        ];
        let ports = virtual_ports_for_routes(&routes);
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[1].protocol, Protocol::Https);
    }

    #[test]
    fn test_all_secure_without_insecure_policy_handles_no_http() {
        let routes = vec![
            Arc::new(secure_route("ns1", "r1", "a.com", "/", 1, None)),
            Arc::new(secure_route("ns1", "r2", "b.com", "/", 1, Some(InsecureEdgeTerminationPolicy::None))),
        ];
        assert!(!routes_handle_http(&routes));

        let with_redirect = vec![Arc::new(secure_route(
            "ns1",
            "r3",
            "c.com",
            "/",
            1,
            Some(InsecureEdgeTerminationPolicy::Redirect),
        ))];
        assert!(routes_handle_http(&with_redirect));
    }
}
