//! Fixtures shared by the unit tests

use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::{
    ConfigMap, EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Node, NodeAddress, NodeStatus,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use routegroup_api::v1::{InsecureEdgeTerminationPolicy, RouteTargetReference, RouteTls, TlsTermination};
use routegroup_api::{Route, RouteSpec, EXTENDED_SPEC_KEY};
use std::collections::BTreeMap;

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Plain route to service `svc`, created `created` seconds after the epoch
pub fn route(namespace: &str, name: &str, host: &str, path: &str, created: i64) -> Route {
    let mut route = Route::new(
        name,
        RouteSpec {
            host: host.to_string(),
            path: path.to_string(),
            to: RouteTargetReference {
                kind: "Service".to_string(),
                name: "svc".to_string(),
                weight: None,
            },
            ..Default::default()
        },
    );
    route.metadata.namespace = Some(namespace.to_string());
    route.metadata.creation_timestamp = Utc.timestamp_opt(created, 0).single().map(Time);
    route
}

pub fn secure_route(
    namespace: &str,
    name: &str,
    host: &str,
    path: &str,
    created: i64,
    policy: Option<InsecureEdgeTerminationPolicy>,
) -> Route {
    let mut route = route(namespace, name, host, path, created);
    route.spec.tls = Some(RouteTls {
        termination: TlsTermination::Edge,
        insecure_edge_termination_policy: policy,
        ..Default::default()
    });
    route
}

/// Service with `(name, port, node_port)` entries
pub fn service(namespace: &str, name: &str, ports: &[(&str, i32, Option<i32>)]) -> Service {
    Service {
        metadata: meta(namespace, name),
        spec: Some(ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port, node_port)| ServicePort {
                        name: Some(port_name.to_string()),
                        port: *port,
                        node_port: *node_port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn endpoints(namespace: &str, name: &str, ips: &[&str], ports: &[(&str, i32)]) -> Endpoints {
    Endpoints {
        metadata: meta(namespace, name),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                ips.iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port)| EndpointPort {
                        name: Some(port_name.to_string()),
                        port: *port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }]),
    }
}

pub fn node(name: &str, internal_ip: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            addresses: Some(vec![
                NodeAddress {
                    address: format!("{}.example", name),
                    type_: "Hostname".to_string(),
                },
                NodeAddress {
                    address: internal_ip.to_string(),
                    type_: "InternalIP".to_string(),
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn configmap(namespace: &str, name: &str, extended_spec: &str) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(EXTENDED_SPEC_KEY.to_string(), extended_spec.to_string());
    ConfigMap {
        metadata: meta(namespace, name),
        data: Some(data),
        ..Default::default()
    }
}
