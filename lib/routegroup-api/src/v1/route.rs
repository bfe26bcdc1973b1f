use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Route exposes a Service through the load balancer under a host and path.
/// All routes of one namespace form a route group.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    plural = "routes",
    namespaced,
    derive = "Default",
    derive = "PartialEq",
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Public host name, optionally a `*.` wildcard
    #[serde(default)]
    pub host: String,

    /// Path prefix; empty matches everything under the host
    #[serde(default)]
    pub path: String,

    /// Backend Service
    pub to: RouteTargetReference,

    /// Port on the backend Service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,

    /// TLS settings; a route with a TLS block is a secure route
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
}

/// Reference to the Service a route points at
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteTargetReference {
    /// Kind of the referent, always "Service"
    #[serde(default = "default_target_kind")]
    pub kind: String,

    /// Name of the Service
    pub name: String,

    /// Relative weight among backends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

/// Port selection on the backend Service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    pub target_port: TargetPort,
}

/// Either a literal port number or the name of a Service port
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum TargetPort {
    Number(i32),
    Name(String),
}

/// TLS block of a secure route
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    /// Where TLS is terminated
    pub termination: TlsTermination,

    /// What to do with plain-text traffic for this host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<InsecureEdgeTerminationPolicy>,

    /// PEM certificate served to clients
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    /// PEM key for `certificate`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// PEM CA chain for `certificate`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,

    /// PEM CA used to verify the backend on re-encrypt
    #[serde(rename = "destinationCACertificate", skip_serializing_if = "Option::is_none")]
    pub destination_ca_certificate: Option<String>,
}

/// TLS termination mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TlsTermination {
    #[default]
    Edge,
    Passthrough,
    Reencrypt,
}

/// Handling of plain-text requests on a secure route
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum InsecureEdgeTerminationPolicy {
    None,
    Allow,
    Redirect,
}

impl Route {
    /// A route is secure when it carries a TLS block
    pub fn is_secure(&self) -> bool {
        self.spec.tls.is_some()
    }

    /// Whether this route still accepts traffic on the plain port
    pub fn handles_http(&self) -> bool {
        match &self.spec.tls {
            None => true,
            Some(tls) => matches!(
                tls.insecure_edge_termination_policy,
                Some(InsecureEdgeTerminationPolicy::Allow) | Some(InsecureEdgeTerminationPolicy::Redirect)
            ),
        }
    }

    /// Insecure policy of a secure route, `None` for plain routes
    pub fn insecure_policy(&self) -> Option<InsecureEdgeTerminationPolicy> {
        self.spec
            .tls
            .as_ref()
            .map(|tls| tls.insecure_edge_termination_policy.unwrap_or(InsecureEdgeTerminationPolicy::None))
    }
}

fn default_target_kind() -> String {
    "Service".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_with_tls(tls: Option<RouteTls>) -> Route {
        Route::new(
            "r1",
            RouteSpec {
                host: "a.com".to_string(),
                tls,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_plain_route_handles_http() {
        let route = route_with_tls(None);
        assert!(!route.is_secure());
        assert!(route.handles_http());
        assert_eq!(route.insecure_policy(), None);
    }

    #[test]
    fn test_secure_route_without_policy_forbids_http() {
        let route = route_with_tls(Some(RouteTls::default()));
        assert!(route.is_secure());
        assert!(!route.handles_http());
        assert_eq!(route.insecure_policy(), Some(InsecureEdgeTerminationPolicy::None));
    }

    #[test]
    fn test_redirect_and_allow_handle_http() {
        for policy in [InsecureEdgeTerminationPolicy::Allow, InsecureEdgeTerminationPolicy::Redirect] {
            let route = route_with_tls(Some(RouteTls {
                insecure_edge_termination_policy: Some(policy),
                ..Default::default()
            }));
            assert!(route.handles_http(), "{:?} should accept plain traffic", policy);
        }
    }

    #[test]
    fn test_target_port_deserializes_int_or_name() {
        let numeric: RoutePort = serde_json::from_str(r#"{"targetPort": 8080}"#).unwrap();
        assert_eq!(numeric.target_port, TargetPort::Number(8080));

        let named: RoutePort = serde_json::from_str(r#"{"targetPort": "web"}"#).unwrap();
        assert_eq!(named.target_port, TargetPort::Name("web".to_string()));
    }

    #[test]
    fn test_route_spec_camel_case() {
        let spec: RouteSpec = serde_json::from_str(
            r#"{
                "host": "a.com",
                "path": "/api",
                "to": {"name": "svc"},
                "tls": {"termination": "reencrypt", "insecureEdgeTerminationPolicy": "Redirect",
                        "destinationCACertificate": "pem"}
            }"#,
        )
        .unwrap();
        assert_eq!(spec.to.kind, "Service");
        let tls = spec.tls.unwrap();
        assert_eq!(tls.termination, TlsTermination::Reencrypt);
        assert_eq!(tls.insecure_edge_termination_policy, Some(InsecureEdgeTerminationPolicy::Redirect));
        assert_eq!(tls.destination_ca_certificate.as_deref(), Some("pem"));
    }
}
