//! TLS profile attachment for secure routes

use crate::error::{CoreError, Result};
use crate::resource::{sanitize_name, Protocol, TlsContext, TlsProfile, VirtualServerConfig};
use kube::ResourceExt;
use routegroup_api::{GroupSpec, Route, TlsTermination};
use tracing::debug;

/// Attaches SSL profiles for a secure route to a virtual server config
pub trait TlsProfileResolver: Send + Sync {
    fn attach(&self, config: &mut VirtualServerConfig, route: &Route, spec: &GroupSpec) -> Result<()>;
}

/// Resolves profiles from the route's own certificates, falling back to
/// cluster-wide defaults.
#[derive(Clone, Debug, Default)]
pub struct RouteTlsProfiles {
    pub default_client_ssl: Option<String>,
    pub default_server_ssl: Option<String>,
}

impl RouteTlsProfiles {
    pub fn new(default_client_ssl: Option<String>, default_server_ssl: Option<String>) -> Self {
        Self { default_client_ssl, default_server_ssl }
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

impl TlsProfileResolver for RouteTlsProfiles {
    fn attach(&self, config: &mut VirtualServerConfig, route: &Route, _spec: &GroupSpec) -> Result<()> {
        // The plain listener never terminates TLS.
        if config.protocol == Protocol::Http {
            return Ok(());
        }
        let Some(tls) = route.spec.tls.as_ref() else {
            return Ok(());
        };

        let namespace = route.namespace().unwrap_or_default();
        let route_name = route.name_any();
        let fail = |reason: String| CoreError::TlsAttachment {
            route: format!("{}/{}", namespace, route_name),
            reason,
        };

        if tls.termination == TlsTermination::Passthrough {
            return Ok(());
        }

        let client = match (present(&tls.certificate), present(&tls.key)) {
            (true, true) => sanitize_name(&format!("{}_{}_clientssl", namespace, route_name)),
            (true, false) | (false, true) => {
                return Err(fail("certificate and key must be set together".to_string()));
            }
            (false, false) => self
                .default_client_ssl
                .clone()
                .ok_or_else(|| fail("no certificate on route and no default client SSL profile".to_string()))?,
        };
        config.tls_profiles.insert(TlsProfile { context: TlsContext::Client, name: client });

        if tls.termination == TlsTermination::Reencrypt {
            let server = if present(&tls.destination_ca_certificate) {
                sanitize_name(&format!("{}_{}_serverssl", namespace, route_name))
            } else {
                self.default_server_ssl.clone().ok_or_else(|| {
                    fail("no destination CA on route and no default server SSL profile".to_string())
                })?
            };
            config.tls_profiles.insert(TlsProfile { context: TlsContext::Server, name: server });
        }

        debug!("Attached TLS profiles for route {}/{} to {}", namespace, route_name, config.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::basic_virtual_ports;
    use crate::testing::secure_route;
    use routegroup_api::RouteTls;

    fn https_config() -> VirtualServerConfig {
        VirtualServerConfig::new("ns1", "vs1_443", basic_virtual_ports()[1], &GroupSpec::default())
    }

    fn with_tls(tls: RouteTls) -> Route {
        let mut route = secure_route("ns1", "r1", "a.com", "/", 1, None);
        route.spec.tls = Some(tls);
        route
    }

    #[test]
    fn test_embedded_certificate_gets_route_profile() {
        let route = with_tls(RouteTls {
            certificate: Some("cert".to_string()),
            key: Some("key".to_string()),
            ..Default::default()
        });
        let mut cfg = https_config();
        RouteTlsProfiles::default().attach(&mut cfg, &route, &GroupSpec::default()).unwrap();

        assert!(cfg.tls_profiles.contains(&TlsProfile {
            context: TlsContext::Client,
            name: "ns1_r1_clientssl".to_string(),
        }));
    }

    #[test]
    fn test_default_client_profile() {
        let route = with_tls(RouteTls::default());
        let mut cfg = https_config();
        let resolver = RouteTlsProfiles::new(Some("/Common/clientssl".to_string()), None);
        resolver.attach(&mut cfg, &route, &GroupSpec::default()).unwrap();
        assert_eq!(cfg.tls_profiles.len(), 1);
    }

    #[test]
    fn test_missing_profile_fails() {
        let route = with_tls(RouteTls::default());
        let mut cfg = https_config();
        let err = RouteTlsProfiles::default()
            .attach(&mut cfg, &route, &GroupSpec::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::TlsAttachment { .. }));
    }

    #[test]
    fn test_reencrypt_needs_server_profile() {
        let route = with_tls(RouteTls {
            termination: TlsTermination::Reencrypt,
            ..Default::default()
        });
        let resolver = RouteTlsProfiles::new(Some("/Common/clientssl".to_string()), None);
        assert!(resolver.attach(&mut https_config(), &route, &GroupSpec::default()).is_err());

        let resolver = RouteTlsProfiles::new(
            Some("/Common/clientssl".to_string()),
            Some("/Common/serverssl".to_string()),
        );
        let mut cfg = https_config();
        resolver.attach(&mut cfg, &route, &GroupSpec::default()).unwrap();
        assert_eq!(cfg.tls_profiles.len(), 2);
    }

    #[test]
    fn test_passthrough_and_plain_listener_attach_nothing() {
        let route = with_tls(RouteTls {
            termination: TlsTermination::Passthrough,
            ..Default::default()
        });
        let mut cfg = https_config();
        RouteTlsProfiles::default().attach(&mut cfg, &route, &GroupSpec::default()).unwrap();
        assert!(cfg.tls_profiles.is_empty());

        let edge = with_tls(RouteTls::default());
        let mut plain = VirtualServerConfig::new("ns1", "vs1_80", basic_virtual_ports()[0], &GroupSpec::default());
        RouteTlsProfiles::default().attach(&mut plain, &edge, &GroupSpec::default()).unwrap();
        assert!(plain.tls_profiles.is_empty());
    }
}
