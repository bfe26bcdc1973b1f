//! Route-group synthesis and extended-spec reconciliation

use crate::error::{CoreError, Result};
use crate::extended_spec::{
    configmap_key, global_candidate, parse_extended_spec, ExtendedSpecStore, ParsedSpec, SpecDiff,
};
use crate::index::{route_service_port, ResourceIndex};
use crate::members::update_pool_members;
use crate::policy::{compile_policy, prepare_route_rule, RuleTarget};
use crate::resource::{
    basic_virtual_ports, format_pool_name, frame_route_vs_name, Pool, PoolMemberType, Protocol, ResourceKind,
    VirtualPort, VirtualServerConfig,
};
use crate::routes::{group_routes, order_routes, routes_handle_http, virtual_ports_for_routes, RouteConflict};
use crate::store::ResourceStore;
use crate::tls::TlsProfileResolver;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use routegroup_api::{GroupSpec, InsecureEdgeTerminationPolicy, Route};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, Default)]
pub struct ReconcilerSettings {
    pub pool_member_type: PoolMemberType,
    /// `namespace/name` of the cluster-global extended spec ConfigMap
    pub global_spec_configmap: String,
}

/// Outcome of one successful synthesis
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SynthesisReport {
    pub published: Vec<String>,
    pub removed: Vec<String>,
    pub conflicts: Vec<RouteConflict>,
}

/// Reconciler owns the resource store and the extended spec store. It is
/// driven from the single worker and never shared across tasks.
pub struct Reconciler {
    store: ResourceStore,
    specs: ExtendedSpecStore,
    index: Arc<dyn ResourceIndex>,
    tls: Arc<dyn TlsProfileResolver>,
    settings: ReconcilerSettings,
    #[cfg(test)]
    synthesis_log: Vec<(String, bool)>,
}

impl Reconciler {
    pub fn new(
        index: Arc<dyn ResourceIndex>,
        tls: Arc<dyn TlsProfileResolver>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store: ResourceStore::new(),
            specs: ExtendedSpecStore::new(),
            index,
            tls,
            settings,
            #[cfg(test)]
            synthesis_log: Vec::new(),
        }
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ResourceStore {
        &mut self.store
    }

    pub fn specs(&self) -> &ExtendedSpecStore {
        &self.specs
    }

    pub fn index(&self) -> &Arc<dyn ResourceIndex> {
        &self.index
    }

    /// Synthesize the virtual servers of one route group and publish them.
    /// With `delete` set, or when the group has no routes left, the group's
    /// canonical virtual servers are removed instead.
    pub async fn process_routes(&mut self, route_group: &str, delete: bool) -> Result<SynthesisReport> {
        #[cfg(test)]
        self.synthesis_log.push((route_group.to_string(), delete));

        let start = Instant::now();
        let spec = self
            .specs
            .effective(route_group)
            .cloned()
            .ok_or_else(|| CoreError::MissingSpec(route_group.to_string()))?;

        let mut routes = match self.index.routes(route_group).await {
            Some(routes) => routes,
            None => {
                debug!("No informer running for namespace {}", route_group);
                Vec::new()
            }
        };
        order_routes(&mut routes);
        let (routes, conflicts) = group_routes(routes);
        for conflict in &conflicts {
            warn!(
                namespace = %conflict.namespace,
                route = %conflict.discarded,
                "Discarding route due to duplicate host {} path {}, already claimed by {}",
                conflict.host,
                conflict.path,
                conflict.kept
            );
        }

        let mut report = SynthesisReport {
            conflicts,
            ..Default::default()
        };

        if delete || routes.is_empty() {
            for port in basic_virtual_ports() {
                let name = frame_route_vs_name(route_group, &spec, port);
                if self.store.delete_virtual_server(route_group, &name) {
                    debug!("Removing virtual {} belonging to RouteGroup {}", name, route_group);
                    report.removed.push(name);
                }
            }
            return Ok(report);
        }

        let required = virtual_ports_for_routes(&routes);
        let handles_http = routes_handle_http(&routes);
        let mut staged = Vec::with_capacity(required.len());
        let mut removals = Vec::new();

        for port in &required {
            let name = frame_route_vs_name(route_group, &spec, *port);
            if port.protocol == Protocol::Http && !handles_http {
                removals.push(name);
                continue;
            }
            let mut config = self.build_virtual_server(route_group, &name, *port, &spec, &routes).await?;
            update_pool_members(&mut config, self.index.as_ref(), self.settings.pool_member_type).await;
            staged.push(config);
        }
        for port in basic_virtual_ports() {
            if !required.contains(&port) {
                removals.push(frame_route_vs_name(route_group, &spec, port));
            }
        }

        // Nothing is published unless every port synthesized cleanly.
        for config in staged {
            report.published.push(config.name.clone());
            self.store.set_virtual_server(config);
        }
        for name in removals {
            if self.store.delete_virtual_server(route_group, &name) {
                report.removed.push(name);
            }
        }

        debug!("Finished syncing RouteGroup {} ({:?})", route_group, start.elapsed());
        Ok(report)
    }

    async fn build_virtual_server(
        &self,
        route_group: &str,
        name: &str,
        port: VirtualPort,
        spec: &GroupSpec,
        routes: &[Arc<Route>],
    ) -> Result<VirtualServerConfig> {
        let mut config = VirtualServerConfig::new(route_group, name, port, spec);
        let mut rules = Vec::with_capacity(routes.len());

        for route in routes {
            let target = match (port.protocol, route.insecure_policy()) {
                (Protocol::Http, Some(InsecureEdgeTerminationPolicy::None)) => continue,
                (Protocol::Http, Some(InsecureEdgeTerminationPolicy::Redirect)) => RuleTarget::RedirectToHttps,
                _ => RuleTarget::Forward,
            };

            let namespace = route.namespace().unwrap_or_default();
            config
                .base_resources
                .insert(format!("{}/{}", namespace, route.name_any()), ResourceKind::Route);

            // Redirect rules never forward, so they need no backend.
            let pool_name = match target {
                RuleTarget::RedirectToHttps => String::new(),
                RuleTarget::Forward => {
                    let service_port = route_service_port(self.index.as_ref(), route).await?;
                    let service_name = route.spec.to.name.clone();
                    config.add_pool(Pool {
                        name: format_pool_name(&namespace, &service_name, service_port),
                        partition: route_group.to_string(),
                        service_name,
                        service_port,
                        member_type: self.settings.pool_member_type,
                        members: Vec::new(),
                    })
                }
            };

            config.add_host(&route.spec.host);
            rules.push(prepare_route_rule(route, route_group, &pool_name, target)?);

            if route.is_secure() {
                self.tls.attach(&mut config, route, spec)?;
                debug!("Updated Route {} with TLS profiles", route.name_any());
            }
        }

        let policy = compile_policy(name, route_group, rules).await?;
        config.policies = vec![policy];
        Ok(config)
    }

    /// Recompute pool members of the group's existing virtual servers.
    /// Returns how many configs were refreshed.
    pub async fn update_pool_members_for_routes(&mut self, route_group: &str) -> usize {
        let Some(spec) = self.specs.effective(route_group).cloned() else {
            debug!("No extended spec for namespace {}, skipping pool member update", route_group);
            return 0;
        };

        let mut refreshed = 0;
        for port in basic_virtual_ports() {
            let name = frame_route_vs_name(route_group, &spec, port);
            let Some(existing) = self.store.get_virtual_server(route_group, &name) else {
                continue;
            };
            let mut config = existing.clone();
            update_pool_members(&mut config, self.index.as_ref(), self.settings.pool_member_type).await;
            self.store.set_virtual_server(config);
            refreshed += 1;
        }
        refreshed
    }

    /// Apply an extended spec ConfigMap event. The global ConfigMap is
    /// diffed against the stored specs; any other ConfigMap is a
    /// namespace-local override.
    pub async fn process_config_map(&mut self, cm: &ConfigMap, is_delete: bool, initial_load: bool) -> Result<()> {
        if configmap_key(cm) == self.settings.global_spec_configmap {
            self.process_global_spec(cm, is_delete, initial_load).await
        } else {
            self.process_local_spec(cm, is_delete).await
        }
    }

    async fn process_global_spec(&mut self, cm: &ConfigMap, is_delete: bool, initial_load: bool) -> Result<()> {
        let mut candidate = if is_delete {
            Default::default()
        } else {
            global_candidate(&parse_extended_spec(cm)?)
        };

        if initial_load {
            for ns in self.specs.namespaces() {
                if let Some(local) = self.specs.get(&ns).and_then(|spec| spec.local.clone()) {
                    candidate.entry(ns).or_default().local = Some(local);
                }
            }
            info!("Loaded extended spec for {} namespaces", candidate.len());
            self.specs.replace_all(candidate);
            return Ok(());
        }

        let diff = self.specs.diff_global(&candidate, is_delete);
        if diff.is_empty() {
            debug!("Global extended spec {} unchanged", configmap_key(cm));
            return Ok(());
        }
        let SpecDiff {
            deleted,
            modified,
            updated,
            created,
            refreshed,
        } = diff;

        for ns in deleted {
            self.teardown(&ns).await;
            self.specs.drop_global(&ns);
        }
        for ns in modified {
            self.teardown(&ns).await;
            self.store_global(&ns, &candidate);
            self.rebuild(&ns).await;
        }
        for ns in updated.into_iter().chain(created) {
            self.store_global(&ns, &candidate);
            self.rebuild(&ns).await;
        }
        for ns in refreshed {
            self.store_global(&ns, &candidate);
        }
        Ok(())
    }

    fn store_global(&mut self, namespace: &str, candidate: &BTreeMap<String, ParsedSpec>) {
        if let Some(next) = candidate.get(namespace) {
            self.specs.set_global(namespace, next.override_allowed, next.global.clone());
        }
    }

    async fn process_local_spec(&mut self, cm: &ConfigMap, is_delete: bool) -> Result<()> {
        let doc = parse_extended_spec(cm)?;
        let namespace = cm.namespace().unwrap_or_default();
        let format_error = |reason: String| CoreError::ConfigFormat {
            configmap: configmap_key(cm),
            reason,
        };

        let entry = match doc.extended_route_group_configs.as_slice() {
            [entry] => entry,
            entries => {
                return Err(format_error(format!(
                    "local extended spec must hold exactly one entry, found {}",
                    entries.len()
                )))
            }
        };
        if entry.namespace != namespace {
            return Err(format_error(format!(
                "entry for namespace {} found in a ConfigMap of namespace {}",
                entry.namespace, namespace
            )));
        }
        let local = entry.group_spec();

        let Some(current) = self.specs.get(&namespace).cloned() else {
            if !is_delete {
                debug!("Storing latent local extended spec for namespace {}", namespace);
                self.specs.set_local(&namespace, Some(local));
            }
            return Ok(());
        };

        if is_delete {
            if !current.override_allowed || current.local.is_none() {
                self.specs.set_local(&namespace, None);
                return Ok(());
            }
            self.teardown(&namespace).await;
            self.specs.set_local(&namespace, None);
            self.rebuild(&namespace).await;
            return Ok(());
        }

        if !current.override_allowed || current.global.is_none() {
            debug!("Override not allowed for namespace {}, local spec stays latent", namespace);
            self.specs.set_local(&namespace, Some(local));
            return Ok(());
        }

        let previous = current.effective().cloned();
        if previous.as_ref() == Some(&local) {
            self.specs.set_local(&namespace, Some(local));
            return Ok(());
        }
        let renamed = previous
            .map(|spec| spec.virtual_server_name != local.virtual_server_name)
            .unwrap_or(true);
        if renamed {
            self.teardown(&namespace).await;
        }
        self.specs.set_local(&namespace, Some(local));
        self.rebuild(&namespace).await;
        Ok(())
    }

    /// Remove the group's virtual servers under its current effective spec
    pub async fn teardown(&mut self, namespace: &str) {
        if let Err(e) = self.process_routes(namespace, true).await {
            debug!("Nothing to tear down for namespace {}: {}", namespace, e);
        }
    }

    async fn rebuild(&mut self, namespace: &str) {
        if let Err(e) = self.process_routes(namespace, false).await {
            error!(namespace = %namespace, "Unable to process RouteGroup: {}", e);
        }
    }
}
