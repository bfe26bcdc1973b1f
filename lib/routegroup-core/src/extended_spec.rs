//! Per-namespace extended spec store and global-document diffing

use crate::error::{CoreError, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use routegroup_api::{ExtendedSpecDocument, GroupSpec, EXTENDED_SPEC_KEY};
use std::collections::BTreeMap;

/// The global and local halves of a namespace's extended spec
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedSpec {
    pub override_allowed: bool,
    pub global: Option<GroupSpec>,
    pub local: Option<GroupSpec>,
}

impl ParsedSpec {
    /// Local wins when override is allowed, otherwise global
    pub fn effective(&self) -> Option<&GroupSpec> {
        match (&self.local, self.override_allowed) {
            (Some(local), true) => Some(local),
            _ => self.global.as_ref(),
        }
    }
}

/// Namespaces whose effective spec changed between two global documents
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpecDiff {
    /// Lost their global entry
    pub deleted: Vec<String>,
    /// Virtual server name or override flag changed; rebuilt from scratch
    pub modified: Vec<String>,
    /// Another field changed; rebuilt in place
    pub updated: Vec<String>,
    /// Gained a global entry
    pub created: Vec<String>,
    /// Global entry changed without changing the effective spec
    pub refreshed: Vec<String>,
}

impl SpecDiff {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
            && self.modified.is_empty()
            && self.updated.is_empty()
            && self.created.is_empty()
            && self.refreshed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ExtendedSpecStore {
    specs: BTreeMap<String, ParsedSpec>,
}

impl ExtendedSpecStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str) -> Option<&ParsedSpec> {
        self.specs.get(namespace)
    }

    pub fn effective(&self, namespace: &str) -> Option<&GroupSpec> {
        self.specs.get(namespace).and_then(|spec| spec.effective())
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    pub fn replace_all(&mut self, specs: BTreeMap<String, ParsedSpec>) {
        self.specs = specs;
    }

    pub fn insert(&mut self, namespace: &str, spec: ParsedSpec) {
        self.specs.insert(namespace.to_string(), spec);
    }

    /// Store the global half and the override flag, keeping any local half
    pub fn set_global(&mut self, namespace: &str, override_allowed: bool, global: Option<GroupSpec>) {
        let spec = self.specs.entry(namespace.to_string()).or_default();
        spec.override_allowed = override_allowed;
        spec.global = global;
    }

    /// Store the local half; an entry left with neither half is removed
    pub fn set_local(&mut self, namespace: &str, local: Option<GroupSpec>) {
        let spec = self.specs.entry(namespace.to_string()).or_default();
        spec.local = local;
        if spec.global.is_none() && spec.local.is_none() {
            self.specs.remove(namespace);
        }
    }

    /// Drop the global half. A local half survives, latent, only when
    /// override was allowed.
    pub fn drop_global(&mut self, namespace: &str) {
        let keep_local = self
            .specs
            .get(namespace)
            .map(|spec| spec.local.is_some() && spec.override_allowed)
            .unwrap_or(false);

        if keep_local {
            self.set_global(namespace, false, None);
        } else {
            self.specs.remove(namespace);
        }
    }

    /// Classify every namespace against a candidate global document.
    /// `is_delete` means the whole global ConfigMap went away.
    pub fn diff_global(&self, candidate: &BTreeMap<String, ParsedSpec>, is_delete: bool) -> SpecDiff {
        let mut diff = SpecDiff::default();

        if is_delete {
            diff.deleted = self
                .specs
                .iter()
                .filter(|(_, spec)| spec.global.is_some())
                .map(|(ns, _)| ns.clone())
                .collect();
            return diff;
        }

        for (ns, current) in &self.specs {
            let Some(next) = candidate.get(ns) else {
                if current.global.is_some() {
                    diff.deleted.push(ns.clone());
                }
                continue;
            };

            if current.global.is_none() {
                diff.created.push(ns.clone());
                continue;
            }
            if current.global == next.global && current.override_allowed == next.override_allowed {
                continue;
            }

            let merged = ParsedSpec {
                override_allowed: next.override_allowed,
                global: next.global.clone(),
                local: current.local.clone(),
            };
            let before = current.effective();
            let after = merged.effective();
            let renamed = before.map(|s| &s.virtual_server_name) != after.map(|s| &s.virtual_server_name);

            if renamed || current.override_allowed != next.override_allowed {
                diff.modified.push(ns.clone());
            } else if before != after {
                diff.updated.push(ns.clone());
            } else {
                diff.refreshed.push(ns.clone());
            }
        }

        for ns in candidate.keys() {
            if !self.specs.contains_key(ns) {
                diff.created.push(ns.clone());
            }
        }

        diff
    }
}

pub fn configmap_key(cm: &ConfigMap) -> String {
    format!("{}/{}", cm.namespace().unwrap_or_default(), cm.name_any())
}

/// Parse the `extendedSpec` payload of a ConfigMap in strict mode
pub fn parse_extended_spec(cm: &ConfigMap) -> Result<ExtendedSpecDocument> {
    let format_error = |reason: String| CoreError::ConfigFormat {
        configmap: configmap_key(cm),
        reason,
    };

    let data = cm
        .data
        .as_ref()
        .and_then(|data| data.get(EXTENDED_SPEC_KEY))
        .ok_or_else(|| format_error(format!("missing key {}", EXTENDED_SPEC_KEY)))?;

    ExtendedSpecDocument::from_yaml(data).map_err(|e| format_error(e.to_string()))
}

/// The candidate store built from a global document; local halves are
/// merged in by the reconciler.
pub fn global_candidate(doc: &ExtendedSpecDocument) -> BTreeMap<String, ParsedSpec> {
    doc.extended_route_group_configs
        .iter()
        .map(|entry| {
            (
                entry.namespace.clone(),
                ParsedSpec {
                    override_allowed: entry.allow_override,
                    global: Some(entry.group_spec()),
                    local: None,
                },
            )
        })
        .collect()
}
