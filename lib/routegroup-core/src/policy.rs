//! LTM policy rule compilation

use crate::error::{CoreError, Result};
use crate::resource::{format_policy_name, format_rule_name, MatchKind, Policy, Rule, RuleAction, RuleCondition};
use kube::ResourceExt;
use routegroup_api::Route;
use std::collections::BTreeMap;
use tracing::debug;

/// Location used by redirect rules; expanded by the device per request
pub const HTTPS_REDIRECT_LOCATION: &str = "tcl:https://[getfield [HTTP::host] \":\" 1][HTTP::uri]";

const POLICY_STRATEGY: &str = "first-match";

/// What a compiled rule does with a matching request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleTarget {
    Forward,
    RedirectToHttps,
}

/// Compile the rule matching `host + path` of one route.
/// The ordinal is assigned later by [`compile_policy`].
pub fn prepare_route_rule(route: &Route, route_group: &str, pool_name: &str, target: RuleTarget) -> Result<Rule> {
    let host = route.spec.host.as_str();
    let path = route.spec.path.as_str();
    let fail = |reason: &str| CoreError::RuleCompilation {
        route: format!("{}/{}", route_group, route.name_any()),
        reason: reason.to_string(),
    };

    if host.is_empty() {
        return Err(fail("route has no host"));
    }
    if !path.is_empty() && !path.starts_with('/') {
        return Err(fail("path must start with '/'"));
    }

    let uri = format!("{}{}", host, path);
    let (match_kind, host_condition) = match host.strip_prefix('*') {
        Some(suffix) if suffix.starts_with('.') && suffix.len() > 1 => {
            (MatchKind::Wildcard, RuleCondition::HostEndsWith(suffix.to_string()))
        }
        Some(_) => return Err(fail("wildcard host must look like *.domain")),
        None => (MatchKind::Exact, RuleCondition::HostEquals(host.to_string())),
    };

    let mut conditions = vec![host_condition];
    if path.len() > 1 {
        conditions.push(RuleCondition::PathStartsWith(path.to_string()));
    }

    let action = match target {
        RuleTarget::Forward => RuleAction::Forward { pool: pool_name.to_string() },
        RuleTarget::RedirectToHttps => RuleAction::Redirect {
            location: HTTPS_REDIRECT_LOCATION.to_string(),
        },
    };

    Ok(Rule {
        name: format_rule_name(host, route_group, path, pool_name),
        uri,
        pool_name: pool_name.to_string(),
        ordinal: 0,
        match_kind,
        conditions,
        actions: vec![action],
    })
}

async fn number_bucket(bucket: BTreeMap<String, Rule>, mut ordinal: u32) -> Vec<Rule> {
    // Reverse URI order puts the longer path of a shared prefix first.
    bucket
        .into_values()
        .rev()
        .map(|mut rule| {
            rule.ordinal = ordinal;
            ordinal += 1;
            rule
        })
        .collect()
}

/// Build the virtual server's policy: exact-host rules take ordinals
/// `0..k`, wildcard-host rules `k..k+m`, each bucket walked in reverse URI
/// order, and the result is sorted by ordinal.
pub async fn compile_policy(vs_name: &str, partition: &str, rules: Vec<Rule>) -> Result<Policy> {
    let mut exact = BTreeMap::new();
    let mut wildcards = BTreeMap::new();

    for rule in rules {
        let bucket = match rule.match_kind {
            MatchKind::Exact => &mut exact,
            MatchKind::Wildcard => &mut wildcards,
        };
        let uri = rule.uri.clone();
        if let Some(previous) = bucket.insert(uri.clone(), rule) {
            return Err(CoreError::RuleCompilation {
                route: previous.name,
                reason: format!("duplicate rule for {}", uri),
            });
        }
    }

    let base = exact.len() as u32;
    let (mut rules, wildcard_rules) = tokio::join!(number_bucket(exact, 0), number_bucket(wildcards, base));
    rules.extend(wildcard_rules);
    rules.sort_by_key(|rule| rule.ordinal);

    debug!("Compiled {} rules for virtual server {}", rules.len(), vs_name);

    Ok(Policy {
        name: format_policy_name(vs_name),
        partition: partition.to_string(),
        strategy: POLICY_STRATEGY.to_string(),
        rules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::route;

    fn rule_for(host: &str, path: &str) -> Rule {
        let rt = route("ns1", "r1", host, path, 1);
        prepare_route_rule(&rt, "ns1", "svc_80_ns1", RuleTarget::Forward).unwrap()
    }

    #[test]
    fn test_exact_rule() {
        let rule = rule_for("a.com", "/api");
        assert_eq!(rule.uri, "a.com/api");
        assert_eq!(rule.match_kind, MatchKind::Exact);
        assert_eq!(
            rule.conditions,
            vec![
                RuleCondition::HostEquals("a.com".to_string()),
                RuleCondition::PathStartsWith("/api".to_string()),
            ]
        );
        assert_eq!(rule.actions, vec![RuleAction::Forward { pool: "svc_80_ns1".to_string() }]);
    }

    #[test]
    fn test_wildcard_rule_without_path_condition() {
        let rule = rule_for("*.a.com", "/");
        assert_eq!(rule.match_kind, MatchKind::Wildcard);
        assert_eq!(rule.conditions, vec![RuleCondition::HostEndsWith(".a.com".to_string())]);
    }

    #[test]
    fn test_redirect_rule() {
        let rt = route("ns1", "r1", "a.com", "", 1);
        let rule = prepare_route_rule(&rt, "ns1", "svc_80_ns1", RuleTarget::RedirectToHttps).unwrap();
        assert!(matches!(rule.actions[0], RuleAction::Redirect { .. }));
    }

    #[test]
    fn test_invalid_routes_fail_compilation() {
        for (host, path) in [("", "/"), ("a.com", "api"), ("*a.com", "/")] {
            let rt = route("ns1", "r1", host, path, 1);
            let result = prepare_route_rule(&rt, "ns1", "pool", RuleTarget::Forward);
            assert!(
                matches!(result, Err(CoreError::RuleCompilation { .. })),
                "{}{} should not compile",
                host,
                path
            );
        }
    }

    #[tokio::test]
    async fn test_exact_rules_precede_wildcards() {
        let rules = vec![
            rule_for("*.a.com", "/"),
            rule_for("b.com", "/"),
            rule_for("a.com", "/"),
            rule_for("a.com", "/api"),
        ];
        let policy = compile_policy("vs1_80", "ns1", rules).await.unwrap();

        let order: Vec<(&str, u32)> = policy.rules.iter().map(|r| (r.uri.as_str(), r.ordinal)).collect();
        assert_eq!(
            order,
            vec![("b.com/", 0), ("a.com/api", 1), ("a.com/", 2), ("*.a.com/", 3)]
        );
        assert_eq!(policy.name, "vs1_80_policy");
        assert_eq!(policy.strategy, "first-match");
    }

    #[tokio::test]
    async fn test_ordinals_independent_of_input_order() {
        let forward = vec![rule_for("a.com", "/x"), rule_for("a.com", "/y"), rule_for("*.b.com", "/")];
        let mut backward = forward.clone();
        backward.reverse();

        let first = compile_policy("vs1_80", "ns1", forward).await.unwrap();
        let second = compile_policy("vs1_80", "ns1", backward).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_duplicate_uri_is_rejected() {
        let rules = vec![rule_for("a.com", "/"), rule_for("a.com", "/")];
        assert!(compile_policy("vs1_80", "ns1", rules).await.is_err());
    }
}
