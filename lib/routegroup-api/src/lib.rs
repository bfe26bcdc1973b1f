//! API types consumed by the route-group controller
//!
//! This library defines:
//! - Route: the route-like custom resource watched per namespace
//! - ExtendedSpecDocument: the `extendedSpec` payload carried by the global
//!   and namespace-local ConfigMaps

pub mod v1;
pub mod extended_spec;

pub use v1::{Route, RouteSpec, RouteTls, TlsTermination, InsecureEdgeTerminationPolicy};
pub use extended_spec::{ExtendedSpecDocument, ExtendedRouteGroupConfig, GroupSpec, EXTENDED_SPEC_KEY};
