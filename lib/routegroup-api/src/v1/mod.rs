/// API version v1 of the route resource

pub mod route;

pub use route::{
    Route, RouteSpec, RouteTargetReference, RoutePort, TargetPort, RouteTls, TlsTermination,
    InsecureEdgeTerminationPolicy,
};

/// API group for route resources
pub const API_GROUP: &str = "route.openshift.io";
/// API version for route resources
pub const API_VERSION: &str = "v1";
