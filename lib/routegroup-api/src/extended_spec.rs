//! The `extendedSpec` document carried by route-group ConfigMaps

use serde::{Deserialize, Serialize};

/// ConfigMap data key holding the document
pub const EXTENDED_SPEC_KEY: &str = "extendedSpec";

/// Top-level document. Parsing is strict: unknown fields are rejected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExtendedSpecDocument {
    #[serde(default)]
    pub extended_route_group_configs: Vec<ExtendedRouteGroupConfig>,
}

/// One route-group entry of the document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtendedRouteGroupConfig {
    pub namespace: String,

    #[serde(rename = "allowOverride", default)]
    pub allow_override: bool,

    #[serde(rename = "vserverName", alias = "vServerName", default)]
    pub vserver_name: String,

    #[serde(rename = "vserverAddr", alias = "vServerAddr", default)]
    pub vserver_addr: String,

    #[serde(default)]
    pub snat: String,

    #[serde(default)]
    pub waf: String,

    #[serde(rename = "iRules", default)]
    pub irules: Vec<String>,
}

/// Virtual server settings shared by every route of a group
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    pub virtual_server_name: String,
    pub virtual_server_address: String,
    pub snat: String,
    pub waf: String,
    pub irules: Vec<String>,
}

impl ExtendedSpecDocument {
    /// Parse a YAML (or JSON) document in strict mode
    pub fn from_yaml(data: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(data)
    }
}

impl ExtendedRouteGroupConfig {
    /// The virtual server settings of this entry
    pub fn group_spec(&self) -> GroupSpec {
        GroupSpec {
            virtual_server_name: self.vserver_name.clone(),
            virtual_server_address: self.vserver_addr.clone(),
            snat: self.snat.clone(),
            waf: self.waf.clone(),
            irules: self.irules.clone(),
        }
    }
}
