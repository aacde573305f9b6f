//! Typed view of the `CiliumNode` fields consumed by the inventory source
//!
//! CiliumNode objects are listed as `DynamicObject`s (the CRD is owned by
//! Cilium) and only `spec.addresses[]` is decoded. Entries that are missing a
//! field or have the wrong shape are dropped instead of failing the node.

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::{Deserialize, Deserializer};
use tracing::debug;

/// Address type Cilium assigns to the node's internal router IP
pub const CILIUM_INTERNAL_IP: &str = "CiliumInternalIP";

/// `cilium.io/v2` CiliumNode, cluster scoped
pub fn cilium_node_resource() -> ApiResource {
    ApiResource {
        group: "cilium.io".to_string(),
        version: "v2".to_string(),
        api_version: "cilium.io/v2".to_string(),
        kind: "CiliumNode".to_string(),
        plural: "ciliumnodes".to_string(),
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CiliumNodeSpec {
    #[serde(default, deserialize_with = "lenient_addresses")]
    pub addresses: Vec<NodeAddress>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub address_type: String,
    pub ip: String,
}

fn lenient_addresses<'de, D>(deserializer: D) -> Result<Vec<NodeAddress>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

impl CiliumNodeSpec {
    /// Decode the spec of a listed CiliumNode; `None` when absent or malformed.
    pub fn from_object(obj: &DynamicObject) -> Option<Self> {
        let spec = obj.data.get("spec")?;
        match serde_json::from_value(spec.clone()) {
            Ok(spec) => Some(spec),
            Err(e) => {
                debug!(
                    node = obj.metadata.name.as_deref().unwrap_or("<unnamed>"),
                    "Skipping CiliumNode with malformed spec: {}",
                    e
                );
                None
            }
        }
    }

    pub fn internal_ips(&self) -> impl Iterator<Item = &str> {
        self.addresses
            .iter()
            .filter(|a| a.address_type == CILIUM_INTERNAL_IP)
            .map(|a| a.ip.as_str())
    }
}
