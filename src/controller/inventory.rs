//! Local address inventory from CiliumNode resources

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams};
use kube::Client;
use tracing::{debug, info, warn};

use super::ipset::AddressSet;
use super::metrics;
use super::state::SharedState;
use crate::crd::{cilium_node_resource, CiliumNodeSpec};
use crate::error::{Error, Result};

/// Source of this cluster's internal node addresses
#[async_trait]
pub trait NodeInventory: Send + Sync {
    async fn internal_addresses(&self) -> Result<AddressSet>;
}

/// Reads `CiliumInternalIP` addresses from every CiliumNode in the cluster
pub struct CiliumNodeInventory {
    api: Api<DynamicObject>,
}

impl CiliumNodeInventory {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all_with(client, &cilium_node_resource()),
        }
    }
}

#[async_trait]
impl NodeInventory for CiliumNodeInventory {
    async fn internal_addresses(&self) -> Result<AddressSet> {
        let nodes = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        Ok(internal_addresses_of(&nodes.items))
    }
}

/// Internal addresses of a CiliumNode list, in list order.
pub fn internal_addresses_of(nodes: &[DynamicObject]) -> AddressSet {
    nodes
        .iter()
        .filter_map(|node| {
            debug!(
                "Processing CiliumNode: {}",
                node.metadata.name.as_deref().unwrap_or("<unnamed>")
            );
            CiliumNodeSpec::from_object(node)
        })
        .flat_map(|spec| {
            spec.internal_ips()
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// One inventory refresh. On error the previous snapshot is left untouched.
pub async fn refresh_local_addresses(
    inventory: &dyn NodeInventory,
    state: &SharedState,
) -> Result<usize> {
    let addresses = inventory.internal_addresses().await?;
    let count = addresses.len();
    state.publish_local(addresses)?;
    metrics::set_local_ips(count);
    Ok(count)
}

/// Refresh the local snapshot forever, `interval` apart.
pub async fn run_inventory_loop(
    inventory: Arc<dyn NodeInventory>,
    state: Arc<SharedState>,
    interval: Duration,
) {
    info!(
        "Starting CiliumNode inventory loop (interval: {:?})",
        interval
    );
    loop {
        debug!("Fetching CiliumNode resources from Kubernetes API");
        match refresh_local_addresses(inventory.as_ref(), &state).await {
            Ok(count) => debug!(
                "Updated state with {} local IPs: {:?}",
                count,
                state.local()
            ),
            Err(e) => warn!(
                kind = e.kind(),
                "Failed to refresh local IPs, keeping previous snapshot: {}", e
            ),
        }
        tokio::time::sleep(interval).await;
    }
}
