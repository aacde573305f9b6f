//! Controller module for PD certificate reconciliation
//! This module contains the inventory and reconciliation loops, peer
//! discovery and aggregation, and the certificate commit logic.

pub mod aggregator;
pub mod certificate;
pub mod http_client;
pub mod inventory;
pub mod ipset;
pub mod metrics;
pub mod peer_discovery;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
pub mod state;

pub use aggregator::{check_consensus, PeerAggregator, PeerClient, PeerView, ViewKind};
pub use certificate::{
    CertificateReconciler, CertificateStore, CommitOutcome, KubeCertificateStore,
};
pub use http_client::{build_client, TlsFiles};
pub use inventory::{run_inventory_loop, CiliumNodeInventory, NodeInventory};
pub use ipset::{set_equal, AddressSet};
pub use peer_discovery::{PeerDiscovery, PeerNaming, PeerSource};
pub use reconciler::{CycleOutcome, Reconciler};
pub use state::{SharedState, Snapshot};
