//! Foreign resource types read and written by the assistant.
//!
//! Neither CRD is owned here: `Certificate` belongs to cert-manager and
//! `CiliumNode` to Cilium.

mod certificate;
mod cilium_node;

pub use certificate::{Certificate, CertificateSpec, IssuerRef};
pub use cilium_node::{
    cilium_node_resource, CiliumNodeSpec, NodeAddress, CILIUM_INTERNAL_IP,
};
