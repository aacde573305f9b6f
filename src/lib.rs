//! pd-cert-assistant: keeps a cert-manager Certificate's IP SANs in sync with
//! the CiliumNode internal addresses of every cluster hosting a TiDB PD fleet.
//!
//! Each replica publishes its own cluster's addresses, polls its peers, and
//! commits the aggregate only when every peer answered (and, optionally,
//! agreed).

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod rest_api;
pub mod telemetry;

pub use crate::error::{Error, Result};
