//! REST API module
//!
//! Serves liveness, metrics and this replica's address views to its peers.

mod auth;
mod handlers;
mod server;

pub use auth::BearerToken;
pub use server::{build_router, run_server};
