//! Peer view aggregation and the cross-instance consensus check
//!
//! Every PD assistant exposes two views: its own local addresses and the
//! aggregate it last computed. A cycle concatenates all local views into the
//! candidate set and, when consensus is enabled, requires every peer's
//! aggregate to match the first peer's before anything is committed.

use futures::{StreamExt, TryStreamExt};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use tracing::{debug, error, info, instrument};

use super::ipset::AddressSet;
use super::metrics;
use crate::error::{Error, Result};

pub const API_IPS_PATH: &str = "/api/v1/ips";
pub const API_ALL_IPS_PATH: &str = "/api/v1/allips";

/// Which of a peer's views to fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewKind {
    Local,
    All,
}

impl ViewKind {
    pub fn path(self) -> &'static str {
        match self {
            ViewKind::Local => API_IPS_PATH,
            ViewKind::All => API_ALL_IPS_PATH,
        }
    }

    /// Metric label
    pub fn label(self) -> &'static str {
        match self {
            ViewKind::Local => "local",
            ViewKind::All => "all",
        }
    }
}

/// Addresses one peer reported for one view at poll time
#[derive(Clone, Debug, PartialEq)]
pub struct PeerView {
    pub endpoint: String,
    pub addresses: AddressSet,
}

/// Authenticated client for the peer `/api/v1/*` endpoints
#[derive(Clone)]
pub struct PeerClient {
    http: Client,
    bearer_token: String,
}

impl PeerClient {
    pub fn new(http: Client, bearer_token: impl Into<String>) -> Self {
        Self {
            http,
            bearer_token: bearer_token.into(),
        }
    }

    /// Fetch one view from one peer. An empty list is an error.
    pub async fn fetch(&self, endpoint: &str, kind: ViewKind) -> Result<PeerView> {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), kind.path());
        let mut request = self.http.get(&url);
        if !self.bearer_token.is_empty() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", self.bearer_token));
        }

        let response = request.send().await.map_err(|source| Error::Transport {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { url, status });
        }

        let addresses: AddressSet = response.json().await.map_err(|e| Error::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;

        if addresses.is_empty() {
            return Err(Error::EmptyResult(format!(
                "no {} IPs found in pd-assistant {}",
                kind.label(),
                endpoint
            )));
        }

        Ok(PeerView {
            endpoint: endpoint.to_string(),
            addresses,
        })
    }
}

/// Polls all peers for one view kind
pub struct PeerAggregator {
    client: PeerClient,
    concurrency: usize,
}

impl PeerAggregator {
    /// `concurrency` of 1 polls peers strictly one after another.
    pub fn new(client: PeerClient, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch `kind` from every peer, in peer order.
    ///
    /// The first failing peer aborts the whole poll and has its fetch error
    /// counter incremented; no partial result is ever returned.
    pub async fn fetch_views(&self, peers: &[String], kind: ViewKind) -> Result<Vec<PeerView>> {
        let client = self.client.clone();
        futures::stream::iter(peers.to_vec())
            .map(move |peer| {
                let client = client.clone();
                async move {
                    debug!("Fetching {} IPs from pd-assistant: {}", kind.label(), peer);
                    client.fetch(&peer, kind).await.map_err(|e| {
                        metrics::inc_fetch_error(&peer, kind.label());
                        error!(
                            "Failed to fetch {} IPs from pd-assistant {}: {}",
                            kind.label(),
                            peer,
                            e
                        );
                        e
                    })
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    /// Concatenate every peer's local addresses into the candidate set.
    /// Duplicates across peers are kept.
    #[instrument(skip(self), fields(peers = peers.len()))]
    pub async fn aggregate_local(&self, peers: &[String]) -> Result<AddressSet> {
        let views = self.fetch_views(peers, ViewKind::Local).await?;
        let mut all = AddressSet::empty();
        for view in views {
            debug!(
                "Fetched local IPs from pd-assistant {}: {:?}",
                view.endpoint, view.addresses
            );
            all.extend(view.addresses);
        }
        if all.is_empty() {
            return Err(Error::EmptyResult("no IPs found in pd-assistants".to_string()));
        }
        Ok(all)
    }

    /// Fetch every peer's aggregate and check that they agree.
    #[instrument(skip(self), fields(peers = peers.len()))]
    pub async fn validate_consensus(&self, peers: &[String]) -> Result<()> {
        let views = self.fetch_views(peers, ViewKind::All).await?;
        check_consensus(&views)?;
        info!("IP address consensus check passed across {} peers", views.len());
        Ok(())
    }
}

/// The first view is the reference; every other view must be set-equal to it.
pub fn check_consensus(views: &[PeerView]) -> Result<()> {
    let Some((reference, rest)) = views.split_first() else {
        return Ok(());
    };
    for view in rest {
        if !reference.addresses.set_eq(&view.addresses) {
            error!(
                "Consensus error: all IPs are not equal between pd-assistants: {} and {}",
                reference.endpoint, view.endpoint
            );
            debug!(
                "Sample all IPs from {}: {:?}; fetched all IPs from {}: {:?}",
                reference.endpoint, reference.addresses, view.endpoint, view.addresses
            );
            return Err(Error::ConsensusMismatch {
                reference: reference.endpoint.clone(),
                peer: view.endpoint.clone(),
            });
        }
    }
    Ok(())
}
