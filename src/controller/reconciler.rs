//! Reconciliation cycle for the managed Certificate
//!
//! Each cycle resolves the peer list, aggregates every peer's local view,
//! optionally checks that all peers agree on their aggregates, and commits the
//! result. Any failure ends the cycle before a write; the next cycle starts
//! from scratch.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use super::aggregator::PeerAggregator;
use super::certificate::{CertificateReconciler, CertificateStore, CommitOutcome};
use super::metrics;
use super::peer_discovery::PeerDiscovery;
use super::state::SharedState;
use crate::error::Error;

/// How a cycle ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Committed,
    Unchanged,
    SkippedFetchError,
    SkippedEmptyResult,
    SkippedNoConsensus,
    SkippedCommitError,
}

impl CycleOutcome {
    /// Metric label
    pub fn as_str(self) -> &'static str {
        match self {
            CycleOutcome::Committed => "committed",
            CycleOutcome::Unchanged => "unchanged",
            CycleOutcome::SkippedFetchError => "skipped-fetch-error",
            CycleOutcome::SkippedEmptyResult => "skipped-empty-result",
            CycleOutcome::SkippedNoConsensus => "skipped-no-consensus",
            CycleOutcome::SkippedCommitError => "skipped-commit-error",
        }
    }

    pub fn is_skipped(self) -> bool {
        !matches!(self, CycleOutcome::Committed | CycleOutcome::Unchanged)
    }

    /// Outcome for an error raised while resolving peers or aggregating
    fn from_fetch_error(err: &Error) -> Self {
        match err {
            Error::EmptyResult(_) => CycleOutcome::SkippedEmptyResult,
            _ => CycleOutcome::SkippedFetchError,
        }
    }

    /// Outcome for an error raised by the consensus check
    fn from_consensus_error(err: &Error) -> Self {
        match err {
            Error::ConsensusMismatch { .. } => CycleOutcome::SkippedNoConsensus,
            _ => CycleOutcome::SkippedFetchError,
        }
    }
}

impl From<CommitOutcome> for CycleOutcome {
    fn from(outcome: CommitOutcome) -> Self {
        match outcome {
            CommitOutcome::Created | CommitOutcome::Updated => CycleOutcome::Committed,
            CommitOutcome::Unchanged => CycleOutcome::Unchanged,
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives reconciliation cycles
pub struct Reconciler<S> {
    discovery: PeerDiscovery,
    aggregator: PeerAggregator,
    certificates: CertificateReconciler<S>,
    state: Arc<SharedState>,
    consensus: bool,
}

impl<S: CertificateStore> Reconciler<S> {
    pub fn new(
        discovery: PeerDiscovery,
        aggregator: PeerAggregator,
        certificates: CertificateReconciler<S>,
        state: Arc<SharedState>,
        consensus: bool,
    ) -> Self {
        Self {
            discovery,
            aggregator,
            certificates,
            state,
            consensus,
        }
    }

    pub fn certificates(&self) -> &CertificateReconciler<S> {
        &self.certificates
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Run one cycle to completion and record its outcome.
    #[instrument(skip(self), fields(consensus = self.consensus))]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let started = Instant::now();
        let outcome = match self.try_cycle().await {
            Ok(outcome) => outcome.into(),
            Err((outcome, e)) => {
                match outcome {
                    CycleOutcome::SkippedNoConsensus => metrics::inc_consensus_error(),
                    CycleOutcome::SkippedCommitError => metrics::inc_cert_update_error(),
                    _ => {}
                }
                warn!(kind = e.kind(), outcome = %outcome, "Skipping cycle: {}", e);
                outcome
            }
        };
        metrics::inc_cycle_outcome(outcome.as_str());
        metrics::observe_reconcile_duration_seconds(started.elapsed().as_secs_f64());
        info!(outcome = %outcome, "Reconciliation cycle finished");
        outcome
    }

    async fn try_cycle(&self) -> std::result::Result<CommitOutcome, (CycleOutcome, Error)> {
        let fetch_failed = |e: Error| (CycleOutcome::from_fetch_error(&e), e);

        let peers = self.discovery.resolve().await.map_err(fetch_failed)?;
        debug!("Polling {} pd-assistant peers", peers.len());

        let aggregate = self
            .aggregator
            .aggregate_local(&peers)
            .await
            .map_err(fetch_failed)?;
        let count = aggregate.len();
        // Published before consensus so peers comparing aggregates can see ours.
        self.state
            .publish_aggregate(aggregate)
            .map_err(fetch_failed)?;
        metrics::set_all_ips(count);
        debug!("Updated aggregate with {} IPs", count);

        if self.consensus {
            self.aggregator
                .validate_consensus(&peers)
                .await
                .map_err(|e| (CycleOutcome::from_consensus_error(&e), e))?;
        }

        let candidate = self.state.aggregate();
        self.certificates
            .commit(&candidate)
            .await
            .map_err(|e| match e {
                Error::EmptyResult(_) => (CycleOutcome::SkippedEmptyResult, e),
                _ => (CycleOutcome::SkippedCommitError, e),
            })
    }

    /// Cycle forever, sleeping `interval` before each cycle.
    pub async fn run(&self, interval: Duration) {
        info!(
            "Starting reconciliation loop (interval: {:?}, consensus: {})",
            interval, self.consensus
        );
        loop {
            tokio::time::sleep(interval).await;
            let outcome = self.run_cycle().await;
            if outcome == CycleOutcome::SkippedCommitError {
                error!("Certificate update failed, retrying next cycle");
            }
        }
    }
}
