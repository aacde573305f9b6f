//! Tests for the reconciler module
//!
//! These tests verify the certificate commit logic and the cycle outcomes:
//! - Creation when the certificate is absent
//! - Idempotency when the IP SANs already match
//! - Updates that keep unrelated annotations
//! - Error mapping for store failures
//! - Cycle classification against mocked peers

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::DateTime;
    use kube::ResourceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::super::aggregator::{PeerAggregator, PeerClient, API_ALL_IPS_PATH, API_IPS_PATH};
    use super::super::certificate::fake::FakeCertificateStore;
    use super::super::certificate::*;
    use super::super::http_client::{build_client, TlsFiles};
    use super::super::ipset::AddressSet;
    use super::super::metrics;
    use super::super::peer_discovery::{PeerDiscovery, PeerNaming, PeerSource};
    use super::super::reconciler::*;
    use super::super::state::SharedState;
    use crate::crd::{Certificate, IssuerRef};
    use crate::error::Error;

    const TEMPLATE: &str = r#"
apiVersion: cert-manager.io/v1
kind: Certificate
metadata:
  name: pd-server
  namespace: tidb
spec:
  secretName: pd-server-tls
  dnsNames:
    - basic-pd
    - basic-pd.tidb.svc
  issuerRef:
    name: tidb-issuer
    kind: Issuer
  duration: 2160h
"#;

    fn template() -> Certificate {
        Certificate::from_yaml(TEMPLATE).unwrap()
    }

    fn candidate(ips: &[&str]) -> AddressSet {
        AddressSet::from(ips.to_vec())
    }

    fn reconciler(store: FakeCertificateStore) -> CertificateReconciler<FakeCertificateStore> {
        CertificateReconciler::new(store, template(), None)
    }

    fn existing(ips: &[&str]) -> Certificate {
        let mut certificate = template();
        certificate.spec.ip_addresses = ips.iter().map(|s| s.to_string()).collect();
        certificate.metadata.resource_version = Some("41".to_string());
        certificate
            .annotations_mut()
            .insert("team".to_string(), "storage".to_string());
        certificate
    }

    // -------------------------------------------------------------------------
    // Certificate commit
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_creates_when_absent() {
        let reconciler = reconciler(FakeCertificateStore::default());

        let outcome = reconciler
            .commit(&candidate(&["10.0.0.1", "10.0.1.1"]))
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Created);

        let store = reconciler.store();
        assert_eq!(*store.creates.lock().unwrap(), 1);
        let stored = store.stored("tidb", "pd-server").unwrap();
        assert_eq!(stored.spec.ip_addresses, vec!["10.0.0.1", "10.0.1.1"]);
        assert_eq!(stored.spec.secret_name, "pd-server-tls");
        assert_eq!(stored.spec.issuer_ref.name, "tidb-issuer");

        let annotations = stored.annotations();
        assert_eq!(
            annotations.get(MANAGED_BY_ANNOTATION).map(String::as_str),
            Some(MANAGED_BY_VALUE)
        );
        let stamp = annotations.get(LAST_UPDATED_ANNOTATION).unwrap();
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok(), "{stamp}");
        assert!(stamp.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_second_commit_is_unchanged() {
        let reconciler = reconciler(FakeCertificateStore::default());
        let ips = candidate(&["10.0.0.1", "10.0.1.1"]);

        reconciler.commit(&ips).await.unwrap();
        let reordered = candidate(&["10.0.1.1", "10.0.0.1"]);
        assert_eq!(
            reconciler.commit(&reordered).await.unwrap(),
            CommitOutcome::Unchanged
        );
        assert_eq!(reconciler.store().writes(), 1);
    }

    #[tokio::test]
    async fn test_updates_when_different_and_keeps_annotations() {
        let store = FakeCertificateStore::with(existing(&["10.0.0.1"]));
        let reconciler = reconciler(store);

        let outcome = reconciler
            .commit(&candidate(&["10.0.0.1", "10.0.2.1"]))
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Updated);
        assert_eq!(*reconciler.store().updates.lock().unwrap(), 1);
        assert_eq!(*reconciler.store().creates.lock().unwrap(), 0);

        let stored = reconciler.store().stored("tidb", "pd-server").unwrap();
        assert_eq!(stored.spec.ip_addresses, vec!["10.0.0.1", "10.0.2.1"]);
        // The fetched resourceVersion is what the replace carries
        assert_eq!(stored.resource_version().as_deref(), Some("41"));
        assert_eq!(
            stored.annotations().get("team").map(String::as_str),
            Some("storage")
        );
        assert!(stored.annotations().contains_key(MANAGED_BY_ANNOTATION));
    }

    #[tokio::test]
    async fn test_duplicates_count_as_difference() {
        let store = FakeCertificateStore::with(existing(&["10.0.0.1"]));
        let reconciler = reconciler(store);

        let outcome = reconciler
            .commit(&candidate(&["10.0.0.1", "10.0.0.1"]))
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Updated);
    }

    #[tokio::test]
    async fn test_empty_candidate_touches_nothing() {
        let reconciler = reconciler(FakeCertificateStore::with(existing(&["10.0.0.1"])));

        let err = reconciler.commit(&AddressSet::empty()).await.unwrap_err();
        assert!(matches!(err, Error::EmptyResult(_)));
        assert_eq!(*reconciler.store().gets.lock().unwrap(), 0);
        assert_eq!(reconciler.store().writes(), 0);
    }

    #[tokio::test]
    async fn test_get_failure_is_commit_error() {
        let store = FakeCertificateStore {
            fail_get: true,
            ..Default::default()
        };
        let err = reconciler(store)
            .commit(&candidate(&["10.0.0.1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommitError(_)));
    }

    #[tokio::test]
    async fn test_create_failure_is_commit_error() {
        let store = FakeCertificateStore {
            fail_write: true,
            ..Default::default()
        };
        let reconciler = reconciler(store);
        let err = reconciler
            .commit(&candidate(&["10.0.0.1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommitError(_)));
        assert_eq!(*reconciler.store().creates.lock().unwrap(), 1);
        assert!(reconciler.store().stored("tidb", "pd-server").is_none());
    }

    #[tokio::test]
    async fn test_update_conflict_is_commit_error() {
        let store = FakeCertificateStore {
            fail_write: true,
            ..Default::default()
        };
        store.insert(existing(&["10.0.0.1"]));
        let reconciler = reconciler(store);

        let err = reconciler
            .commit(&candidate(&["10.0.9.9"]))
            .await
            .unwrap_err();
        match err {
            Error::CommitError(message) => assert!(message.contains("tidb/pd-server")),
            other => panic!("unexpected error: {other:?}"),
        }
        let stored = reconciler.store().stored("tidb", "pd-server").unwrap();
        assert_eq!(stored.spec.ip_addresses, vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_issuer_override_applies_on_create() {
        let issuer = IssuerRef {
            name: "cluster-ca".to_string(),
            kind: Some("ClusterIssuer".to_string()),
            group: Some("cert-manager.io".to_string()),
        };
        let reconciler = CertificateReconciler::new(
            FakeCertificateStore::default(),
            template(),
            Some(issuer.clone()),
        );

        reconciler.commit(&candidate(&["10.0.0.1"])).await.unwrap();
        let stored = reconciler.store().stored("tidb", "pd-server").unwrap();
        assert_eq!(stored.spec.issuer_ref, issuer);
    }

    #[test]
    fn test_inject_annotations_keeps_existing() {
        let mut certificate = template();
        certificate.metadata.annotations = Some(BTreeMap::from([(
            "owner".to_string(),
            "platform".to_string(),
        )]));
        inject_annotations(&mut certificate);

        let annotations = certificate.annotations();
        assert_eq!(annotations.len(), 3);
        assert_eq!(annotations["owner"], "platform");
        assert_eq!(annotations[MANAGED_BY_ANNOTATION], MANAGED_BY_VALUE);
    }

    // -------------------------------------------------------------------------
    // Cycle outcomes
    // -------------------------------------------------------------------------

    #[test]
    fn test_outcome_labels() {
        assert_eq!(CycleOutcome::Committed.as_str(), "committed");
        assert_eq!(CycleOutcome::Unchanged.as_str(), "unchanged");
        assert_eq!(
            CycleOutcome::SkippedNoConsensus.to_string(),
            "skipped-no-consensus"
        );
        assert!(CycleOutcome::SkippedFetchError.is_skipped());
        assert!(!CycleOutcome::Unchanged.is_skipped());
        assert_eq!(
            CycleOutcome::from(CommitOutcome::Updated),
            CycleOutcome::Committed
        );
    }

    async fn peer(local: serde_json::Value, all: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(API_IPS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(local))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(API_ALL_IPS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(all))
            .mount(&server)
            .await;
        server
    }

    fn cycle(
        peers: Vec<String>,
        store: FakeCertificateStore,
        consensus: bool,
    ) -> Reconciler<FakeCertificateStore> {
        let http = build_client(Duration::from_secs(2), &TlsFiles::default()).unwrap();
        Reconciler::new(
            PeerDiscovery::new(
                PeerSource::Static(peers),
                PeerNaming::default(),
                http.clone(),
                false,
            ),
            PeerAggregator::new(PeerClient::new(http, "token"), 1),
            CertificateReconciler::new(store, template(), None),
            Arc::new(SharedState::new()),
            consensus,
        )
    }

    #[tokio::test]
    async fn test_cycle_commits_and_publishes_aggregate() {
        let p1 = peer(serde_json::json!(["10.0.0.1"]), serde_json::json!(["x"])).await;
        let p2 = peer(serde_json::json!(["10.1.0.1"]), serde_json::json!(["x"])).await;
        let reconciler = cycle(vec![p1.uri(), p2.uri()], FakeCertificateStore::default(), false);
        let committed_before = metrics::cycle_outcomes("committed");

        assert_eq!(reconciler.run_cycle().await, CycleOutcome::Committed);
        assert_eq!(
            reconciler.state().aggregate().as_slice(),
            ["10.0.0.1", "10.1.0.1"].map(String::from)
        );
        assert!(metrics::cycle_outcomes("committed") > committed_before);

        assert_eq!(reconciler.run_cycle().await, CycleOutcome::Unchanged);
        assert_eq!(reconciler.certificates().store().writes(), 1);
    }

    #[tokio::test]
    async fn test_cycle_consensus_mismatch_skips_write() {
        let p1 = peer(
            serde_json::json!(["10.0.0.1"]),
            serde_json::json!(["10.0.0.1", "10.1.0.1"]),
        )
        .await;
        let p2 = peer(
            serde_json::json!(["10.1.0.1"]),
            serde_json::json!(["10.0.0.1"]),
        )
        .await;
        let reconciler = cycle(vec![p1.uri(), p2.uri()], FakeCertificateStore::default(), true);

        assert_eq!(reconciler.run_cycle().await, CycleOutcome::SkippedNoConsensus);
        assert_eq!(reconciler.certificates().store().writes(), 0);
        // The aggregate is still published for the other peers to compare against
        assert_eq!(reconciler.state().aggregate().len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_consensus_empty_view_is_fetch_error() {
        let p1 = peer(serde_json::json!(["10.0.0.1"]), serde_json::json!([])).await;
        let reconciler = cycle(vec![p1.uri()], FakeCertificateStore::default(), true);

        assert_eq!(reconciler.run_cycle().await, CycleOutcome::SkippedFetchError);
        assert_eq!(reconciler.certificates().store().writes(), 0);
    }

    #[tokio::test]
    async fn test_cycle_commit_failure() {
        let p1 = peer(serde_json::json!(["10.0.0.1"]), serde_json::json!(["10.0.0.1"])).await;
        let store = FakeCertificateStore {
            fail_get: true,
            ..Default::default()
        };
        let reconciler = cycle(vec![p1.uri()], store, true);

        assert_eq!(reconciler.run_cycle().await, CycleOutcome::SkippedCommitError);
    }

    #[tokio::test]
    async fn test_cycle_without_peers_is_empty_result() {
        let before = metrics::cycle_outcomes("skipped-empty-result");
        let reconciler = cycle(vec![], FakeCertificateStore::default(), false);
        assert_eq!(reconciler.run_cycle().await, CycleOutcome::SkippedEmptyResult);
        assert_eq!(*reconciler.certificates().store().gets.lock().unwrap(), 0);
        assert!(metrics::cycle_outcomes("skipped-empty-result") > before);
    }

    #[tokio::test]
    async fn test_cycle_empty_candidate_counts_skip() {
        let p1 = peer(serde_json::json!([]), serde_json::json!([])).await;
        let p2 = peer(serde_json::json!([]), serde_json::json!([])).await;
        let store = FakeCertificateStore::with(existing(&["10.0.0.1"]));
        let before = metrics::cycle_outcomes("skipped-empty-result");

        let reconciler = cycle(vec![p1.uri(), p2.uri()], store, false);
        assert_eq!(reconciler.run_cycle().await, CycleOutcome::SkippedEmptyResult);

        let store = reconciler.certificates().store();
        assert_eq!(*store.gets.lock().unwrap(), 0);
        assert_eq!(store.writes(), 0);
        assert_eq!(
            store.stored("tidb", "pd-server").unwrap().spec.ip_addresses,
            vec!["10.0.0.1"]
        );
        assert!(reconciler.state().aggregate().is_empty());
        assert!(metrics::cycle_outcomes("skipped-empty-result") > before);
    }

    fn assert_send<T: Send>(_: T) {}

    #[tokio::test]
    async fn test_run_loop_is_spawnable() {
        let reconciler = cycle(vec![], FakeCertificateStore::default(), true);
        assert_send(reconciler.run(Duration::from_secs(60)));

        let reconciler = cycle(vec![], FakeCertificateStore::default(), true);
        let handle = tokio::spawn(async move { reconciler.run(Duration::from_secs(60)).await });
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
