//! Idempotent commit of the aggregated addresses to the managed Certificate

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument};

use super::ipset::{set_equal, AddressSet};
use crate::crd::{Certificate, IssuerRef};
use crate::error::{Error, Result};

pub const MANAGED_BY_ANNOTATION: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "pd-assistant";
pub const LAST_UPDATED_ANNOTATION: &str = "last-updated";

/// Get/create/update access to Certificate resources.
///
/// `update` must be optimistic: the store rejects a write whose
/// `resourceVersion` is stale.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Certificate>>;
    async fn create(&self, namespace: &str, certificate: &Certificate) -> Result<Certificate>;
    async fn update(&self, namespace: &str, certificate: &Certificate) -> Result<Certificate>;
}

/// `CertificateStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeCertificateStore {
    client: Client,
}

impl KubeCertificateStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Certificate> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl CertificateStore for KubeCertificateStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Certificate>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(Error::KubeError)
    }

    async fn create(&self, namespace: &str, certificate: &Certificate) -> Result<Certificate> {
        self.api(namespace)
            .create(&PostParams::default(), certificate)
            .await
            .map_err(Error::KubeError)
    }

    async fn update(&self, namespace: &str, certificate: &Certificate) -> Result<Certificate> {
        // replace carries metadata.resourceVersion, so a concurrent write from
        // another replica surfaces as a 409 instead of being overwritten.
        self.api(namespace)
            .replace(&certificate.name_any(), &PostParams::default(), certificate)
            .await
            .map_err(Error::KubeError)
    }
}

/// Result of a commit that reached the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Stamp provenance on a certificate's annotations, keeping existing ones.
pub fn inject_annotations(certificate: &mut Certificate) {
    let annotations = certificate.annotations_mut();
    annotations.insert(
        MANAGED_BY_ANNOTATION.to_string(),
        MANAGED_BY_VALUE.to_string(),
    );
    annotations.insert(
        LAST_UPDATED_ANNOTATION.to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    );
}

/// Writes candidate address sets to the Certificate described by a template
pub struct CertificateReconciler<S> {
    store: S,
    template: Certificate,
    namespace: String,
    name: String,
}

impl<S: CertificateStore> CertificateReconciler<S> {
    /// `issuer` overrides the template's issuerRef when given.
    pub fn new(store: S, mut template: Certificate, issuer: Option<IssuerRef>) -> Self {
        if let Some(issuer) = issuer {
            template.spec.issuer_ref = issuer;
        }
        let namespace = template
            .namespace()
            .unwrap_or_else(|| "default".to_string());
        let name = template.name_any();
        Self {
            store,
            template,
            namespace,
            name,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn template(&self) -> &Certificate {
        &self.template
    }

    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Create the certificate if absent, update it if its IP SANs differ from
    /// `candidate`, otherwise leave it alone. An empty candidate is refused
    /// before the store is touched.
    #[instrument(skip(self, candidate), fields(certificate = %self.key(), ips = candidate.len()))]
    pub async fn commit(&self, candidate: &AddressSet) -> Result<CommitOutcome> {
        if candidate.is_empty() {
            return Err(Error::EmptyResult(format!(
                "refusing to write an empty IP list to certificate {}",
                self.key()
            )));
        }

        let current = self
            .store
            .get(&self.namespace, &self.name)
            .await
            .map_err(|e| {
                Error::CommitError(format!("failed to get certificate {}: {}", self.key(), e))
            })?;

        let Some(mut certificate) = current else {
            info!("Certificate {} not found, creating a new one", self.key());
            let mut certificate = self.template.clone();
            certificate.metadata.namespace = Some(self.namespace.clone());
            certificate.spec.ip_addresses = candidate.as_slice().to_vec();
            inject_annotations(&mut certificate);
            self.store
                .create(&self.namespace, &certificate)
                .await
                .map_err(|e| {
                    Error::CommitError(format!(
                        "failed to create certificate {}: {}",
                        self.key(),
                        e
                    ))
                })?;
            info!("Certificate {} created successfully", self.key());
            return Ok(CommitOutcome::Created);
        };

        if set_equal(&certificate.spec.ip_addresses, candidate.as_slice()) {
            debug!(
                "Certificate {} already has the same IPs, no update needed",
                self.key()
            );
            return Ok(CommitOutcome::Unchanged);
        }

        info!(
            "Certificate {} found, updating IPs: {:?} -> {:?}",
            self.key(),
            certificate.spec.ip_addresses,
            candidate.as_slice()
        );
        certificate.spec.ip_addresses = candidate.as_slice().to_vec();
        inject_annotations(&mut certificate);
        self.store
            .update(&self.namespace, &certificate)
            .await
            .map_err(|e| {
                Error::CommitError(format!(
                    "failed to update certificate {}: {}",
                    self.key(),
                    e
                ))
            })?;
        info!("Certificate {} updated successfully", self.key());
        Ok(CommitOutcome::Updated)
    }
}
