//! cert-manager `Certificate` resource
//!
//! Only the fields the assistant reads or writes are typed; everything else in
//! the Certificate spec is carried through `extra` so the operator's template round-trips.

use std::collections::BTreeMap;
use std::path::Path;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    #[serde(default)]
    pub secret_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,

    /// IP SANs kept in sync with the PD fleet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,

    #[serde(default)]
    pub issuer_ref: IssuerRef,

    /// Remaining spec fields (duration, usages, privateKey, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Reference to the cert-manager issuer that signs the certificate
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct IssuerRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Certificate {
    /// Parse a certificate template from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let cert: Certificate = serde_yaml::from_str(yaml)?;
        if cert.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::ConfigError(
                "certificate template has no metadata.name".to_string(),
            ));
        }
        Ok(cert)
    }

    /// Load a certificate template from a YAML file.
    pub fn load_template(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!(
                "failed to read certificate template {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&yaml)
    }

    /// `namespace/name` for logging
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_else(|| "default".to_string()),
            self.name_any()
        )
    }
}
