//! Outbound HTTP clients for peers, PD discovery and the PD members API

use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Certificate as CaCertificate, Client, Identity};
use tracing::debug;

use crate::error::{Error, Result};

/// TLS material for outbound requests
#[derive(Clone, Debug, Default)]
pub struct TlsFiles {
    /// CA bundle used to verify the server
    pub ca_path: Option<PathBuf>,
    /// Client certificate (PEM) for mutual TLS
    pub cert_path: Option<PathBuf>,
    /// Client private key (PKCS#8 PEM) for mutual TLS
    pub key_path: Option<PathBuf>,
    /// Skip server certificate verification (not recommended)
    pub insecure: bool,
}

impl TlsFiles {
    pub fn insecure(insecure: bool) -> Self {
        Self {
            insecure,
            ..Default::default()
        }
    }

    pub fn has_ca(&self) -> bool {
        self.ca_path.is_some()
    }
}

fn read_pem(path: &PathBuf, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        Error::ConfigError(format!("could not read {} {}: {}", what, path.display(), e))
    })
}

/// Build a client with a fixed per-request timeout and the given TLS setup.
pub fn build_client(timeout: Duration, tls: &TlsFiles) -> Result<Client> {
    let mut builder = Client::builder().timeout(timeout);

    if let Some(ca_path) = &tls.ca_path {
        let pem = read_pem(ca_path, "CA certificate")?;
        let ca = CaCertificate::from_pem(&pem)
            .map_err(|e| Error::ConfigError(format!("invalid CA certificate: {}", e)))?;
        builder = builder.add_root_certificate(ca);
        debug!("Loaded CA certificate from {}", ca_path.display());
    }

    match (&tls.cert_path, &tls.key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert = read_pem(cert_path, "client certificate")?;
            let key = read_pem(key_path, "client key")?;
            let identity = Identity::from_pkcs8_pem(&cert, &key)
                .map_err(|e| Error::ConfigError(format!("could not load client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(Error::ConfigError(
                "client certificate and key must be configured together".to_string(),
            ))
        }
    }

    if tls.insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| Error::ConfigError(format!("failed to build HTTP client: {}", e)))
}
