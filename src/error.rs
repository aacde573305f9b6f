//! Error types for the PD cert assistant

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    KubeError(#[from] kube::Error),

    /// Network unreachable, TLS failure or timeout talking to an HTTP endpoint
    #[error("HTTP request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Endpoint answered with a non-success status
    #[error("Received non-OK HTTP status from {url}: {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Response body could not be decoded
    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Inventory, peer view or candidate set was unexpectedly empty
    #[error("Empty result: {0}")]
    EmptyResult(String),

    /// Peer aggregates disagree
    #[error("Consensus mismatch: all IPs differ between {reference} and {peer}")]
    ConsensusMismatch { reference: String, peer: String },

    /// Certificate get/create/update was rejected
    #[error("Certificate commit failed: {0}")]
    CommitError(String),

    /// Required startup input missing or invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Stable label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::Transport { .. } => "transport",
            Error::Status { .. } => "status",
            Error::Decode { .. } => "decode",
            Error::EmptyResult(_) => "empty_result",
            Error::ConsensusMismatch { .. } => "consensus_mismatch",
            Error::CommitError(_) => "commit",
            Error::ConfigError(_) => "config",
            Error::SerializationError(_) => "serialization",
            Error::YamlError(_) => "yaml",
            Error::IoError(_) => "io",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(Error::EmptyResult("x".into()).kind(), "empty_result");
        assert_eq!(Error::CommitError("x".into()).kind(), "commit");
        assert_eq!(
            Error::ConsensusMismatch {
                reference: "a".into(),
                peer: "b".into()
            }
            .kind(),
            "consensus_mismatch"
        );
    }

    #[test]
    fn test_error_display_includes_url() {
        let err = Error::Status {
            url: "https://pd-assistant.example.com:443/api/v1/ips".into(),
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        };
        let msg = err.to_string();
        assert!(msg.contains("pd-assistant.example.com"));
        assert!(msg.contains("500"));
    }
}
