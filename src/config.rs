//! Command-line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::controller::{PeerNaming, PeerSource, TlsFiles};
use crate::crd::{Certificate, IssuerRef};
use crate::error::{Error, Result};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the assistant
    Run(RunArgs),
    /// Show version information
    Version,
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Address:port to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8765")]
    pub listen: SocketAddr,

    /// Path to a kubeconfig file; in-cluster config is used when absent
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Token peers must present, and that this instance presents to peers
    #[arg(long, env = "BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// YAML template of the managed cert-manager Certificate
    #[arg(long, env = "CERTIFICATE_TEMPLATE")]
    pub certificate_template: Option<PathBuf>,

    /// Override the template's issuerRef name
    #[arg(long, env = "ISSUER_NAME")]
    pub issuer_name: Option<String>,

    /// Issuer kind used with --issuer-name
    #[arg(long, env = "ISSUER_KIND")]
    pub issuer_kind: Option<String>,

    /// Issuer group used with --issuer-name
    #[arg(long, env = "ISSUER_GROUP")]
    pub issuer_group: Option<String>,

    /// Comma-separated static PD assistant URLs; disables discovery
    #[arg(long, env = "PD_ASSISTANT_URLS")]
    pub pd_assistant_urls: Option<String>,

    /// Base URL of the TiDB PD discovery service
    #[arg(long, env = "PD_DISCOVERY_URL")]
    pub pd_discovery_url: Option<String>,

    /// TiDB cluster name used to build the discovery path
    #[arg(long, env = "CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    /// TiDB cluster namespace used to build the discovery path
    #[arg(long, env = "CLUSTER_NAMESPACE")]
    pub cluster_namespace: Option<String>,

    /// Address:port of the PD server, used when neither static URLs nor the
    /// discovery service are configured
    #[arg(long, env = "PD_ADDRESS")]
    pub pd_address: Option<String>,

    #[arg(long, env = "PD_ASSISTANT_HOST_PREFIX", default_value = "pd-assistant")]
    pub pd_assistant_host_prefix: String,

    #[arg(long, env = "PD_ASSISTANT_SCHEME", default_value = "https")]
    pub pd_assistant_scheme: String,

    #[arg(long, env = "PD_ASSISTANT_PORT", default_value = "443")]
    pub pd_assistant_port: String,

    /// Require all peers to agree on their aggregates before committing
    #[arg(long, env = "PD_ASSISTANT_CONSENSUS")]
    pub pd_assistant_consensus: bool,

    /// Seconds between CiliumNode inventory refreshes
    #[arg(long, env = "K8S_POLL_INTERVAL", default_value_t = 180)]
    pub k8s_poll_interval: u64,

    /// Seconds slept before each reconciliation cycle
    #[arg(long, env = "PD_ASSISTANT_POLL_INTERVAL", default_value_t = 60)]
    pub pd_assistant_poll_interval: u64,

    /// Per-request timeout in seconds for every outbound call
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value_t = 5)]
    pub http_request_timeout: u64,

    /// Number of peers polled concurrently
    #[arg(long, env = "PEER_FETCH_CONCURRENCY", default_value_t = 1)]
    pub peer_fetch_concurrency: usize,

    #[arg(long, env = "TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Skip TLS verification towards PD and the discovery service (not recommended)
    #[arg(long, env = "TLS_INSECURE")]
    pub tls_insecure: bool,

    /// Skip TLS verification towards pd-assistant peers (not recommended)
    #[arg(long, env = "PD_ASSISTANT_TLS_INSECURE")]
    pub pd_assistant_tls_insecure: bool,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Validated runtime configuration
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen: SocketAddr,
    pub kubeconfig: Option<PathBuf>,
    pub bearer_token: String,
    pub certificate: Certificate,
    pub issuer: Option<IssuerRef>,
    pub peer_source: PeerSource,
    pub naming: PeerNaming,
    pub consensus: bool,
    pub k8s_poll_interval: Duration,
    pub pd_assistant_poll_interval: Duration,
    pub http_request_timeout: Duration,
    pub peer_fetch_concurrency: usize,
    pub tls: TlsFiles,
    /// Peer calls carry the bearer token and never present the PD client identity.
    pub peer_tls: TlsFiles,
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_comma_separated(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl RunArgs {
    fn peer_source(&self) -> Result<PeerSource> {
        if let Some(urls) = non_empty(&self.pd_assistant_urls) {
            let urls = split_comma_separated(urls);
            if !urls.is_empty() {
                return Ok(PeerSource::Static(urls));
            }
        }

        if let Some(url) = non_empty(&self.pd_discovery_url) {
            let (Some(name), Some(namespace)) =
                (non_empty(&self.cluster_name), non_empty(&self.cluster_namespace))
            else {
                return Err(Error::ConfigError(
                    "--pd-discovery-url requires --cluster-name and --cluster-namespace"
                        .to_string(),
                ));
            };
            return Ok(PeerSource::Discovery {
                url: url.to_string(),
                cluster_name: name.to_string(),
                cluster_namespace: namespace.to_string(),
            });
        }

        if let Some(address) = non_empty(&self.pd_address) {
            return Ok(PeerSource::PdMembers {
                address: address.to_string(),
            });
        }

        Err(Error::ConfigError(
            "no peer source configured: set --pd-assistant-urls, --pd-discovery-url or --pd-address"
                .to_string(),
        ))
    }

    fn issuer(&self) -> Option<IssuerRef> {
        non_empty(&self.issuer_name).map(|name| IssuerRef {
            name: name.to_string(),
            kind: non_empty(&self.issuer_kind).map(String::from),
            group: non_empty(&self.issuer_group).map(String::from),
        })
    }

    /// Validate the arguments and load the certificate template.
    pub fn into_config(self) -> Result<AppConfig> {
        let bearer_token = non_empty(&self.bearer_token)
            .ok_or_else(|| Error::ConfigError("--bearer-token is required".to_string()))?
            .to_string();

        let template_path = self.certificate_template.as_ref().ok_or_else(|| {
            Error::ConfigError("--certificate-template is required".to_string())
        })?;

        let peer_source = self.peer_source()?;
        let certificate = Certificate::load_template(template_path)?;

        Ok(AppConfig {
            listen: self.listen,
            issuer: self.issuer(),
            peer_source,
            naming: PeerNaming {
                host_prefix: self.pd_assistant_host_prefix,
                scheme: self.pd_assistant_scheme,
                port: self.pd_assistant_port,
            },
            consensus: self.pd_assistant_consensus,
            k8s_poll_interval: Duration::from_secs(self.k8s_poll_interval),
            pd_assistant_poll_interval: Duration::from_secs(self.pd_assistant_poll_interval),
            http_request_timeout: Duration::from_secs(self.http_request_timeout),
            peer_fetch_concurrency: self.peer_fetch_concurrency.max(1),
            tls: TlsFiles {
                ca_path: self.tls_ca,
                cert_path: self.tls_cert,
                key_path: self.tls_key,
                insecure: self.tls_insecure,
            },
            peer_tls: TlsFiles::insecure(self.pd_assistant_tls_insecure),
            kubeconfig: self.kubeconfig,
            bearer_token,
            certificate,
        })
    }
}
