//! Resolution of the PD assistant peers polled every cycle
//!
//! Peers come from one of three sources: a static list, the TiDB PD discovery
//! service, or the PD members API. For the latter two, every distinct parent
//! domain of the PD hosts is assumed to host one assistant at
//! `{prefix}.{domain}`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::ipset::{extract_urls, host_from_url, unique_domains};
use crate::error::{Error, Result};

/// Where the peer list comes from
#[derive(Clone, Debug, PartialEq)]
pub enum PeerSource {
    /// Operator-supplied peer base URLs, used verbatim
    Static(Vec<String>),
    /// TiDB PD discovery service
    Discovery {
        url: String,
        cluster_name: String,
        cluster_namespace: String,
    },
    /// PD `/pd/api/v1/members` endpoint, `host:port`
    PdMembers { address: String },
}

/// How assistant URLs are composed from discovered domains
#[derive(Clone, Debug, PartialEq)]
pub struct PeerNaming {
    pub host_prefix: String,
    pub scheme: String,
    pub port: String,
}

impl Default for PeerNaming {
    fn default() -> Self {
        Self {
            host_prefix: "pd-assistant".to_string(),
            scheme: "https".to_string(),
            port: "443".to_string(),
        }
    }
}

impl PeerNaming {
    /// `{prefix}.{domain}` for every distinct parent domain of `hosts`
    pub fn hostnames<S: AsRef<str>>(&self, hosts: &[S]) -> Vec<String> {
        unique_domains(hosts)
            .into_iter()
            .map(|domain| format!("{}.{}", self.host_prefix, domain))
            .collect()
    }

    pub fn url_for(&self, hostname: &str) -> String {
        format!("{}://{}:{}", self.scheme, hostname, self.port)
    }
}

/// Discovery path for a TiDB cluster: base64 of the first PD peer address.
pub fn encode_discovery_path(cluster_name: &str, cluster_namespace: &str) -> String {
    let domain = format!(
        "{name}-pd-0.{name}-pd-peer.{namespace}.svc:2380",
        name = cluster_name,
        namespace = cluster_namespace
    );
    STANDARD.encode(domain)
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(default)]
    name: Option<String>,
}

/// Resolves the peer list for one reconciliation cycle
pub struct PeerDiscovery {
    source: PeerSource,
    naming: PeerNaming,
    http: Client,
    /// `https` when a CA is configured for the PD API
    pd_scheme: &'static str,
}

impl PeerDiscovery {
    pub fn new(source: PeerSource, naming: PeerNaming, http: Client, pd_tls: bool) -> Self {
        Self {
            source,
            naming,
            http,
            pd_scheme: if pd_tls { "https" } else { "http" },
        }
    }

    pub fn source(&self) -> &PeerSource {
        &self.source
    }

    /// Peer base URLs to poll this cycle. Never returns an empty list.
    #[instrument(skip(self))]
    pub async fn resolve(&self) -> Result<Vec<String>> {
        let hosts = match &self.source {
            PeerSource::Static(urls) => {
                if urls.is_empty() {
                    return Err(Error::EmptyResult(
                        "no static PD assistant URLs configured".to_string(),
                    ));
                }
                return Ok(urls.clone());
            }
            PeerSource::Discovery {
                url,
                cluster_name,
                cluster_namespace,
            } => {
                self.discovery_hosts(url, cluster_name, cluster_namespace)
                    .await?
            }
            PeerSource::PdMembers { address } => self.pd_member_names(address).await?,
        };

        let hostnames = self.naming.hostnames(&hosts);
        if hostnames.is_empty() {
            return Err(Error::EmptyResult(
                "no PD Assistant hostnames found".to_string(),
            ));
        }

        let urls: Vec<String> = hostnames.iter().map(|h| self.naming.url_for(h)).collect();
        info!("Resolved {} PD assistant peers: {:?}", urls.len(), urls);
        Ok(urls)
    }

    /// PD hosts advertised by the discovery service
    async fn discovery_hosts(
        &self,
        base_url: &str,
        cluster_name: &str,
        cluster_namespace: &str,
    ) -> Result<Vec<String>> {
        let url = format!(
            "{}/new/{}",
            base_url.trim_end_matches('/'),
            encode_discovery_path(cluster_name, cluster_namespace)
        );
        let body = self.get_text(&url).await?;
        debug!("PD discovery response body: {}", body);

        let mut hosts: Vec<String> = Vec::new();
        for pd_url in extract_urls(&body) {
            debug!("Found PD URL: {}", pd_url);
            if let Some(host) = host_from_url(&pd_url) {
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }
        Ok(hosts)
    }

    /// Member names reported by the PD members API
    async fn pd_member_names(&self, address: &str) -> Result<Vec<String>> {
        let url = format!("{}://{}/pd/api/v1/members", self.pd_scheme, address);
        let body = self.get_text(&url).await?;
        let parsed: MembersResponse = serde_json::from_str(&body).map_err(|e| Error::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;
        Ok(parsed.members.into_iter().filter_map(|m| m.name).collect())
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| Error::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status,
            });
        }

        response.text().await.map_err(|e| Error::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}
