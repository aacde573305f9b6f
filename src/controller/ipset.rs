//! Address set helpers and host/domain parsing used by peer discovery.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Pattern used to pull peer URLs out of free text. The `.-:` range is
/// intentional and admits `/`, digits and `:` after the scheme.
static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[a-zA-Z0-9.-:-]+").expect("URL pattern is a valid regex")
});

/// Unordered collection of textual network addresses.
///
/// Duplicates are kept as-is: `["10.0.0.1", "10.0.0.1"]` is a different set
/// from `["10.0.0.1"]` under [`AddressSet::set_eq`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressSet(Vec<String>);

impl AddressSet {
    pub fn new(addresses: Vec<String>) -> Self {
        Self(addresses)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    /// Append another set, preserving duplicates.
    pub fn extend(&mut self, other: AddressSet) {
        self.0.extend(other.0);
    }

    /// Order-independent equality, see [`set_equal`].
    pub fn set_eq(&self, other: &AddressSet) -> bool {
        set_equal(&self.0, &other.0)
    }
}

impl From<Vec<String>> for AddressSet {
    fn from(addresses: Vec<String>) -> Self {
        Self(addresses)
    }
}

impl From<Vec<&str>> for AddressSet {
    fn from(addresses: Vec<&str>) -> Self {
        Self(addresses.into_iter().map(String::from).collect())
    }
}

impl FromIterator<String> for AddressSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// True iff both lists have the same length and are element-wise identical
/// once sorted. Inputs are not deduplicated and are left untouched.
pub fn set_equal(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted: Vec<&String> = a.iter().collect();
    let mut b_sorted: Vec<&String> = b.iter().collect();
    a_sorted.sort_unstable();
    b_sorted.sort_unstable();
    a_sorted == b_sorted
}

/// Parent domain of a host: `pd-1.example.com` -> `example.com`.
///
/// Hosts with fewer than three labels have no usable parent and yield `None`.
pub fn domain_from_host(host: &str) -> Option<String> {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return None;
    }
    Some(labels[1..].join("."))
}

/// Distinct parent domains of `hosts`, in order of first appearance.
pub fn unique_domains<S: AsRef<str>>(hosts: &[S]) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();
    for host in hosts {
        if let Some(domain) = domain_from_host(host.as_ref()) {
            if !domains.contains(&domain) {
                domains.push(domain);
            }
        }
    }
    domains
}

/// Distinct `http(s)://host[:port]` tokens found in `text`, first-seen order.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for m in URL_PATTERN.find_iter(text) {
        let url = m.as_str().to_string();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// Host part of a URL with scheme, path and port removed.
pub fn host_from_url(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let authority = rest.split('/').next().unwrap_or_default();
    let host = authority.split(':').next().unwrap_or_default();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
