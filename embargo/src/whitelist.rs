//! Approved host addresses.
//!
//! The set is rebuilt from scratch on every load and published with a single
//! atomic swap. Readers take a [`WhitelistSnapshot`] and keep it for the whole
//! unit of work, so a reload never changes a decision halfway through an
//! archive.

use std::{
    collections::HashSet,
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use arc_swap::ArcSwapOption;
use data_model::filename::normalize_ip;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::WhitelistError;

/// Hostnames containing this marker belong to a partner whose data is never
/// released early.
pub const DEFAULT_EXCLUDED_HOST_MARKER: &str = "mlab4";

pub const PRODUCTION_SITE_LIST_URL: &str =
    "https://storage.googleapis.com/operator-mlab-oti/metadata/v0/current/mlab-host-ips.json";
pub const STAGING_SITE_LIST_URL: &str =
    "https://storage.googleapis.com/operator-mlab-staging/metadata/v0/current/mlab-host-ips.json";

/// One entry of the published host list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteRecord {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ipv4: String,
    #[serde(default)]
    pub ipv6: String,
}

/// Where the whitelist is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhitelistSource {
    Url(String),
    File(PathBuf),
}

impl WhitelistSource {
    /// Feed used when nothing is configured.
    pub fn default_for_env(env: &str) -> Self {
        if env == "production" || env == "prod" {
            WhitelistSource::Url(PRODUCTION_SITE_LIST_URL.to_string())
        } else {
            WhitelistSource::Url(STAGING_SITE_LIST_URL.to_string())
        }
    }
}

/// Immutable view of the whitelist at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhitelistSnapshot {
    addresses: HashSet<IpAddr>,
}

impl WhitelistSnapshot {
    pub fn new(addresses: HashSet<IpAddr>) -> Self {
        Self { addresses }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addresses.contains(ip)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl FromIterator<IpAddr> for WhitelistSnapshot {
    fn from_iter<T: IntoIterator<Item = IpAddr>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

pub struct SiteWhitelist {
    current: ArcSwapOption<WhitelistSnapshot>,
    excluded_host_marker: String,
}

impl Default for SiteWhitelist {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_HOST_MARKER)
    }
}

impl SiteWhitelist {
    pub fn new(excluded_host_marker: &str) -> Self {
        Self {
            current: ArcSwapOption::const_empty(),
            excluded_host_marker: excluded_host_marker.to_string(),
        }
    }

    /// Current snapshot, `None` until the first successful load.
    pub fn snapshot(&self) -> Option<Arc<WhitelistSnapshot>> {
        self.current.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.snapshot()
            .is_some_and(|snapshot| snapshot.contains(ip))
    }

    pub fn replace(&self, snapshot: WhitelistSnapshot) -> usize {
        let len = snapshot.len();
        self.current.store(Some(Arc::new(snapshot)));
        len
    }

    pub async fn load(
        &self,
        client: &reqwest::Client,
        source: &WhitelistSource,
    ) -> Result<usize, WhitelistError> {
        match source {
            WhitelistSource::Url(url) => self.load_from_url(client, url).await,
            WhitelistSource::File(path) => self.load_from_file(path).await,
        }
    }

    /// Fetch the JSON site list and swap it in.
    ///
    /// On any failure the previous snapshot stays in place.
    pub async fn load_from_url(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<usize, WhitelistError> {
        let fetch_err = |source| WhitelistError::Fetch {
            url: url.to_string(),
            source,
        };
        let body = client
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(fetch_err)?
            .bytes()
            .await
            .map_err(fetch_err)?;

        let snapshot = parse_site_list(&body, &self.excluded_host_marker).map_err(|source| {
            WhitelistError::Parse {
                url: url.to_string(),
                source,
            }
        })?;
        let len = self.replace(snapshot);
        info!(url, addresses = len, "loaded site whitelist");
        Ok(len)
    }

    /// Load a newline separated address file and swap it in.
    pub async fn load_from_file(&self, path: &Path) -> Result<usize, WhitelistError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| WhitelistError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let len = self.replace(parse_address_lines(&text));
        info!(path = %path.display(), addresses = len, "loaded whitelist file");
        Ok(len)
    }
}

/// Build a snapshot from the JSON site list.
pub fn parse_site_list(
    body: &[u8],
    excluded_host_marker: &str,
) -> Result<WhitelistSnapshot, serde_json::Error> {
    let sites: Vec<SiteRecord> = serde_json::from_slice(body)?;
    let mut addresses = HashSet::new();
    for site in sites {
        if !excluded_host_marker.is_empty() && site.hostname.contains(excluded_host_marker) {
            continue;
        }
        for token in [&site.ipv4, &site.ipv6] {
            if let Some(ip) = parse_entry(token) {
                addresses.insert(ip);
            }
        }
    }
    Ok(WhitelistSnapshot::new(addresses))
}

/// Build a snapshot from one address per line.
pub fn parse_address_lines(text: &str) -> WhitelistSnapshot {
    text.lines().filter_map(parse_entry).collect()
}

fn parse_entry(token: &str) -> Option<IpAddr> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    match normalize_ip(token) {
        Ok(ip) => Some(ip),
        Err(err) => {
            warn!(error = %err, "skipping whitelist entry");
            None
        }
    }
}
