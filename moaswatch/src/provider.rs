// moaswatch/src/provider.rs
//
// ASN metadata provider: the five read-only queries the signal workers need,
// plus the RIPEstat-backed HTTP implementation and the shared retry loop.
//
// RIPEstat endpoints (all GET, JSON envelope `{"data": {...}}`):
//   announced-prefixes  ?resource=AS<asn>                          data.prefixes[].prefix
//   rpki-validation     ?resource=AS<asn>&prefixes=<p1,p2,...>     data (object or array) .prefix/.status
//   rir                 ?resource=<asn>&lod=2                      data.rirs[].status
//   visibility          ?resource=<asn>&include=peers_seeing       data.visibilities[0].ipv{4,6}_full_table_peers_{seeing,not_seeing}
//   as-path-length      ?resource=<asn>                            data.stats[].stripped.avg
//
// Missing fields decode to empty collections; the rollups turn those into the
// unknown / no_* values.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{ProviderConfig, RetryConfig};
use crate::error::ProviderError;
use crate::events::{Asn, Signal};

// ── Provider interface ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoaValidation {
    pub prefix: Option<String>,
    pub status: String,
}

/// Full-table peer counts for the first visibility entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerVisibility {
    pub ipv4_seeing:     usize,
    pub ipv4_not_seeing: usize,
    pub ipv6_seeing:     usize,
    pub ipv6_not_seeing: usize,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn announced_prefixes(&self, asn: Asn) -> Result<Vec<String>, ProviderError>;

    async fn rpki_validation(&self, asn: Asn, prefixes: &[String]) -> Result<Vec<RoaValidation>, ProviderError>;

    /// One status string per registry entry.
    async fn rir_registration(&self, asn: Asn) -> Result<Vec<String>, ProviderError>;

    /// None when the provider has no visibility entry for the ASN.
    async fn visibility(&self, asn: Asn) -> Result<Option<PeerVisibility>, ProviderError>;

    /// Stripped average path length per collector.
    async fn as_path_length(&self, asn: Asn) -> Result<Vec<f64>, ProviderError>;
}

// ── Retry ─────────────────────────────────────────────────────────────────────

/// Run `op` up to `policy.attempts` times with a fixed delay between attempts.
/// Only transient errors are retried; the last error is returned on exhaustion.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    asn:    Asn,
    signal: Signal,
    mut op: F,
) -> Result<T, ProviderError>
where
    F:   FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!("AS{} {} attempt {}/{} failed: {}", asn, signal, attempt, attempts, e);
                tokio::time::sleep(policy.delay()).await;
            }
            Err(e) => {
                warn!("AS{} {} failed after {} attempt(s): {}", asn, signal, attempt, e);
                return Err(e);
            }
        }
    }
}

// ── RIPEstat ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Default, Deserialize)]
struct PrefixesData {
    #[serde(default)]
    prefixes: Vec<PrefixEntry>,
}

#[derive(Deserialize)]
struct PrefixEntry {
    prefix: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

#[derive(Deserialize)]
struct RoaEntry {
    prefix: Option<String>,
    status: Option<String>,
}

#[derive(Default, Deserialize)]
struct RirData {
    #[serde(default)]
    rirs: Vec<RirEntry>,
}

#[derive(Deserialize)]
struct RirEntry {
    status: Option<String>,
}

#[derive(Default, Deserialize)]
struct VisibilityData {
    #[serde(default)]
    visibilities: Vec<VisibilityEntry>,
}

#[derive(Deserialize)]
struct VisibilityEntry {
    #[serde(default)]
    ipv4_full_table_peers_seeing:     Vec<serde_json::Value>,
    #[serde(default)]
    ipv4_full_table_peers_not_seeing: Vec<serde_json::Value>,
    #[serde(default)]
    ipv6_full_table_peers_seeing:     Vec<serde_json::Value>,
    #[serde(default)]
    ipv6_full_table_peers_not_seeing: Vec<serde_json::Value>,
}

#[derive(Default, Deserialize)]
struct PathLengthData {
    #[serde(default)]
    stats: Vec<PathStat>,
}

#[derive(Deserialize)]
struct PathStat {
    stripped: Option<Stripped>,
}

#[derive(Deserialize)]
struct Stripped {
    avg: Option<f64>,
}

pub struct RipeStatProvider {
    client:   reqwest::Client,
    base_url: String,
}

impl RipeStatProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("moaswatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_data<T>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T, ProviderError>
    where
        T: DeserializeOwned + Default,
    {
        let url = format!("{}/{}/data.json", self.base_url, endpoint);
        debug!("GET {} {:?}", url, query);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.data.unwrap_or_default())
    }
}

#[async_trait]
impl MetadataProvider for RipeStatProvider {
    async fn announced_prefixes(&self, asn: Asn) -> Result<Vec<String>, ProviderError> {
        let data: PrefixesData = self
            .get_data("announced-prefixes", &[("resource", format!("AS{}", asn))])
            .await?;
        Ok(data.prefixes.into_iter().filter_map(|p| p.prefix).collect())
    }

    async fn rpki_validation(&self, asn: Asn, prefixes: &[String]) -> Result<Vec<RoaValidation>, ProviderError> {
        let data: OneOrMany<RoaEntry> = self
            .get_data(
                "rpki-validation",
                &[("resource", format!("AS{}", asn)), ("prefixes", prefixes.join(","))],
            )
            .await?;
        let entries = match data {
            OneOrMany::Many(v) => v,
            OneOrMany::One(e) => vec![e],
        };
        Ok(entries
            .into_iter()
            .map(|e| RoaValidation {
                prefix: e.prefix,
                status: e.status.unwrap_or_else(|| "unknown".to_string()),
            })
            .collect())
    }

    async fn rir_registration(&self, asn: Asn) -> Result<Vec<String>, ProviderError> {
        let data: RirData = self
            .get_data(
                "rir",
                &[
                    ("data_overload_limit", "ignore".to_string()),
                    ("resource", asn.to_string()),
                    ("lod", "2".to_string()),
                ],
            )
            .await?;
        Ok(data
            .rirs
            .into_iter()
            .map(|r| r.status.unwrap_or_else(|| "unknown".to_string()))
            .collect())
    }

    async fn visibility(&self, asn: Asn) -> Result<Option<PeerVisibility>, ProviderError> {
        let data: VisibilityData = self
            .get_data(
                "visibility",
                &[
                    ("data_overload_limit", "ignore".to_string()),
                    ("include", "peers_seeing".to_string()),
                    ("resource", asn.to_string()),
                ],
            )
            .await?;
        Ok(data.visibilities.into_iter().next().map(|v| PeerVisibility {
            ipv4_seeing:     v.ipv4_full_table_peers_seeing.len(),
            ipv4_not_seeing: v.ipv4_full_table_peers_not_seeing.len(),
            ipv6_seeing:     v.ipv6_full_table_peers_seeing.len(),
            ipv6_not_seeing: v.ipv6_full_table_peers_not_seeing.len(),
        }))
    }

    async fn as_path_length(&self, asn: Asn) -> Result<Vec<f64>, ProviderError> {
        let data: PathLengthData = self
            .get_data("as-path-length", &[("resource", asn.to_string())])
            .await?;
        Ok(data
            .stats
            .into_iter()
            .filter_map(|s| s.stripped.and_then(|st| st.avg))
            .collect())
    }
}

// ── Scripted provider for tests ───────────────────────────────────────────────

#[cfg(test)]
pub mod testing {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use dashmap::DashMap;

    use super::*;

    /// Answers every ASN with the same canned data. ASNs in `failing` get a
    /// transient error from every call; `flaky` transient errors are handed
    /// out first, shared across all calls.
    #[derive(Default)]
    pub struct ScriptedProvider {
        pub prefixes:     Vec<String>,
        pub roas:         Vec<RoaValidation>,
        pub rir:          Vec<String>,
        pub visibility:   Option<PeerVisibility>,
        pub path_lengths: Vec<f64>,
        pub failing:      HashSet<Asn>,
        pub flaky:        AtomicUsize,
        pub rir_status:   Option<u16>,
        pub rir_garbled:  bool,
        pub rir_calls:    AtomicUsize,
        pub calls:        DashMap<Asn, usize>,
    }

    impl ScriptedProvider {
        pub fn healthy() -> Self {
            Self {
                prefixes:     vec!["192.0.2.0/24".into(), "198.51.100.0/24".into()],
                roas:         vec![
                    RoaValidation { prefix: Some("192.0.2.0/24".into()), status: "valid".into() },
                    RoaValidation { prefix: Some("198.51.100.0/24".into()), status: "valid".into() },
                ],
                rir:          vec!["ALLOCATED".into()],
                visibility:   Some(PeerVisibility { ipv4_seeing: 300, ipv4_not_seeing: 0, ipv6_seeing: 250, ipv6_not_seeing: 0 }),
                path_lengths: vec![3.5, 4.25, 4.0],
                ..Default::default()
            }
        }

        /// announced_prefixes calls made for `asn`; one per profile build.
        pub fn prefix_calls(&self, asn: Asn) -> usize {
            self.calls.get(&asn).map(|c| *c).unwrap_or(0)
        }

        fn gate(&self, asn: Asn) -> Result<(), ProviderError> {
            if self.failing.contains(&asn) {
                return Err(ProviderError::Status { code: 503 });
            }
            let took = self
                .flaky
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if took {
                return Err(ProviderError::Transport { message: "connection reset".into(), transient: true });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MetadataProvider for ScriptedProvider {
        async fn announced_prefixes(&self, asn: Asn) -> Result<Vec<String>, ProviderError> {
            *self.calls.entry(asn).or_insert(0) += 1;
            self.gate(asn)?;
            Ok(self.prefixes.clone())
        }

        async fn rpki_validation(&self, asn: Asn, _prefixes: &[String]) -> Result<Vec<RoaValidation>, ProviderError> {
            self.gate(asn)?;
            Ok(self.roas.clone())
        }

        async fn rir_registration(&self, asn: Asn) -> Result<Vec<String>, ProviderError> {
            self.rir_calls.fetch_add(1, Ordering::SeqCst);
            self.gate(asn)?;
            if self.rir_garbled {
                return Err(ProviderError::Decode("expected value at line 1".into()));
            }
            if let Some(code) = self.rir_status {
                return Err(ProviderError::Status { code });
            }
            Ok(self.rir.clone())
        }

        async fn visibility(&self, asn: Asn) -> Result<Option<PeerVisibility>, ProviderError> {
            self.gate(asn)?;
            Ok(self.visibility)
        }

        async fn as_path_length(&self, asn: Asn) -> Result<Vec<f64>, ProviderError> {
            self.gate(asn)?;
            Ok(self.path_lengths.clone())
        }
    }
}
