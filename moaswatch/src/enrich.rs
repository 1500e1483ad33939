// moaswatch/src/enrich.rs
//
// Bounded, memoized ASN enrichment.
//
// Every distinct ASN of a run is profiled at most once: profiles are cached
// per run in a DashMap keyed by ASN, and `enrich_all` deduplicates its input
// before spawning. At most `concurrency` ASNs are in flight (semaphore
// permits); each task owns its profile until it is published to the cache.
//
// Shutdown: once the shared flag is set no new ASN task is launched. Tasks
// already running finish normally. Skipped ASNs are counted as not evaluated.
//
// Counters:
//   fallback_asns   profiles with at least one defaulted signal
//   not_evaluated   ASNs never profiled (shutdown, task failure)

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::events::{Asn, AsnSignalProfile};
use crate::provider::MetadataProvider;
use crate::workers;

/// End-of-run counters reported to the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub malformed_skipped: u64,
    pub fallback_asns:     u64,
    pub not_evaluated:     u64,
}

pub struct Enricher {
    provider:          Arc<dyn MetadataProvider>,
    retry:             RetryConfig,
    concurrency:       usize,
    cache:             DashMap<Asn, AsnSignalProfile>,
    shutdown:          Arc<AtomicBool>,
    pub fallback_asns: AtomicU64,
    pub not_evaluated: AtomicU64,
}

impl Enricher {
    pub fn new(
        provider:    Arc<dyn MetadataProvider>,
        retry:       RetryConfig,
        concurrency: usize,
        shutdown:    Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            retry,
            concurrency: concurrency.max(1),
            cache: DashMap::new(),
            shutdown,
            fallback_asns: AtomicU64::new(0),
            not_evaluated: AtomicU64::new(0),
        })
    }

    /// Profile for `asn`, fetched on first use and cached for the run.
    pub async fn profile(&self, asn: Asn) -> AsnSignalProfile {
        if let Some(hit) = self.cache.get(&asn) {
            return hit.clone();
        }
        let profile = workers::collect_profile(asn, self.provider.as_ref(), &self.retry).await;
        if profile.is_degraded() {
            self.fallback_asns.fetch_add(1, Ordering::Relaxed);
            warn!("AS{} fell back to defaults for {:?}", asn, profile.fallbacks);
        }
        self.cache.insert(asn, profile.clone());
        profile
    }

    /// Profile every distinct ASN with at most `concurrency` in flight.
    pub async fn enrich_all(self: &Arc<Self>, asns: impl IntoIterator<Item = Asn>) -> BTreeMap<Asn, AsnSignalProfile> {
        let distinct: BTreeSet<Asn> = asns.into_iter().collect();
        let total = distinct.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(total);

        for asn in distinct {
            if self.shutdown.load(Ordering::SeqCst) {
                self.not_evaluated.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    self.not_evaluated.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            // The wait for a permit may have spanned a shutdown request.
            if self.shutdown.load(Ordering::SeqCst) {
                self.not_evaluated.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                this.profile(asn).await
            }));
        }

        let mut out = BTreeMap::new();
        for handle in handles {
            match handle.await {
                Ok(profile) => {
                    out.insert(profile.asn, profile);
                }
                Err(e) => {
                    self.not_evaluated.fetch_add(1, Ordering::Relaxed);
                    warn!("Enrichment task failed: {}", e);
                }
            }
        }

        info!(
            "Enriched {}/{} ASNs ({} with fallbacks, {} not evaluated)",
            out.len(),
            total,
            self.fallback_asns.load(Ordering::Relaxed),
            self.not_evaluated.load(Ordering::Relaxed)
        );
        out
    }

    pub fn stats(&self, malformed_skipped: u64) -> RunStats {
        RunStats {
            malformed_skipped,
            fallback_asns: self.fallback_asns.load(Ordering::Relaxed),
            not_evaluated: self.not_evaluated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RpkiRollup;
    use crate::provider::testing::ScriptedProvider;

    fn enricher(provider: Arc<ScriptedProvider>, shutdown: bool) -> Arc<Enricher> {
        Enricher::new(
            provider,
            RetryConfig { attempts: 5, delay_ms: 0 },
            2,
            Arc::new(AtomicBool::new(shutdown)),
        )
    }

    #[tokio::test]
    async fn each_asn_is_fetched_once() {
        let provider = Arc::new(ScriptedProvider::healthy());
        let e = enricher(provider.clone(), false);

        let profiles = e.enrich_all([Asn(1), Asn(2), Asn(1), Asn(3), Asn(2)]).await;
        assert_eq!(profiles.len(), 3);
        e.profile(Asn(1)).await;
        e.enrich_all([Asn(1), Asn(3)]).await;

        for asn in [1, 2, 3] {
            assert_eq!(provider.prefix_calls(Asn(asn)), 1);
        }
    }

    #[tokio::test]
    async fn unreachable_asn_falls_back_without_failing_batch() {
        let mut scripted = ScriptedProvider::healthy();
        scripted.failing.insert(Asn(666));
        let e = enricher(Arc::new(scripted), false);

        let profiles = e.enrich_all([Asn(10), Asn(666), Asn(11)]).await;
        assert_eq!(profiles.len(), 3);
        assert_eq!(profiles[&Asn(666)].rpki, RpkiRollup::Unknown);
        assert!(profiles[&Asn(666)].is_degraded());
        assert_eq!(profiles[&Asn(10)].rpki, RpkiRollup::CompletelyValid);
        assert_eq!(e.stats(0).fallback_asns, 1);
    }

    #[tokio::test]
    async fn transient_blips_are_absorbed_by_retries() {
        let scripted = ScriptedProvider::healthy();
        scripted.flaky.store(3, Ordering::SeqCst);
        let e = enricher(Arc::new(scripted), false);
        let p = e.profile(Asn(5)).await;
        assert!(!p.is_degraded());
    }

    #[tokio::test]
    async fn shutdown_stops_new_fetches() {
        let provider = Arc::new(ScriptedProvider::healthy());
        let e = enricher(provider.clone(), true);
        let profiles = e.enrich_all([Asn(1), Asn(2), Asn(3)]).await;
        assert!(profiles.is_empty());
        assert_eq!(e.stats(4), RunStats { malformed_skipped: 4, fallback_asns: 0, not_evaluated: 3 });
        assert_eq!(provider.prefix_calls(Asn(1)), 0);
    }
}
