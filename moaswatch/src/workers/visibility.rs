// moaswatch/src/workers/visibility.rs
//
// Per-family visibility from full-table peer counts.

use crate::config::RetryConfig;
use crate::events::{Asn, Signal, Visibility, VisibilityStatus};
use crate::provider::{with_retry, MetadataProvider};

use super::SignalOutcome;

pub fn rollup_visibility(seeing: usize, not_seeing: usize) -> VisibilityStatus {
    if seeing == 0 {
        VisibilityStatus::Invisible
    } else if not_seeing == 0 {
        VisibilityStatus::Visible
    } else if seeing as f64 / (seeing + not_seeing) as f64 > 0.5 {
        VisibilityStatus::MostlyVisible
    } else {
        VisibilityStatus::LowVisible
    }
}

pub async fn analyze(asn: Asn, provider: &dyn MetadataProvider, retry: &RetryConfig) -> SignalOutcome<Visibility> {
    match with_retry(retry, asn, Signal::Visibility, || provider.visibility(asn)).await {
        Ok(Some(peers)) => SignalOutcome::fetched(Visibility {
            ipv4: rollup_visibility(peers.ipv4_seeing, peers.ipv4_not_seeing),
            ipv6: rollup_visibility(peers.ipv6_seeing, peers.ipv6_not_seeing),
        }),
        // No entry at all: both families unknown.
        Ok(None) => SignalOutcome::fetched(Visibility::default()),
        Err(_) => SignalOutcome::fallback(Visibility::default(), Signal::Visibility),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;
    use crate::provider::PeerVisibility;

    #[test]
    fn rollup_rules() {
        assert_eq!(rollup_visibility(0, 0), VisibilityStatus::Invisible);
        assert_eq!(rollup_visibility(0, 40), VisibilityStatus::Invisible);
        assert_eq!(rollup_visibility(40, 0), VisibilityStatus::Visible);
        assert_eq!(rollup_visibility(30, 10), VisibilityStatus::MostlyVisible);
        assert_eq!(rollup_visibility(10, 10), VisibilityStatus::LowVisible);
    }

    #[tokio::test]
    async fn families_roll_up_independently() {
        let provider = ScriptedProvider {
            visibility: Some(PeerVisibility { ipv4_seeing: 5, ipv4_not_seeing: 1, ipv6_seeing: 0, ipv6_not_seeing: 9 }),
            ..ScriptedProvider::healthy()
        };
        let retry = RetryConfig { attempts: 1, delay_ms: 0 };
        let out = analyze(Asn(4), &provider, &retry).await;
        assert_eq!(out.value.ipv4, VisibilityStatus::MostlyVisible);
        assert_eq!(out.value.ipv6, VisibilityStatus::Invisible);
        assert_eq!(out.fallback, None);
    }

    #[tokio::test]
    async fn missing_entry_is_unknown() {
        let provider = ScriptedProvider { visibility: None, ..ScriptedProvider::healthy() };
        let retry = RetryConfig { attempts: 1, delay_ms: 0 };
        let out = analyze(Asn(5), &provider, &retry).await;
        assert_eq!(out.value, Visibility::default());
    }
}
