// moaswatch/src/workers/rir.rs
//
// RIR registration rollup: no entries → no_rir_data, one distinct status →
// that status, otherwise multiple_statuses.
//
// Fetch failures: an exhausted retry budget degrades to no_rir_data. Only an
// undecodable payload becomes `error`.

use std::collections::BTreeSet;

use crate::config::RetryConfig;
use crate::error::ProviderError;
use crate::events::{Asn, RirRollup, RirStatus, Signal};
use crate::provider::{with_retry, MetadataProvider};

use super::SignalOutcome;

pub fn rollup_rir<'a>(statuses: impl IntoIterator<Item = &'a str>) -> RirRollup {
    let distinct: BTreeSet<RirStatus> = statuses.into_iter().map(RirStatus::from_registry).collect();
    let mut iter = distinct.into_iter();
    match (iter.next(), iter.next()) {
        (None, _) => RirRollup::NoRirData,
        (Some(only), None) => RirRollup::Status(only),
        _ => RirRollup::MultipleStatuses,
    }
}

pub async fn analyze(asn: Asn, provider: &dyn MetadataProvider, retry: &RetryConfig) -> SignalOutcome<RirRollup> {
    match with_retry(retry, asn, Signal::Rir, || provider.rir_registration(asn)).await {
        Ok(statuses) => SignalOutcome::fetched(rollup_rir(statuses.iter().map(String::as_str))),
        Err(ProviderError::Decode(_)) => SignalOutcome::fallback(RirRollup::Error, Signal::Rir),
        Err(_) => SignalOutcome::fallback(RirRollup::NoRirData, Signal::Rir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;

    #[test]
    fn rollup_rules() {
        assert_eq!(rollup_rir([]), RirRollup::NoRirData);
        assert_eq!(rollup_rir(["ASSIGNED", "assigned"]), RirRollup::Status(RirStatus::Assigned));
        assert_eq!(rollup_rir(["ALLOCATED", "RESERVED"]), RirRollup::MultipleStatuses);
        assert_eq!(
            rollup_rir(["AVAILABLE"]),
            RirRollup::Status(RirStatus::Other("AVAILABLE".into()))
        );
        assert_eq!(
            rollup_rir(["Available", "AVAILABLE"]),
            RirRollup::Status(RirStatus::Other("AVAILABLE".into()))
        );
    }

    #[tokio::test]
    async fn rejected_requests_exhaust_to_no_rir_data() {
        let provider = ScriptedProvider { rir_status: Some(400), ..ScriptedProvider::healthy() };
        let retry = RetryConfig { attempts: 5, delay_ms: 0 };
        let out = analyze(Asn(3), &provider, &retry).await;
        assert_eq!(out, SignalOutcome::fallback(RirRollup::NoRirData, Signal::Rir));
        assert_eq!(provider.rir_calls.load(std::sync::atomic::Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn undecodable_payload_is_error_rollup() {
        let provider = ScriptedProvider { rir_garbled: true, ..ScriptedProvider::healthy() };
        let retry = RetryConfig { attempts: 5, delay_ms: 0 };
        let out = analyze(Asn(3), &provider, &retry).await;
        assert_eq!(out, SignalOutcome::fallback(RirRollup::Error, Signal::Rir));
        assert_eq!(provider.rir_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
