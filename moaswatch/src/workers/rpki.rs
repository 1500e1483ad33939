// moaswatch/src/workers/rpki.rs
//
// RPKI rollup over the ROA validation statuses of the ASN's announced prefixes.
//
//   no prefixes                    → no_prefixes
//   every status invalid           → invalid
//   every status valid             → completely_valid
//   valid > half                   → mostly_valid
//   0 < valid <= half              → less_valid
//   otherwise                      → unknown
//
// A status other than valid / invalid / unknown counts as invalid.

use crate::config::RetryConfig;
use crate::events::{Asn, RpkiRollup, Signal};
use crate::provider::{with_retry, MetadataProvider};

use super::SignalOutcome;

pub fn rollup_rpki<'a>(statuses: impl IntoIterator<Item = &'a str>) -> RpkiRollup {
    let (mut total, mut valid, mut invalid) = (0usize, 0usize, 0usize);
    for status in statuses {
        total += 1;
        match status.trim().to_ascii_lowercase().as_str() {
            "valid" => valid += 1,
            "unknown" => {}
            _ => invalid += 1,
        }
    }

    if total == 0 {
        RpkiRollup::NoPrefixes
    } else if invalid == total {
        RpkiRollup::Invalid
    } else if valid == total {
        RpkiRollup::CompletelyValid
    } else if valid * 2 > total {
        RpkiRollup::MostlyValid
    } else if valid > 0 {
        RpkiRollup::LessValid
    } else {
        RpkiRollup::Unknown
    }
}

pub async fn analyze(asn: Asn, provider: &dyn MetadataProvider, retry: &RetryConfig) -> SignalOutcome<RpkiRollup> {
    let prefixes = match with_retry(retry, asn, Signal::Prefixes, || provider.announced_prefixes(asn)).await {
        Ok(p) => p,
        Err(_) => return SignalOutcome::fallback(RpkiRollup::Unknown, Signal::Prefixes),
    };
    if prefixes.is_empty() {
        return SignalOutcome::fetched(RpkiRollup::NoPrefixes);
    }

    match with_retry(retry, asn, Signal::Rpki, || provider.rpki_validation(asn, &prefixes)).await {
        Ok(roas) => SignalOutcome::fetched(rollup_rpki(roas.iter().map(|r| r.status.as_str()))),
        Err(_) => SignalOutcome::fallback(RpkiRollup::Unknown, Signal::Rpki),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;
    use crate::provider::RoaValidation;

    #[test]
    fn rollup_thresholds() {
        assert_eq!(rollup_rpki([]), RpkiRollup::NoPrefixes);
        assert_eq!(rollup_rpki(["invalid", "invalid"]), RpkiRollup::Invalid);
        assert_eq!(rollup_rpki(["valid", "VALID"]), RpkiRollup::CompletelyValid);
        assert_eq!(rollup_rpki(["valid", "valid", "unknown"]), RpkiRollup::MostlyValid);
        assert_eq!(rollup_rpki(["valid", "unknown"]), RpkiRollup::LessValid);
        assert_eq!(rollup_rpki(["unknown", "invalid"]), RpkiRollup::Unknown);
    }

    #[test]
    fn unrecognised_status_counts_invalid() {
        assert_eq!(rollup_rpki(["invalid_asn", "invalid_length"]), RpkiRollup::Invalid);
    }

    #[tokio::test]
    async fn empty_prefix_list_is_no_prefixes() {
        let provider = ScriptedProvider { prefixes: Vec::new(), ..ScriptedProvider::healthy() };
        let retry = RetryConfig { attempts: 5, delay_ms: 0 };
        let out = analyze(Asn(1), &provider, &retry).await;
        assert_eq!(out, SignalOutcome::fetched(RpkiRollup::NoPrefixes));
    }

    #[tokio::test]
    async fn mixed_roas_roll_up() {
        let provider = ScriptedProvider {
            roas: vec![
                RoaValidation { prefix: None, status: "valid".into() },
                RoaValidation { prefix: None, status: "invalid".into() },
                RoaValidation { prefix: None, status: "unknown".into() },
            ],
            ..ScriptedProvider::healthy()
        };
        let retry = RetryConfig { attempts: 1, delay_ms: 0 };
        assert_eq!(analyze(Asn(2), &provider, &retry).await.value, RpkiRollup::LessValid);
    }
}
