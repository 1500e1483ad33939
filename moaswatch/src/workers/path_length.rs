// moaswatch/src/workers/path_length.rs
//
// Median of the per-collector stripped average AS-path lengths, rounded to
// three decimals. Informational: not part of the score.

use crate::config::RetryConfig;
use crate::events::{Asn, Signal};
use crate::provider::{with_retry, MetadataProvider};

use super::SignalOutcome;

pub fn median_path_length(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] };
    Some((median * 1000.0).round() / 1000.0)
}

pub async fn analyze(asn: Asn, provider: &dyn MetadataProvider, retry: &RetryConfig) -> SignalOutcome<Option<f64>> {
    match with_retry(retry, asn, Signal::PathLength, || provider.as_path_length(asn)).await {
        Ok(values) => SignalOutcome::fetched(median_path_length(&values)),
        Err(_) => SignalOutcome::fallback(None, Signal::PathLength),
    }
}
