// moaswatch/src/workers/mod.rs
//
// Signal workers. Each one fetches a single external signal for an ASN
// through the provider (with the shared retry budget) and reduces it to its
// rollup. A worker that cannot fetch its signal returns the default rollup and
// names itself as a fallback; it never fails the ASN.

pub mod path_length;
pub mod rir;
pub mod rpki;
pub mod visibility;

use tracing::debug;

use crate::config::RetryConfig;
use crate::events::{Asn, AsnSignalProfile, Signal};
use crate::provider::MetadataProvider;

/// A rollup plus the signal that had to be defaulted to produce it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalOutcome<T> {
    pub value:    T,
    pub fallback: Option<Signal>,
}

impl<T> SignalOutcome<T> {
    pub fn fetched(value: T) -> Self {
        Self { value, fallback: None }
    }

    pub fn fallback(value: T, signal: Signal) -> Self {
        Self { value, fallback: Some(signal) }
    }
}

/// Run all signal workers concurrently and assemble the ASN's profile.
pub async fn collect_profile(
    asn:      Asn,
    provider: &dyn MetadataProvider,
    retry:    &RetryConfig,
) -> AsnSignalProfile {
    let (rpki_o, rir_o, vis_o, path_o) = tokio::join!(
        rpki::analyze(asn, provider, retry),
        rir::analyze(asn, provider, retry),
        visibility::analyze(asn, provider, retry),
        path_length::analyze(asn, provider, retry),
    );

    let fallbacks: Vec<Signal> = [rpki_o.fallback, rir_o.fallback, vis_o.fallback, path_o.fallback]
        .into_iter()
        .flatten()
        .collect();

    let profile = AsnSignalProfile {
        asn,
        rpki:                  rpki_o.value,
        rir:                   rir_o.value,
        visibility:            vis_o.value,
        median_as_path_length: path_o.value,
        fallbacks,
    };
    debug!(
        "AS{} rpki={} rir={} v4={} v6={} fallbacks={:?}",
        asn, profile.rpki, profile.rir, profile.visibility.ipv4, profile.visibility.ipv6, profile.fallbacks
    );
    profile
}
