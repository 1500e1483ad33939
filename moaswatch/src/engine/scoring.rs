// moaswatch/src/engine/scoring.rs
//
// Table-driven suspicion scoring + ASN risk categorization.
//
// Score = rpki weight + rir weight + ipv4 visibility weight + ipv6 visibility weight
//
// Default weights (every rollup variant has one):
//   RPKI        completely_valid 0  mostly_valid 1  less_valid 3  unknown 3
//               no_prefixes 4  invalid 5
//   RIR         ALLOCATED 0  ASSIGNED 2  RESERVED 3  UNALLOCATED 5  no_rir_data 4
//               other status 0  multiple_statuses 0  error 0
//   Visibility  visible 0  mostly_visible 0  low_visible 0  invisible 3  unknown 5
//
// Worst case: invalid + UNALLOCATED + unknown + unknown = 5 + 5 + 5 + 5 = 20
//
// Categories, from the mean score over every context the ASN was scored in:
//   Lacking Information     every score equals the all-unknown sentinel
//   Likely Legitimate       mean < 2
//   Potentially Suspicious  2 <= mean < 4
//   Likely Malicious        mean >= 4

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::events::{
    Asn, AsnSignalProfile, RirRollup, RirStatus, RiskCategory, RpkiRollup, SuspicionScore,
    VisibilityStatus,
};

const LEGITIMATE_BELOW: f64 = 2.0;
const SUSPICIOUS_BELOW: f64 = 4.0;

// ── Weight tables ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpkiWeights {
    pub completely_valid: u32,
    pub mostly_valid:     u32,
    pub less_valid:       u32,
    pub invalid:          u32,
    pub no_prefixes:      u32,
    pub unknown:          u32,
}

impl Default for RpkiWeights {
    fn default() -> Self {
        Self {
            completely_valid: 0,
            mostly_valid:     1,
            less_valid:       3,
            invalid:          5,
            no_prefixes:      4,
            unknown:          3,
        }
    }
}

impl RpkiWeights {
    pub fn weight(&self, rollup: RpkiRollup) -> u32 {
        match rollup {
            RpkiRollup::CompletelyValid => self.completely_valid,
            RpkiRollup::MostlyValid => self.mostly_valid,
            RpkiRollup::LessValid => self.less_valid,
            RpkiRollup::Invalid => self.invalid,
            RpkiRollup::NoPrefixes => self.no_prefixes,
            RpkiRollup::Unknown => self.unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RirWeights {
    pub allocated:         u32,
    pub assigned:          u32,
    pub reserved:          u32,
    pub unallocated:       u32,
    pub other_status:      u32, // any registry status not listed above
    pub multiple_statuses: u32,
    pub no_rir_data:       u32,
    pub error:             u32,
}

impl Default for RirWeights {
    fn default() -> Self {
        Self {
            allocated:         0,
            assigned:          2,
            reserved:          3,
            unallocated:       5,
            other_status:      0,
            multiple_statuses: 0,
            no_rir_data:       4,
            error:             0,
        }
    }
}

impl RirWeights {
    pub fn weight(&self, rollup: &RirRollup) -> u32 {
        match rollup {
            RirRollup::Status(RirStatus::Allocated) => self.allocated,
            RirRollup::Status(RirStatus::Assigned) => self.assigned,
            RirRollup::Status(RirStatus::Reserved) => self.reserved,
            RirRollup::Status(RirStatus::Unallocated) => self.unallocated,
            RirRollup::Status(RirStatus::Other(_)) => self.other_status,
            RirRollup::MultipleStatuses => self.multiple_statuses,
            RirRollup::NoRirData => self.no_rir_data,
            RirRollup::Error => self.error,
        }
    }
}

/// Applied once per address family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityWeights {
    pub visible:        u32,
    pub mostly_visible: u32,
    pub low_visible:    u32,
    pub invisible:      u32,
    pub unknown:        u32,
}

impl Default for VisibilityWeights {
    fn default() -> Self {
        Self {
            visible:        0,
            mostly_visible: 0,
            low_visible:    0,
            invisible:      3,
            unknown:        5,
        }
    }
}

impl VisibilityWeights {
    pub fn weight(&self, status: VisibilityStatus) -> u32 {
        match status {
            VisibilityStatus::Visible => self.visible,
            VisibilityStatus::MostlyVisible => self.mostly_visible,
            VisibilityStatus::LowVisible => self.low_visible,
            VisibilityStatus::Invisible => self.invisible,
            VisibilityStatus::Unknown => self.unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub rpki:       RpkiWeights,
    pub rir:        RirWeights,
    pub visibility: VisibilityWeights,
}

// ── Scorer ────────────────────────────────────────────────────────────────────

pub struct Scorer {
    weights:  ScoreWeights,
    sentinel: u32, // score of the all-unknown profile
}

impl Scorer {
    pub fn new(weights: ScoreWeights) -> Self {
        let mut scorer = Self { weights, sentinel: 0 };
        scorer.sentinel = scorer.raw_score(&AsnSignalProfile::unknown(Asn(0)));
        scorer
    }

    pub fn sentinel(&self) -> u32 {
        self.sentinel
    }

    /// Pure sum of table lookups.
    pub fn raw_score(&self, profile: &AsnSignalProfile) -> u32 {
        let w = &self.weights;
        w.rpki.weight(profile.rpki)
            + w.rir.weight(&profile.rir)
            + w.visibility.weight(profile.visibility.ipv4)
            + w.visibility.weight(profile.visibility.ipv6)
    }

    pub fn score(&self, profile: &AsnSignalProfile) -> SuspicionScore {
        let score = self.raw_score(profile);
        SuspicionScore {
            asn: profile.asn,
            score,
            // Single context: the batch rule applied to one score.
            category: self.category_for(&[score]).unwrap_or(RiskCategory::LackingInformation),
        }
    }

    /// Category for every score one ASN received in a run. None for no scores.
    pub fn category_for(&self, scores: &[u32]) -> Option<RiskCategory> {
        if scores.is_empty() {
            return None;
        }
        if scores.iter().all(|&s| s == self.sentinel) {
            return Some(RiskCategory::LackingInformation);
        }

        let mean = scores.iter().map(|&s| s as f64).sum::<f64>() / scores.len() as f64;
        let category = if mean < LEGITIMATE_BELOW {
            RiskCategory::LikelyLegitimate
        } else if mean < SUSPICIOUS_BELOW {
            RiskCategory::PotentiallySuspicious
        } else {
            RiskCategory::LikelyMalicious
        };
        Some(category)
    }

    /// Bucket ASNs by category. `scores` holds one entry per (ASN, context)
    /// evaluation; an ASN implicated by several prefixes appears several times.
    /// Every category is present in the result, possibly empty.
    pub fn categorize(&self, scores: &[SuspicionScore]) -> BTreeMap<RiskCategory, BTreeSet<Asn>> {
        let mut per_asn: BTreeMap<Asn, Vec<u32>> = BTreeMap::new();
        for s in scores {
            per_asn.entry(s.asn).or_default().push(s.score);
        }

        let mut out: BTreeMap<RiskCategory, BTreeSet<Asn>> =
            RiskCategory::ALL.iter().map(|&c| (c, BTreeSet::new())).collect();

        for (asn, list) in per_asn {
            if let Some(category) = self.category_for(&list) {
                out.entry(category).or_default().insert(asn);
            }
        }
        out
    }
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Visibility;

    fn profile(asn: u32, rpki: RpkiRollup, rir: RirRollup, v4: VisibilityStatus, v6: VisibilityStatus) -> AsnSignalProfile {
        AsnSignalProfile {
            asn: Asn(asn),
            rpki,
            rir,
            visibility: Visibility { ipv4: v4, ipv6: v6 },
            median_as_path_length: None,
            fallbacks: Vec::new(),
        }
    }

    #[test]
    fn worst_case_scores_twenty_and_is_malicious() {
        let scorer = Scorer::default();
        let p = profile(
            64500,
            RpkiRollup::Invalid,
            RirRollup::Status(RirStatus::Unallocated),
            VisibilityStatus::Unknown,
            VisibilityStatus::Unknown,
        );
        let s = scorer.score(&p);
        assert_eq!(s.score, 20);
        assert_eq!(s.category, RiskCategory::LikelyMalicious);

        let buckets = scorer.categorize(&[s]);
        assert!(buckets[&RiskCategory::LikelyMalicious].contains(&Asn(64500)));
    }

    #[test]
    fn clean_profile_scores_zero_and_is_legitimate() {
        let scorer = Scorer::default();
        let p = profile(
            64501,
            RpkiRollup::CompletelyValid,
            RirRollup::Status(RirStatus::Allocated),
            VisibilityStatus::Visible,
            VisibilityStatus::Visible,
        );
        let s = scorer.score(&p);
        assert_eq!(s.score, 0);
        assert_eq!(s.category, RiskCategory::LikelyLegitimate);
    }

    #[test]
    fn scoring_is_deterministic() {
        let scorer = Scorer::default();
        let p = profile(
            64502,
            RpkiRollup::MostlyValid,
            RirRollup::Status(RirStatus::Assigned),
            VisibilityStatus::LowVisible,
            VisibilityStatus::Invisible,
        );
        assert_eq!(scorer.score(&p), scorer.score(&p));
        assert_eq!(scorer.score(&p).score, 1 + 2 + 0 + 3);
    }

    #[test]
    fn sentinel_is_all_unknown_score() {
        let scorer = Scorer::default();
        assert_eq!(scorer.sentinel(), 3 + 4 + 5 + 5);
        let s = scorer.score(&AsnSignalProfile::unknown(Asn(7)));
        assert_eq!(s.category, RiskCategory::LackingInformation);
    }

    #[test]
    fn categorize_averages_across_contexts() {
        let scorer = Scorer::default();
        let scores = [
            SuspicionScore { asn: Asn(1), score: 1, category: RiskCategory::LikelyLegitimate },
            SuspicionScore { asn: Asn(1), score: 5, category: RiskCategory::LikelyMalicious },
            SuspicionScore { asn: Asn(2), score: 17, category: RiskCategory::LackingInformation },
            SuspicionScore { asn: Asn(2), score: 17, category: RiskCategory::LackingInformation },
            SuspicionScore { asn: Asn(3), score: 17, category: RiskCategory::LackingInformation },
            SuspicionScore { asn: Asn(3), score: 0, category: RiskCategory::LikelyLegitimate },
        ];
        let buckets = scorer.categorize(&scores);
        assert_eq!(buckets.len(), 4);
        assert!(buckets[&RiskCategory::PotentiallySuspicious].contains(&Asn(1))); // mean 3
        assert!(buckets[&RiskCategory::LackingInformation].contains(&Asn(2)));
        assert!(buckets[&RiskCategory::LikelyMalicious].contains(&Asn(3))); // mean 8.5
        assert!(buckets[&RiskCategory::LikelyLegitimate].is_empty());
    }

    #[test]
    fn every_open_variant_uses_its_configured_weight() {
        let mut weights = ScoreWeights::default();
        weights.rpki.less_valid = 2;
        weights.rir.multiple_statuses = 1;
        weights.visibility.low_visible = 2;
        let scorer = Scorer::new(weights);
        let p = profile(
            9,
            RpkiRollup::LessValid,
            RirRollup::MultipleStatuses,
            VisibilityStatus::LowVisible,
            VisibilityStatus::MostlyVisible,
        );
        assert_eq!(scorer.raw_score(&p), 2 + 1 + 2 + 0);
    }
}
