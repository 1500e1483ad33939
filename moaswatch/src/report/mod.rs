// moaswatch/src/report/mod.rs
//
// Risk report, profile persistence and profile statistics.
//
// Risk report layout:
//
//   MOAS Event Analysis
//   ==================================================
//
//   Prefix-Level Analysis:
//   Prefix: 10.0.0.0/24
//     Total Suspicion Score: 17
//     ASN Analysis:
//       ASN 100: Score 0, Status: ALLOCATED, RPKI: completely_valid
//       ASN 200: Score 17, Status: no_rir_data, RPKI: unknown
//
//
//   ASN Categorization:
//   Likely Legitimate (1 ASNs):
//   100
//
//   ...
//
// Each (prefix, origin ASN) pair is one scoring context. ASNs without a
// profile (not evaluated) are left out of both sections.

pub mod yearly;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::archive::join_asns;
use crate::engine::scoring::Scorer;
use crate::events::{
    Asn, AsnSignalProfile, PrefixSessionRecord, RirRollup, RiskCategory, RpkiRollup, SuspicionScore,
};

// ── Risk report ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AsnAnalysis {
    pub score: SuspicionScore,
    pub rir:   RirRollup,
    pub rpki:  RpkiRollup,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrefixAnalysis {
    pub prefix: String,
    pub total:  u32,
    pub asns:   Vec<AsnAnalysis>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskReport {
    pub prefixes:   Vec<PrefixAnalysis>,
    pub categories: BTreeMap<RiskCategory, BTreeSet<Asn>>,
}

impl RiskReport {
    pub fn build<'a>(
        records:  impl IntoIterator<Item = &'a PrefixSessionRecord>,
        profiles: &BTreeMap<Asn, AsnSignalProfile>,
        scorer:   &Scorer,
    ) -> Self {
        let mut prefixes = Vec::new();
        let mut contexts = Vec::new();

        for record in records {
            let asns: Vec<AsnAnalysis> = record
                .origins
                .iter()
                .filter_map(|asn| profiles.get(asn))
                .map(|profile| AsnAnalysis {
                    score: scorer.score(profile),
                    rir:   profile.rir.clone(),
                    rpki:  profile.rpki,
                })
                .collect();
            if asns.is_empty() {
                continue;
            }
            contexts.extend(asns.iter().map(|a| a.score));
            prefixes.push(PrefixAnalysis {
                prefix: record.prefix.clone(),
                total:  asns.iter().map(|a| a.score.score).sum(),
                asns,
            });
        }

        Self { prefixes, categories: scorer.categorize(&contexts) }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("MOAS Event Analysis\n");
        out.push_str(&"=".repeat(50));
        out.push_str("\n\nPrefix-Level Analysis:\n");
        for p in &self.prefixes {
            out.push_str(&format!("Prefix: {}\n", p.prefix));
            out.push_str(&format!("  Total Suspicion Score: {}\n", p.total));
            out.push_str("  ASN Analysis:\n");
            for a in &p.asns {
                out.push_str(&format!(
                    "    ASN {}: Score {}, Status: {}, RPKI: {}\n",
                    a.score.asn, a.score.score, a.rir, a.rpki
                ));
            }
            out.push('\n');
        }

        out.push_str("\nASN Categorization:\n");
        for (category, asns) in &self.categories {
            out.push_str(&format!("{} ({} ASNs):\n", category, asns.len()));
            out.push_str(&join_asns(asns));
            out.push_str("\n\n");
        }
        out
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.render())
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Risk report written to {}", path.display());
        Ok(())
    }
}

// ── Profile JSONL ─────────────────────────────────────────────────────────────

pub async fn write_profiles<'a>(
    path:     &Path,
    profiles: impl IntoIterator<Item = &'a AsnSignalProfile>,
) -> Result<usize> {
    let mut out = String::new();
    let mut n = 0;
    for p in profiles {
        out.push_str(&serde_json::to_string(p)?);
        out.push('\n');
        n += 1;
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, out)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(n)
}

/// Parse profile JSONL. Unparseable lines are skipped and counted.
pub fn parse_profiles(text: &str) -> (Vec<AsnSignalProfile>, usize) {
    let mut profiles = Vec::new();
    let mut skipped = 0;
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() { continue; }
        match serde_json::from_str::<AsnSignalProfile>(line) {
            Ok(p) => profiles.push(p),
            Err(e) => {
                skipped += 1;
                warn!("Skipping profile line {}: {}", i + 1, e);
            }
        }
    }
    (profiles, skipped)
}

pub async fn read_profiles(path: &Path) -> Result<(Vec<AsnSignalProfile>, usize)> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_profiles(&text))
}

// ── Distributions ─────────────────────────────────────────────────────────────

/// ASNs per score value, ascending by score.
pub fn score_distribution(scorer: &Scorer, profiles: &[AsnSignalProfile]) -> BTreeMap<u32, usize> {
    let mut out = BTreeMap::new();
    for p in profiles {
        *out.entry(scorer.raw_score(p)).or_insert(0) += 1;
    }
    out
}

pub fn render_distribution(dist: &BTreeMap<u32, usize>) -> String {
    let mut out = String::from("Suspicion Score Distribution:\n");
    for (score, count) in dist {
        out.push_str(&format!("Score {}: {} ASNs\n", score, count));
    }
    out
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub rpki: BTreeMap<String, usize>,
    pub rir:  BTreeMap<String, usize>,
    pub ipv4: BTreeMap<String, usize>,
    pub ipv6: BTreeMap<String, usize>,
}

pub fn status_counts(profiles: &[AsnSignalProfile]) -> StatusCounts {
    let mut c = StatusCounts::default();
    for p in profiles {
        *c.rpki.entry(p.rpki.to_string()).or_insert(0) += 1;
        *c.rir.entry(p.rir.to_string()).or_insert(0) += 1;
        *c.ipv4.entry(p.visibility.ipv4.to_string()).or_insert(0) += 1;
        *c.ipv6.entry(p.visibility.ipv6.to_string()).or_insert(0) += 1;
    }
    c
}

impl StatusCounts {
    pub fn render(&self) -> String {
        let sections = [
            ("RPKI Status Counts:", &self.rpki),
            ("RIR Counts:", &self.rir),
            ("IPv4 Visibility Counts:", &self.ipv4),
            ("IPv6 Visibility Counts:", &self.ipv6),
        ];
        let mut out = String::new();
        for (i, (title, counts)) in sections.iter().enumerate() {
            if i > 0 { out.push('\n'); }
            out.push_str(title);
            out.push('\n');
            for (status, n) in counts.iter() {
                out.push_str(&format!("  {}: {}\n", status, n));
            }
        }
        out
    }
}
