// moaswatch/src/archive.rs
//
// Interval archive: one text record per collector interval.
//
// File: <archive>/summary_<collector>_<YYYYmmdd>_<HHMM>.txt
//
//   (empty line)
//   BGPStream Summary for route-views2 (2017-01-01 00:00:00 to 2017-01-01 02:00:00)
//   (empty line)
//   MOAS Events Summary:
//   (empty line)
//   Total Updates: 1523
//   MOAS Count: 3
//   MOAS Ratio: 3/1523
//   (empty line)
//   Prefix: 10.0.0.0/24
//     Origin ASNs: 100, 200
//
// The layout is consumed by downstream tools and must stay byte-exact.
// Parsing is driven by the line labels, not by line offsets.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::ArchiveError;
use crate::events::{Asn, IntervalId, IntervalSummary, MoasEvent, WINDOW_TS_FORMAT};

const HEADER: &str = "BGPStream Summary for ";
const TOTAL: &str = "Total Updates:";
const COUNT: &str = "MOAS Count:";
const RATIO: &str = "MOAS Ratio:";
const PREFIX: &str = "Prefix:";
const ORIGINS: &str = "Origin ASNs:";

// ── Codec ─────────────────────────────────────────────────────────────────────

pub fn render(summary: &IntervalSummary) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!(
        "{}{} ({} to {})\n\n",
        HEADER,
        summary.interval.collector,
        summary.interval.start.format(WINDOW_TS_FORMAT),
        summary.end.format(WINDOW_TS_FORMAT),
    ));
    out.push_str("MOAS Events Summary:\n");
    out.push_str(&format!("\n{} {}\n", TOTAL, summary.total_updates));
    out.push_str(&format!("{} {}\n", COUNT, summary.moas_count));
    out.push_str(&format!("{} {}/{}\n\n", RATIO, summary.moas_count, summary.total_updates));
    for event in &summary.moas_events {
        out.push_str(&format!("{} {}\n", PREFIX, event.prefix));
        out.push_str(&format!("  {} {}\n", ORIGINS, join_asns(&event.origins)));
    }
    out
}

pub fn join_asns<'a>(asns: impl IntoIterator<Item = &'a Asn>) -> String {
    asns.into_iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

pub fn parse_asn_list(raw: &str) -> Result<Vec<Asn>, ArchiveError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| ArchiveError::invalid("Origin ASNs", s)))
        .collect()
}

fn parse_count(field: &'static str, raw: &str) -> Result<u64, ArchiveError> {
    raw.trim().parse().map_err(|_| ArchiveError::invalid(field, raw.trim()))
}

fn parse_ts(field: &'static str, raw: &str) -> Result<DateTime<Utc>, ArchiveError> {
    NaiveDateTime::parse_from_str(raw.trim(), WINDOW_TS_FORMAT)
        .map(|n| n.and_utc())
        .map_err(|_| ArchiveError::invalid(field, raw.trim()))
}

/// `route-views2 (2017-01-01 00:00:00 to 2017-01-01 02:00:00)`
fn parse_header(rest: &str) -> Result<(IntervalId, DateTime<Utc>), ArchiveError> {
    let bad = || ArchiveError::invalid("header", rest);
    let (collector, window) = rest.split_once(" (").ok_or_else(bad)?;
    let window = window.trim_end().strip_suffix(')').ok_or_else(bad)?;
    let (start, end) = window.split_once(" to ").ok_or_else(bad)?;
    let start = parse_ts("header", start)?;
    let end = parse_ts("header", end)?;
    Ok((IntervalId::new(collector.trim(), start), end))
}

pub fn parse(text: &str) -> Result<IntervalSummary, ArchiveError> {
    let mut header = None;
    let mut total = None;
    let mut count = None;
    let mut events = Vec::new();
    let mut pending: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix(HEADER) {
            header = Some(parse_header(rest)?);
        } else if let Some(rest) = line.strip_prefix(TOTAL) {
            total = Some(parse_count("Total Updates", rest)?);
        } else if let Some(rest) = line.strip_prefix(COUNT) {
            count = Some(parse_count("MOAS Count", rest)?);
        } else if let Some(rest) = line.strip_prefix(PREFIX) {
            if pending.is_some() {
                return Err(ArchiveError::MissingField("Origin ASNs"));
            }
            pending = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(ORIGINS) {
            let prefix = pending.take().ok_or_else(|| ArchiveError::invalid("Origin ASNs", "no preceding Prefix"))?;
            events.push(MoasEvent { prefix, origins: parse_asn_list(rest)? });
        }
        // Ratio, section titles and blank lines carry no extra state.
    }

    if pending.is_some() {
        return Err(ArchiveError::MissingField("Origin ASNs"));
    }
    let (interval, end) = header.ok_or(ArchiveError::MissingField("header"))?;
    Ok(IntervalSummary {
        interval,
        end,
        total_updates: total.ok_or(ArchiveError::MissingField("Total Updates"))?,
        moas_count:    count.ok_or(ArchiveError::MissingField("MOAS Count"))?,
        moas_events:   events,
    })
}

// ── Directory store ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct LoadedArchive {
    /// Chronological (start time, then collector).
    pub summaries: Vec<IntervalSummary>,
    /// Files that could not be parsed, with the reason.
    pub skipped:   Vec<(PathBuf, String)>,
}

pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write one interval record. Re-committing the same interval overwrites it.
    pub async fn commit(&self, summary: &IntervalSummary) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating archive {}", self.dir.display()))?;
        let path = self.dir.join(summary.interval.file_name());
        tokio::fs::write(&path, render(summary))
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(
            "Archived {} updates={} moas={}",
            summary.interval, summary.total_updates, summary.moas_count
        );
        Ok(path)
    }

    /// Load every interval record. Unparseable records are skipped; an
    /// unreadable directory or an archive with no usable interval is fatal.
    pub async fn load_all(&self) -> Result<LoadedArchive> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("reading archive {}", self.dir.display()))?;

        let mut loaded = LoadedArchive::default();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) if n.starts_with("summary_") && n.ends_with(".txt") => n.to_string(),
                _ => {
                    debug!("Ignoring non-archive file {}", path.display());
                    continue;
                }
            };

            let id: IntervalId = match name.parse() {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    loaded.skipped.push((path, e.to_string()));
                    continue;
                }
            };

            let text = match tokio::fs::read_to_string(&path).await {
                Ok(t) => t,
                Err(e) => {
                    let e = ArchiveError::io(&path, e);
                    warn!("Skipping {}: {}", path.display(), e);
                    loaded.skipped.push((path, e.to_string()));
                    continue;
                }
            };

            match parse(&text) {
                Ok(summary) => {
                    if summary.interval != id {
                        warn!("{}: header names {}, keeping header", path.display(), summary.interval);
                    }
                    loaded.summaries.push(summary);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    loaded.skipped.push((path, e.to_string()));
                }
            }
        }

        if loaded.summaries.is_empty() {
            bail!(
                "no interval could be loaded from {} ({} files skipped)",
                self.dir.display(),
                loaded.skipped.len()
            );
        }

        loaded.summaries.sort_by(|a, b| a.interval.cmp(&b.interval));
        info!(
            "Loaded {} intervals from {} ({} skipped)",
            loaded.summaries.len(),
            self.dir.display(),
            loaded.skipped.len()
        );
        Ok(loaded)
    }
}
