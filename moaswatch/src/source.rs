// moaswatch/src/source.rs
//
// Announcement source + interval plan.
//
// Input is a JSONL dump of collector elements for one interval, one element
// per line, shaped like a BGPStream element:
//
//   {"type": "A", "fields": {"prefix": "10.0.0.0/24", "as-path": "3356 1299 64500"}}
//
// Lines that are not valid JSON are skipped and counted; they never abort the
// interval. Field-level problems (missing prefix / path) are left for the
// detector, which still counts the record as an update.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::config::ScheduleConfig;
use crate::events::{Announcement, RecordKind, WINDOW_TS_FORMAT};

// ── JSONL element reader ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawElem {
    #[serde(rename = "type", default)]
    kind:   String,
    #[serde(default)]
    fields: RawFields,
}

#[derive(Debug, Default, Deserialize)]
struct RawFields {
    prefix:  Option<String>,
    #[serde(rename = "as-path")]
    as_path: Option<String>,
}

impl From<RawElem> for Announcement {
    fn from(raw: RawElem) -> Self {
        Announcement {
            kind:    RecordKind::from_marker(&raw.kind),
            prefix:  raw.fields.prefix,
            as_path: raw.fields.as_path,
        }
    }
}

/// Lazy iterator of announcements over a JSONL reader.
pub struct JsonlSource<R> {
    lines:   std::io::Lines<R>,
    line_no: u64,
    skipped: u64,
}

impl JsonlSource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonlSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self { lines: reader.lines(), line_no: 0, skipped: 0 }
    }

    /// Lines dropped because they were not valid element JSON.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<R: BufRead> Iterator for JsonlSource<R> {
    type Item = Announcement;

    fn next(&mut self) -> Option<Announcement> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => {
                    warn!("Read error after line {}: {}; ending stream", self.line_no, e);
                    return None;
                }
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() { continue; }

            match serde_json::from_str::<RawElem>(line) {
                Ok(raw) => return Some(raw.into()),
                Err(e) => {
                    self.skipped += 1;
                    warn!("Parse error on line {}: {}", self.line_no, e);
                }
            }
        }
    }
}

// ── Interval plan ─────────────────────────────────────────────────────────────

/// Parse a timestamp given as `YYYY-mm-dd HH:MM:SS` (UTC) or RFC 3339.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s.trim(), WINDOW_TS_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| anyhow!("unparseable timestamp `{}` (expected {} or RFC 3339)", s, WINDOW_TS_FORMAT))
}

/// Every interval of the schedule: for each year and month, days 1..=7 of the
/// month, one interval per configured session start time.
pub fn plan(schedule: &ScheduleConfig) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
    let times = schedule
        .session_times
        .iter()
        .map(|t| {
            NaiveTime::parse_from_str(t, "%H:%M:%S")
                .with_context(|| format!("invalid session time `{}`", t))
        })
        .collect::<Result<Vec<_>>>()?;
    let duration = schedule.session_duration()?;

    let mut out = Vec::new();
    for &year in &schedule.years {
        for month in 1..=12u32 {
            let first = NaiveDate::from_ymd_opt(year, month, 1)
                .ok_or_else(|| anyhow!("invalid year {}", year))?;
            for offset in 0..7 {
                let day = first + Duration::days(offset);
                if day.month() != month { continue; }
                for t in &times {
                    let start = day.and_time(*t).and_utc();
                    out.push((start, start + duration));
                }
            }
        }
    }

    if out.is_empty() {
        bail!("schedule produces no intervals (check years and session_times)");
    }
    Ok(out)
}
