// moaswatch/src/events.rs
//
// Shared domain types flowing through moaswatch.
//
//   Announcement        → one BGP element from the route collector feed
//   IntervalSummary     → detector output for one collector interval (archived)
//   PrefixSessionRecord → per-prefix lifecycle across the whole archive
//   AsnSignalProfile    → registry / validation signals for one origin ASN
//   SuspicionScore      → table-driven score derived from a profile

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

/// Timestamp layout embedded in archive file names (`20170101_0000`).
pub const INTERVAL_TS_FORMAT: &str = "%Y%m%d_%H%M";
/// Timestamp layout used in archive headers and on the command line.
pub const WINDOW_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Identifiers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asn(pub u32);

impl fmt::Display for Asn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Asn {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Asn)
    }
}

/// Interval identifier: collector + interval start time.
/// Textual form is the archive file name, e.g. `summary_route-views2_20170101_0000.txt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntervalId {
    pub collector: String,
    pub start:     DateTime<Utc>,
}

impl IntervalId {
    pub fn new(collector: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self { collector: collector.into(), start }
    }

    pub fn file_name(&self) -> String {
        format!("summary_{}_{}.txt", self.collector, self.start.format(INTERVAL_TS_FORMAT))
    }

    pub fn year(&self) -> i32 {
        self.start.year()
    }
}

// Chronological first; collector only breaks ties between simultaneous intervals.
impl Ord for IntervalId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start.cmp(&other.start).then_with(|| self.collector.cmp(&other.collector))
    }
}

impl PartialOrd for IntervalId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl FromStr for IntervalId {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ArchiveError::InvalidIntervalId(s.to_string());
        let s    = s.trim();
        let stem = s.strip_suffix(".txt").unwrap_or(s);
        let rest = stem.strip_prefix("summary_").ok_or_else(invalid)?;

        // Collector names may contain '.' and '-'; split date/time off the right.
        let mut parts = rest.rsplitn(3, '_');
        let (time, date, collector) = match (parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(d), Some(c)) if !c.is_empty() => (t, d, c),
            _ => return Err(invalid()),
        };

        let start = NaiveDateTime::parse_from_str(&format!("{}{}", date, time), "%Y%m%d%H%M")
            .map_err(|_| invalid())?
            .and_utc();
        Ok(Self::new(collector, start))
    }
}

// ── Announcements ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Announcement,
    Withdrawal,
    Other,
}

impl RecordKind {
    /// Map a collector element type marker ("A", "W", "R", ...) to a kind.
    pub fn from_marker(marker: &str) -> Self {
        match marker {
            "A" => Self::Announcement,
            "W" => Self::Withdrawal,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub kind:    RecordKind,
    pub prefix:  Option<String>,
    pub as_path: Option<String>, // whitespace-delimited hops
}

impl Announcement {
    pub fn new(prefix: &str, as_path: &str) -> Self {
        Self {
            kind:    RecordKind::Announcement,
            prefix:  Some(prefix.to_string()),
            as_path: Some(as_path.to_string()),
        }
    }

    /// Origin ASN = rightmost hop of the AS path.
    /// None when the path is absent/empty or the hop is not a plain ASN (AS-sets).
    pub fn origin(&self) -> Option<Asn> {
        self.as_path
            .as_deref()?
            .split_whitespace()
            .next_back()?
            .parse()
            .ok()
    }
}

// ── Interval summaries ────────────────────────────────────────────────────────

/// Origins observed for one prefix within one interval: baseline first,
/// then every conflicting origin in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoasEvent {
    pub prefix:  String,
    pub origins: Vec<Asn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSummary {
    pub interval:      IntervalId,
    pub end:           DateTime<Utc>,
    pub total_updates: u64,
    pub moas_count:    u64,
    pub moas_events:   Vec<MoasEvent>, // in order of first conflict
}

impl IntervalSummary {
    pub fn origins_for(&self, prefix: &str) -> Option<&[Asn]> {
        self.moas_events
            .iter()
            .find(|e| e.prefix == prefix)
            .map(|e| e.origins.as_slice())
    }

    pub fn moas_ratio(&self) -> f64 {
        if self.total_updates == 0 { 0.0 } else { self.moas_count as f64 / self.total_updates as f64 }
    }
}

// ── Sessions ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixSessionRecord {
    pub prefix:            String,
    pub first_seen:        IntervalId,
    pub last_seen:         IntervalId,
    /// Number of distinct intervals in which the prefix had a MOAS event.
    pub last_seen_changes: u32,
    pub origins:           BTreeSet<Asn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Single,
    Multi { duration: Duration },
}

impl PrefixSessionRecord {
    pub fn is_single_session(&self) -> bool {
        self.first_seen == self.last_seen
    }

    pub fn kind(&self) -> SessionKind {
        if self.is_single_session() {
            SessionKind::Single
        } else {
            SessionKind::Multi { duration: self.last_seen.start - self.first_seen.start }
        }
    }

    /// Session span in days; None for single-session records.
    pub fn duration_days(&self) -> Option<f64> {
        match self.kind() {
            SessionKind::Single => None,
            SessionKind::Multi { duration } => Some(duration.num_seconds() as f64 / 86_400.0),
        }
    }
}

// ── Signal rollups ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpkiRollup {
    #[serde(alias = "valid")]
    CompletelyValid,
    MostlyValid,
    LessValid,
    Invalid,
    NoPrefixes,
    Unknown,
}

impl fmt::Display for RpkiRollup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompletelyValid => write!(f, "completely_valid"),
            Self::MostlyValid => write!(f, "mostly_valid"),
            Self::LessValid => write!(f, "less_valid"),
            Self::Invalid => write!(f, "invalid"),
            Self::NoPrefixes => write!(f, "no_prefixes"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Registration status as reported by the regional registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RirStatus {
    Allocated,
    Assigned,
    Reserved,
    Unallocated,
    Other(String),
}

impl RirStatus {
    pub fn from_registry(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "ALLOCATED" => Self::Allocated,
            "ASSIGNED" => Self::Assigned,
            "RESERVED" => Self::Reserved,
            "UNALLOCATED" => Self::Unallocated,
            _ => Self::Other(upper),
        }
    }
}

impl fmt::Display for RirStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocated => write!(f, "ALLOCATED"),
            Self::Assigned => write!(f, "ASSIGNED"),
            Self::Reserved => write!(f, "RESERVED"),
            Self::Unallocated => write!(f, "UNALLOCATED"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RirRollup {
    Status(RirStatus),
    MultipleStatuses,
    NoRirData,
    Error,
}

impl fmt::Display for RirRollup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(s) => write!(f, "{}", s),
            Self::MultipleStatuses => write!(f, "multiple_statuses"),
            Self::NoRirData => write!(f, "no_rir_data"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl From<String> for RirRollup {
    fn from(s: String) -> Self {
        match s.as_str() {
            "multiple_statuses" => Self::MultipleStatuses,
            "no_rir_data" => Self::NoRirData,
            "error" => Self::Error,
            other => Self::Status(RirStatus::from_registry(other)),
        }
    }
}

impl From<RirRollup> for String {
    fn from(r: RirRollup) -> Self {
        r.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityStatus {
    Visible,
    MostlyVisible,
    LowVisible,
    Invisible,
    #[default]
    Unknown,
}

impl fmt::Display for VisibilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Visible => write!(f, "visible"),
            Self::MostlyVisible => write!(f, "mostly_visible"),
            Self::LowVisible => write!(f, "low_visible"),
            Self::Invisible => write!(f, "invisible"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Visibility {
    #[serde(rename = "ipv4_status", default)]
    pub ipv4: VisibilityStatus,
    #[serde(rename = "ipv6_status", default)]
    pub ipv6: VisibilityStatus,
}

/// External signal that can fall back to its default rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Prefixes,
    Rpki,
    Rir,
    Visibility,
    PathLength,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefixes => write!(f, "prefixes"),
            Self::Rpki => write!(f, "rpki"),
            Self::Rir => write!(f, "rir"),
            Self::Visibility => write!(f, "visibility"),
            Self::PathLength => write!(f, "path_length"),
        }
    }
}

// ── Profiles and scores ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsnSignalProfile {
    pub asn: Asn,
    #[serde(rename = "rpki_status")]
    pub rpki: RpkiRollup,
    pub rir: RirRollup,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub median_as_path_length: Option<f64>,
    /// Signals that could not be fetched and were replaced by their default rollup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<Signal>,
}

impl AsnSignalProfile {
    /// Profile with every signal unknown, the "lacking information" sentinel.
    pub fn unknown(asn: Asn) -> Self {
        Self {
            asn,
            rpki: RpkiRollup::Unknown,
            rir: RirRollup::NoRirData,
            visibility: Visibility::default(),
            median_as_path_length: None,
            fallbacks: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.fallbacks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskCategory {
    LikelyLegitimate,
    PotentiallySuspicious,
    LikelyMalicious,
    LackingInformation,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 4] = [
        Self::LikelyLegitimate,
        Self::PotentiallySuspicious,
        Self::LikelyMalicious,
        Self::LackingInformation,
    ];
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LikelyLegitimate => write!(f, "Likely Legitimate"),
            Self::PotentiallySuspicious => write!(f, "Potentially Suspicious"),
            Self::LikelyMalicious => write!(f, "Likely Malicious"),
            Self::LackingInformation => write!(f, "Lacking Information"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspicionScore {
    pub asn:      Asn,
    pub score:    u32,
    pub category: RiskCategory,
}
