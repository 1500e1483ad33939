// moaswatch/src/state/sessions.rs
//
// Cross-interval session state.
//
// One PrefixSessionRecord per prefix that ever had a MOAS event, built by
// folding interval summaries in chronological order:
//
//   first appearance         → first_seen = last_seen = interval, changes = 1
//   later interval           → last_seen = interval, changes += 1
//   same interval again      → origins only
//
// Intervals in which a prefix had no MOAS event never touch its record, so a
// prefix is single-session iff every event it had fell inside one interval.
//
// Outputs:
//   one_session.txt          Prefix / Seen in / Origin ASNs
//   multi_session.txt        Prefix / First Seen / Last Seen / Last Seen Changes / Origin ASNs
//   one_session_<year>.txt   single-session records grouped by interval year

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::archive::{join_asns, parse_asn_list};
use crate::error::ArchiveError;
use crate::events::{IntervalId, IntervalSummary, PrefixSessionRecord};

pub const SINGLE_SESSION_FILE: &str = "one_session.txt";
pub const MULTI_SESSION_FILE:  &str = "multi_session.txt";

/// Multi-session records shorter than this are "short-lived".
pub const SHORT_LIVED_DAYS: f64 = 30.0;

// ── Tracker ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SessionTracker {
    records:       BTreeMap<String, PrefixSessionRecord>,
    last_interval: Option<IntervalId>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one interval in. Callers must feed intervals oldest first.
    pub fn ingest(&mut self, summary: &IntervalSummary) {
        if let Some(prev) = &self.last_interval {
            if summary.interval < *prev {
                warn!("Interval {} ingested after {}; session spans may be wrong", summary.interval, prev);
            }
        }
        self.last_interval = Some(summary.interval.clone());

        for event in &summary.moas_events {
            match self.records.get_mut(&event.prefix) {
                Some(record) => {
                    if record.last_seen != summary.interval {
                        record.last_seen = summary.interval.clone();
                        record.last_seen_changes += 1;
                    }
                    record.origins.extend(event.origins.iter().copied());
                }
                None => {
                    debug!("New MOAS prefix {} in {}", event.prefix, summary.interval);
                    self.records.insert(
                        event.prefix.clone(),
                        PrefixSessionRecord {
                            prefix:            event.prefix.clone(),
                            first_seen:        summary.interval.clone(),
                            last_seen:         summary.interval.clone(),
                            last_seen_changes: 1,
                            origins:           event.origins.iter().copied().collect(),
                        },
                    );
                }
            }
        }
    }

    pub fn finish(self) -> BTreeMap<String, PrefixSessionRecord> {
        self.records
    }
}

/// Classify every prefix over the whole archive. Input order does not matter;
/// summaries are folded by interval start time.
pub fn classify(summaries: &[IntervalSummary]) -> BTreeMap<String, PrefixSessionRecord> {
    let mut ordered: Vec<&IntervalSummary> = summaries.iter().collect();
    ordered.sort_by(|a, b| a.interval.cmp(&b.interval));

    let mut tracker = SessionTracker::new();
    for summary in ordered {
        tracker.ingest(summary);
    }
    let records = tracker.finish();
    let single = records.values().filter(|r| r.is_single_session()).count();
    info!(
        "Classified {} prefixes: {} single-session, {} multi-session",
        records.len(),
        single,
        records.len() - single
    );
    records
}

// ── Text output ───────────────────────────────────────────────────────────────

pub fn render_single<'a>(records: impl IntoIterator<Item = &'a PrefixSessionRecord>) -> String {
    let mut out = String::new();
    for r in records {
        out.push_str(&format!("Prefix: {}\n", r.prefix));
        out.push_str(&format!("  Seen in: {}\n", r.first_seen));
        out.push_str(&format!("  Origin ASNs: {}\n\n", join_asns(&r.origins)));
    }
    out
}

pub fn render_multi<'a>(records: impl IntoIterator<Item = &'a PrefixSessionRecord>) -> String {
    let mut out = String::new();
    for r in records {
        out.push_str(&format!("Prefix: {}\n", r.prefix));
        out.push_str(&format!("  First Seen: {}\n", r.first_seen));
        out.push_str(&format!("  Last Seen: {}\n", r.last_seen));
        out.push_str(&format!("  Last Seen Changes: {}\n", r.last_seen_changes));
        out.push_str(&format!("  Origin ASNs: {}\n\n", join_asns(&r.origins)));
    }
    out
}

async fn write_text(path: PathBuf, text: String) -> Result<PathBuf> {
    tokio::fs::write(&path, text)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Write one_session.txt and multi_session.txt into `dir`.
pub async fn write_sessions(
    dir:     &Path,
    records: &BTreeMap<String, PrefixSessionRecord>,
) -> Result<(PathBuf, PathBuf)> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let (single, multi): (Vec<_>, Vec<_>) = records.values().partition(|r| r.is_single_session());
    let single_path = write_text(dir.join(SINGLE_SESSION_FILE), render_single(single.iter().copied())).await?;
    let multi_path = write_text(dir.join(MULTI_SESSION_FILE), render_multi(multi.iter().copied())).await?;
    info!("Wrote {} single / {} multi session records to {}", single.len(), multi.len(), dir.display());
    Ok((single_path, multi_path))
}

pub fn single_sessions_by_year(
    records: &BTreeMap<String, PrefixSessionRecord>,
) -> BTreeMap<i32, Vec<&PrefixSessionRecord>> {
    let mut out: BTreeMap<i32, Vec<&PrefixSessionRecord>> = BTreeMap::new();
    for r in records.values().filter(|r| r.is_single_session()) {
        out.entry(r.first_seen.year()).or_default().push(r);
    }
    out
}

pub fn yearly_file_name(year: i32) -> String {
    format!("one_session_{}.txt", year)
}

/// Write one one_session_<year>.txt per year that has single-session records.
pub async fn write_single_sessions_by_year(
    dir:     &Path,
    records: &BTreeMap<String, PrefixSessionRecord>,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let mut written = Vec::new();
    for (year, list) in single_sessions_by_year(records) {
        let path = write_text(dir.join(yearly_file_name(year)), render_single(list)).await?;
        written.push(path);
    }
    Ok(written)
}

/// Read a single-session file (one_session.txt or a per-year file) back.
pub fn parse_single_sessions(text: &str) -> Result<Vec<PrefixSessionRecord>, ArchiveError> {
    let mut out = Vec::new();
    let mut prefix: Option<String> = None;
    let mut seen: Option<IntervalId> = None;

    for line in text.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Prefix:") {
            if prefix.is_some() {
                return Err(ArchiveError::MissingField("Origin ASNs"));
            }
            prefix = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Seen in:") {
            seen = Some(rest.trim().parse()?);
        } else if let Some(rest) = line.strip_prefix("Origin ASNs:") {
            let p = prefix.take().ok_or_else(|| ArchiveError::invalid("Origin ASNs", "no preceding Prefix"))?;
            let interval = seen.take().ok_or(ArchiveError::MissingField("Seen in"))?;
            let origins: BTreeSet<_> = parse_asn_list(rest)?.into_iter().collect();
            out.push(PrefixSessionRecord {
                prefix:            p,
                first_seen:        interval.clone(),
                last_seen:         interval,
                last_seen_changes: 1,
                origins,
            });
        }
    }
    if prefix.is_some() {
        return Err(ArchiveError::MissingField("Origin ASNs"));
    }
    Ok(out)
}

// ── Duration statistics ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DurationStats {
    pub count:           usize,
    pub mean_days:       f64,
    pub short_count:     usize,
    pub short_mean_days: f64,
}

/// Over multi-session records only; single-session records have no duration.
pub fn duration_stats<'a>(records: impl IntoIterator<Item = &'a PrefixSessionRecord>) -> DurationStats {
    let mut total = 0.0;
    let mut count = 0usize;
    let mut short_total = 0.0;
    let mut short_count = 0usize;

    for days in records.into_iter().filter_map(|r| r.duration_days()) {
        total += days;
        count += 1;
        if days < SHORT_LIVED_DAYS {
            short_total += days;
            short_count += 1;
        }
    }

    DurationStats {
        count,
        mean_days:       if count > 0 { total / count as f64 } else { 0.0 },
        short_count,
        short_mean_days: if short_count > 0 { short_total / short_count as f64 } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Asn, MoasEvent};
    use chrono::{Duration, TimeZone, Utc};

    fn interval(month: u32, day: u32) -> IntervalId {
        IntervalId::new("route-views2", Utc.with_ymd_and_hms(2017, month, day, 0, 0, 0).unwrap())
    }

    fn summary(id: IntervalId, events: &[(&str, &[u32])]) -> IntervalSummary {
        let moas_events: Vec<MoasEvent> = events
            .iter()
            .map(|(p, o)| MoasEvent { prefix: p.to_string(), origins: o.iter().map(|&a| Asn(a)).collect() })
            .collect();
        IntervalSummary {
            end:           id.start + Duration::hours(2),
            interval:      id,
            total_updates: 100,
            moas_count:    moas_events.iter().map(|e| e.origins.len() as u64 - 1).sum(),
            moas_events,
        }
    }

    #[test]
    fn three_intervals_count_three() {
        let (i1, i2, i3) = (interval(1, 1), interval(1, 2), interval(1, 3));
        let records = classify(&[
            summary(i1.clone(), &[("10.0.0.0/24", &[1, 2])]),
            summary(i2, &[("10.0.0.0/24", &[1, 3])]),
            summary(i3.clone(), &[("10.0.0.0/24", &[2, 4])]),
        ]);
        let r = &records["10.0.0.0/24"];
        assert_eq!(r.last_seen_changes, 3);
        assert_eq!(r.first_seen, i1);
        assert_eq!(r.last_seen, i3);
        assert!(!r.is_single_session());
        assert_eq!(r.origins, [1, 2, 3, 4].into_iter().map(Asn).collect::<BTreeSet<_>>());
        assert_eq!(r.duration_days(), Some(2.0));
    }

    #[test]
    fn input_order_does_not_matter() {
        let (i1, i2, i3) = (interval(2, 1), interval(2, 2), interval(2, 3));
        let forward = classify(&[
            summary(i1.clone(), &[("192.0.2.0/24", &[1, 2])]),
            summary(i2.clone(), &[("192.0.2.0/24", &[1, 2])]),
            summary(i3.clone(), &[("192.0.2.0/24", &[1, 2])]),
        ]);
        let shuffled = classify(&[
            summary(i3, &[("192.0.2.0/24", &[1, 2])]),
            summary(i1.clone(), &[("192.0.2.0/24", &[1, 2])]),
            summary(i2, &[("192.0.2.0/24", &[1, 2])]),
        ]);
        assert_eq!(forward, shuffled);
        assert_eq!(shuffled["192.0.2.0/24"].first_seen, i1);
    }

    #[test]
    fn several_events_in_one_interval_stay_single_session() {
        let i1 = interval(3, 1);
        let mut tracker = SessionTracker::new();
        let mut s = summary(i1.clone(), &[("10.1.0.0/16", &[1, 2, 3])]);
        s.moas_events.push(MoasEvent { prefix: "10.1.0.0/16".into(), origins: vec![Asn(4)] });
        tracker.ingest(&s);
        let records = tracker.finish();
        let r = &records["10.1.0.0/16"];
        assert!(r.is_single_session());
        assert_eq!(r.last_seen_changes, 1);
        assert_eq!(r.duration_days(), None);
    }

    #[test]
    fn intervals_without_events_do_not_extend_sessions() {
        // Interval 2 sees the prefix from origin 100 only, so it has no event.
        let (i1, i2) = (interval(4, 1), interval(4, 2));
        let records = classify(&[
            summary(i1.clone(), &[("10.0.0.0/24", &[100, 200])]),
            summary(i2, &[]),
        ]);
        let r = &records["10.0.0.0/24"];
        assert_eq!(r.first_seen, i1);
        assert_eq!(r.last_seen, i1);
        assert!(r.is_single_session());
    }

    #[test]
    fn announcements_flow_through_archive_into_sessions() {
        use crate::archive;
        use crate::engine::detector::detect;
        use crate::events::Announcement;

        let (i1, i2) = (interval(5, 1), interval(5, 2));
        let first = detect(
            i1.clone(),
            i1.start + Duration::hours(2),
            vec![
                Announcement::new("10.0.0.0/24", "3356 100"),
                Announcement::new("10.0.0.0/24", "1299 200"),
                Announcement::new("10.0.0.0/24", "174 100"),
            ],
        );
        let second = detect(
            i2.clone(),
            i2.start + Duration::hours(2),
            vec![Announcement::new("10.0.0.0/24", "3356 100")],
        );
        assert_eq!(first.moas_count, 1);
        assert_eq!(second.moas_count, 0);

        let archived: Vec<IntervalSummary> = [second, first]
            .iter()
            .map(|s| archive::parse(&archive::render(s)).unwrap())
            .collect();
        let records = classify(&archived);

        assert_eq!(records.len(), 1);
        let r = &records["10.0.0.0/24"];
        assert_eq!(r.origins, [Asn(100), Asn(200)].into_iter().collect());
        assert_eq!(r.first_seen, i1);
        assert_eq!(r.last_seen, i1);
        assert_eq!(r.last_seen_changes, 1);
        assert!(r.is_single_session());
    }

    #[test]
    fn session_files_use_fixed_layout() {
        let records = classify(&[
            summary(interval(1, 1), &[("10.0.0.0/24", &[200, 100]), ("10.9.0.0/24", &[5, 6])]),
            summary(interval(1, 5), &[("10.9.0.0/24", &[7, 5])]),
        ]);
        let single: Vec<_> = records.values().filter(|r| r.is_single_session()).collect();
        let multi: Vec<_> = records.values().filter(|r| !r.is_single_session()).collect();
        assert_eq!(
            render_single(single),
            "Prefix: 10.0.0.0/24\n  Seen in: summary_route-views2_20170101_0000.txt\n  Origin ASNs: 100, 200\n\n"
        );
        assert_eq!(
            render_multi(multi),
            "Prefix: 10.9.0.0/24\n  First Seen: summary_route-views2_20170101_0000.txt\n  \
             Last Seen: summary_route-views2_20170105_0000.txt\n  Last Seen Changes: 2\n  \
             Origin ASNs: 5, 6, 7\n\n"
        );
    }

    #[test]
    fn single_session_file_parses_back() {
        let records = classify(&[summary(interval(6, 3), &[("10.0.0.0/24", &[1, 2]), ("10.2.0.0/24", &[3, 4])])]);
        let text = render_single(records.values());
        let parsed = parse_single_sessions(&text).unwrap();
        assert_eq!(parsed, records.values().cloned().collect::<Vec<_>>());
    }

    #[test]
    fn durations_split_short_lived() {
        let records = classify(&[
            summary(interval(1, 1), &[("a", &[1, 2]), ("b", &[1, 2])]),
            summary(interval(1, 11), &[("a", &[1, 2])]),
            summary(interval(3, 2), &[("b", &[1, 2])]),
            summary(interval(5, 1), &[("c", &[1, 2])]),
        ]);
        let stats = duration_stats(records.values());
        assert_eq!(stats.count, 2);
        assert_eq!(stats.short_count, 1);
        assert_eq!(stats.short_mean_days, 10.0);
        assert_eq!(stats.mean_days, (10.0 + 60.0) / 2.0);
    }

    #[tokio::test]
    async fn yearly_files_group_single_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let y2018 = IntervalId::new("route-views.sg", Utc.with_ymd_and_hms(2018, 1, 1, 12, 0, 0).unwrap());
        let records = classify(&[
            summary(interval(1, 1), &[("10.0.0.0/24", &[1, 2])]),
            summary(y2018, &[("10.3.0.0/24", &[1, 2])]),
        ]);
        let written = write_single_sessions_by_year(dir.path(), &records).await.unwrap();
        assert_eq!(written.len(), 2);
        let text = std::fs::read_to_string(dir.path().join("one_session_2018.txt")).unwrap();
        assert!(text.contains("10.3.0.0/24"));
        assert!(!text.contains("10.0.0.0/24"));

        write_sessions(dir.path(), &records).await.unwrap();
        assert!(dir.path().join(SINGLE_SESSION_FILE).exists());
        assert!(dir.path().join(MULTI_SESSION_FILE).exists());
    }
}
