// moaswatch/src/engine/detector.rs
//
// Streaming MOAS detector, one instance per collector interval.
//
// For every announcement the origin (rightmost AS hop) is compared against the
// origins already seen for that prefix in this interval:
//
//   first origin for the prefix      → becomes the baseline, no event
//   origin already seen              → nothing
//   new origin, prefix already known → MOAS contribution: moas_count += 1 and
//                                      the origin is appended to the prefix's
//                                      event (seeded with the prior origins)
//
// moas_count therefore counts origin introductions, not affected prefixes:
// origins [A, B, C] contribute 2.
//
// Withdrawals and other element types are ignored. Announcements without a
// usable prefix or origin still count toward total_updates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::events::{Announcement, Asn, IntervalId, IntervalSummary, MoasEvent, RecordKind};

pub struct MoasDetector {
    interval:      IntervalId,
    end:           DateTime<Utc>,
    origins:       HashMap<String, Vec<Asn>>, // prefix → origins in insertion order
    events:        Vec<MoasEvent>,
    event_idx:     HashMap<String, usize>,    // prefix → position in `events`
    total_updates: u64,
    moas_count:    u64,
    malformed:     u64,
}

impl MoasDetector {
    pub fn new(interval: IntervalId, end: DateTime<Utc>) -> Self {
        Self {
            interval,
            end,
            origins:       HashMap::new(),
            events:        Vec::new(),
            event_idx:     HashMap::new(),
            total_updates: 0,
            moas_count:    0,
            malformed:     0,
        }
    }

    pub fn observe(&mut self, record: &Announcement) {
        if record.kind != RecordKind::Announcement {
            return;
        }
        self.total_updates += 1;

        let prefix = match record.prefix.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => p,
            _ => {
                self.malformed += 1;
                return;
            }
        };
        let origin = match record.origin() {
            Some(o) => o,
            None => {
                self.malformed += 1;
                return;
            }
        };

        let seen = self.origins.entry(prefix.to_string()).or_default();
        if seen.contains(&origin) {
            return;
        }

        if !seen.is_empty() {
            self.moas_count += 1;
            let idx = match self.event_idx.get(prefix) {
                Some(&i) => i,
                None => {
                    self.events.push(MoasEvent { prefix: prefix.to_string(), origins: seen.clone() });
                    self.event_idx.insert(prefix.to_string(), self.events.len() - 1);
                    self.events.len() - 1
                }
            };
            self.events[idx].origins.push(origin);
            debug!("MOAS {} new_origin={} origins={:?}", prefix, origin, self.events[idx].origins);
        }
        seen.push(origin);
    }

    /// Announcements counted in total_updates but unusable for origin tracking.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn finish(self) -> IntervalSummary {
        IntervalSummary {
            interval:      self.interval,
            end:           self.end,
            total_updates: self.total_updates,
            moas_count:    self.moas_count,
            moas_events:   self.events,
        }
    }
}

/// Run the detector over one interval's announcement stream.
pub fn detect<I>(interval: IntervalId, end: DateTime<Utc>, stream: I) -> IntervalSummary
where
    I: IntoIterator<Item = Announcement>,
{
    let mut detector = MoasDetector::new(interval, end);
    for record in stream {
        detector.observe(&record);
    }
    detector.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn interval() -> (IntervalId, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2017, 7, 1, 0, 0, 0).unwrap();
        (IntervalId::new("route-views2", start), start + Duration::hours(2))
    }

    fn run(records: Vec<Announcement>) -> IntervalSummary {
        let (id, end) = interval();
        detect(id, end, records)
    }

    #[test]
    fn distinct_prefixes_produce_no_events() {
        let records: Vec<_> = (0..50)
            .map(|i| Announcement::new(&format!("10.{}.0.0/16", i), "3356 64500"))
            .collect();
        let s = run(records);
        assert_eq!(s.total_updates, 50);
        assert_eq!(s.moas_count, 0);
        assert!(s.moas_events.is_empty());
    }

    #[test]
    fn three_origins_contribute_two() {
        let s = run(vec![
            Announcement::new("10.0.0.0/24", "3356 100"),
            Announcement::new("10.0.0.0/24", "1299 200"),
            Announcement::new("10.0.0.0/24", "174 100"),
            Announcement::new("10.0.0.0/24", "6939 300"),
        ]);
        assert_eq!(s.total_updates, 4);
        assert_eq!(s.moas_count, 2);
        assert_eq!(s.origins_for("10.0.0.0/24"), Some(&[Asn(100), Asn(200), Asn(300)][..]));
    }

    #[test]
    fn events_keep_first_conflict_order() {
        let s = run(vec![
            Announcement::new("192.0.2.0/24", "1 10"),
            Announcement::new("198.51.100.0/24", "1 20"),
            Announcement::new("198.51.100.0/24", "1 21"),
            Announcement::new("192.0.2.0/24", "1 11"),
        ]);
        let prefixes: Vec<_> = s.moas_events.iter().map(|e| e.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["198.51.100.0/24", "192.0.2.0/24"]);
    }

    #[test]
    fn malformed_announcements_count_but_do_not_track() {
        let (id, end) = interval();
        let mut d = MoasDetector::new(id, end);
        d.observe(&Announcement { kind: RecordKind::Announcement, prefix: None, as_path: Some("1 2".into()) });
        d.observe(&Announcement { kind: RecordKind::Announcement, prefix: Some("10.0.0.0/8".into()), as_path: None });
        d.observe(&Announcement::new("10.0.0.0/8", "1 {2,3}"));
        d.observe(&Announcement::new("10.0.0.0/8", "1 2"));
        assert_eq!(d.malformed(), 3);
        let s = d.finish();
        assert_eq!(s.total_updates, 4);
        assert_eq!(s.moas_count, 0);
    }

    #[test]
    fn withdrawals_are_ignored() {
        let s = run(vec![
            Announcement::new("10.0.0.0/24", "1 100"),
            Announcement { kind: RecordKind::Withdrawal, prefix: Some("10.0.0.0/24".into()), as_path: Some("1 200".into()) },
        ]);
        assert_eq!(s.total_updates, 1);
        assert_eq!(s.moas_count, 0);
    }

    #[test]
    fn rerun_is_identical() {
        let records = vec![
            Announcement::new("10.0.0.0/24", "1 100"),
            Announcement::new("10.0.0.0/24", "1 200"),
            Announcement::new("10.1.0.0/24", "1 300"),
            Announcement::new("10.1.0.0/24", "1 400"),
        ];
        assert_eq!(run(records.clone()), run(records));
    }
}
