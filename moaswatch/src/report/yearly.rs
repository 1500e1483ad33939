// moaswatch/src/report/yearly.rs
//
// Per-year MOAS table.
//
//   Year      Announcements  MOAS Count     MOAS Ratio     Short-Lived MOAS
//   ======================================================================
//   2017      1523004        8123           0.005334       412

use std::collections::BTreeMap;

use crate::events::{IntervalSummary, PrefixSessionRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct YearRow {
    pub year:          i32,
    pub announcements: u64,
    pub moas:          u64,
    /// Single-session prefixes whose interval falls in this year.
    pub short_lived:   usize,
}

impl YearRow {
    pub fn ratio(&self) -> f64 {
        if self.announcements == 0 { 0.0 } else { self.moas as f64 / self.announcements as f64 }
    }
}

pub fn yearly_table(
    summaries: &[IntervalSummary],
    sessions:  &BTreeMap<String, PrefixSessionRecord>,
) -> Vec<YearRow> {
    let mut rows: BTreeMap<i32, YearRow> = BTreeMap::new();
    for s in summaries {
        let r = row_for(&mut rows, s.interval.year());
        r.announcements += s.total_updates;
        r.moas += s.moas_count;
    }
    for record in sessions.values().filter(|r| r.is_single_session()) {
        row_for(&mut rows, record.first_seen.year()).short_lived += 1;
    }
    rows.into_values().collect()
}

fn row_for(rows: &mut BTreeMap<i32, YearRow>, year: i32) -> &mut YearRow {
    rows.entry(year).or_insert_with(|| YearRow { year, ..Default::default() })
}

pub fn render_table(rows: &[YearRow]) -> String {
    let mut out = format!(
        "{:<10}{:<15}{:<15}{:<15}{:<10}\n",
        "Year", "Announcements", "MOAS Count", "MOAS Ratio", "Short-Lived MOAS"
    );
    out.push_str(&"=".repeat(70));
    out.push('\n');
    for r in rows {
        out.push_str(&format!(
            "{:<10}{:<15}{:<15}{:<15}{:<10}\n",
            r.year,
            r.announcements,
            r.moas,
            format!("{:.6}", r.ratio()),
            r.short_lived
        ));
    }
    out
}
