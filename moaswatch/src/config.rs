// moaswatch/src/config.rs
//
// Run configuration. Every section has defaults; a JSON file passed with
// --config overrides any subset of fields:
//
//   {
//     "retry":      { "attempts": 5, "delay_ms": 3000 },
//     "enrichment": { "concurrency": 4 },
//     "weights":    { "rpki": { "less_valid": 3 }, "visibility": { "low_visible": 1 } }
//   }

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::scoring::ScoreWeights;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MoasConfig {
    pub provider:   ProviderConfig,
    pub retry:      RetryConfig,
    pub enrichment: EnrichmentConfig,
    pub weights:    ScoreWeights,
    pub schedule:   ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url:     String,   // RIPEstat data API root
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url:     "https://stat.ripe.net/data".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Fixed-delay retry budget applied to every provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { attempts: 5, delay_ms: 3_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Maximum ASNs fetched concurrently.
    pub concurrency: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Which collector intervals the `plan` / `detect` workflow covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub collectors:             Vec<String>,
    pub years:                  Vec<i32>,
    pub session_times:          Vec<String>, // HH:MM:SS, UTC
    pub session_duration_hours: i64,
}

/// Longest interval a schedule may describe.
pub const MAX_SESSION_HOURS: i64 = 24 * 366;

impl ScheduleConfig {
    /// Interval length, rejected when outside 1..=MAX_SESSION_HOURS.
    pub fn session_duration(&self) -> Result<chrono::Duration> {
        let hours = self.session_duration_hours;
        if !(1..=MAX_SESSION_HOURS).contains(&hours) {
            bail!("schedule.session_duration_hours must be within 1..={}, got {}", MAX_SESSION_HOURS, hours);
        }
        chrono::Duration::try_hours(hours)
            .with_context(|| format!("session duration of {} hours out of range", hours))
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collectors: vec![
                "route-views2".to_string(),
                "route-views.sg".to_string(),
                "route-views.linx".to_string(),
            ],
            years:                  vec![2017, 2018, 2020, 2021, 2022, 2023],
            session_times:          vec!["00:00:00".to_string(), "12:00:00".to_string()],
            session_duration_hours: 2,
        }
    }
}

impl MoasConfig {
    /// Load from a JSON file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            None => Self::default(),
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", p.display()))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.attempts == 0 {
            bail!("retry.attempts must be at least 1");
        }
        if self.enrichment.concurrency == 0 {
            bail!("enrichment.concurrency must be at least 1");
        }
        self.schedule.session_duration()?;
        Ok(())
    }
}
