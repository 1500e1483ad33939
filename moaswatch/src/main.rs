// moaswatch/src/main.rs
//
// moaswatch: batch MOAS detection, session tracking and ASN suspicion scoring.
//
// Pipeline:
//   detect        one interval of collector announcements → archive record
//   sessions      whole archive → single / multi session files, durations, yearly table
//   score         implicated origin ASNs → RIPEstat signals → risk report
//   distribution  saved profile file → score histogram + status counts
//
// Usage:
//   moaswatch plan
//   moaswatch detect --input rv2_20170101_0000.jsonl --collector route-views2 --start "2017-01-01 00:00:00"
//   moaswatch sessions
//   moaswatch score --sessions single --year 2017
//   moaswatch distribution --profiles output/asn_profiles_2017.jsonl

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod archive;
mod config;
mod engine;
mod enrich;
mod error;
mod events;
mod provider;
mod report;
mod source;
mod state;
mod workers;

use archive::Archive;
use config::MoasConfig;
use engine::detector::MoasDetector;
use engine::scoring::Scorer;
use enrich::Enricher;
use events::{Asn, IntervalId, IntervalSummary, PrefixSessionRecord, WINDOW_TS_FORMAT};
use provider::RipeStatProvider;
use report::RiskReport;
use source::JsonlSource;
use state::sessions;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "moaswatch",
    about   = "Batch MOAS detection, session tracking and ASN suspicion scoring",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, help = "JSON configuration file (defaults apply when omitted)")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "data", help = "Interval archive directory")]
    archive: PathBuf,

    #[arg(long, default_value = "output", help = "Directory for session files and reports")]
    output: PathBuf,

    #[arg(long, help = "Concurrent ASN enrichments (overrides the config file)")]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every interval of the configured schedule.
    Plan,

    /// Run the detector over one interval's announcements and archive the result.
    Detect {
        #[arg(long, help = "JSONL announcement dump for the interval")]
        input: PathBuf,
        #[arg(long)]
        collector: String,
        #[arg(long, help = "Interval start, \"YYYY-mm-dd HH:MM:SS\" (UTC) or RFC 3339")]
        start: String,
        #[arg(long, help = "Interval end (defaults to start + configured session duration)")]
        end: Option<String>,
    },

    /// Classify prefix sessions across the whole archive.
    Sessions,

    /// Enrich and score the origin ASNs of the selected prefixes.
    Score {
        #[arg(long, value_enum, default_value = "single")]
        sessions: SessionFilter,
        #[arg(long, help = "Only prefixes first seen in this year")]
        year: Option<i32>,
        #[arg(long, help = "Read prefixes from a single-session file instead of the archive")]
        from_file: Option<PathBuf>,
    },

    /// Score distribution and status counts for a saved profile file.
    Distribution {
        #[arg(long)]
        profiles: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SessionFilter {
    Single,
    Multi,
    All,
}

impl SessionFilter {
    fn accepts(self, record: &PrefixSessionRecord) -> bool {
        match self {
            Self::Single => record.is_single_session(),
            Self::Multi => !record.is_single_session(),
            Self::All => true,
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn run_plan(config: &MoasConfig) -> Result<()> {
    let plan = source::plan(&config.schedule)?;
    for collector in &config.schedule.collectors {
        for (start, end) in &plan {
            println!(
                "{}  {} to {}  {}",
                collector,
                start.format(WINDOW_TS_FORMAT),
                end.format(WINDOW_TS_FORMAT),
                IntervalId::new(collector.as_str(), *start).file_name()
            );
        }
    }
    info!("{} intervals per collector, {} collectors", plan.len(), config.schedule.collectors.len());
    Ok(())
}

async fn run_detect(
    config:    &MoasConfig,
    archive:   &Archive,
    input:     &Path,
    collector: String,
    start:     &str,
    end:       Option<&str>,
) -> Result<()> {
    let start = source::parse_timestamp(start)?;
    let end = match end {
        Some(e) => source::parse_timestamp(e)?,
        None => start + config.schedule.session_duration()?,
    };

    // The element reader is a blocking iterator; keep it off the runtime threads.
    let interval = IntervalId::new(collector, start);
    let input = input.to_path_buf();
    let (summary, malformed) = tokio::task::spawn_blocking(move || -> Result<(IntervalSummary, u64)> {
        let mut records = JsonlSource::open(&input)?;
        let mut detector = MoasDetector::new(interval, end);
        for record in records.by_ref() {
            detector.observe(&record);
        }
        let malformed = detector.malformed() + records.skipped();
        Ok((detector.finish(), malformed))
    })
    .await
    .context("detector task failed")??;

    let path = archive.commit(&summary).await?;
    info!(
        "Run summary: interval={} updates={} moas={} ratio={:.6} malformed_skipped={} → {}",
        summary.interval,
        summary.total_updates,
        summary.moas_count,
        summary.moas_ratio(),
        malformed,
        path.display()
    );
    Ok(())
}

async fn run_sessions(archive: &Archive, output: &Path) -> Result<()> {
    let loaded = archive.load_all().await?;
    let records = sessions::classify(&loaded.summaries);

    sessions::write_sessions(output, &records).await?;
    let yearly_files = sessions::write_single_sessions_by_year(output, &records).await?;

    let stats = sessions::duration_stats(records.values());
    println!("Multi-session prefixes: {}", stats.count);
    println!("Overall average duration: {:.2} days", stats.mean_days);
    println!("Short-lived (< {} days): {}", sessions::SHORT_LIVED_DAYS, stats.short_count);
    println!("Short-lived average duration: {:.2} days", stats.short_mean_days);

    let rows = report::yearly::yearly_table(&loaded.summaries, &records);
    let table = report::yearly::render_table(&rows);
    let table_path = output.join("moas_table.txt");
    tokio::fs::write(&table_path, &table)
        .await
        .with_context(|| format!("writing {}", table_path.display()))?;
    print!("{}", table);

    info!(
        "Run summary: intervals={} prefixes={} yearly_files={} malformed_skipped={}",
        loaded.summaries.len(),
        records.len(),
        yearly_files.len(),
        loaded.skipped.len()
    );
    Ok(())
}

async fn run_score(
    config:    &MoasConfig,
    archive:   &Archive,
    output:    &Path,
    filter:    SessionFilter,
    year:      Option<i32>,
    from_file: Option<&Path>,
) -> Result<()> {
    let (records, malformed): (Vec<PrefixSessionRecord>, u64) = match from_file {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let records = sessions::parse_single_sessions(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            (records, 0)
        }
        None => {
            let loaded = archive.load_all().await?;
            let records = sessions::classify(&loaded.summaries)
                .into_values()
                .filter(|r| filter.accepts(r))
                .collect();
            (records, loaded.skipped.len() as u64)
        }
    };
    let records: Vec<PrefixSessionRecord> = records
        .into_iter()
        .filter(|r| year.map_or(true, |y| r.first_seen.year() == y))
        .collect();

    let asns: BTreeSet<Asn> = records.iter().flat_map(|r| r.origins.iter().copied()).collect();
    info!("Scoring {} prefixes, {} distinct origin ASNs", records.len(), asns.len());

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Shutdown requested: no new ASN fetches, in-flight ones will finish");
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    let provider = Arc::new(RipeStatProvider::new(&config.provider)?);
    let enricher = Enricher::new(
        provider,
        config.retry.clone(),
        config.enrichment.concurrency,
        shutdown,
    );
    let started = Instant::now();
    let profiles: BTreeMap<Asn, _> = enricher.enrich_all(asns).await;

    let scorer = Scorer::new(config.weights.clone());
    let suffix = year.map(|y| format!("_{}", y)).unwrap_or_default();
    let report = RiskReport::build(&records, &profiles, &scorer);
    report.write(&output.join(format!("asn_analysis_results{}.txt", suffix))).await?;
    let profile_path = output.join(format!("asn_profiles{}.jsonl", suffix));
    let written = report::write_profiles(&profile_path, profiles.values()).await?;

    for (category, members) in &report.categories {
        info!("{}: {} ASNs", category, members.len());
    }
    let stats = enricher.stats(malformed);
    info!(
        "Run summary: profiles={} ({}) elapsed={:.1}s malformed_skipped={} fallback_asns={} not_evaluated={}",
        written,
        profile_path.display(),
        started.elapsed().as_secs_f64(),
        stats.malformed_skipped,
        stats.fallback_asns,
        stats.not_evaluated
    );
    Ok(())
}

async fn run_distribution(config: &MoasConfig, path: &Path) -> Result<()> {
    let (profiles, skipped) = report::read_profiles(path).await?;
    let scorer = Scorer::new(config.weights.clone());
    print!("{}", report::render_distribution(&report::score_distribution(&scorer, &profiles)));
    println!();
    print!("{}", report::status_counts(&profiles).render());
    info!("Run summary: profiles={} malformed_skipped={}", profiles.len(), skipped);
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("moaswatch=info".parse()?))
        .compact().init();

    let cli = Cli::parse();
    let mut config = MoasConfig::load(cli.config.as_deref())?;
    if let Some(n) = cli.concurrency {
        config.enrichment.concurrency = n;
        config.validate()?;
    }
    let archive = Archive::new(&cli.archive);

    match cli.command {
        Command::Plan => run_plan(&config),
        Command::Detect { input, collector, start, end } => {
            run_detect(&config, &archive, &input, collector, &start, end.as_deref()).await
        }
        Command::Sessions => run_sessions(&archive, &cli.output).await,
        Command::Score { sessions, year, from_file } => {
            run_score(&config, &archive, &cli.output, sessions, year, from_file.as_deref()).await
        }
        Command::Distribution { profiles } => run_distribution(&config, &profiles).await,
    }
}
