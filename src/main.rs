//! CLI entry point for the freeway sensor ingest tool.
//!
//! Provides subcommands for fetching and loading point/pair sensor history,
//! downloading raw slices, importing previously downloaded files, and
//! checking a reference station table.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use freeway_ingest::{
    config::PipelineConfig,
    fetch::{BasicClient, DEFAULT_USER_AGENT, Fetcher, UserAgent},
    output::{append_summaries, print_json, print_pretty},
    pipeline::{DateFilter, Ingestor, Pipeline, RunReport, date_range},
    reconcile::{ReconcilerIndex, ReferenceTable, Resolution, RuleSet},
    source::{DEFAULT_BASE_URL, Resource},
    store::{self, Loader, Tables},
    types::FeedKind,
};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "freeway_ingest")]
#[command(about = "Fetch, normalise and load freeway VD and ETag history", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every slice of a date range, then extract, reconcile and load it
    Run {
        #[command(flatten)]
        dates: DateArgs,

        /// Sensor feed to process
        #[arg(short, long, value_enum)]
        kind: KindArg,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Download raw slices (VD, ETag or TDCS M03A..M08A) without loading them
    Download {
        #[command(flatten)]
        dates: DateArgs,

        /// Resource to download: VD, ETag, M03A, M04A, M05A, M06A, M07A or M08A
        #[arg(short, long)]
        resource: Resource,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Load already downloaded `{dir}/{VD|ETag}/{YYYYMMDD}/*.xml` files
    Import {
        /// Root directory holding the VD/ETag folders
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long, value_enum)]
        kind: KindArg,

        #[command(flatten)]
        common: CommonArgs,
    },
    /// Build the reconciler index from a reference table and report on it
    Stations {
        /// Reference station CSV
        #[arg(long, env = "FREEWAY_REFERENCE_CSV")]
        reference: PathBuf,

        /// JSON rule set for alternate identifier encodings
        #[arg(long, env = "FREEWAY_RULES")]
        rules: Option<PathBuf>,

        /// Identifiers to resolve against the index
        #[arg(value_name = "ID")]
        resolve: Vec<String>,
    },
}

#[derive(Args)]
struct DateArgs {
    /// First date (YYYYMMDD or YYYY-MM-DD)
    #[arg(short, long, value_parser = parse_date)]
    start: NaiveDate,

    /// Last date, inclusive; defaults to the start date
    #[arg(short, long, value_parser = parse_date)]
    end: Option<NaiveDate>,

    /// Which days of the range to process
    #[arg(short, long, value_enum, default_value_t = FilterArg::All)]
    filter: FilterArg,

    /// Holiday to skip when filtering to weekdays (repeatable)
    #[arg(long = "holiday", value_parser = parse_date)]
    holidays: Vec<NaiveDate>,
}

impl DateArgs {
    fn dates(&self) -> Vec<NaiveDate> {
        let filter = match self.filter {
            FilterArg::All => DateFilter::All,
            FilterArg::Weekends => DateFilter::Weekends,
            FilterArg::Weekdays => DateFilter::Weekdays {
                holidays: self.holidays.iter().copied().collect::<BTreeSet<_>>(),
            },
        };
        date_range(self.start, self.end.unwrap_or(self.start), &filter)
    }
}

#[derive(Args)]
struct CommonArgs {
    /// Root URL of the open-data history service
    #[arg(long, env = "FREEWAY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// SQLite database URL
    #[arg(long, env = "FREEWAY_DATABASE_URL", default_value = "sqlite://freeway.db")]
    database_url: String,

    /// Directory downloaded slices are written to
    #[arg(short, long, env = "FREEWAY_WORK_DIR", default_value = "data")]
    work_dir: PathBuf,

    /// Reference station CSV; required for ETag runs
    #[arg(long, env = "FREEWAY_REFERENCE_CSV")]
    reference: Option<PathBuf>,

    /// JSON rule set for alternate identifier encodings
    #[arg(long, env = "FREEWAY_RULES")]
    rules: Option<PathBuf>,

    /// Maximum number of dates processed concurrently
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// HTTP timeout per slice, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Keep downloaded files after parsing
    #[arg(long, default_value_t = false)]
    keep_files: bool,

    /// Do not create missing tables and indexes
    #[arg(long, default_value_t = false)]
    skip_schema: bool,

    /// CSV file to append one summary row per date to
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
}

impl CommonArgs {
    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            base_url: self.base_url.clone(),
            work_dir: self.work_dir.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            concurrency: self.concurrency,
            keep_files: self.keep_files,
            tables: Tables::default(),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Vd,
    Etag,
}

impl From<KindArg> for FeedKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Vd => FeedKind::PointSensor,
            KindArg::Etag => FeedKind::PairSensor,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FilterArg {
    All,
    Weekends,
    Weekdays,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .map_err(|_| format!("`{s}` is not a YYYYMMDD or YYYY-MM-DD date"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/freeway_ingest.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("freeway_ingest.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            dates,
            kind,
            common,
        } => {
            let kind = FeedKind::from(kind);
            let index = load_index(common.reference.as_deref(), common.rules.as_deref())?;
            if kind == FeedKind::PairSensor && index.is_none() {
                bail!("--reference (or FREEWAY_REFERENCE_CSV) is required for ETag runs");
            }

            let loader = open_store(&common).await?;
            let pipeline = build_pipeline(&common, loader, index)?;
            let report = pipeline.run(dates.dates(), kind).await;
            summarize(&report, common.output.as_deref())?;
        }
        Commands::Download {
            dates,
            resource,
            common,
        } => {
            let loader = Loader::new(store::connect_lazy(&common.database_url)?);
            let pipeline = build_pipeline(&common, loader, None)?;
            let report = pipeline.download(dates.dates(), resource).await;
            summarize(&report, common.output.as_deref())?;
        }
        Commands::Import { dir, kind, common } => {
            let kind = FeedKind::from(kind);
            let index = load_index(common.reference.as_deref(), common.rules.as_deref())?;
            if kind == FeedKind::PairSensor && index.is_none() {
                bail!("--reference (or FREEWAY_REFERENCE_CSV) is required for ETag imports");
            }

            let loader = open_store(&common).await?;
            let pipeline = build_pipeline(&common, loader, index)?;
            let report = pipeline.import(&dir, kind).await?;
            summarize(&report, common.output.as_deref())?;
        }
        Commands::Stations {
            reference,
            rules,
            resolve,
        } => {
            let index = load_index(Some(reference.as_path()), rules.as_deref())?
                .context("reference table produced no index")?;

            info!(
                stations = index.len(),
                encodings = index.encodings(),
                collisions = index.collisions(),
                "Reconciler index built"
            );

            for raw in &resolve {
                match index.resolve(raw) {
                    Resolution::Resolved(station) => info!(
                        raw = %raw,
                        key = %station.key,
                        index = station.index,
                        latitude = station.latitude,
                        longitude = station.longitude,
                        direction = %station.direction,
                        mileage = station.mileage,
                        "Resolved"
                    ),
                    Resolution::Unresolved => warn!(raw = %raw, "Unresolved"),
                }
            }
        }
    }

    Ok(())
}

/// Builds the reconciler index; a missing or unreadable reference table is
/// fatal for the whole run.
fn load_index(reference: Option<&Path>, rules: Option<&Path>) -> Result<Option<Arc<ReconcilerIndex>>> {
    let Some(reference) = reference else {
        return Ok(None);
    };
    let rules = match rules {
        Some(path) => RuleSet::load(path)?,
        None => RuleSet::default(),
    };
    let table = ReferenceTable::from_path(reference)
        .with_context(|| format!("loading reference table {}", reference.display()))?;
    let index = ReconcilerIndex::build(&table, &rules);

    info!(
        rows = table.len(),
        stations = index.len(),
        encodings = index.encodings(),
        collisions = index.collisions(),
        "Reference table loaded"
    );
    if index.collisions() > 0 {
        warn!(collisions = index.collisions(), "Identifier encodings shared by several stations");
    }
    Ok(Some(Arc::new(index)))
}

/// Connects to the store; an unreachable store aborts the run.
async fn open_store(common: &CommonArgs) -> Result<Loader> {
    let max_connections = u32::try_from(common.concurrency).unwrap_or(u32::MAX);
    let pool = store::connect(&common.database_url, max_connections)
        .await
        .with_context(|| format!("connecting to {}", common.database_url))?;

    if common.skip_schema {
        info!("Skipping schema creation");
    } else {
        store::ensure_schema(&pool, &Tables::default()).await?;
    }
    Ok(Loader::new(pool))
}

fn build_pipeline(
    common: &CommonArgs,
    loader: Loader,
    index: Option<Arc<ReconcilerIndex>>,
) -> Result<Arc<Pipeline<UserAgent<BasicClient>>>> {
    let config = common.config();
    let client = BasicClient::with_timeout(config.timeout).context("building HTTP client")?;
    let client = UserAgent::new(client, &config.user_agent).context("invalid user agent")?;
    let ingestor = Ingestor::new(loader, config.tables.clone(), index);
    Ok(Arc::new(Pipeline::new(Fetcher::new(client), ingestor, config)))
}

/// Logs the end-of-run totals and appends per-date rows to `output`.
fn summarize(report: &RunReport, output: Option<&Path>) -> Result<()> {
    for summary in report.summaries() {
        print_pretty(&summary);
    }
    print_json(&report.total)?;

    for (raw, count) in report.unresolved.most_frequent(10) {
        warn!(raw, count, "Frequent unresolved identifier");
    }
    let failed = report.failed_dates();
    if !failed.is_empty() {
        warn!(failed = ?failed, "Some dates did not complete; re-run them");
    }

    if let Some(path) = output {
        append_summaries(path, &report.summaries())?;
        info!(path = %path.display(), "Summaries appended");
    }
    Ok(())
}
