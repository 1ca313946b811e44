//! Per-date orchestration.
//!
//! One task per date runs on a bounded pool; inside a date, slices are
//! fetched, extracted, reconciled, aggregated and loaded one after another
//! in increasing time order. Slice-level failures are absorbed into the
//! date's [`RunSummary`]; only a systemic store failure ends a date early.

mod dates;
mod pool;

pub use dates::{DateFilter, date_range};
pub use pool::run_bounded;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::aggregate::aggregate_reconciled;
use crate::config::PipelineConfig;
use crate::fetch::{Fetcher, HttpClient};
use crate::parser::{self, ExtractError};
use crate::reconcile::{ReconcilerIndex, UnresolvedTally, reconcile_pairs};
use crate::source::{Resource, Slice};
use crate::stats::RunSummary;
use crate::store::{LoadError, Loader, PairRow, TableRow, Tables};
use crate::types::{FeedKind, Provenance, RawFeedFile};

/// Extraction-to-load path for a single document.
pub struct Ingestor {
    loader: Loader,
    tables: Tables,
    index: Option<Arc<ReconcilerIndex>>,
}

impl Ingestor {
    /// Without an index every pair-sensor endpoint counts as unresolved.
    pub fn new(loader: Loader, tables: Tables, index: Option<Arc<ReconcilerIndex>>) -> Self {
        Self {
            loader,
            tables,
            index,
        }
    }

    /// Extracts and loads `document`. Parse failures and rejected batches
    /// are counted in `summary`; only a systemic store failure is returned.
    pub async fn ingest(
        &self,
        document: &RawFeedFile,
        summary: &mut RunSummary,
        unresolved: &mut UnresolvedTally,
    ) -> Result<(), LoadError> {
        let source = document.provenance.source.as_str();

        match document.provenance.kind {
            FeedKind::PointSensor => {
                let extracted = match parser::extract_lanes(document) {
                    Ok(extracted) => extracted,
                    Err(e) => {
                        parse_failed(source, e, summary);
                        return Ok(());
                    }
                };
                count_extracted(
                    summary,
                    extracted.bucket.is_none(),
                    extracted.records.len(),
                    extracted.skipped,
                );

                self.load(&extracted.records, &self.tables.lanes, source, summary)
                    .await
            }
            FeedKind::PairSensor => {
                let extracted = match parser::extract_pairs(document) {
                    Ok(extracted) => extracted,
                    Err(e) => {
                        parse_failed(source, e, summary);
                        return Ok(());
                    }
                };
                count_extracted(
                    summary,
                    extracted.bucket.is_none(),
                    extracted.records.len(),
                    extracted.skipped,
                );

                let empty = ReconcilerIndex::default();
                let index = self.index.as_deref().unwrap_or(&empty);
                let reconciled = reconcile_pairs(&extracted.records, index, unresolved);

                let pair_rows: Vec<PairRow> = reconciled
                    .iter()
                    .filter_map(PairRow::from_reconciled)
                    .collect();
                let flows = aggregate_reconciled(&reconciled);

                self.load(&pair_rows, &self.tables.pairs, source, summary)
                    .await?;
                self.load(&flows, &self.tables.flows, source, summary).await
            }
        }
    }

    async fn load<R: TableRow>(
        &self,
        records: &[R],
        table: &str,
        source: &str,
        summary: &mut RunSummary,
    ) -> Result<(), LoadError> {
        match self.loader.load(records, table).await {
            Ok(rows) => {
                summary.rows_loaded += rows;
                Ok(())
            }
            Err(e) if e.is_systemic() => Err(e),
            Err(e) => {
                error!(source, table, attempted = e.attempted(), error = ?e, "Batch rejected");
                summary.batches_rejected += 1;
                summary.records_rejected += e.attempted();
                Ok(())
            }
        }
    }
}

fn parse_failed(source: &str, error: ExtractError, summary: &mut RunSummary) {
    warn!(source, error = %error, "Document parse failed");
    summary.parse_failures += 1;
}

fn count_extracted(summary: &mut RunSummary, unbucketed: bool, records: usize, skipped: usize) {
    if unbucketed {
        summary.documents_skipped += 1;
    }
    summary.records_extracted += records;
    summary.elements_skipped += skipped;
}

/// Counts and unresolved identifiers of one completed date.
#[derive(Debug, Clone, Default)]
pub struct DateReport {
    pub summary: RunSummary,
    pub unresolved: UnresolvedTally,
}

#[derive(Debug, Clone)]
pub enum DateOutcome {
    Completed(DateReport),
    /// The date's task ended early; slices already loaded stay committed.
    Failed { date: NaiveDate, error: String },
}

/// Outcome of every date plus the merged end-of-run total.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<DateOutcome>,
    pub total: RunSummary,
    pub unresolved: UnresolvedTally,
}

impl RunReport {
    fn from_results(results: Vec<(NaiveDate, Result<Result<DateReport, String>, String>)>) -> Self {
        let mut report = RunReport::default();

        for (date, result) in results {
            match result.and_then(|r| r) {
                Ok(done) => {
                    report.total.merge(&done.summary);
                    report.unresolved.merge(&done.unresolved);
                    report.outcomes.push(DateOutcome::Completed(done));
                }
                Err(error) => {
                    error!(date = %date, error = %error, "Date failed");
                    report.outcomes.push(DateOutcome::Failed { date, error });
                }
            }
        }

        report.total.timestamp = Utc::now();
        report.total.unresolved_occurrences = report.unresolved.occurrences();
        report.total.unresolved_distinct = report.unresolved.distinct();
        report
    }

    /// One summary per date, failed dates included.
    pub fn summaries(&self) -> Vec<RunSummary> {
        self.outcomes
            .iter()
            .map(|outcome| match outcome {
                DateOutcome::Completed(done) => done.summary.clone(),
                DateOutcome::Failed { date, error } => {
                    RunSummary::from_error(*date, "worker_error", error)
                }
            })
            .collect()
    }

    pub fn failed_dates(&self) -> Vec<NaiveDate> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                DateOutcome::Failed { date, .. } => Some(*date),
                DateOutcome::Completed(_) => None,
            })
            .collect()
    }
}

pub struct Pipeline<C> {
    fetcher: Fetcher<C>,
    ingestor: Ingestor,
    config: PipelineConfig,
}

impl<C: HttpClient + 'static> Pipeline<C> {
    pub fn new(fetcher: Fetcher<C>, ingestor: Ingestor, config: PipelineConfig) -> Self {
        Self {
            fetcher,
            ingestor,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetches and loads every slice of `kind` for all `dates`.
    pub async fn run(self: Arc<Self>, dates: Vec<NaiveDate>, kind: FeedKind) -> RunReport {
        info!(dates = dates.len(), kind = %kind, concurrency = self.config.concurrency, "Starting run");
        self.fan_out(dates, move |pipeline, date| async move {
            pipeline.run_date(date, kind).await
        })
        .await
    }

    /// Saves every slice of `resource` for all `dates` without parsing.
    pub async fn download(self: Arc<Self>, dates: Vec<NaiveDate>, resource: Resource) -> RunReport {
        info!(dates = dates.len(), resource = %resource, "Starting download");
        self.fan_out(dates, move |pipeline, date| async move {
            Ok::<_, LoadError>(pipeline.download_date(date, resource).await)
        })
        .await
    }

    /// Loads previously downloaded `{root}/{VD|ETag}/{YYYYMMDD}/*.xml` files.
    pub async fn import(self: Arc<Self>, root: &Path, kind: FeedKind) -> Result<RunReport> {
        let kind_dir = root.join(kind.dir_name());
        let dates = dated_dirs(&kind_dir)?;
        info!(dir = %kind_dir.display(), dates = dates.len(), "Starting import");

        Ok(self
            .fan_out(dates, move |pipeline, date| {
                let dir = kind_dir.join(date.format("%Y%m%d").to_string());
                async move { pipeline.import_date(date, &dir, kind).await }
            })
            .await)
    }

    async fn fan_out<F, Fut>(self: Arc<Self>, dates: Vec<NaiveDate>, work: F) -> RunReport
    where
        F: Fn(Arc<Self>, NaiveDate) -> Fut,
        Fut: Future<Output = Result<DateReport, LoadError>> + Send + 'static,
    {
        let concurrency = self.config.concurrency;
        let results = run_bounded(dates, concurrency, move |date| {
            let fut = work(Arc::clone(&self), date);
            async move { fut.await.map_err(|e| format!("{:#}", anyhow::Error::from(e))) }
        })
        .await;
        RunReport::from_results(results)
    }

    /// Processes one date's slices in increasing time order.
    #[tracing::instrument(skip(self), fields(date = %date, kind = %kind))]
    pub async fn run_date(&self, date: NaiveDate, kind: FeedKind) -> Result<DateReport, LoadError> {
        let resource = Resource::Feed(kind);
        let mut summary = RunSummary::for_date(date, kind);
        let mut unresolved = UnresolvedTally::default();

        for slice in resource.slices() {
            summary.slices_attempted += 1;
            let url = resource.url(&self.config.base_url, date, slice);
            let destination = self.slice_path(resource, date, slice);

            let Some(path) = self.fetch_slice(&url, &destination, &mut summary).await else {
                continue;
            };
            let payload = match std::fs::read(&path) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Downloaded slice unreadable");
                    summary.fetch_failures += 1;
                    continue;
                }
            };
            self.discard(&path);

            let document = RawFeedFile::new(
                payload,
                Provenance {
                    kind,
                    date,
                    hour: Some(slice.hour),
                    minute: Some(slice.minute),
                    source: url,
                },
            );
            self.ingestor
                .ingest(&document, &mut summary, &mut unresolved)
                .await?;
        }

        Ok(finish_date(summary, unresolved))
    }

    #[tracing::instrument(skip(self), fields(date = %date, resource = %resource))]
    pub async fn download_date(&self, date: NaiveDate, resource: Resource) -> DateReport {
        let mut summary = RunSummary::for_date(date, resource);

        for slice in resource.slices() {
            summary.slices_attempted += 1;
            let url = resource.url(&self.config.base_url, date, slice);
            let destination = self.slice_path(resource, date, slice);
            self.fetch_slice(&url, &destination, &mut summary).await;
        }

        finish_date(summary, UnresolvedTally::default())
    }

    #[tracing::instrument(skip(self, dir), fields(date = %date, kind = %kind, dir = %dir.display()))]
    pub async fn import_date(
        &self,
        date: NaiveDate,
        dir: &Path,
        kind: FeedKind,
    ) -> Result<DateReport, LoadError> {
        let mut summary = RunSummary::for_date(date, kind);
        let mut unresolved = UnresolvedTally::default();

        let files = match xml_files(dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Cannot list import directory");
                summary.fetch_failures += 1;
                Vec::new()
            }
        };

        for path in files {
            summary.slices_attempted += 1;
            let document = match RawFeedFile::from_path(&path, kind, date) {
                Ok(document) => document,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read import file");
                    summary.fetch_failures += 1;
                    continue;
                }
            };
            self.ingestor
                .ingest(&document, &mut summary, &mut unresolved)
                .await?;
        }

        Ok(finish_date(summary, unresolved))
    }

    fn slice_path(&self, resource: Resource, date: NaiveDate, slice: Slice) -> PathBuf {
        self.config
            .work_dir
            .join(resource.dir_name())
            .join(date.format("%Y%m%d").to_string())
            .join(resource.file_name(date, slice))
    }

    async fn fetch_slice(&self, url: &str, destination: &Path, summary: &mut RunSummary) -> Option<PathBuf> {
        match self.fetcher.fetch(url, destination).await {
            Ok(path) => Some(path),
            Err(e) if e.is_not_found() => {
                debug!(url, "Slice not published");
                summary.slices_missing += 1;
                None
            }
            Err(e) => {
                warn!(url, error = %e, "Slice fetch failed");
                summary.fetch_failures += 1;
                None
            }
        }
    }

    fn discard(&self, path: &Path) {
        if self.config.keep_files {
            return;
        }
        if let Err(e) = std::fs::remove_file(path) {
            debug!(path = %path.display(), error = %e, "Could not remove downloaded slice");
        }
    }
}

fn finish_date(mut summary: RunSummary, unresolved: UnresolvedTally) -> DateReport {
    summary.unresolved_occurrences = unresolved.occurrences();
    summary.unresolved_distinct = unresolved.distinct();
    info!(
        slices = summary.slices_attempted,
        missing = summary.slices_missing,
        failures = summary.failures(),
        records = summary.records_extracted,
        rows = summary.rows_loaded,
        unresolved = summary.unresolved_occurrences,
        "Date finished"
    );
    DateReport {
        summary,
        unresolved,
    }
}

/// Sub-directories of `dir` named `YYYYMMDD`, oldest first.
fn dated_dirs(dir: &Path) -> Result<Vec<NaiveDate>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
    let mut dates = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name();
        match NaiveDate::parse_from_str(&name.to_string_lossy(), "%Y%m%d") {
            Ok(date) => dates.push(date),
            Err(_) => debug!(name = %name.to_string_lossy(), "Skipping non-date directory"),
        }
    }
    dates.sort();
    Ok(dates)
}

/// `*.xml` files of `dir` in name order, which is time order for slice files.
fn xml_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("xml")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_support::StubClient;
    use crate::reconcile::{ReferenceTable, RuleSet};
    use crate::store::ensure_schema;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::io::Write;
    use tempfile::TempDir;

    const BASE: &str = "https://host";

    fn etag_xml(minute_stamp: &str, first_count: u32) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ETagPairLiveList xmlns="http://traffic.transportdata.tw/standard/traffic/schema/">
  <UpdateTime>2025-04-01T{minute_stamp}+08:00</UpdateTime>
  <ETagPairLives>
    <ETagPairLive>
      <ETagPairID>01F0447N-01F0500N</ETagPairID>
      <Flows>
        <Flow><VehicleType>31</VehicleType><TravelTime>300</TravelTime><SpaceMeanSpeed>60</SpaceMeanSpeed><VehicleCount>{first_count}</VehicleCount></Flow>
        <Flow><VehicleType>32</VehicleType><TravelTime>330</TravelTime><SpaceMeanSpeed>55</SpaceMeanSpeed><VehicleCount>5</VehicleCount></Flow>
      </Flows>
    </ETagPairLive>
    <ETagPairLive>
      <ETagPairID>01F0500N-09Z0001N</ETagPairID>
      <Flows><Flow><TravelTime>100</TravelTime><SpaceMeanSpeed>90</SpaceMeanSpeed><VehicleCount>2</VehicleCount></Flow></Flows>
    </ETagPairLive>
  </ETagPairLives>
</ETagPairLiveList>"#
        )
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
    }

    fn etag_url(hhmm: &str) -> String {
        format!("{BASE}/history/motc20/ETag/20250401/ETagPairLive_{hhmm}.xml.gz")
    }

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ensure_schema(&pool, &Tables::default()).await.unwrap();
        pool
    }

    fn index() -> Arc<ReconcilerIndex> {
        let csv = "native_id,latitude,longitude,direction,mileage\n\
                   01F-044.7N,25.06,121.63,N,44.7\n\
                   01F-050.0N,25.04,121.57,N,50.0\n";
        let table = ReferenceTable::from_reader(csv.as_bytes()).unwrap();
        Arc::new(ReconcilerIndex::build(&table, &RuleSet::default()))
    }

    fn pipeline(client: StubClient, pool: &SqlitePool, work_dir: &Path) -> Arc<Pipeline<StubClient>> {
        let config = PipelineConfig {
            base_url: BASE.to_string(),
            work_dir: work_dir.to_path_buf(),
            concurrency: 2,
            ..PipelineConfig::default()
        };
        let ingestor = Ingestor::new(Loader::new(pool.clone()), config.tables.clone(), Some(index()));
        Arc::new(Pipeline::new(Fetcher::new(client), ingestor, config))
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_date_absorbs_slice_failures() {
        let client = StubClient::default()
            .with(&etag_url("0805"), 200, gzip(etag_xml("08:05:00", 10).as_bytes()))
            // served uncompressed despite the suffix
            .with(&etag_url("0810"), 200, etag_xml("08:10:00", 4))
            .with(&etag_url("0815"), 200, "<ETagPairLiveList><broken>")
            .with(&etag_url("0820"), 500, "oops");
        let pool = memory_pool().await;
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(client, &pool, dir.path());

        let report = pipeline.run_date(date(), FeedKind::PairSensor).await.unwrap();
        let summary = &report.summary;

        assert_eq!(summary.slices_attempted, 288);
        assert_eq!(summary.slices_missing, 284);
        assert_eq!(summary.fetch_failures, 1);
        assert_eq!(summary.parse_failures, 1);
        assert_eq!(summary.records_extracted, 4);
        // one unresolved endpoint per good document
        assert_eq!(summary.unresolved_occurrences, 2);
        assert_eq!(summary.unresolved_distinct, 1);

        // two resolved pair rows, two stations per good bucket
        assert_eq!(count(&pool, "etag_data").await, 2);
        assert_eq!(count(&pool, "station_flow").await, 4);
        assert_eq!(summary.rows_loaded, 6);

        let total: i64 = sqlx::query_scalar(
            "SELECT total_vehicle_count FROM station_flow WHERE station_key = '01F-044.7N' AND minute = 5",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(total, 15);

        // 01F-050.0N also takes the reading of the pair whose far end is unknown
        let shared: i64 = sqlx::query_scalar(
            "SELECT total_vehicle_count FROM station_flow WHERE station_key = '01F-050.0N' AND minute = 5",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(shared, 17);

        // downloaded files are removed once parsed
        let day_dir = dir.path().join("ETag").join("20250401");
        assert!(!day_dir.join("ETagPairLive_0805.xml").exists());
    }

    #[tokio::test]
    async fn test_run_fans_out_over_dates() {
        let client = StubClient::default()
            .with(&etag_url("0805"), 200, gzip(etag_xml("08:05:00", 10).as_bytes()));
        let pool = memory_pool().await;
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(client, &pool, dir.path());
        let next_day = date().succ_opt().unwrap();

        let report = pipeline.run(vec![date(), next_day], FeedKind::PairSensor).await;

        assert_eq!(report.outcomes.len(), 2);
        assert!(report.failed_dates().is_empty());
        assert_eq!(report.total.slices_attempted, 2 * 288);
        assert_eq!(report.total.records_extracted, 2);
        assert_eq!(report.total.unresolved_distinct, 1);
        assert_eq!(report.summaries().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_is_counted_not_fatal() {
        let client = StubClient::default()
            .with(&etag_url("0805"), 200, gzip(etag_xml("08:05:00", 10).as_bytes()));
        let pool = memory_pool().await;
        sqlx::query("DROP TABLE station_flow")
            .execute(&pool)
            .await
            .unwrap();
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(client, &pool, dir.path());

        let report = pipeline.run_date(date(), FeedKind::PairSensor).await.unwrap();

        assert_eq!(report.summary.batches_rejected, 1);
        assert_eq!(report.summary.records_rejected, 2);
        assert_eq!(count(&pool, "etag_data").await, 1);
    }

    #[tokio::test]
    async fn test_import_reads_dated_directories() {
        let pool = memory_pool().await;
        let root = TempDir::new().unwrap();
        let day_dir = root.path().join("ETag").join("20250401");
        std::fs::create_dir_all(&day_dir).unwrap();
        std::fs::write(day_dir.join("ETagPairLive_0805.xml"), etag_xml("08:05:00", 10)).unwrap();
        std::fs::write(day_dir.join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir_all(root.path().join("ETag").join("misc")).unwrap();

        let pipeline = pipeline(StubClient::default(), &pool, root.path());
        let report = pipeline.import(root.path(), FeedKind::PairSensor).await.unwrap();

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.total.slices_attempted, 1);
        assert_eq!(count(&pool, "station_flow").await, 2);
        // imported files are left in place
        assert!(day_dir.join("ETagPairLive_0805.xml").exists());
    }

    #[tokio::test]
    async fn test_download_keeps_files_without_loading() {
        let url = format!("{BASE}/history/TDCS/M06A/20250401/08/TDCS_M06A_20250401_080000.csv");
        let client = StubClient::default().with(&url, 200, "a,b\n1,2\n");
        let pool = memory_pool().await;
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(client, &pool, dir.path());

        let report = pipeline
            .download(vec![date()], "M06A".parse::<Resource>().unwrap())
            .await;

        assert_eq!(report.total.slices_attempted, 24);
        assert_eq!(report.total.slices_missing, 23);
        let saved = dir
            .path()
            .join("M06A/20250401/TDCS_M06A_20250401_080000.csv");
        assert_eq!(std::fs::read_to_string(saved).unwrap(), "a,b\n1,2\n");
    }
}
