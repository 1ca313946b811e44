use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::DEFAULT_USER_AGENT;
use crate::source::DEFAULT_BASE_URL;
use crate::store::Tables;

/// Settings shared by every date of one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of the open-data service, without a trailing `/history`.
    pub base_url: String,
    /// Downloaded slices land under `{work_dir}/{VD|ETag|M0xA}/{YYYYMMDD}/`.
    pub work_dir: PathBuf,
    pub timeout: Duration,
    /// Dates processed in parallel.
    pub concurrency: usize,
    /// Keep downloaded files after they have been parsed.
    pub keep_files: bool,
    pub tables: Tables,
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            work_dir: PathBuf::from("data"),
            timeout: Duration::from_secs(30),
            concurrency: 4,
            keep_files: false,
            tables: Tables::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}
