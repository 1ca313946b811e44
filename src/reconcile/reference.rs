//! Reference station table loading.
//!
//! Accepts both plain English headers (`native_id`, `latitude`, ...) and the
//! headers of the published ETag location sheet, where the hyphenated
//! identifier is the second of two `編號` columns.

use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("failed to open reference table {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed reference table: {0}")]
    Csv(#[from] csv::Error),

    #[error("reference table has no `{0}` column")]
    MissingColumn(&'static str),

    #[error("reference table has no station rows")]
    Empty,
}

/// One physical station as listed in the reference table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceRow {
    pub native_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub direction: String,
    pub mileage: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    rows: Vec<ReferenceRow>,
}

const NATIVE_COLUMNS: [&str; 4] = ["native_id", "etag_id", "編號.1", "etagid"];
const LATITUDE_COLUMNS: [&str; 4] = ["latitude", "lat", "緯度(北緯)", "緯度"];
const LONGITUDE_COLUMNS: [&str; 4] = ["longitude", "lon", "經度(東經)", "經度"];
const DIRECTION_COLUMNS: [&str; 2] = ["direction", "方向"];
const MILEAGE_COLUMNS: [&str; 4] = ["mileage", "收費區設定里程", "設定里程", "里程"];

impl ReferenceTable {
    pub fn from_path(path: &Path) -> Result<Self, ReferenceError> {
        let file = std::fs::File::open(path).map_err(|source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ReferenceError> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = rdr.headers()?.iter().map(normalize_header).collect();

        let native = native_column(&headers).ok_or(ReferenceError::MissingColumn("native_id"))?;
        let latitude = find_column(&headers, &LATITUDE_COLUMNS);
        let longitude = find_column(&headers, &LONGITUDE_COLUMNS);
        let direction = find_column(&headers, &DIRECTION_COLUMNS);
        let mileage = find_column(&headers, &MILEAGE_COLUMNS);

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let native_id = record.get(native).unwrap_or("").trim();
            if native_id.is_empty() {
                continue;
            }
            let number = |col: Option<usize>| {
                col.and_then(|c| record.get(c))
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .unwrap_or(0.0)
            };
            rows.push(ReferenceRow {
                native_id: native_id.to_string(),
                latitude: number(latitude),
                longitude: number(longitude),
                direction: direction
                    .and_then(|c| record.get(c))
                    .map(|d| d.trim().to_string())
                    .unwrap_or_default(),
                mileage: number(mileage),
            });
        }

        if rows.is_empty() {
            return Err(ReferenceError::Empty);
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[ReferenceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FromIterator<ReferenceRow> for ReferenceTable {
    fn from_iter<I: IntoIterator<Item = ReferenceRow>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

/// Header cells in the published sheet carry line breaks and a BOM.
fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{feff}')
        .collect::<String>()
        .to_lowercase()
}

fn find_column(headers: &[String], candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|name| headers.iter().position(|h| h == name))
}

fn native_column(headers: &[String]) -> Option<usize> {
    find_column(headers, &NATIVE_COLUMNS)
        .or_else(|| headers.iter().rposition(|h| h == "編號"))
        .or_else(|| headers.iter().position(|h| h == "id"))
}
