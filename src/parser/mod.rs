//! XML record extraction for point-sensor and pair-sensor documents.
//!
//! A document yields zero records (not an error) when no valid time bucket
//! can be derived for it; malformed XML is an [`ExtractError`] for that
//! document only. Elements missing a required child are skipped and counted.

mod bucket;
mod pair;
mod point;
pub mod xml;

pub use bucket::{derive_bucket, hhmm_from_file_name, parse_update_time};
pub use pair::split_pair_id;

use thiserror::Error;
use tracing::debug;

use crate::types::{FeedKind, LaneObservation, PairObservation, RawFeedFile, TimeBucket};
use self::xml::{Element, ElementLookup};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("malformed XML: {0}")]
    Xml(#[from] ::xml::reader::Error),

    #[error("document has no root element")]
    EmptyDocument,
}

/// Records from one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted<T> {
    pub records: Vec<T>,
    /// `None` when the document was skipped for lack of a valid bucket.
    pub bucket: Option<TimeBucket>,
    /// Station, lane or pair elements dropped for missing required children.
    pub skipped: usize,
}

impl<T> Extracted<T> {
    fn new(bucket: TimeBucket) -> Self {
        Self {
            records: Vec::new(),
            bucket: Some(bucket),
            skipped: 0,
        }
    }

    fn unbucketed() -> Self {
        Self {
            records: Vec::new(),
            bucket: None,
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Lanes(Extracted<LaneObservation>),
    Pairs(Extracted<PairObservation>),
}

impl Extraction {
    pub fn bucket(&self) -> Option<TimeBucket> {
        match self {
            Extraction::Lanes(e) => e.bucket,
            Extraction::Pairs(e) => e.bucket,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Extraction::Lanes(e) => e.records.len(),
            Extraction::Pairs(e) => e.records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extracts typed observations from `document`, dispatching on `kind`.
pub fn extract(document: &RawFeedFile, kind: FeedKind) -> Result<Extraction, ExtractError> {
    match kind {
        FeedKind::PointSensor => extract_lanes(document).map(Extraction::Lanes),
        FeedKind::PairSensor => extract_pairs(document).map(Extraction::Pairs),
    }
}

pub fn extract_lanes(document: &RawFeedFile) -> Result<Extracted<LaneObservation>, ExtractError> {
    let root = Element::parse(&document.payload)?;
    Ok(match bucket_for(&root, document, FeedKind::PointSensor) {
        Some((bucket, update_time)) => point::extract_lanes(&root, bucket, update_time),
        None => Extracted::unbucketed(),
    })
}

pub fn extract_pairs(document: &RawFeedFile) -> Result<Extracted<PairObservation>, ExtractError> {
    let root = Element::parse(&document.payload)?;
    Ok(match bucket_for(&root, document, FeedKind::PairSensor) {
        Some((bucket, update_time)) => pair::extract_pairs(&root, bucket, update_time),
        None => Extracted::unbucketed(),
    })
}

fn bucket_for(
    root: &Element,
    document: &RawFeedFile,
    kind: FeedKind,
) -> Option<(TimeBucket, Option<chrono::NaiveDateTime>)> {
    let update_time = ElementLookup::Qualified
        .top_level_text(root, "UpdateTime")
        .and_then(parse_update_time);

    let bucket = derive_bucket(
        document.file_name(),
        update_time,
        document.provenance.date,
        kind.sampling_interval(),
    );
    if bucket.is_none() {
        debug!(source = %document.provenance.source, "No valid time bucket, skipping document");
    }
    bucket.map(|b| (b, update_time))
}
