//! Record types shared by the extraction, reconciliation and loading stages.

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// The two live XML feeds published by the freeway open-data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedKind {
    /// Vehicle detectors (VD) reporting per-lane speed, occupancy and volume.
    PointSensor,
    /// ETag reader pairs reporting travel time and vehicle count per segment.
    PairSensor,
}

impl FeedKind {
    /// Native sampling interval of the feed, in minutes.
    pub fn sampling_interval(self) -> u32 {
        match self {
            FeedKind::PointSensor => 1,
            FeedKind::PairSensor => 5,
        }
    }

    /// Directory segment used both upstream and in the local work tree.
    pub fn dir_name(self) -> &'static str {
        match self {
            FeedKind::PointSensor => "VD",
            FeedKind::PairSensor => "ETag",
        }
    }

    /// File-name stem of one live snapshot, e.g. `VDLive` in `VDLive_0805.xml`.
    pub fn file_stem(self) -> &'static str {
        match self {
            FeedKind::PointSensor => "VDLive",
            FeedKind::PairSensor => "ETagPairLive",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// The (date, hour, minute) granularity at which observations are bucketed.
///
/// Field order matters: the derived `Ord` sorts buckets chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeBucket {
    pub date: NaiveDate,
    pub hour: u32,
    pub minute: u32,
}

impl TimeBucket {
    /// Returns `None` unless `hour` is in `0..=23` and `minute` in `0..=59`.
    pub fn new(date: NaiveDate, hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self { date, hour, minute })
    }

    /// Floors the minute to a multiple of `interval`.
    pub fn floor_to(self, interval: u32) -> Self {
        if interval <= 1 {
            return self;
        }
        Self {
            minute: self.minute - self.minute % interval,
            ..self
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:{:02}", self.date, self.hour, self.minute)
    }
}

/// Where a payload came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub kind: FeedKind,
    pub date: NaiveDate,
    /// Slice the payload was requested for; `None` for files imported from disk.
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    /// Source URL, or the local path for imported files.
    pub source: String,
}

/// An immutable retrieved document. Dropped once its batch has been loaded.
#[derive(Debug, Clone)]
pub struct RawFeedFile {
    pub payload: Bytes,
    pub provenance: Provenance,
}

impl RawFeedFile {
    pub fn new(payload: impl Into<Bytes>, provenance: Provenance) -> Self {
        Self {
            payload: payload.into(),
            provenance,
        }
    }

    /// Last path segment of the source, e.g. `ETagPairLive_0805.xml.gz`.
    pub fn file_name(&self) -> &str {
        let source = self.provenance.source.as_str();
        let trimmed = source.split(['?', '#']).next().unwrap_or(source);
        trimmed
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(trimmed)
    }

    /// Reads a local file, using its path as the source.
    pub fn from_path(path: &Path, kind: FeedKind, date: NaiveDate) -> std::io::Result<Self> {
        let payload = std::fs::read(path)?;
        Ok(Self::new(
            payload,
            Provenance {
                kind,
                date,
                hour: None,
                minute: None,
                source: path.display().to_string(),
            },
        ))
    }
}

/// One lane of one point-sensor snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneObservation {
    pub update_time: Option<NaiveDateTime>,
    pub station_id: String,
    pub lane_id: String,
    pub lane_type: Option<String>,
    pub speed: f64,
    pub occupancy: f64,
    pub volume: i64,
    pub date: NaiveDate,
    pub hour: u32,
    pub minute: u32,
}

impl LaneObservation {
    pub fn bucket(&self) -> TimeBucket {
        TimeBucket {
            date: self.date,
            hour: self.hour,
            minute: self.minute,
        }
    }
}

/// One monitored road segment of one pair-sensor snapshot, with its
/// per-vehicle-class flows already combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairObservation {
    pub update_time: Option<NaiveDateTime>,
    /// Raw `"<startEtag>-<endEtag>"` identifier.
    pub pair_id: String,
    pub start_station: String,
    pub end_station: String,
    pub travel_time_seconds: f64,
    pub mean_speed: f64,
    pub vehicle_count: u32,
    pub date: NaiveDate,
    pub hour: u32,
    pub minute: u32,
}

impl PairObservation {
    pub fn bucket(&self) -> TimeBucket {
        TimeBucket {
            date: self.date,
            hour: self.hour,
            minute: self.minute,
        }
    }
}

/// Reconciled identity of a physical station.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-station flow for one bucket, derived from pair observations.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedFlowRecord {
    pub canonical_key: CanonicalKey,
    pub station_index: usize,
    pub bucket: TimeBucket,
    pub total_vehicle_count: u64,
    pub weighted_travel_time: f64,
    pub weighted_speed: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
    }

    #[test]
    fn test_bucket_rejects_out_of_range() {
        assert!(TimeBucket::new(date(), 24, 0).is_none());
        assert!(TimeBucket::new(date(), 23, 60).is_none());
        assert!(TimeBucket::new(date(), 23, 59).is_some());
    }

    #[test]
    fn test_bucket_floor_to_interval() {
        let bucket = TimeBucket::new(date(), 8, 7).unwrap();
        assert_eq!(bucket.floor_to(5).minute, 5);
        assert_eq!(bucket.floor_to(1).minute, 7);
    }

    #[test]
    fn test_buckets_sort_chronologically() {
        let later = TimeBucket::new(date(), 9, 0).unwrap();
        let earlier = TimeBucket::new(date(), 8, 55).unwrap();
        assert!(earlier < later);
    }

    #[test]
    fn test_file_name_strips_url_path() {
        let raw = RawFeedFile::new(
            Vec::new(),
            Provenance {
                kind: FeedKind::PairSensor,
                date: date(),
                hour: Some(8),
                minute: Some(5),
                source: "https://example.org/history/motc20/ETag/20250401/ETagPairLive_0805.xml.gz"
                    .to_string(),
            },
        );
        assert_eq!(raw.file_name(), "ETagPairLive_0805.xml.gz");
    }
}
