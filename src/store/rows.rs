use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::Sqlite;
use sqlx::query_builder::Separated;

use crate::reconcile::ReconciledPair;
use crate::types::{AggregatedFlowRecord, CanonicalKey, LaneObservation};

/// A record that maps onto one row of a destination table.
pub trait TableRow {
    /// Column names, in the order [`TableRow::bind_row`] pushes values.
    const COLUMNS: &'static [&'static str];

    fn bind_row(&self, row: &mut Separated<'_, '_, Sqlite, &'static str>);
}

impl TableRow for LaneObservation {
    const COLUMNS: &'static [&'static str] = &[
        "update_time",
        "station_id",
        "lane_id",
        "lane_type",
        "speed",
        "occupancy",
        "volume",
        "date",
        "hour",
        "minute",
    ];

    fn bind_row(&self, row: &mut Separated<'_, '_, Sqlite, &'static str>) {
        row.push_bind(self.update_time)
            .push_bind(self.station_id.clone())
            .push_bind(self.lane_id.clone())
            .push_bind(self.lane_type.clone())
            .push_bind(self.speed)
            .push_bind(self.occupancy)
            .push_bind(self.volume)
            .push_bind(self.date)
            .push_bind(i64::from(self.hour))
            .push_bind(i64::from(self.minute));
    }
}

/// A pair observation whose endpoints both resolved, keyed by canonical
/// station keys rather than raw identifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairRow {
    pub update_time: Option<NaiveDateTime>,
    pub pair_id: String,
    pub from_station: CanonicalKey,
    pub to_station: CanonicalKey,
    pub travel_time: f64,
    pub speed: f64,
    pub vehicle_count: u32,
    pub date: NaiveDate,
    pub hour: u32,
    pub minute: u32,
}

impl PairRow {
    /// `None` unless both endpoints resolved.
    pub fn from_reconciled(pair: &ReconciledPair<'_>) -> Option<Self> {
        let (start, end) = (pair.start?, pair.end?);
        let obs = pair.observation;
        Some(Self {
            update_time: obs.update_time,
            pair_id: obs.pair_id.clone(),
            from_station: start.key.clone(),
            to_station: end.key.clone(),
            travel_time: obs.travel_time_seconds,
            speed: obs.mean_speed,
            vehicle_count: obs.vehicle_count,
            date: obs.date,
            hour: obs.hour,
            minute: obs.minute,
        })
    }
}

impl TableRow for PairRow {
    const COLUMNS: &'static [&'static str] = &[
        "update_time",
        "pair_id",
        "from_station",
        "to_station",
        "travel_time",
        "speed",
        "vehicle_count",
        "date",
        "hour",
        "minute",
    ];

    fn bind_row(&self, row: &mut Separated<'_, '_, Sqlite, &'static str>) {
        row.push_bind(self.update_time)
            .push_bind(self.pair_id.clone())
            .push_bind(self.from_station.as_str().to_string())
            .push_bind(self.to_station.as_str().to_string())
            .push_bind(self.travel_time)
            .push_bind(self.speed)
            .push_bind(i64::from(self.vehicle_count))
            .push_bind(self.date)
            .push_bind(i64::from(self.hour))
            .push_bind(i64::from(self.minute));
    }
}

impl TableRow for AggregatedFlowRecord {
    const COLUMNS: &'static [&'static str] = &[
        "station_key",
        "station_index",
        "date",
        "hour",
        "minute",
        "total_vehicle_count",
        "travel_time",
        "speed",
    ];

    fn bind_row(&self, row: &mut Separated<'_, '_, Sqlite, &'static str>) {
        row.push_bind(self.canonical_key.as_str().to_string())
            .push_bind(i64::try_from(self.station_index).unwrap_or(i64::MAX))
            .push_bind(self.bucket.date)
            .push_bind(i64::from(self.bucket.hour))
            .push_bind(i64::from(self.bucket.minute))
            .push_bind(i64::try_from(self.total_vehicle_count).unwrap_or(i64::MAX))
            .push_bind(self.weighted_travel_time)
            .push_bind(self.weighted_speed);
    }
}
