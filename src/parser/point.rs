//! Point-sensor (VD) documents: `Lane` elements nested under `VDLive` (or
//! `VD`) station elements.

use chrono::NaiveDateTime;
use tracing::debug;

use super::Extracted;
use super::xml::{Element, ElementLookup, coerce_f64, coerce_i64};
use crate::types::{LaneObservation, TimeBucket};

const STATION_TAGS: [&str; 2] = ["VDLive", "VD"];

pub(crate) fn extract_lanes(
    root: &Element,
    bucket: TimeBucket,
    update_time: Option<NaiveDateTime>,
) -> Extracted<LaneObservation> {
    let mut out = Extracted::new(bucket);

    let Some((lookup, station_tag)) = ElementLookup::detect(root, &STATION_TAGS) else {
        debug!("No VD station elements in document");
        return out;
    };

    for station in lookup.descendants(root, station_tag) {
        let Some(station_id) = lookup
            .child_text(station, "VDID")
            .filter(|id| !id.is_empty())
        else {
            out.skipped += 1;
            continue;
        };

        for lane in lookup.descendants(station, "Lane") {
            match lane_observation(lookup, lane, station_id, bucket, update_time) {
                Some(obs) => out.records.push(obs),
                None => out.skipped += 1,
            }
        }
    }

    out
}

fn lane_observation(
    lookup: ElementLookup,
    lane: &Element,
    station_id: &str,
    bucket: TimeBucket,
    update_time: Option<NaiveDateTime>,
) -> Option<LaneObservation> {
    let lane_id = lookup.child_text(lane, "LaneID").filter(|id| !id.is_empty())?;
    let speed = lookup.child_text(lane, "Speed")?;
    let occupancy = lookup.child_text(lane, "Occupancy")?;

    Some(LaneObservation {
        update_time,
        station_id: station_id.to_string(),
        lane_id: lane_id.to_string(),
        lane_type: lookup
            .child_text(lane, "LaneType")
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        speed: coerce_f64(Some(speed)),
        occupancy: coerce_f64(Some(occupancy)),
        volume: lane_volume(lookup, lane),
        date: bucket.date,
        hour: bucket.hour,
        minute: bucket.minute,
    })
}

/// A direct `Volume` child wins; otherwise per-vehicle-class volumes are
/// summed, ignoring the negative values reported by faulted detectors.
fn lane_volume(lookup: ElementLookup, lane: &Element) -> i64 {
    if let Some(volume) = lookup.child_text(lane, "Volume") {
        return coerce_i64(Some(volume));
    }
    lookup
        .descendants(lane, "Vehicle")
        .into_iter()
        .map(|vehicle| coerce_i64(lookup.child_text(vehicle, "Volume")))
        .filter(|v| *v > 0)
        .sum()
}
