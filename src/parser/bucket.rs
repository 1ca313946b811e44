//! Time-bucket derivation: a 4-digit `HHMM` token in the file name wins,
//! otherwise the document's update time is used.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::types::TimeBucket;

/// Parses the document update time, dropping the offset (feeds are local time).
pub fn parse_update_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Hour and minute from the last `HHMM` token of a name like `VDLive_0805.xml.gz`.
pub fn hhmm_from_file_name(file_name: &str) -> Option<(u32, u32)> {
    let stem = file_name.split('.').next().unwrap_or(file_name);
    let token = stem
        .rsplit(['_', '-', ' '])
        .find(|t| t.len() == 4 && t.bytes().all(|b| b.is_ascii_digit()))?;
    let hour = token[..2].parse().ok()?;
    let minute = token[2..].parse().ok()?;
    (hour <= 23 && minute <= 59).then_some((hour, minute))
}

/// Resolves the bucket for one document, or `None` when neither source
/// yields a valid time (the document is then skipped).
pub fn derive_bucket(
    file_name: &str,
    update_time: Option<NaiveDateTime>,
    date: NaiveDate,
    interval: u32,
) -> Option<TimeBucket> {
    let (hour, minute) = hhmm_from_file_name(file_name).or_else(|| {
        use chrono::Timelike;
        update_time.map(|t| (t.hour(), t.minute()))
    })?;
    TimeBucket::new(date, hour, minute).map(|b| b.floor_to(interval))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
    }

    #[test]
    fn test_hhmm_from_file_name() {
        assert_eq!(hhmm_from_file_name("VDLive_0805.xml"), Some((8, 5)));
        assert_eq!(hhmm_from_file_name("ETagPairLive_2355.xml.gz"), Some((23, 55)));
        assert_eq!(hhmm_from_file_name("國三_土城到新竹系統_1210.xml"), Some((12, 10)));
        assert_eq!(hhmm_from_file_name("VDLive_2460.xml"), None);
        assert_eq!(hhmm_from_file_name("VDLive.xml"), None);
        assert_eq!(hhmm_from_file_name("TDCS_M03A_20250401_080500.csv"), None);
    }

    #[test]
    fn test_parse_update_time_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 4, 1)
            .unwrap()
            .and_hms_opt(8, 5, 0)
            .unwrap();
        assert_eq!(parse_update_time("2025-04-01T08:05:00+08:00"), Some(expected));
        assert_eq!(parse_update_time("2025-04-01T08:05:00"), Some(expected));
        assert_eq!(parse_update_time(" 2025-04-01 08:05:00 "), Some(expected));
        assert_eq!(parse_update_time("yesterday"), None);
    }

    #[test]
    fn test_file_name_takes_priority() {
        let update = parse_update_time("2025-04-01T09:30:00+08:00");
        let bucket = derive_bucket("VDLive_0805.xml", update, date(), 1).unwrap();
        assert_eq!((bucket.hour, bucket.minute), (8, 5));
    }

    #[test]
    fn test_update_time_fallback_is_floored() {
        let update = parse_update_time("2025-04-01T09:37:12+08:00");
        let bucket = derive_bucket("snapshot.xml", update, date(), 5).unwrap();
        assert_eq!((bucket.hour, bucket.minute), (9, 35));
        assert_eq!(bucket.date, date());
    }

    #[test]
    fn test_no_time_source_yields_none() {
        assert!(derive_bucket("snapshot.xml", None, date(), 1).is_none());
    }
}
