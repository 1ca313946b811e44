//! Upstream URL scheme and slice enumeration.
//!
//! Live snapshots: `{base}/history/motc20/{VD|ETag}/{date}/{stem}_{HHMM}.xml.gz`.
//! Station statistics: `{base}/history/TDCS/{type}/{date}/{HH}/TDCS_{type}_{date}_{HHMMSS}.csv`.

use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;

use crate::types::FeedKind;

pub const DEFAULT_BASE_URL: &str = "https://tisvcloud.freeway.gov.tw";

/// Station-based statistics published as CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TdcsType {
    M03A,
    M04A,
    M05A,
    M06A,
    M07A,
    M08A,
}

impl TdcsType {
    pub fn as_str(self) -> &'static str {
        match self {
            TdcsType::M03A => "M03A",
            TdcsType::M04A => "M04A",
            TdcsType::M05A => "M05A",
            TdcsType::M06A => "M06A",
            TdcsType::M07A => "M07A",
            TdcsType::M08A => "M08A",
        }
    }

    /// M06A and M07A are published hourly, the rest every five minutes.
    pub fn interval(self) -> u32 {
        match self {
            TdcsType::M06A | TdcsType::M07A => 60,
            _ => 5,
        }
    }
}

/// Anything the fetch layer knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Feed(FeedKind),
    Tdcs(TdcsType),
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VD" => Ok(Resource::Feed(FeedKind::PointSensor)),
            "ETAG" => Ok(Resource::Feed(FeedKind::PairSensor)),
            "M03A" => Ok(Resource::Tdcs(TdcsType::M03A)),
            "M04A" => Ok(Resource::Tdcs(TdcsType::M04A)),
            "M05A" => Ok(Resource::Tdcs(TdcsType::M05A)),
            "M06A" => Ok(Resource::Tdcs(TdcsType::M06A)),
            "M07A" => Ok(Resource::Tdcs(TdcsType::M07A)),
            "M08A" => Ok(Resource::Tdcs(TdcsType::M08A)),
            other => Err(format!("unknown resource `{other}`")),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One (hour, minute) slice within a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Slice {
    pub hour: u32,
    pub minute: u32,
}

/// All slices of a day at the given interval, in increasing time order.
pub fn slices(interval: u32) -> Vec<Slice> {
    let step = interval.clamp(1, 60) as usize;
    (0..24)
        .flat_map(|hour| (0..60).step_by(step).map(move |minute| Slice { hour, minute }))
        .collect()
}

fn date_token(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

impl Resource {
    pub fn interval(self) -> u32 {
        match self {
            Resource::Feed(kind) => kind.sampling_interval(),
            Resource::Tdcs(t) => t.interval(),
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Resource::Feed(kind) => kind.dir_name(),
            Resource::Tdcs(t) => t.as_str(),
        }
    }

    pub fn slices(self) -> Vec<Slice> {
        slices(self.interval())
    }

    /// Upstream URL of one slice.
    pub fn url(self, base: &str, date: NaiveDate, slice: Slice) -> String {
        let base = base.trim_end_matches('/');
        let day = date_token(date);
        match self {
            Resource::Feed(kind) => format!(
                "{base}/history/motc20/{}/{day}/{}_{:02}{:02}.xml.gz",
                kind.dir_name(),
                kind.file_stem(),
                slice.hour,
                slice.minute
            ),
            Resource::Tdcs(t) => format!(
                "{base}/history/TDCS/{ty}/{day}/{:02}/{}",
                slice.hour,
                self.file_name(date, slice),
                ty = t.as_str()
            ),
        }
    }

    /// Local file name of one slice once decompressed.
    pub fn file_name(self, date: NaiveDate, slice: Slice) -> String {
        match self {
            Resource::Feed(kind) => {
                format!("{}_{:02}{:02}.xml", kind.file_stem(), slice.hour, slice.minute)
            }
            Resource::Tdcs(t) => format!(
                "TDCS_{}_{}_{:02}{:02}00.csv",
                t.as_str(),
                date_token(date),
                slice.hour,
                slice.minute
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()
    }

    #[test]
    fn test_feed_urls() {
        let slice = Slice { hour: 8, minute: 5 };
        assert_eq!(
            Resource::Feed(FeedKind::PairSensor).url("https://host/", date(), slice),
            "https://host/history/motc20/ETag/20250401/ETagPairLive_0805.xml.gz"
        );
        assert_eq!(
            Resource::Feed(FeedKind::PointSensor).url("https://host", date(), slice),
            "https://host/history/motc20/VD/20250401/VDLive_0805.xml.gz"
        );
    }

    #[test]
    fn test_tdcs_url() {
        let slice = Slice { hour: 13, minute: 35 };
        assert_eq!(
            Resource::Tdcs(TdcsType::M03A).url("https://host", date(), slice),
            "https://host/history/TDCS/M03A/20250401/13/TDCS_M03A_20250401_133500.csv"
        );
    }

    #[test]
    fn test_slice_counts_follow_interval() {
        assert_eq!(Resource::Feed(FeedKind::PointSensor).slices().len(), 24 * 60);
        assert_eq!(Resource::Feed(FeedKind::PairSensor).slices().len(), 24 * 12);
        assert_eq!(Resource::Tdcs(TdcsType::M06A).slices().len(), 24);
    }

    #[test]
    fn test_slices_are_increasing() {
        let all = slices(5);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(all.first(), Some(&Slice { hour: 0, minute: 0 }));
        assert_eq!(all.last(), Some(&Slice { hour: 23, minute: 55 }));
    }

    #[test]
    fn test_resource_parsing() {
        assert_eq!("etag".parse::<Resource>(), Ok(Resource::Feed(FeedKind::PairSensor)));
        assert_eq!("M08A".parse::<Resource>(), Ok(Resource::Tdcs(TdcsType::M08A)));
        assert!("bogus".parse::<Resource>().is_err());
    }
}
