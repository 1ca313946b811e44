use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeSet;

/// Which calendar days of a range to process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DateFilter {
    #[default]
    All,
    Weekends,
    /// Monday to Friday, minus the listed holidays.
    Weekdays { holidays: BTreeSet<NaiveDate> },
}

impl DateFilter {
    pub fn accepts(&self, date: NaiveDate) -> bool {
        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        match self {
            DateFilter::All => true,
            DateFilter::Weekends => weekend,
            DateFilter::Weekdays { holidays } => !weekend && !holidays.contains(&date),
        }
    }
}

/// Dates from `start` to `end` inclusive that pass `filter`; empty when
/// `start > end`.
pub fn date_range(start: NaiveDate, end: NaiveDate, filter: &DateFilter) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| filter.accepts(*d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        // 2025-04-05 is a Saturday
        NaiveDate::from_ymd_opt(2025, 4, day).unwrap()
    }

    #[test]
    fn test_all_is_inclusive() {
        assert_eq!(date_range(d(1), d(3), &DateFilter::All), vec![d(1), d(2), d(3)]);
        assert_eq!(date_range(d(4), d(4), &DateFilter::All), vec![d(4)]);
    }

    #[test]
    fn test_reversed_range_is_empty() {
        assert!(date_range(d(3), d(1), &DateFilter::All).is_empty());
    }

    #[test]
    fn test_weekends() {
        assert_eq!(date_range(d(1), d(13), &DateFilter::Weekends), vec![d(5), d(6), d(12), d(13)]);
    }

    #[test]
    fn test_weekdays_skip_holidays() {
        let filter = DateFilter::Weekdays {
            holidays: BTreeSet::from([d(3), d(4)]),
        };
        assert_eq!(date_range(d(1), d(8), &filter), vec![d(1), d(2), d(7), d(8)]);
    }
}
