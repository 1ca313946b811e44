/// Running count-weighted sums of travel time and speed.
///
/// Means are 0.0 while the total count is 0, so callers never divide by a
/// count that may legitimately be zero.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CountWeighted {
    total_count: u64,
    travel_time_sum: f64,
    speed_sum: f64,
}

impl CountWeighted {
    /// Adds one reading; a zero count leaves both means unchanged.
    pub fn add(&mut self, count: u64, travel_time: f64, speed: f64) {
        self.total_count += count;
        self.travel_time_sum += travel_time * count as f64;
        self.speed_sum += speed * count as f64;
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn travel_time(&self) -> f64 {
        mean(self.travel_time_sum, self.total_count)
    }

    pub fn speed(&self) -> f64 {
        mean(self.speed_sum, self.total_count)
    }
}

fn mean(sum: f64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    sum / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        let acc = CountWeighted::default();
        assert_eq!(acc.total_count(), 0);
        assert_eq!(acc.travel_time(), 0.0);
        assert_eq!(acc.speed(), 0.0);
    }

    #[test]
    fn test_weighted_means() {
        let mut acc = CountWeighted::default();
        acc.add(10, 300.0, 60.0);
        acc.add(5, 330.0, 55.0);
        assert_eq!(acc.total_count(), 15);
        assert!((acc.travel_time() - 310.0).abs() < 1e-9);
        assert!((acc.speed() - 58.333_333).abs() < 1e-5);
    }

    #[test]
    fn test_zero_count_does_not_shift_means() {
        let mut acc = CountWeighted::default();
        acc.add(4, 200.0, 80.0);
        let before = acc;
        acc.add(0, 999.0, 5.0);
        assert_eq!(acc, before);
    }
}
