/// Completion percentage derived from rows consumed against a pre-counted total.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    consumed: usize,
    last_reported: u8,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            consumed: 0,
            last_reported: 0,
        }
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// `floor(consumed / total * 100)`, clamped to 100 if the file grew after counting.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let percent = self.consumed.saturating_mul(100) / self.total;
        percent.min(100) as u8
    }

    /// Counts one consumed row and returns the new percentage when it moved forward.
    pub fn advance(&mut self) -> Option<u8> {
        self.consumed += 1;
        let percent = self.percent();
        if percent > self.last_reported {
            self.last_reported = percent;
            Some(percent)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_floored() {
        let mut tracker = ProgressTracker::new(3);
        assert_eq!(tracker.advance(), Some(33));
        assert_eq!(tracker.advance(), Some(66));
        assert_eq!(tracker.advance(), Some(100));
    }

    #[test]
    fn reports_only_forward_movement() {
        let mut tracker = ProgressTracker::new(400);
        let reported: Vec<u8> = (0..400).filter_map(|_| tracker.advance()).collect();
        assert_eq!(reported.len(), 100);
        assert!(reported.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(reported.last(), Some(&100));
    }

    #[test]
    fn sampled_percent_matches_floor_formula() {
        let total = 7;
        let mut tracker = ProgressTracker::new(total);
        for k in 1..=total {
            tracker.advance();
            assert_eq!(tracker.percent() as usize, k * 100 / total);
        }
    }

    #[test]
    fn overflowing_total_is_clamped() {
        let mut tracker = ProgressTracker::new(1);
        assert_eq!(tracker.advance(), Some(100));
        assert_eq!(tracker.advance(), None);
        assert_eq!(tracker.percent(), 100);
    }
}
