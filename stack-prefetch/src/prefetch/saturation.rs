//! Cache saturation detection.
//!
//! A full, non-evicting cache reports a stable size once warmed. The monitor
//! keeps the previous cache-size observation and reports saturation when a
//! new observation equals it. Equality, not decrease, is the signal.
//!
//! A monitor lives for one driver run of a stack, so chained passes share a
//! baseline and a one-item window still gets a second sample to compare.
//! It is [`reset`](SaturationMonitor::reset) whenever the stack is re-armed.

/// Verdict for one cache-size observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    /// No baseline yet, or the size changed.
    Growing,

    /// First unchanged observation since the last reset.
    Saturated,

    /// Unchanged again after saturation was already reported.
    StillSaturated,
}

impl Sample {
    /// Whether the cache did not grow.
    pub fn is_unchanged(&self) -> bool {
        !matches!(self, Sample::Growing)
    }
}

/// Compares successive cache-size observations.
#[derive(Debug, Default)]
pub struct SaturationMonitor {
    last_size: Option<u64>,
    saturated: bool,
}

impl SaturationMonitor {
    /// Create a monitor with no baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation.
    ///
    /// Every unchanged observation is reported, but only the first one after
    /// a reset is [`Sample::Saturated`], so side effects fire once.
    pub fn observe(&mut self, size_bytes: u64) -> Sample {
        let unchanged = self.last_size == Some(size_bytes);
        self.last_size = Some(size_bytes);

        match (unchanged, self.saturated) {
            (false, _) => Sample::Growing,
            (true, false) => {
                self.saturated = true;
                Sample::Saturated
            }
            (true, true) => Sample::StillSaturated,
        }
    }

    /// Drop the baseline and the saturated flag.
    pub fn reset(&mut self) {
        self.last_size = None;
        self.saturated = false;
    }

    /// Whether saturation has been observed since the last reset.
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    /// The most recent observation, if any.
    pub fn last_size(&self) -> Option<u64> {
        self.last_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_never_saturates() {
        let mut monitor = SaturationMonitor::new();
        assert_eq!(monitor.observe(100), Sample::Growing);
        assert!(!monitor.is_saturated());
        assert_eq!(monitor.last_size(), Some(100));
    }

    #[test]
    fn test_growing_cache_not_saturated() {
        let mut monitor = SaturationMonitor::new();
        for size in [100, 200, 300, 450] {
            assert_eq!(monitor.observe(size), Sample::Growing);
        }
        assert!(!monitor.is_saturated());
    }

    #[test]
    fn test_equal_observations_saturate() {
        let mut monitor = SaturationMonitor::new();
        monitor.observe(100);
        assert_eq!(monitor.observe(100), Sample::Saturated);
        assert!(monitor.is_saturated());
    }

    #[test]
    fn test_decrease_is_not_saturation() {
        let mut monitor = SaturationMonitor::new();
        monitor.observe(300);
        assert_eq!(monitor.observe(200), Sample::Growing);
        assert!(!monitor.is_saturated());
    }

    #[test]
    fn test_every_unchanged_sample_reported() {
        let mut monitor = SaturationMonitor::new();
        monitor.observe(100);
        assert_eq!(monitor.observe(100), Sample::Saturated);
        assert_eq!(monitor.observe(100), Sample::StillSaturated);
        assert!(monitor.observe(100).is_unchanged());
        assert!(monitor.is_saturated());
    }

    #[test]
    fn test_non_adjacent_repeat_is_not_saturation() {
        let mut monitor = SaturationMonitor::new();
        monitor.observe(100);
        monitor.observe(200);
        assert_eq!(monitor.observe(100), Sample::Growing);
    }

    #[test]
    fn test_reset_clears_baseline() {
        let mut monitor = SaturationMonitor::new();
        monitor.observe(100);
        monitor.observe(100);

        monitor.reset();
        assert!(!monitor.is_saturated());
        assert_eq!(monitor.last_size(), None);
        assert_eq!(monitor.observe(100), Sample::Growing);
        assert_eq!(monitor.observe(100), Sample::Saturated);
    }
}
