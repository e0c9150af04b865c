use tracing::debug;

const REPORT_EVERY: u64 = 50;
const FAILURE_THRESHOLD: f64 = 0.05;

/// When walk statistics are logged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatsReporting {
    #[default]
    Off,
    /// Every 50 walks.
    Always,
    /// Every 50 walks, only while more than 5% of walks fail.
    AboveThreshold,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub total_walks: u64,
    pub failed_walks: u64,
    pub suspend_failures: u64,
    pub stored_traces: u64,
    pub unverified_traces: u64,
}

impl WalkStats {
    pub(crate) fn record_walk(&mut self, was_valid: bool) {
        self.total_walks += 1;
        if !was_valid {
            self.failed_walks += 1;
        }
    }

    pub(crate) fn record_suspend_failure(&mut self) {
        self.suspend_failures += 1;
    }

    pub(crate) fn record_stored(&mut self, needs_verification: bool) {
        self.stored_traces += 1;
        if needs_verification {
            self.unverified_traces += 1;
        }
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.total_walks == 0 {
            return 0.0;
        }
        self.failed_walks as f64 / self.total_walks as f64
    }

    pub(crate) fn is_due(&self, reporting: StatsReporting) -> bool {
        match reporting {
            StatsReporting::Off => false,
            _ if self.total_walks == 0 || self.total_walks % REPORT_EVERY != 0 => false,
            StatsReporting::Always => true,
            StatsReporting::AboveThreshold => self.failure_ratio() > FAILURE_THRESHOLD,
        }
    }

    pub(crate) fn log(&self) {
        debug!(
            total_walks = self.total_walks,
            failed_walks = self.failed_walks,
            failure_ratio = self.failure_ratio(),
            suspend_failures = self.suspend_failures,
            stored_traces = self.stored_traces,
            unverified_traces = self.unverified_traces,
            "sampling profiler walk stats"
        );
    }

    pub(crate) fn maybe_log(&self, reporting: StatsReporting) {
        if self.is_due(reporting) {
            self.log();
        }
    }
}
