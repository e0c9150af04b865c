use std::error::Error;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::stats::StatsReporting;

pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_micros(1000);
pub const DEFAULT_INITIAL_FRAME_CAPACITY: usize = 256;

const INTERVAL_VAR: &str = "STROBE_SAMPLING_INTERVAL_US";
const CAPACITY_VAR: &str = "STROBE_INITIAL_FRAME_CAPACITY";
const STATS_VAR: &str = "STROBE_REPORT_STATS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    NotANumber { var: &'static str, value: String },
    Zero { var: &'static str },
    BadStatsMode { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotANumber { var, value } => {
                write!(f, "{var}: expected an unsigned integer, got {value:?}")
            }
            Self::Zero { var } => write!(f, "{var} must be greater than zero"),
            Self::BadStatsMode { var, value } => {
                write!(f, "{var}: expected 1/0/true/false/threshold, got {value:?}")
            }
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Delay between two samples.
    pub interval: Duration,
    /// Starting size of the reusable frame buffer.
    pub initial_frame_capacity: NonZeroUsize,
    /// Periodic walk statistics at debug level.
    pub report_stats: StatsReporting,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SAMPLING_INTERVAL,
            initial_frame_capacity: NonZeroUsize::new(DEFAULT_INITIAL_FRAME_CAPACITY)
                .expect("invariant violated: default frame capacity must be non-zero"),
            report_stats: StatsReporting::Off,
        }
    }
}

impl SamplerConfig {
    /// Defaults overridden by `STROBE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |var: &str| {
            lookup(var)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(value) = read(INTERVAL_VAR) {
            let micros = parse_nonzero(INTERVAL_VAR, &value)?;
            config.interval = Duration::from_micros(micros.get() as u64);
        }
        if let Some(value) = read(CAPACITY_VAR) {
            config.initial_frame_capacity = parse_nonzero(CAPACITY_VAR, &value)?;
        }
        if let Some(value) = read(STATS_VAR) {
            config.report_stats = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "always" => StatsReporting::Always,
                "0" | "false" | "off" => StatsReporting::Off,
                "threshold" => StatsReporting::AboveThreshold,
                _ => {
                    return Err(ConfigError::BadStatsMode {
                        var: STATS_VAR,
                        value,
                    });
                }
            };
        }
        Ok(config)
    }
}

fn parse_nonzero(var: &'static str, value: &str) -> Result<NonZeroUsize, ConfigError> {
    let parsed: usize = value.parse().map_err(|_| ConfigError::NotANumber {
        var,
        value: value.to_string(),
    })?;
    NonZeroUsize::new(parsed).ok_or(ConfigError::Zero { var })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = SamplerConfig::from_lookup(lookup(&[(INTERVAL_VAR, "   ")]))
            .expect("blank values are ignored");
        assert_eq!(config, SamplerConfig::default());
        assert_eq!(config.interval, Duration::from_millis(1));
        assert_eq!(config.initial_frame_capacity.get(), 256);
    }

    #[test]
    fn overrides_are_trimmed_and_parsed() {
        let config = SamplerConfig::from_lookup(lookup(&[
            (INTERVAL_VAR, " 250 "),
            (CAPACITY_VAR, "32"),
            (STATS_VAR, "TRUE"),
        ]))
        .expect("valid overrides");
        assert_eq!(config.interval, Duration::from_micros(250));
        assert_eq!(config.initial_frame_capacity.get(), 32);
        assert_eq!(config.report_stats, StatsReporting::Always);

        let config = SamplerConfig::from_lookup(lookup(&[(STATS_VAR, "threshold")]))
            .expect("threshold mode");
        assert_eq!(config.report_stats, StatsReporting::AboveThreshold);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_eq!(
            SamplerConfig::from_lookup(lookup(&[(INTERVAL_VAR, "0")])),
            Err(ConfigError::Zero { var: INTERVAL_VAR })
        );
        assert!(matches!(
            SamplerConfig::from_lookup(lookup(&[(CAPACITY_VAR, "lots")])),
            Err(ConfigError::NotANumber { .. })
        ));
        assert!(matches!(
            SamplerConfig::from_lookup(lookup(&[(STATS_VAR, "maybe")])),
            Err(ConfigError::BadStatsMode { .. })
        ));
    }
}
