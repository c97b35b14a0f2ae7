use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_READ_STEP_SECS: f64 = 1.0;
pub const DEFAULT_PULL_BATCH: usize = 32;

/// A rational frame rate, `num / den` frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const DEFAULT: FrameRate = FrameRate { num: 30, den: 1 };

    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Both terms must be positive and fit the signed fractions media caps
    /// carry.
    pub fn is_valid(&self) -> bool {
        const MAX: u32 = i32::MAX as u32;
        (1..=MAX).contains(&self.num) && (1..=MAX).contains(&self.den)
    }

    /// Duration of one frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos((1_000_000_000u128 * self.den as u128 / self.num as u128) as u64)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for FrameRate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::FrameRate(s.to_string());
        let (num, den) = match s.trim().split_once('/') {
            Some((n, d)) => (
                n.trim().parse().map_err(|_| invalid())?,
                d.trim().parse().map_err(|_| invalid())?,
            ),
            None => (s.trim().parse().map_err(|_| invalid())?, 1),
        };
        let rate = FrameRate { num, den };
        if rate.is_valid() {
            Ok(rate)
        } else {
            Err(invalid())
        }
    }
}

/// How output presentation timestamps are paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputRate {
    Fixed(FrameRate),
    /// Use the video track's nominal rate, or the default rate when the
    /// track does not report one.
    MatchSource,
}

impl OutputRate {
    pub fn resolve(&self, source_rate: Option<FrameRate>) -> FrameRate {
        match self {
            OutputRate::Fixed(rate) => *rate,
            OutputRate::MatchSource => source_rate
                .filter(FrameRate::is_valid)
                .unwrap_or(FrameRate::DEFAULT),
        }
    }
}

impl Default for OutputRate {
    fn default() -> Self {
        OutputRate::Fixed(FrameRate::DEFAULT)
    }
}

/// What happens to the output file when a session ends without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialOutputPolicy {
    #[default]
    Delete,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverseConfig {
    /// Nominal window length, in seconds, carved backwards from the end of
    /// the asset.
    pub read_step_secs: f64,
    pub output_rate: OutputRate,
    pub partial_output: PartialOutputPolicy,
    /// Upper bound on frames taken from the source per pull.
    pub pull_batch: usize,
}

impl Default for ReverseConfig {
    fn default() -> Self {
        Self {
            read_step_secs: DEFAULT_READ_STEP_SECS,
            output_rate: OutputRate::default(),
            partial_output: PartialOutputPolicy::default(),
            pull_batch: DEFAULT_PULL_BATCH,
        }
    }
}

impl ReverseConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ReverseConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.read_step()?;
        if self.pull_batch == 0 {
            return Err(ConfigError::PullBatch);
        }
        if let OutputRate::Fixed(rate) = self.output_rate {
            if !rate.is_valid() {
                return Err(ConfigError::FrameRate(rate.to_string()));
            }
        }
        Ok(())
    }

    /// The window step. Rejects values that are not finite, not positive,
    /// or too small to survive conversion to a `Duration`.
    pub fn read_step(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.read_step_secs)
            .ok()
            .filter(|step| !step.is_zero())
            .ok_or(ConfigError::ReadStep(self.read_step_secs))
    }
}
