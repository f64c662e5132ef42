//! Data model shared by the daemon and its clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named configuration of power limits, clocks and trigger rules
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Profile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub power: PowerLimits,
    #[serde(default)]
    pub cpu_clock: ClockRange,
    #[serde(default)]
    pub gpu_clock: GpuClock,
    /// OS power-profile name handed to the external profile tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_profile: Option<String>,
    #[serde(default, rename = "match")]
    pub match_rule: MatchRule,
}

impl Profile {
    /// A profile that leaves every setting unchanged
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether any GPU clock bound is set (takes precedence over the perf level)
    pub fn has_gpu_clock_bound(&self) -> bool {
        self.gpu_clock.min.is_some() || self.gpu_clock.max.is_some()
    }
}

/// SMU power limits in milliwatts; `None` leaves the limit unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerLimits {
    #[serde(default)]
    pub stapm: Option<u32>,
    #[serde(default)]
    pub slow: Option<u32>,
    #[serde(default)]
    pub fast: Option<u32>,
}

/// Clock bounds in MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClockRange {
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<u32>,
}

/// GPU clock bounds in MHz plus a fallback performance level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GpuClock {
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<u32>,
    /// Only applied when neither `min` nor `max` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perf_level: Option<GpuPerfLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuPerfLevel {
    Auto,
    High,
}

impl GpuPerfLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuPerfLevel::Auto => "auto",
            GpuPerfLevel::High => "high",
        }
    }
}

/// Trigger rule: which running processes activate this profile
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MatchRule {
    #[serde(default)]
    pub enabled: bool,
    /// Regular expressions matched case-insensitively against process command lines
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    /// Profile to return to once no trigger matches any more
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_profile: Option<String>,
}

/// Inclusive bounds for a single limit class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRange {
    pub min: u32,
    pub max: u32,
}

impl LimitRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Per-deployment bounds every profile is validated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareLimits {
    /// Milliwatts
    pub stapm: LimitRange,
    pub slow: LimitRange,
    pub fast: LimitRange,
    /// MHz
    pub cpu_clock: LimitRange,
    pub gpu_clock: LimitRange,
}

impl Default for HardwareLimits {
    fn default() -> Self {
        Self {
            stapm: LimitRange::new(5_000, 54_000),
            slow: LimitRange::new(5_000, 60_000),
            fast: LimitRange::new(5_000, 65_000),
            cpu_clock: LimitRange::new(400, 5_100),
            gpu_clock: LimitRange::new(200, 2_700),
        }
    }
}

impl HardwareLimits {
    /// Names of the ranges whose floor lies above their ceiling
    pub fn inverted_ranges(&self) -> Vec<&'static str> {
        [
            ("stapm", self.stapm),
            ("slow", self.slow),
            ("fast", self.fast),
            ("cpuClock", self.cpu_clock),
            ("gpuClock", self.gpu_clock),
        ]
        .into_iter()
        .filter(|(_, range)| range.min > range.max)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Current value of a clock together with the driver-reported floor and ceiling (MHz)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClockReading {
    pub current: Option<u32>,
    pub min: Option<u32>,
    pub max: Option<u32>,
}

/// Point-in-time hardware snapshot. Unavailable sensors are `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInfo {
    /// Limits read back from the SMU after a table refresh (mW)
    pub power_limits: PowerLimits,
    pub cpu_clock: ClockReading,
    pub gpu_clock: ClockReading,
    /// Degrees Celsius
    pub temperature: Option<f64>,
    /// Milliwatts
    pub socket_power: Option<u32>,
    pub cpu_power: Option<u32>,
    pub gpu_power: Option<u32>,
    /// Percent
    pub cpu_usage: Option<u8>,
    pub gpu_usage: Option<u8>,
    pub power_profile: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivatedBy {
    Manual,
    Auto,
    Startup,
}

impl std::fmt::Display for ActivatedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivatedBy::Manual => write!(f, "manual"),
            ActivatedBy::Auto => write!(f, "auto"),
            ActivatedBy::Startup => write!(f, "startup"),
        }
    }
}

/// Result of `getStatus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub active_profile: String,
    pub activated_by: ActivatedBy,
    pub hw_info: Option<HardwareInfo>,
    pub hw_info_at: Option<DateTime<Utc>>,
}

/// Result of `applyProfile`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub profile: Profile,
    pub hw_info: HardwareInfo,
}
