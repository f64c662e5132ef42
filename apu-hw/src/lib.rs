//! Hardware access for apuctl
//!
//! Provides the [`HardwareStrategy`] seam and its AMD APU implementation:
//! - SMU power limits (STAPM / slow / fast) via libryzenadj
//! - CPU clock range via cpufreq
//! - GPU clock range and performance level via amdgpu sysfs
//! - Sensors: k10temp, /proc/stat, gpu_metrics, gpu_busy_percent
//! - OS power profile via an external tool

pub mod amd;
pub mod constants;
pub mod cpu;
pub mod gpu;
pub mod metrics;
pub mod power_profile;
pub mod smu;
mod sysfs;
pub mod validate;

pub use amd::{AmdApuStrategy, StrategyOptions};
pub use constants as hw_const;

use apu_error::ApuError;
use apu_protocol::{GpuPerfLevel, HardwareInfo, HardwareLimits, PowerLimits, Profile};
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, ApuError>;

/// Single point of contact with physical hardware.
///
/// One implementation per hardware family; callers never branch on the family.
#[async_trait]
pub trait HardwareStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Set each non-null SMU limit. No readback verification.
    async fn apply_power_limits(&self, limits: &PowerLimits) -> Result<()>;

    /// Ceiling lands before floor
    async fn apply_cpu_clock(&self, max: Option<u32>, min: Option<u32>) -> Result<()>;

    async fn apply_gpu_clock(&self, max: Option<u32>, min: Option<u32>) -> Result<()>;

    async fn apply_gpu_perf_level(&self, level: GpuPerfLevel) -> Result<()>;

    /// `None` leaves the OS profile untouched
    async fn apply_os_power_profile(&self, name: Option<&str>) -> Result<()>;

    /// Fresh snapshot; sensors are read concurrently, failed sensors are `None`
    async fn read_hardware_info(&self) -> Result<HardwareInfo>;

    /// Check a profile against the current limits, returning every violation
    fn validate_profile(&self, profile: &Profile) -> Vec<String>;

    fn set_hardware_limits(&self, limits: HardwareLimits);

    fn hardware_limits(&self) -> HardwareLimits;

    /// Release native resources. Idempotent.
    fn destroy(&self);
}
