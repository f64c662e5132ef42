//! Hardware double for dispatcher and server tests

use apu_error::{ApuError, Result};
use apu_hw::{validate, HardwareStrategy};
use apu_protocol::{GpuPerfLevel, HardwareInfo, HardwareLimits, PowerLimits, Profile};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct FakeHardware {
    limits: Mutex<HardwareLimits>,
    fail_cpu_clock: AtomicBool,
}

impl FakeHardware {
    pub fn fail_cpu_clock(&self, fail: bool) {
        self.fail_cpu_clock.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl HardwareStrategy for FakeHardware {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn apply_power_limits(&self, _limits: &PowerLimits) -> Result<()> {
        Ok(())
    }

    async fn apply_cpu_clock(&self, _max: Option<u32>, _min: Option<u32>) -> Result<()> {
        if self.fail_cpu_clock.load(Ordering::SeqCst) {
            return Err(ApuError::NativeCall { call: "set_stapm_limit", status: -1 });
        }
        Ok(())
    }

    async fn apply_gpu_clock(&self, _max: Option<u32>, _min: Option<u32>) -> Result<()> {
        Ok(())
    }

    async fn apply_gpu_perf_level(&self, _level: GpuPerfLevel) -> Result<()> {
        Ok(())
    }

    async fn apply_os_power_profile(&self, _name: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn read_hardware_info(&self) -> Result<HardwareInfo> {
        Ok(HardwareInfo { temperature: Some(50.0), ..Default::default() })
    }

    fn validate_profile(&self, profile: &Profile) -> Vec<String> {
        validate::validate_profile(profile, &self.limits.lock())
    }

    fn set_hardware_limits(&self, limits: HardwareLimits) {
        *self.limits.lock() = limits;
    }

    fn hardware_limits(&self) -> HardwareLimits {
        *self.limits.lock()
    }

    fn destroy(&self) {}
}
