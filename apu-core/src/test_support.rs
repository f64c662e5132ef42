//! In-crate test doubles

use apu_error::{ApuError, Result};
use apu_hw::{validate, HardwareStrategy};
use apu_protocol::{GpuPerfLevel, HardwareInfo, HardwareLimits, PowerLimits, Profile};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub enum HwCall {
    PowerLimits,
    CpuClock(Option<u32>, Option<u32>),
    GpuClock(Option<u32>, Option<u32>),
    GpuPerfLevel(GpuPerfLevel),
    OsPowerProfile(Option<String>),
    ReadInfo,
}

/// Records every call; validation uses the real bounds check
#[derive(Default)]
pub struct FakeHardware {
    calls: Mutex<Vec<HwCall>>,
    limits: Mutex<HardwareLimits>,
    fail_cpu_clock: AtomicBool,
    validations: AtomicUsize,
    destroyed: AtomicBool,
}

impl FakeHardware {
    pub fn calls(&self) -> Vec<HwCall> {
        self.calls.lock().clone()
    }

    pub fn fail_cpu_clock(&self, fail: bool) {
        self.fail_cpu_clock.store(fail, Ordering::SeqCst);
    }

    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn record(&self, call: HwCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl HardwareStrategy for FakeHardware {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn apply_power_limits(&self, _limits: &PowerLimits) -> Result<()> {
        self.record(HwCall::PowerLimits);
        Ok(())
    }

    async fn apply_cpu_clock(&self, max: Option<u32>, min: Option<u32>) -> Result<()> {
        self.record(HwCall::CpuClock(max, min));
        if self.fail_cpu_clock.load(Ordering::SeqCst) {
            return Err(ApuError::generic("cpufreq write refused"));
        }
        Ok(())
    }

    async fn apply_gpu_clock(&self, max: Option<u32>, min: Option<u32>) -> Result<()> {
        self.record(HwCall::GpuClock(max, min));
        Ok(())
    }

    async fn apply_gpu_perf_level(&self, level: GpuPerfLevel) -> Result<()> {
        self.record(HwCall::GpuPerfLevel(level));
        Ok(())
    }

    async fn apply_os_power_profile(&self, name: Option<&str>) -> Result<()> {
        self.record(HwCall::OsPowerProfile(name.map(str::to_string)));
        Ok(())
    }

    async fn read_hardware_info(&self) -> Result<HardwareInfo> {
        self.record(HwCall::ReadInfo);
        Ok(HardwareInfo { temperature: Some(50.0), ..Default::default() })
    }

    fn validate_profile(&self, profile: &Profile) -> Vec<String> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        validate::validate_profile(profile, &self.limits.lock())
    }

    fn set_hardware_limits(&self, limits: HardwareLimits) {
        *self.limits.lock() = limits;
    }

    fn hardware_limits(&self) -> HardwareLimits {
        *self.limits.lock()
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}
