//! AMD APU hardware strategy (Ryzen mobile / handheld)
//!
//! Power limits go through the SMU, clocks and sensors through sysfs. The SMU
//! handle is owned exclusively and released once by [`HardwareStrategy::destroy`]
//! or on drop.

use crate::constants::{PROC_ROOT, POWER_PROFILE_TOOL, RYZENADJ_LIBRARY, SYSFS_ROOT};
use crate::cpu::{find_k10temp, read_proc_stat, read_temperature, CpuFreq, CpuUsageTracker};
use crate::gpu::{AmdGpu, DpmLevel};
use crate::power_profile::PowerProfileTool;
use crate::smu::{RyzenAdj, SmuControl};
use crate::{validate, HardwareStrategy, Result};
use apu_error::ApuError;
use apu_protocol::{GpuPerfLevel, HardwareInfo, HardwareLimits, PowerLimits, Profile};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Where to find the hardware and which tools to drive it with
#[derive(Debug, Clone)]
pub struct StrategyOptions {
    pub sysfs_root: PathBuf,
    pub proc_root: PathBuf,
    pub library_path: String,
    pub power_profile_tool: String,
    pub limits: HardwareLimits,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(SYSFS_ROOT),
            proc_root: PathBuf::from(PROC_ROOT),
            library_path: RYZENADJ_LIBRARY.to_string(),
            power_profile_tool: POWER_PROFILE_TOOL.to_string(),
            limits: HardwareLimits::default(),
        }
    }
}

pub struct AmdApuStrategy {
    /// `None` once destroyed
    smu: Mutex<Option<Box<dyn SmuControl>>>,
    gpu: AmdGpu,
    cpu: CpuFreq,
    k10temp: Option<PathBuf>,
    proc_root: PathBuf,
    cpu_usage: Mutex<CpuUsageTracker>,
    power_profile: PowerProfileTool,
    limits: RwLock<HardwareLimits>,
}

impl AmdApuStrategy {
    /// Discover devices and open the SMU. Any missing piece is fatal.
    pub fn new(options: StrategyOptions) -> Result<Self> {
        let (gpu, cpu) = discover(&options)?;
        let smu = RyzenAdj::open(&options.library_path)?;
        Ok(Self::assemble(options, gpu, cpu, Box::new(smu)))
    }

    /// Same as [`AmdApuStrategy::new`] with a caller-provided SMU backend
    pub fn with_smu(options: StrategyOptions, smu: Box<dyn SmuControl>) -> Result<Self> {
        let (gpu, cpu) = discover(&options)?;
        Ok(Self::assemble(options, gpu, cpu, smu))
    }

    fn assemble(options: StrategyOptions, gpu: AmdGpu, cpu: CpuFreq, smu: Box<dyn SmuControl>) -> Self {
        let k10temp = find_k10temp(&options.sysfs_root);
        if k10temp.is_none() {
            warn!("k10temp sensor not found, temperature will be unavailable");
        }

        Self {
            smu: Mutex::new(Some(smu)),
            gpu,
            cpu,
            k10temp,
            proc_root: options.proc_root,
            cpu_usage: Mutex::new(CpuUsageTracker::new()),
            power_profile: PowerProfileTool::new(options.power_profile_tool),
            limits: RwLock::new(options.limits),
        }
    }

    /// Refresh the SMU table and read the limits back; failures yield nulls
    fn read_power_limits(&self) -> PowerLimits {
        let mut guard = self.smu.lock();
        let Some(smu) = guard.as_mut() else {
            debug!("SMU released, power limits unavailable");
            return PowerLimits::default();
        };
        smu.read_limits().unwrap_or_else(|e| {
            warn!("Failed to read back SMU limits: {}", e);
            PowerLimits::default()
        })
    }
}

fn discover(options: &StrategyOptions) -> Result<(AmdGpu, CpuFreq)> {
    let gpu = AmdGpu::discover(&options.sysfs_root)?;
    let cpu = CpuFreq::discover(&options.sysfs_root)?;
    Ok((gpu, cpu))
}

/// Run blocking sysfs I/O off the async workers
async fn blocking<T, F>(what: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApuError::generic(format!("{} task failed: {}", what, e)))?
}

/// Blocking sensor read; a panicked or cancelled read counts as unavailable
async fn sensor<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Default + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap_or_else(|e| {
        warn!("Sensor read failed: {}", e);
        T::default()
    })
}

#[async_trait]
impl HardwareStrategy for AmdApuStrategy {
    fn name(&self) -> &'static str {
        "amd-apu"
    }

    async fn apply_power_limits(&self, limits: &PowerLimits) -> Result<()> {
        let mut guard = self.smu.lock();
        let smu = guard
            .as_mut()
            .ok_or_else(|| ApuError::NativeLibrary("SMU handle already released".to_string()))?;
        smu.apply(limits)?;
        debug!(?limits, "Power limits applied");
        Ok(())
    }

    async fn apply_cpu_clock(&self, max: Option<u32>, min: Option<u32>) -> Result<()> {
        if max.is_none() && min.is_none() {
            return Ok(());
        }
        let cpu = self.cpu.clone();
        blocking("cpu clock", move || cpu.apply_range(max, min)).await?;
        info!("CPU clock range set (max {:?}, min {:?} MHz)", max, min);
        Ok(())
    }

    async fn apply_gpu_clock(&self, max: Option<u32>, min: Option<u32>) -> Result<()> {
        if max.is_none() && min.is_none() {
            return Ok(());
        }
        let gpu = self.gpu.clone();
        blocking("gpu clock", move || gpu.apply_clock_range(max, min)).await
    }

    async fn apply_gpu_perf_level(&self, level: GpuPerfLevel) -> Result<()> {
        let gpu = self.gpu.clone();
        blocking("gpu perf level", move || gpu.set_perf_level(DpmLevel::from(level))).await
    }

    async fn apply_os_power_profile(&self, name: Option<&str>) -> Result<()> {
        match name {
            Some(name) => self.power_profile.set(name).await,
            None => Ok(()),
        }
    }

    async fn read_hardware_info(&self) -> Result<HardwareInfo> {
        let cpu = self.cpu.clone();
        let gpu_clock = self.gpu.clone();
        let gpu_busy = self.gpu.clone();
        let gpu_metrics = self.gpu.clone();
        let k10temp = self.k10temp.clone();
        let proc_root = self.proc_root.clone();

        let (cpu_clock, gpu_clock, temperature, gpu_usage, metrics, cpu_times, power_profile) = tokio::join!(
            sensor(move || cpu.read_clock()),
            sensor(move || gpu_clock.read_clock()),
            sensor(move || k10temp.as_deref().and_then(read_temperature)),
            sensor(move || gpu_busy.read_busy_percent()),
            sensor(move || gpu_metrics.read_metrics()),
            sensor(move || read_proc_stat(&proc_root)),
            self.power_profile.get(),
        );

        let cpu_usage = self.cpu_usage.lock().observe(cpu_times);
        let power_limits = self.read_power_limits();

        Ok(HardwareInfo {
            power_limits,
            cpu_clock,
            gpu_clock,
            temperature,
            socket_power: metrics.socket,
            cpu_power: metrics.cpu,
            gpu_power: metrics.gpu,
            cpu_usage,
            gpu_usage,
            power_profile,
        })
    }

    fn validate_profile(&self, profile: &Profile) -> Vec<String> {
        validate::validate_profile(profile, &self.limits.read())
    }

    fn set_hardware_limits(&self, limits: HardwareLimits) {
        *self.limits.write() = limits;
        info!("Hardware limits updated");
    }

    fn hardware_limits(&self) -> HardwareLimits {
        *self.limits.read()
    }

    fn destroy(&self) {
        if let Some(mut smu) = self.smu.lock().take() {
            smu.close();
            info!("Hardware strategy destroyed");
        }
    }
}
