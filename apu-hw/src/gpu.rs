//! amdgpu integrated GPU: performance level, overdrive clock range and sensors
//!
//! Discovery via sysfs (`class/drm/card*/device` with the AMD vendor id).
//! Clock writes require the `pp_od_clk_voltage` overdrive interface.

use crate::constants::{amdgpu, AMD_VENDOR_ID, DRM_PATH};
use crate::metrics::{decode_gpu_metrics, MetricsPower};
use crate::sysfs;
use crate::Result;
use apu_error::ApuError;
use apu_protocol::{ClockReading, GpuPerfLevel};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Values accepted by `power_dpm_force_performance_level`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpmLevel {
    Auto,
    Manual,
    High,
}

impl DpmLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DpmLevel::Auto => "auto",
            DpmLevel::Manual => "manual",
            DpmLevel::High => "high",
        }
    }
}

impl From<GpuPerfLevel> for DpmLevel {
    fn from(level: GpuPerfLevel) -> Self {
        match level {
            GpuPerfLevel::Auto => DpmLevel::Auto,
            GpuPerfLevel::High => DpmLevel::High,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AmdGpu {
    device_path: PathBuf,
}

impl AmdGpu {
    /// Find the first amdgpu card exposing the overdrive and metrics interfaces
    pub fn discover(sysfs_root: &Path) -> Result<Self> {
        let drm_path = sysfs_root.join(DRM_PATH);
        let entries = fs::read_dir(&drm_path)
            .map_err(|_| ApuError::DeviceNotFound(format!("DRM path {} not found", drm_path.display())))?;

        let mut cards: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with("card") && !name.contains('-')
            })
            .map(|e| e.path().join("device"))
            .filter(|device| is_amd_gpu(device))
            .collect();
        cards.sort();

        let Some(device_path) = cards.into_iter().next() else {
            return Err(ApuError::DeviceNotFound("amdgpu card".to_string()));
        };

        for file in [amdgpu::PERF_LEVEL, amdgpu::OD_CLK_VOLTAGE, amdgpu::GPU_METRICS] {
            sysfs::require(&device_path.join(file))?;
        }

        info!("Using amdgpu device at {}", device_path.display());
        Ok(Self { device_path })
    }

    fn file(&self, name: &str) -> PathBuf {
        self.device_path.join(name)
    }

    pub fn set_perf_level(&self, level: DpmLevel) -> Result<()> {
        sysfs::write_value(&self.file(amdgpu::PERF_LEVEL), level.as_str())?;
        debug!("GPU performance level set to {}", level.as_str());
        Ok(())
    }

    /// Pin the shader clock range. A null bound is filled from the overdrive
    /// range the driver reports.
    pub fn apply_clock_range(&self, max_mhz: Option<u32>, min_mhz: Option<u32>) -> Result<()> {
        let od_path = self.file(amdgpu::OD_CLK_VOLTAGE);
        let (floor, ceiling) = if min_mhz.is_none() || max_mhz.is_none() {
            let content = sysfs::read_string(&od_path)?;
            parse_od_sclk_range(&content)
                .ok_or_else(|| ApuError::sysfs_read(&od_path, "no OD_RANGE SCLK line"))?
        } else {
            (0, 0)
        };
        let min = min_mhz.unwrap_or(floor);
        let max = max_mhz.unwrap_or(ceiling);

        // The driver refuses high -> manual directly
        self.set_perf_level(DpmLevel::Auto)?;
        self.set_perf_level(DpmLevel::Manual)?;

        sysfs::write_value(&od_path, &format!("s 0 {}", min))?;
        sysfs::write_value(&od_path, &format!("s 1 {}", max))?;
        sysfs::write_value(&od_path, "c")?;

        info!("GPU clock range set to {}-{} MHz", min, max);
        Ok(())
    }

    pub fn read_clock(&self) -> ClockReading {
        let current = fs::read_to_string(self.file(amdgpu::DPM_SCLK))
            .ok()
            .and_then(|s| parse_dpm_current(&s));
        let range = fs::read_to_string(self.file(amdgpu::OD_CLK_VOLTAGE))
            .ok()
            .and_then(|s| parse_od_sclk_range(&s));

        ClockReading {
            current,
            min: range.map(|(min, _)| min),
            max: range.map(|(_, max)| max),
        }
    }

    pub fn read_busy_percent(&self) -> Option<u8> {
        sysfs::read_parsed::<u8>(&self.file(amdgpu::BUSY_PERCENT)).map(|p| p.min(100))
    }

    pub fn read_metrics(&self) -> MetricsPower {
        match fs::read(self.file(amdgpu::GPU_METRICS)) {
            Ok(buf) => decode_gpu_metrics(&buf),
            Err(e) => {
                debug!("gpu_metrics unavailable: {}", e);
                MetricsPower::default()
            }
        }
    }
}

fn is_amd_gpu(device_path: &Path) -> bool {
    fs::read_to_string(device_path.join("vendor"))
        .map(|v| v.trim() == AMD_VENDOR_ID)
        .unwrap_or(false)
}

/// Current level of `pp_dpm_sclk`, the line marked with `*`
pub fn parse_dpm_current(content: &str) -> Option<u32> {
    content
        .lines()
        .find(|l| l.trim_end().ends_with('*'))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(sysfs::parse_mhz)
}

/// `SCLK: <min>Mhz <max>Mhz` from the OD_RANGE section of `pp_od_clk_voltage`
pub fn parse_od_sclk_range(content: &str) -> Option<(u32, u32)> {
    let mut in_range = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with("OD_RANGE") {
            in_range = true;
            continue;
        }
        if in_range && line.starts_with("SCLK:") {
            let mut parts = line["SCLK:".len()..].split_whitespace();
            let min = parts.next().and_then(sysfs::parse_mhz)?;
            let max = parts.next().and_then(sysfs::parse_mhz)?;
            return Some((min, max));
        }
    }
    None
}
