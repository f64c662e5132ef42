//! CPU clock control via cpufreq, utilisation from /proc/stat, k10temp sensor

use crate::constants::{CPUFREQ_PATH, HWMON_PATH, K10TEMP_NAME, KHZ_PER_MHZ, MILLIDEGREE_DIVISOR};
use crate::sysfs;
use crate::Result;
use apu_error::ApuError;
use apu_protocol::ClockReading;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// All cpufreq policies of the package
#[derive(Debug, Clone)]
pub struct CpuFreq {
    policies: Vec<PathBuf>,
}

impl CpuFreq {
    pub fn discover(sysfs_root: &Path) -> Result<Self> {
        let cpufreq = sysfs_root.join(CPUFREQ_PATH);
        let entries = fs::read_dir(&cpufreq)
            .map_err(|_| ApuError::DeviceNotFound(format!("cpufreq at {}", cpufreq.display())))?;

        let mut policies: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("policy"))
            .map(|e| e.path())
            .filter(|p| p.join("scaling_max_freq").exists())
            .collect();
        policies.sort();

        if policies.is_empty() {
            return Err(ApuError::DeviceNotFound(format!(
                "no cpufreq policies under {}",
                cpufreq.display()
            )));
        }

        debug!("Found {} cpufreq policies", policies.len());
        Ok(Self { policies })
    }

    pub fn policies(&self) -> &[PathBuf] {
        &self.policies
    }

    /// Write the ceiling on every policy before the floor; the governor
    /// rejects a floor above the current ceiling.
    pub fn apply_range(&self, max_mhz: Option<u32>, min_mhz: Option<u32>) -> Result<()> {
        if let Some(max) = max_mhz {
            let khz = max.saturating_mul(KHZ_PER_MHZ).to_string();
            for policy in &self.policies {
                sysfs::write_value(&policy.join("scaling_max_freq"), &khz)?;
            }
        }
        if let Some(min) = min_mhz {
            let khz = min.saturating_mul(KHZ_PER_MHZ).to_string();
            for policy in &self.policies {
                sysfs::write_value(&policy.join("scaling_min_freq"), &khz)?;
            }
        }
        Ok(())
    }

    /// Current clock is the fastest policy; floor/ceiling come from cpuinfo limits
    pub fn read_clock(&self) -> ClockReading {
        let read_mhz = |file: &str| -> Vec<u32> {
            self.policies
                .iter()
                .filter_map(|p| sysfs::read_parsed::<u32>(&p.join(file)))
                .map(|khz| khz / KHZ_PER_MHZ)
                .collect()
        };

        ClockReading {
            current: read_mhz("scaling_cur_freq").into_iter().max(),
            min: read_mhz("cpuinfo_min_freq").into_iter().min(),
            max: read_mhz("cpuinfo_max_freq").into_iter().max(),
        }
    }
}

/// Locate the k10temp `temp1_input`, if the driver is loaded
pub fn find_k10temp(sysfs_root: &Path) -> Option<PathBuf> {
    let hwmon = sysfs_root.join(HWMON_PATH);
    fs::read_dir(hwmon)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .find(|p| {
            fs::read_to_string(p.join("name"))
                .map(|n| n.trim() == K10TEMP_NAME)
                .unwrap_or(false)
        })
        .map(|p| p.join("temp1_input"))
}

pub fn read_temperature(path: &Path) -> Option<f64> {
    sysfs::read_parsed::<i64>(path).map(|milli| milli as f64 / MILLIDEGREE_DIVISOR)
}

// ============================================================================
// Utilisation
// ============================================================================

/// Aggregate jiffy counters from the `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    /// idle + iowait
    pub idle: u64,
    pub total: u64,
}

pub fn parse_proc_stat(content: &str) -> Option<CpuTimes> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|f| f.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;

    if fields.len() < 4 {
        return None;
    }

    // Garbled counters can overflow; treat that like an unreadable sample
    let idle = fields[3].checked_add(fields.get(4).copied().unwrap_or(0))?;
    let total = fields.iter().try_fold(0u64, |acc, f| acc.checked_add(*f))?;
    Some(CpuTimes { idle, total })
}

/// Busy percentage between two samples; `None` when the counters did not advance
pub fn usage_percent(prev: CpuTimes, current: CpuTimes) -> Option<u8> {
    let total_delta = current.total as i128 - prev.total as i128;
    if total_delta <= 0 {
        return None;
    }
    let idle_delta = current.idle as i128 - prev.idle as i128;
    let busy = (100.0 * (total_delta - idle_delta) as f64 / total_delta as f64).round();
    Some(busy.clamp(0.0, 100.0) as u8)
}

/// Keeps the last good sample as the baseline for the next reading
#[derive(Debug, Default)]
pub struct CpuUsageTracker {
    baseline: Option<CpuTimes>,
}

impl CpuUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample. A failed sample returns `None` and keeps the baseline.
    pub fn observe(&mut self, sample: Option<CpuTimes>) -> Option<u8> {
        let current = sample?;
        let prev = self.baseline.replace(current)?;
        usage_percent(prev, current)
    }
}

pub fn read_proc_stat(proc_root: &Path) -> Option<CpuTimes> {
    fs::read_to_string(proc_root.join("stat"))
        .ok()
        .and_then(|s| parse_proc_stat(&s))
}
