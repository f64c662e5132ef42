//! Hardware-related constants

/// PCI vendor ID for AMD devices
pub const AMD_VENDOR_ID: &str = "0x1002";

/// Default mount points; both are injectable for tests
pub const SYSFS_ROOT: &str = "/sys";
pub const PROC_ROOT: &str = "/proc";

/// DRM (Direct Rendering Manager) devices, relative to the sysfs root
pub const DRM_PATH: &str = "class/drm";

/// cpufreq policy directories, relative to the sysfs root
pub const CPUFREQ_PATH: &str = "devices/system/cpu/cpufreq";

/// hwmon class directory, relative to the sysfs root
pub const HWMON_PATH: &str = "class/hwmon";

/// hwmon driver name of the Zen CPU temperature sensor
pub const K10TEMP_NAME: &str = "k10temp";

/// Shared object implementing the SMU mailbox protocol
pub const RYZENADJ_LIBRARY: &str = "libryzenadj.so";

/// Default OS power-profile tool
pub const POWER_PROFILE_TOOL: &str = "powerprofilesctl";

/// cpufreq files are in kHz, profiles in MHz
pub const KHZ_PER_MHZ: u32 = 1000;

/// Temperature readings are in millidegrees, divide by this to get Celsius
pub const MILLIDEGREE_DIVISOR: f64 = 1000.0;

/// amdgpu device files
pub mod amdgpu {
    pub const PERF_LEVEL: &str = "power_dpm_force_performance_level";
    pub const OD_CLK_VOLTAGE: &str = "pp_od_clk_voltage";
    pub const DPM_SCLK: &str = "pp_dpm_sclk";
    pub const GPU_METRICS: &str = "gpu_metrics";
    pub const BUSY_PERCENT: &str = "gpu_busy_percent";
}

/// Layout of the binary gpu_metrics record
pub mod gpu_metrics {
    /// Byte holding the format revision
    pub const FORMAT_REVISION_OFFSET: usize = 2;

    /// Only the APU layout (v3.x) is decoded
    pub const SUPPORTED_FORMAT_REVISION: u8 = 3;

    /// Average combined socket power (mW, u32 LE)
    pub const APU_POWER_OFFSET: usize = 120;

    /// Average graphics power (mW, u32 LE)
    pub const GFX_POWER_OFFSET: usize = 124;

    /// Shortest buffer that still contains both power fields
    pub const MIN_LEN: usize = 128;

    /// Value the firmware reports for an unpopulated field
    pub const UNAVAILABLE: u32 = 0xFFFF_FFFF;
}
