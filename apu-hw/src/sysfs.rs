//! Small helpers around sysfs attribute files

use crate::Result;
use apu_error::ApuError;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Read an attribute and trim the trailing newline
pub fn read_string(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| ApuError::sysfs_read(path, e.to_string()))
}

/// Read and parse an attribute, `None` on any failure
pub fn read_parsed<T: FromStr>(path: &Path) -> Option<T> {
    fs::read_to_string(path).ok().and_then(|s| s.trim().parse::<T>().ok())
}

pub fn write_value(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value).map_err(|source| ApuError::SysfsWrite {
        path: path.to_path_buf(),
        value: value.to_string(),
        source,
    })
}

/// Parse a clock token such as `1900Mhz` or `400MHz` into MHz
pub fn parse_mhz(token: &str) -> Option<u32> {
    token
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()
}

pub fn require(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ApuError::DeviceNotFound(path.display().to_string()))
    }
}
