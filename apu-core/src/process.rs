//! Running-process listing from procfs

use apu_error::{ApuError, Result};
use std::fs;
use std::path::PathBuf;
use tracing::trace;

/// Source of command lines for every running process
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSource: Send + Sync {
    fn scan(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct ProcfsScanner {
    root: PathBuf,
}

impl Default for ProcfsScanner {
    fn default() -> Self {
        Self::new(apu_hw::hw_const::PROC_ROOT)
    }
}

impl ProcfsScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// NUL-separated argv joined with spaces; trailing NULs dropped
fn cmdline_to_string(raw: &[u8]) -> String {
    raw.split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

impl ProcessSource for ProcfsScanner {
    fn scan(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| ApuError::sysfs_read(&self.root, e.to_string()))?;

        let mut lines = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid) = name.to_str().filter(|s| s.bytes().all(|b| b.is_ascii_digit())) else {
                continue;
            };

            // Processes exit or deny access mid-scan; skip them silently
            let dir = entry.path();
            let cmdline = match fs::read(dir.join("cmdline")) {
                Ok(raw) => cmdline_to_string(&raw),
                Err(e) => {
                    trace!("Skipping pid {}: {}", pid, e);
                    continue;
                }
            };

            // Kernel threads have an empty cmdline; fall back to comm
            let line = if cmdline.is_empty() {
                match fs::read_to_string(dir.join("comm")) {
                    Ok(comm) => comm.trim().to_string(),
                    Err(_) => continue,
                }
            } else {
                cmdline
            };

            if !line.is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }
}
