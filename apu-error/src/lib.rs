//! Unified error handling for apuctl
//!
//! This crate provides the single error type used across all apuctl components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using ApuError
pub type Result<T> = std::result::Result<T, ApuError>;

/// Unified error type for all apuctl operations
#[derive(thiserror::Error, Debug)]
pub enum ApuError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Sysfs Errors
    // ============================================================================
    #[error("Failed to read {path}: {reason}")]
    SysfsRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write {value:?} to {path}: {source}")]
    SysfsWrite {
        path: PathBuf,
        value: String,
        source: io::Error,
    },

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Required device not found: {0}")]
    DeviceNotFound(String),

    #[error("Native library error: {0}")]
    NativeLibrary(String),

    #[error("Native call {call} failed with status {status}")]
    NativeCall {
        call: &'static str,
        status: i32,
    },

    #[error("{command} exited with code {code}: {stderr}")]
    Subprocess {
        command: String,
        code: i32,
        stderr: String,
    },

    // ============================================================================
    // Profile Errors
    // ============================================================================
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Daemon connection failed: {0}")]
    DaemonConnection(String),

    #[error("Daemon returned {code}: {message}")]
    DaemonResponse {
        code: String,
        message: String,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl ApuError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a sysfs read error
    pub fn sysfs_read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SysfsRead {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Validation messages, if this is a validation failure
    pub fn validation_errors(&self) -> Option<&[String]> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}
