//! Constants and configuration defaults for apuctl
//!
//! Paths, timing and limits used across the daemon and its clients.

use std::time::Duration;

/// System paths and environment variables
pub mod paths {
    /// System-wide configuration file
    pub const SYSTEM_CONFIG_FILE: &str = "/etc/apuctl/config.json";

    /// Name of the per-user config subdirectory under the XDG config dir
    pub const APP_DIR_NAME: &str = "apuctl";

    pub const CONFIG_FILE_NAME: &str = "config.json";

    /// Unix socket the daemon listens on
    pub const SOCKET_PATH: &str = "/run/apuctl.sock";

    /// One JSON file per profile
    pub const PROFILES_DIR: &str = "/etc/apuctl/profiles";

    /// Overrides the config file location
    pub const CONFIG_ENV: &str = "APUCTL_CONFIG";

    /// Overrides the socket location for clients
    pub const SOCKET_ENV: &str = "APUCTL_SOCKET";
}

/// Process watcher timing
pub mod watcher {
    /// Default tick interval
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

    /// Ticks faster than this are raised to it
    pub const MIN_POLL_INTERVAL_MS: u64 = 500;

    /// Consecutive identical observations before switching or reverting
    pub const DEFAULT_DEBOUNCE_THRESHOLD: u32 = 2;
}

/// Profile constraints
pub mod profile {
    /// Applied at startup and never deletable
    pub const DEFAULT_PROFILE: &str = "balanced";

    pub const MAX_NAME_LEN: usize = 64;

    pub const MAX_DESCRIPTION_LEN: usize = 512;

    pub const MAX_PATTERNS: usize = 64;

    pub const FILE_EXTENSION: &str = "json";
}

/// Daemon client settings
pub mod client {
    use super::Duration;

    /// How long a request waits for its response
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Capacity of the event channel handed to subscribers
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;

    /// Read buffer for socket reads
    pub const READ_CHUNK_SIZE: usize = 8192;
}

/// Capacity of the daemon-side event broadcast channel
pub const EVENT_BUS_CAPACITY: usize = 128;
