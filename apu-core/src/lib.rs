//! apuctl Core Library
//!
//! Everything between the wire protocol and the hardware backend:
//!
//! - `profile/` - authoritative profile set, structural validation, persistence seam
//! - `matcher` / `process` / `watcher` - process-triggered profile switching
//! - `state` / `events` - active-profile bookkeeping and change notifications
//! - `config` - daemon configuration
//! - `daemon_client` - async client for apuctld

pub mod config;
pub mod constants;
pub mod daemon_client;
pub mod events;
pub mod matcher;
pub mod process;
pub mod profile;
pub mod state;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use apu_error::{ApuError, Result};

pub use config::{clamp_poll_interval, DaemonConfig};
pub use daemon_client::{socket_path, DaemonClient};
pub use events::{DaemonEvent, EventBus};
pub use matcher::{CompiledTrigger, PatternMatcher};
pub use process::{ProcessSource, ProcfsScanner};
pub use profile::{ActivationGuard, JsonDirStore, MemoryStore, ProfileManager, ProfileStore};
pub use state::{activate_profile, ServerState, SharedState};
pub use watcher::{ProcessWatcher, TickOutcome};
