//! Process-wide daemon state
//!
//! Owned behind [`SharedState`] and handed to the watcher and the dispatcher
//! explicitly. Only profile activations (manual, automatic, startup) and
//! status reads touch it.

use crate::config::DaemonConfig;
use crate::events::{DaemonEvent, EventBus};
use crate::profile::ProfileManager;
use apu_error::Result;
use apu_protocol::{ActivatedBy, ApplyResult, HardwareInfo, StatusSnapshot};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ServerState {
    pub active_profile: String,
    pub activated_by: ActivatedBy,
    pub last_hw_info: Option<HardwareInfo>,
    pub last_hw_info_at: Option<DateTime<Utc>>,
    pub config: DaemonConfig,
}

pub type SharedState = Arc<RwLock<ServerState>>;

impl ServerState {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            active_profile: config.default_profile.clone(),
            activated_by: ActivatedBy::Startup,
            last_hw_info: None,
            last_hw_info_at: None,
            config,
        }
    }

    pub fn shared(config: DaemonConfig) -> SharedState {
        Arc::new(RwLock::new(Self::new(config)))
    }

    pub fn record_apply(&mut self, result: &ApplyResult, activated_by: ActivatedBy) {
        self.active_profile = result.profile.name.clone();
        self.activated_by = activated_by;
        self.record_hw_info(result.hw_info.clone());
    }

    pub fn record_hw_info(&mut self, info: HardwareInfo) {
        self.last_hw_info = Some(info);
        self.last_hw_info_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            active_profile: self.active_profile.clone(),
            activated_by: self.activated_by,
            hw_info: self.last_hw_info.clone(),
            hw_info_at: self.last_hw_info_at,
        }
    }
}

/// Apply a profile, record it as active and announce it.
///
/// The activation guard is held throughout, so the recorded active profile
/// is always the one the hardware last received.
pub async fn activate_profile(
    manager: &ProfileManager,
    state: &SharedState,
    events: &EventBus,
    name: &str,
    activated_by: ActivatedBy,
) -> Result<ApplyResult> {
    let guard = manager.lock_activation().await;
    let result = manager.apply_locked(&guard, name).await?;
    state.write().await.record_apply(&result, activated_by);
    info!(profile = %name, activated_by = %activated_by, "Profile activated");
    events.publish(DaemonEvent::ProfileApplied {
        name: result.profile.name.clone(),
        activated_by,
        hw_info: Some(result.hw_info.clone()),
    });
    drop(guard);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::MemoryStore;
    use crate::test_support::{FakeHardware, HwCall};
    use apu_protocol::Profile;

    #[test]
    fn test_new_state_starts_on_default_profile() {
        let state = ServerState::new(DaemonConfig::default());
        assert_eq!(state.active_profile, "balanced");
        assert_eq!(state.activated_by, ActivatedBy::Startup);
        assert!(state.snapshot().hw_info.is_none());
    }

    #[test]
    fn test_record_apply_replaces_snapshot() {
        let mut state = ServerState::new(DaemonConfig::default());
        let result = ApplyResult {
            profile: Profile::passthrough("gaming"),
            hw_info: HardwareInfo { temperature: Some(70.0), ..Default::default() },
        };
        state.record_apply(&result, ActivatedBy::Auto);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.active_profile, "gaming");
        assert_eq!(snapshot.activated_by, ActivatedBy::Auto);
        assert_eq!(snapshot.hw_info.unwrap().temperature, Some(70.0));
        assert!(snapshot.hw_info_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_activations_record_what_hardware_runs() {
        let hw = Arc::new(FakeHardware::default());
        let events = EventBus::new(512);
        let manager = Arc::new(ProfileManager::new(hw.clone(), Arc::new(MemoryStore::new()), events.clone()));
        for name in ["quiet", "balanced"] {
            let mut profile = Profile::passthrough(name);
            profile.power_profile = Some(name.to_string());
            manager.create(profile).unwrap();
        }
        let state = ServerState::shared(DaemonConfig::default());
        let mut rx = events.subscribe();

        for _ in 0..50 {
            let tasks: Vec<_> = [("quiet", ActivatedBy::Manual), ("balanced", ActivatedBy::Auto)]
                .into_iter()
                .map(|(name, by)| {
                    let (manager, state, events) = (manager.clone(), state.clone(), events.clone());
                    tokio::spawn(async move {
                        activate_profile(&manager, &state, &events, name, by).await.map(|_| ())
                    })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }

            let on_hardware = hw
                .calls()
                .into_iter()
                .rev()
                .find_map(|call| match call {
                    HwCall::OsPowerProfile(name) => name,
                    _ => None,
                })
                .unwrap();
            let snapshot = state.read().await.snapshot();
            assert_eq!(snapshot.active_profile, on_hardware);

            let last_announced = std::iter::from_fn(|| rx.try_recv().ok())
                .filter_map(|event| match event {
                    DaemonEvent::ProfileApplied { name, .. } => Some(name),
                    DaemonEvent::ProfilesChanged => None,
                })
                .last()
                .unwrap();
            assert_eq!(last_announced, on_hardware);
        }
    }
}
