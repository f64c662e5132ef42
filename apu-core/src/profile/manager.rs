//! Authoritative in-memory profile set and apply orchestration

use super::store::ProfileStore;
use super::validation::validate_structure;
use crate::events::{DaemonEvent, EventBus};
use apu_error::{ApuError, Result};
use apu_hw::HardwareStrategy;
use apu_protocol::{ApplyResult, Profile};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ProfileManager {
    hardware: Arc<dyn HardwareStrategy>,
    store: Arc<dyn ProfileStore>,
    profiles: RwLock<BTreeMap<String, Profile>>,
    /// Held from the existence check through persist and insert
    edit_lock: Mutex<()>,
    /// One activation (apply plus bookkeeping) at a time
    activation_lock: tokio::sync::Mutex<()>,
    events: EventBus,
}

/// Exclusive right to push a profile to hardware.
///
/// Callers that must observe or update the active profile consistently with
/// what the hardware runs hold this across the whole sequence.
pub struct ActivationGuard<'a> {
    _guard: tokio::sync::MutexGuard<'a, ()>,
}

impl ProfileManager {
    pub fn new(hardware: Arc<dyn HardwareStrategy>, store: Arc<dyn ProfileStore>, events: EventBus) -> Self {
        Self {
            hardware,
            store,
            profiles: RwLock::new(BTreeMap::new()),
            edit_lock: Mutex::new(()),
            activation_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn hardware(&self) -> &Arc<dyn HardwareStrategy> {
        &self.hardware
    }

    /// Load persisted profiles. Invalid ones are logged and left out.
    pub fn load(&self) -> Result<usize> {
        let mut loaded = BTreeMap::new();
        for profile in self.store.load_all()? {
            let errors = self.validate(&profile);
            if !errors.is_empty() {
                warn!("Ignoring profile {:?}: {}", profile.name, errors.join("; "));
                continue;
            }
            loaded.insert(profile.name.clone(), profile);
        }
        let count = loaded.len();
        *self.profiles.write() = loaded;
        info!("Loaded {} profile(s)", count);
        Ok(count)
    }

    /// Add a profile to memory only; used for the built-in fallback
    pub fn insert_transient(&self, profile: Profile) {
        debug!("Adding in-memory profile {}", profile.name);
        self.profiles.write().insert(profile.name.clone(), profile);
    }

    pub fn list(&self) -> Vec<Profile> {
        self.profiles.read().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Profile> {
        self.profiles.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.read().contains_key(name)
    }

    /// Structural checks first; hardware bounds only once the shape is sound
    pub fn validate(&self, profile: &Profile) -> Vec<String> {
        let errors = validate_structure(profile);
        if !errors.is_empty() {
            return errors;
        }
        self.hardware.validate_profile(profile)
    }

    fn ensure_valid(&self, profile: &Profile) -> Result<()> {
        let errors = self.validate(profile);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ApuError::Validation(errors))
        }
    }

    pub fn create(&self, profile: Profile) -> Result<Profile> {
        self.ensure_valid(&profile)?;
        let _edit = self.edit_lock.lock();
        if self.contains(&profile.name) {
            return Err(ApuError::ProfileExists(profile.name));
        }

        self.store.save(&profile)?;
        self.profiles.write().insert(profile.name.clone(), profile.clone());
        info!("Created profile {}", profile.name);
        self.events.publish(DaemonEvent::ProfilesChanged);
        Ok(profile)
    }

    /// Replace a profile. A different `profile.name` is a rename: the old
    /// entry and its persisted form go first so a failure never leaves both.
    pub fn update(&self, name: &str, profile: Profile) -> Result<Profile> {
        let _edit = self.edit_lock.lock();
        if !self.contains(name) {
            return Err(ApuError::ProfileNotFound(name.to_string()));
        }
        self.ensure_valid(&profile)?;

        let renamed = profile.name != name;
        if renamed {
            if self.contains(&profile.name) {
                return Err(ApuError::ProfileExists(profile.name));
            }
            self.profiles.write().remove(name);
            self.store.delete(name)?;
            info!("Renamed profile {} -> {}", name, profile.name);
        }

        self.store.save(&profile)?;
        self.profiles.write().insert(profile.name.clone(), profile.clone());
        debug!("Updated profile {}", profile.name);
        self.events.publish(DaemonEvent::ProfilesChanged);
        Ok(profile)
    }

    /// Remove a profile. Refusing the active or default profile is the caller's job.
    pub fn delete(&self, name: &str) -> Result<Profile> {
        let _edit = self.edit_lock.lock();
        let removed = self
            .profiles
            .write()
            .remove(name)
            .ok_or_else(|| ApuError::ProfileNotFound(name.to_string()))?;
        self.store.delete(name)?;
        info!("Deleted profile {}", name);
        self.events.publish(DaemonEvent::ProfilesChanged);
        Ok(removed)
    }

    /// Wait for any running activation to finish
    pub async fn lock_activation(&self) -> ActivationGuard<'_> {
        ActivationGuard {
            _guard: self.activation_lock.lock().await,
        }
    }

    pub async fn apply(&self, name: &str) -> Result<ApplyResult> {
        let guard = self.lock_activation().await;
        self.apply_locked(&guard, name).await
    }

    /// Push a profile to hardware: power limits, CPU clock, then GPU clock
    /// or (only without clock bounds) GPU perf level, then the OS power
    /// profile, then a fresh hardware read.
    pub async fn apply_locked(&self, _guard: &ActivationGuard<'_>, name: &str) -> Result<ApplyResult> {
        let profile = self
            .get(name)
            .ok_or_else(|| ApuError::ProfileNotFound(name.to_string()))?;

        let hw = &self.hardware;
        debug!(profile = %name, backend = hw.name(), "Applying profile");

        hw.apply_power_limits(&profile.power).await?;
        hw.apply_cpu_clock(profile.cpu_clock.max, profile.cpu_clock.min).await?;

        if profile.has_gpu_clock_bound() {
            if let Some(level) = profile.gpu_clock.perf_level {
                warn!(
                    profile = %name,
                    "GPU clock bounds take precedence, ignoring perfLevel {}",
                    level.as_str()
                );
            }
            hw.apply_gpu_clock(profile.gpu_clock.max, profile.gpu_clock.min).await?;
        } else if let Some(level) = profile.gpu_clock.perf_level {
            hw.apply_gpu_perf_level(level).await?;
        }

        hw.apply_os_power_profile(profile.power_profile.as_deref()).await?;
        let hw_info = hw.read_hardware_info().await?;

        info!(profile = %name, "Profile applied");
        Ok(ApplyResult { profile, hw_info })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::MemoryStore;
    use crate::test_support::{FakeHardware, HwCall};
    use apu_protocol::{GpuPerfLevel, PowerLimits};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    /// Store whose writes take long enough for callers to overlap
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl ProfileStore for SlowStore {
        fn load_all(&self) -> Result<Vec<Profile>> {
            self.inner.load_all()
        }

        fn save(&self, profile: &Profile) -> Result<()> {
            thread::sleep(self.delay);
            self.inner.save(profile)
        }

        fn delete(&self, name: &str) -> Result<()> {
            self.inner.delete(name)
        }
    }

    fn slow_manager() -> (Arc<ProfileManager>, Arc<SlowStore>) {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(50),
        });
        let manager = ProfileManager::new(Arc::new(FakeHardware::default()), store.clone(), EventBus::new(8));
        (Arc::new(manager), store)
    }

    /// Run each edit on its own thread, released together
    fn race<F>(manager: &Arc<ProfileManager>, edits: Vec<F>) -> Vec<Result<Profile>>
    where
        F: FnOnce(&ProfileManager) -> Result<Profile> + Send + 'static,
    {
        let barrier = Arc::new(Barrier::new(edits.len()));
        let handles: Vec<_> = edits
            .into_iter()
            .map(|edit| {
                let manager = manager.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    edit(&*manager)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    fn manager() -> (ProfileManager, Arc<FakeHardware>, Arc<MemoryStore>) {
        let hw = Arc::new(FakeHardware::default());
        let store = Arc::new(MemoryStore::new());
        let manager = ProfileManager::new(hw.clone(), store.clone(), EventBus::new(8));
        (manager, hw, store)
    }

    #[tokio::test]
    async fn test_apply_order_with_gpu_clock_bound() {
        let (manager, hw, _) = manager();
        let mut profile = Profile::passthrough("gaming");
        profile.power = PowerLimits { stapm: Some(30_000), slow: None, fast: None };
        profile.cpu_clock.max = Some(4_000);
        profile.gpu_clock.max = Some(2_000);
        profile.gpu_clock.perf_level = Some(GpuPerfLevel::High);
        profile.power_profile = Some("performance".into());
        manager.create(profile).unwrap();

        let result = manager.apply("gaming").await.unwrap();
        assert_eq!(result.profile.name, "gaming");
        assert_eq!(
            hw.calls(),
            vec![
                HwCall::PowerLimits,
                HwCall::CpuClock(Some(4_000), None),
                HwCall::GpuClock(Some(2_000), None),
                HwCall::OsPowerProfile(Some("performance".into())),
                HwCall::ReadInfo,
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_uses_perf_level_without_clock_bound() {
        let (manager, hw, _) = manager();
        let mut profile = Profile::passthrough("docked");
        profile.gpu_clock.perf_level = Some(GpuPerfLevel::High);
        manager.create(profile).unwrap();

        manager.apply("docked").await.unwrap();
        assert!(hw.calls().contains(&HwCall::GpuPerfLevel(GpuPerfLevel::High)));
        assert!(!hw.calls().iter().any(|c| matches!(c, HwCall::GpuClock(..))));
    }

    #[tokio::test]
    async fn test_apply_unknown_profile_touches_nothing() {
        let (manager, hw, _) = manager();
        assert!(matches!(manager.apply("missing").await, Err(ApuError::ProfileNotFound(_))));
        assert!(hw.calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_stops_at_first_hardware_failure() {
        let (manager, hw, _) = manager();
        manager.create(Profile::passthrough("quiet")).unwrap();
        hw.fail_cpu_clock(true);
        assert!(manager.apply("quiet").await.is_err());
        assert_eq!(hw.calls(), vec![HwCall::PowerLimits, HwCall::CpuClock(None, None)]);
    }

    #[test]
    fn test_create_rejects_duplicates_and_invalid_profiles() {
        let (manager, _, store) = manager();
        manager.create(Profile::passthrough("quiet")).unwrap();
        assert!(matches!(
            manager.create(Profile::passthrough("quiet")),
            Err(ApuError::ProfileExists(_))
        ));

        let mut bad = Profile::passthrough("hot");
        bad.power.stapm = Some(1_000_000);
        bad.cpu_clock.min = Some(3_000);
        bad.cpu_clock.max = Some(2_000);
        let err = manager.create(bad).unwrap_err();
        assert_eq!(err.validation_errors().map(|e| e.len()), Some(2));
        assert_eq!(store.names(), vec!["quiet".to_string()]);
    }

    #[test]
    fn test_structural_errors_skip_hardware_validation() {
        let (manager, hw, _) = manager();
        let mut bad = Profile::passthrough("-bad");
        bad.power.stapm = Some(1_000_000);
        let err = manager.create(bad).unwrap_err();
        assert_eq!(err.validation_errors().map(|e| e.len()), Some(1));
        assert_eq!(hw.validations(), 0);
    }

    #[test]
    fn test_update_with_rename_removes_old_identity() {
        let (manager, _, store) = manager();
        manager.create(Profile::passthrough("old")).unwrap();
        manager.create(Profile::passthrough("other")).unwrap();

        let mut renamed = Profile::passthrough("new");
        renamed.description = Some("renamed".into());
        manager.update("old", renamed.clone()).unwrap();

        assert!(manager.get("old").is_none());
        assert_eq!(manager.get("new"), Some(renamed));
        assert_eq!(store.names(), vec!["new".to_string(), "other".to_string()]);
    }

    #[test]
    fn test_update_rename_onto_existing_is_refused() {
        let (manager, _, _) = manager();
        manager.create(Profile::passthrough("a")).unwrap();
        manager.create(Profile::passthrough("b")).unwrap();
        assert!(matches!(
            manager.update("a", Profile::passthrough("b")),
            Err(ApuError::ProfileExists(_))
        ));
        assert!(manager.contains("a"));
    }

    #[test]
    fn test_delete_and_list() {
        let (manager, _, store) = manager();
        manager.create(Profile::passthrough("b")).unwrap();
        manager.create(Profile::passthrough("a")).unwrap();
        let names: Vec<_> = manager.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        manager.delete("a").unwrap();
        assert!(matches!(manager.delete("a"), Err(ApuError::ProfileNotFound(_))));
        assert_eq!(store.names(), vec!["b".to_string()]);
    }

    #[test]
    fn test_concurrent_creates_of_one_name_admit_exactly_one() {
        let (manager, store) = slow_manager();
        let edits: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|description| {
                move |m: &ProfileManager| {
                    let mut profile = Profile::passthrough("dup");
                    profile.description = Some(description.to_string());
                    m.create(profile)
                }
            })
            .collect();

        let results = race(&manager, edits);
        let created: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(created.len(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(ApuError::ProfileExists(_)))));

        let winner = created[0].description.clone();
        assert_eq!(manager.get("dup").unwrap().description, winner);
        assert_eq!(store.inner.load_all().unwrap()[0].description, winner);
    }

    #[test]
    fn test_rename_racing_create_of_target_keeps_one_copy() {
        let (manager, store) = slow_manager();
        manager.create(Profile::passthrough("old")).unwrap();

        let rename: Box<dyn FnOnce(&ProfileManager) -> Result<Profile> + Send> =
            Box::new(|m| m.update("old", Profile::passthrough("new")));
        let create: Box<dyn FnOnce(&ProfileManager) -> Result<Profile> + Send> = Box::new(|m| {
            let mut profile = Profile::passthrough("new");
            profile.description = Some("created".into());
            m.create(profile)
        });

        let results = race(&manager, vec![rename, create]);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(ApuError::ProfileExists(_)))));

        let names: Vec<_> = manager.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names.iter().filter(|n| *n == "new").count(), 1);
        assert_eq!(store.inner.names(), names);
    }

    #[tokio::test]
    async fn test_apply_waits_for_held_activation() {
        let (manager, hw, _) = manager();
        manager.create(Profile::passthrough("quiet")).unwrap();

        let guard = manager.lock_activation().await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), manager.apply("quiet")).await;
        assert!(blocked.is_err());
        assert!(hw.calls().is_empty());

        let result = manager.apply_locked(&guard, "quiet").await.unwrap();
        assert_eq!(result.profile.name, "quiet");
        drop(guard);
        manager.apply("quiet").await.unwrap();
    }

    #[test]
    fn test_load_skips_invalid_persisted_profiles() {
        let hw = Arc::new(FakeHardware::default());
        let mut hot = Profile::passthrough("hot");
        hot.power.fast = Some(999_999);
        let store = Arc::new(MemoryStore::with_profiles([Profile::passthrough("quiet"), hot]));
        let manager = ProfileManager::new(hw, store, EventBus::new(8));
        assert_eq!(manager.load().unwrap(), 1);
        assert!(manager.contains("quiet"));
    }
}
