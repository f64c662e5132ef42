//! Request dispatcher
//!
//! Maps `method` strings onto profile, hardware and state operations and
//! turns failures into structured error envelopes that echo the request id.
//! Mutating methods are audit-logged with the caller's credentials.

use crate::server::PeerCredentials;
use apu_core::{activate_profile, ApuError, EventBus, ProfileManager, SharedState};
use apu_protocol::{
    methods, ActivatedBy, CreateProfileParams, Envelope, ErrorCode, ErrorResponse, HardwareLimits,
    NameParams, Request, Response, SetHardwareLimitsParams, UpdateProfileParams, VersionInfo,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Failure of one request, ready to be sent back
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchError {
    pub code: ErrorCode,
    pub message: String,
}

impl DispatchError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl From<ApuError> for DispatchError {
    fn from(err: ApuError) -> Self {
        let code = match &err {
            ApuError::ProfileNotFound(_) => ErrorCode::ProfileNotFound,
            ApuError::Validation(_) | ApuError::ProfileExists(_) => ErrorCode::ValidationError,
            ApuError::JsonParse(_) => ErrorCode::InvalidParams,
            _ => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

type DispatchResult = std::result::Result<Value, DispatchError>;

fn params<T: DeserializeOwned>(params: Option<&Value>) -> std::result::Result<T, DispatchError> {
    let value = params.cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| DispatchError::new(ErrorCode::InvalidParams, e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> DispatchResult {
    serde_json::to_value(value).map_err(|e| DispatchError::new(ErrorCode::InternalError, e.to_string()))
}

fn check_limits(limits: &HardwareLimits) -> std::result::Result<(), DispatchError> {
    let inverted = limits.inverted_ranges();
    if inverted.is_empty() {
        return Ok(());
    }
    Err(DispatchError::new(
        ErrorCode::InvalidParams,
        format!("min exceeds max for: {}", inverted.join(", ")),
    ))
}

pub struct Dispatcher {
    manager: Arc<ProfileManager>,
    state: SharedState,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(manager: Arc<ProfileManager>, state: SharedState, events: EventBus) -> Self {
        Self { manager, state, events }
    }

    /// Handle one request. Always yields a response or error envelope with the same id.
    pub async fn dispatch(&self, request: &Request, cred: &PeerCredentials) -> Envelope {
        match self.handle(request, cred).await {
            Ok(result) => Envelope::Response(Response {
                id: request.id.clone(),
                result: Some(result),
            }),
            Err(err) => {
                debug!("{} from uid={} failed: {} {}", request.method, cred.uid, err.code, err.message);
                Envelope::Error(ErrorResponse::new(request.id.clone(), err.code, err.message))
            }
        }
    }

    async fn handle(&self, request: &Request, cred: &PeerCredentials) -> DispatchResult {
        let p = request.params.as_ref();
        match request.method.as_str() {
            methods::PING => Ok(json!("pong")),
            methods::VERSION => to_value(VersionInfo {
                version: VERSION.to_string(),
                backend: self.manager.hardware().name().to_string(),
            }),
            methods::GET_STATUS => to_value(self.state.read().await.snapshot()),
            methods::GET_HARDWARE_INFO => {
                let info = self.manager.hardware().read_hardware_info().await?;
                self.state.write().await.record_hw_info(info.clone());
                to_value(info)
            }
            methods::LIST_PROFILES => to_value(self.manager.list()),
            methods::GET_PROFILE => {
                let NameParams { name } = params(p)?;
                let profile = self.manager.get(&name).ok_or(ApuError::ProfileNotFound(name))?;
                to_value(profile)
            }
            methods::CREATE_PROFILE => {
                let CreateProfileParams { profile } = params(p)?;
                info!("AUDIT: createProfile name={} by uid={}, pid={}", profile.name, cred.uid, cred.pid);
                to_value(self.manager.create(profile)?)
            }
            methods::UPDATE_PROFILE => {
                let UpdateProfileParams { name, profile } = params(p)?;
                info!(
                    "AUDIT: updateProfile name={} new_name={} by uid={}, pid={}",
                    name, profile.name, cred.uid, cred.pid
                );
                self.update_profile(&name, profile).await
            }
            methods::DELETE_PROFILE => {
                let NameParams { name } = params(p)?;
                info!("AUDIT: deleteProfile name={} by uid={}, pid={}", name, cred.uid, cred.pid);
                self.delete_profile(&name).await
            }
            methods::APPLY_PROFILE => {
                let NameParams { name } = params(p)?;
                info!("AUDIT: applyProfile name={} by uid={}, pid={}", name, cred.uid, cred.pid);
                match activate_profile(&self.manager, &self.state, &self.events, &name, ActivatedBy::Manual).await {
                    Ok(result) => to_value(result),
                    Err(e @ ApuError::ProfileNotFound(_)) => Err(e.into()),
                    Err(e) => {
                        warn!(profile = %name, "Apply failed: {}", e);
                        Err(DispatchError::new(ErrorCode::ApplyError, e.to_string()))
                    }
                }
            }
            methods::GET_HARDWARE_LIMITS => to_value(self.manager.hardware().hardware_limits()),
            methods::SET_HARDWARE_LIMITS => {
                let SetHardwareLimitsParams { limits } = params(p)?;
                check_limits(&limits)?;
                info!("AUDIT: setHardwareLimits by uid={}, pid={}", cred.uid, cred.pid);
                self.manager.hardware().set_hardware_limits(limits);
                self.state.write().await.config.hardware_limits = limits;
                to_value(limits)
            }
            methods::GET_CONFIG => to_value(&self.state.read().await.config),
            other => Err(DispatchError::new(
                ErrorCode::MethodNotFound,
                format!("Unknown method: {}", other),
            )),
        }
    }

    async fn update_profile(&self, name: &str, profile: apu_protocol::Profile) -> DispatchResult {
        let new_name = profile.name.clone();
        if new_name != name && name == self.state.read().await.config.default_profile {
            return Err(DispatchError::new(
                ErrorCode::ValidationError,
                format!("The default profile {} cannot be renamed", name),
            ));
        }

        // No activation may slip between the rename and the status fix-up
        let _activation = self.manager.lock_activation().await;
        let updated = self.manager.update(name, profile)?;

        let mut state = self.state.write().await;
        if new_name != name && state.active_profile == name {
            state.active_profile = new_name;
        }
        to_value(updated)
    }

    async fn delete_profile(&self, name: &str) -> DispatchResult {
        let _activation = self.manager.lock_activation().await;
        {
            let state = self.state.read().await;
            if state.active_profile == name {
                return Err(DispatchError::new(
                    ErrorCode::CannotDeleteActive,
                    format!("Profile {} is active", name),
                ));
            }
            if state.config.default_profile == name {
                return Err(DispatchError::new(
                    ErrorCode::CannotDeleteDefault,
                    format!("Profile {} is the default profile", name),
                ));
            }
        }
        to_value(self.manager.delete(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHardware;
    use apu_core::{DaemonConfig, MemoryStore, ServerState};
    use apu_hw::HardwareStrategy;
    use apu_protocol::{LimitRange, Profile, StatusSnapshot};
    use std::time::Duration;

    const CRED: PeerCredentials = PeerCredentials { uid: 1000, gid: 1000, pid: 4242 };

    fn dispatcher() -> (Dispatcher, Arc<FakeHardware>, SharedState) {
        let hw = Arc::new(FakeHardware::default());
        let events = EventBus::new(16);
        let manager = Arc::new(ProfileManager::new(hw.clone(), Arc::new(MemoryStore::new()), events.clone()));
        manager.create(Profile::passthrough("balanced")).unwrap();
        manager.create(Profile::passthrough("quiet")).unwrap();
        let state = ServerState::shared(DaemonConfig::default());
        (Dispatcher::new(manager, state.clone(), events), hw, state)
    }

    async fn call(d: &Dispatcher, method: &str, params: Option<Value>) -> Envelope {
        d.dispatch(&Request::new("req-1", method, params), &CRED).await
    }

    fn result(envelope: Envelope) -> Value {
        match envelope {
            Envelope::Response(r) => {
                assert_eq!(r.id, "req-1");
                r.result.unwrap()
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    fn error_code(envelope: Envelope) -> ErrorCode {
        match envelope {
            Envelope::Error(e) => {
                assert_eq!(e.id, "req-1");
                e.error.code
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping_and_version() {
        let (d, _, _) = dispatcher();
        assert_eq!(result(call(&d, "ping", None).await), json!("pong"));
        let version: VersionInfo = serde_json::from_value(result(call(&d, "version", None).await)).unwrap();
        assert_eq!(version.backend, "fake");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (d, _, _) = dispatcher();
        assert_eq!(error_code(call(&d, "reboot", None).await), ErrorCode::MethodNotFound);
    }

    #[tokio::test]
    async fn test_missing_or_ill_typed_params() {
        let (d, _, _) = dispatcher();
        assert_eq!(error_code(call(&d, "getProfile", None).await), ErrorCode::InvalidParams);
        assert_eq!(
            error_code(call(&d, "applyProfile", Some(json!({"name": 7}))).await),
            ErrorCode::InvalidParams
        );
    }

    #[tokio::test]
    async fn test_apply_records_manual_activation() {
        let (d, _, state) = dispatcher();
        call(&d, "applyProfile", Some(json!({"name": "quiet"}))).await;

        let status: StatusSnapshot = serde_json::from_value(result(call(&d, "getStatus", None).await)).unwrap();
        assert_eq!(status.active_profile, "quiet");
        assert_eq!(status.activated_by, ActivatedBy::Manual);
        assert!(status.hw_info.is_some());
        assert_eq!(state.read().await.active_profile, "quiet");
    }

    #[tokio::test]
    async fn test_apply_unknown_and_failing_profiles() {
        let (d, hw, _) = dispatcher();
        assert_eq!(
            error_code(call(&d, "applyProfile", Some(json!({"name": "ghost"}))).await),
            ErrorCode::ProfileNotFound
        );
        hw.fail_cpu_clock(true);
        assert_eq!(
            error_code(call(&d, "applyProfile", Some(json!({"name": "quiet"}))).await),
            ErrorCode::ApplyError
        );
    }

    #[tokio::test]
    async fn test_delete_refuses_active_and_default() {
        let (d, _, state) = dispatcher();
        state.write().await.active_profile = "quiet".into();
        assert_eq!(
            error_code(call(&d, "deleteProfile", Some(json!({"name": "quiet"}))).await),
            ErrorCode::CannotDeleteActive
        );

        state.write().await.active_profile = "other".into();
        assert_eq!(
            error_code(call(&d, "deleteProfile", Some(json!({"name": "balanced"}))).await),
            ErrorCode::CannotDeleteDefault
        );

        let removed = result(call(&d, "deleteProfile", Some(json!({"name": "quiet"}))).await);
        assert_eq!(removed["name"], "quiet");
    }

    #[tokio::test]
    async fn test_delete_waits_for_running_activation() {
        let (d, _, _) = dispatcher();
        let activation = d.manager.lock_activation().await;
        let delete = call(&d, "deleteProfile", Some(json!({"name": "quiet"})));
        assert!(tokio::time::timeout(Duration::from_millis(50), delete).await.is_err());
        assert!(d.manager.contains("quiet"));

        drop(activation);
        let removed = result(call(&d, "deleteProfile", Some(json!({"name": "quiet"}))).await);
        assert_eq!(removed["name"], "quiet");
    }

    #[tokio::test]
    async fn test_create_invalid_profile_lists_errors() {
        let (d, _, _) = dispatcher();
        let envelope = call(
            &d,
            "createProfile",
            Some(json!({"profile": {"name": "hot", "power": {"stapm": 999999}}})),
        )
        .await;
        match envelope {
            Envelope::Error(e) => {
                assert_eq!(e.error.code, ErrorCode::ValidationError);
                assert!(e.error.message.contains("power.stapm"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rename_follows_active_profile() {
        let (d, _, state) = dispatcher();
        state.write().await.active_profile = "quiet".into();
        let params = json!({"name": "quiet", "profile": {"name": "silent"}});
        result(call(&d, "updateProfile", Some(params)).await);
        assert_eq!(state.read().await.active_profile, "silent");

        let rename_default = json!({"name": "balanced", "profile": {"name": "normal"}});
        assert_eq!(
            error_code(call(&d, "updateProfile", Some(rename_default)).await),
            ErrorCode::ValidationError
        );
    }

    #[tokio::test]
    async fn test_set_hardware_limits_round_trips_and_rejects_inverted_ranges() {
        let (d, hw, _) = dispatcher();
        let mut limits = HardwareLimits::default();
        limits.stapm = LimitRange::new(8_000, 25_000);
        result(call(&d, "setHardwareLimits", Some(json!({"limits": limits}))).await);
        assert_eq!(hw.hardware_limits().stapm, LimitRange::new(8_000, 25_000));
        let config: DaemonConfig = serde_json::from_value(result(call(&d, "getConfig", None).await)).unwrap();
        assert_eq!(config.hardware_limits.stapm, LimitRange::new(8_000, 25_000));

        limits.fast = LimitRange::new(30_000, 10_000);
        assert_eq!(
            error_code(call(&d, "setHardwareLimits", Some(json!({"limits": limits}))).await),
            ErrorCode::InvalidParams
        );
        assert_eq!(hw.hardware_limits().fast, HardwareLimits::default().fast);
    }

    #[tokio::test]
    async fn test_get_hardware_info_refreshes_status() {
        let (d, _, state) = dispatcher();
        let info = result(call(&d, "getHardwareInfo", None).await);
        assert_eq!(info["temperature"], json!(50.0));
        assert!(state.read().await.last_hw_info_at.is_some());
    }
}
