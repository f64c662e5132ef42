//! Daemon Client
//!
//! Async connection to apuctld over its Unix socket. Any number of requests
//! may be in flight at once: a single reader task routes each response to
//! its caller strictly by `id`, and forwards daemon notifications to
//! [`DaemonClient::subscribe`] receivers.

use crate::constants::{client, paths};
use apu_error::{ApuError, Result};
use apu_protocol::{
    encode_record, methods, parse_envelope, ApplyResult, CreateProfileParams, Envelope, ErrorBody,
    ErrorCode, HardwareInfo, HardwareLimits, LineBuffer, NameParams, Profile, Request,
    SetHardwareLimitsParams, StatusSnapshot, UpdateProfileParams, VersionInfo, MAX_MESSAGE_SIZE,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

type Reply = std::result::Result<Option<Value>, ErrorBody>;
type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Reply>>>>;

/// Socket path clients should use: `APUCTL_SOCKET` or the default
pub fn socket_path() -> PathBuf {
    std::env::var_os(paths::SOCKET_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(paths::SOCKET_PATH))
}

pub struct DaemonClient {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    events: broadcast::Sender<Request>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    timeout: Duration,
}

impl DaemonClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            ApuError::DaemonConnection(format!("Failed to connect to daemon at {}: {}", path.display(), e))
        })?;
        debug!("Connected to daemon at {}", path.display());
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected stream. Must be called inside a tokio runtime.
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(client::EVENT_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&pending),
            events.clone(),
            Arc::clone(&closed),
        ));

        Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            events,
            closed,
            reader,
            timeout: client::REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Daemon notifications (`event.*`) received from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Request> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one request and decode its result
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        let id = Uuid::new_v4().to_string();
        let record = encode_record(&Request::new(id.clone(), method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        if self.is_closed() {
            self.pending.lock().remove(&id);
            return Err(ApuError::DaemonConnection("connection closed".into()));
        }

        let sent = self.writer.lock().await.write_all(&record).await;
        if let Err(e) = sent {
            self.pending.lock().remove(&id);
            return Err(ApuError::DaemonConnection(format!("Failed to send {}: {}", method, e)));
        }
        trace!("Sent {} ({})", method, id);

        let reply = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(ApuError::DaemonConnection(format!(
                    "connection closed before {} was answered",
                    method
                )))
            }
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(ApuError::DaemonConnection(format!(
                    "{} timed out after {}ms",
                    method,
                    self.timeout.as_millis()
                )));
            }
        };

        match reply {
            Ok(result) => serde_json::from_value(result.unwrap_or(Value::Null)).map_err(|e| {
                ApuError::DaemonResponse {
                    code: ErrorCode::ParseError.as_str().to_string(),
                    message: format!("undecodable {} result: {}", method, e),
                }
            }),
            Err(body) => Err(ApuError::DaemonResponse {
                code: body.code.as_str().to_string(),
                message: body.message,
            }),
        }
    }

    async fn call<P: Serialize, T: DeserializeOwned>(&self, method: &str, params: P) -> Result<T> {
        self.request(method, Some(serde_json::to_value(params)?)).await
    }

    pub async fn ping(&self) -> Result<Value> {
        self.request(methods::PING, None).await
    }

    pub async fn version(&self) -> Result<VersionInfo> {
        self.request(methods::VERSION, None).await
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.request(methods::GET_STATUS, None).await
    }

    pub async fn hardware_info(&self) -> Result<HardwareInfo> {
        self.request(methods::GET_HARDWARE_INFO, None).await
    }

    pub async fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.request(methods::LIST_PROFILES, None).await
    }

    pub async fn get_profile(&self, name: &str) -> Result<Profile> {
        self.call(methods::GET_PROFILE, NameParams { name: name.to_string() }).await
    }

    pub async fn create_profile(&self, profile: Profile) -> Result<Profile> {
        self.call(methods::CREATE_PROFILE, CreateProfileParams { profile }).await
    }

    pub async fn update_profile(&self, name: &str, profile: Profile) -> Result<Profile> {
        self.call(
            methods::UPDATE_PROFILE,
            UpdateProfileParams { name: name.to_string(), profile },
        )
        .await
    }

    pub async fn delete_profile(&self, name: &str) -> Result<Profile> {
        self.call(methods::DELETE_PROFILE, NameParams { name: name.to_string() }).await
    }

    pub async fn apply_profile(&self, name: &str) -> Result<ApplyResult> {
        self.call(methods::APPLY_PROFILE, NameParams { name: name.to_string() }).await
    }

    pub async fn hardware_limits(&self) -> Result<HardwareLimits> {
        self.request(methods::GET_HARDWARE_LIMITS, None).await
    }

    pub async fn set_hardware_limits(&self, limits: HardwareLimits) -> Result<HardwareLimits> {
        self.call(methods::SET_HARDWARE_LIMITS, SetHardwareLimitsParams { limits }).await
    }

    pub async fn config(&self) -> Result<crate::config::DaemonConfig> {
        self.request(methods::GET_CONFIG, None).await
    }
}

impl Drop for DaemonClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    pending: PendingMap,
    events: broadcast::Sender<Request>,
    closed: Arc<AtomicBool>,
) {
    let mut buffer = LineBuffer::new(MAX_MESSAGE_SIZE);
    let mut chunk = vec![0u8; client::READ_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Daemon socket read failed: {}", e);
                break;
            }
        };

        for record in buffer.push(&chunk[..n]) {
            match parse_envelope(&record) {
                Some(Envelope::Response(resp)) => route(&pending, &resp.id, Ok(resp.result)),
                Some(Envelope::Error(err)) => route(&pending, &err.id, Err(err.error)),
                Some(Envelope::Request(req)) if req.is_event() => {
                    // No subscribers is fine
                    let _ = events.send(req);
                }
                Some(Envelope::Request(req)) => {
                    debug!("Ignoring unexpected request {} from daemon", req.method)
                }
                None => {}
            }
        }
    }

    debug!("Daemon connection closed");
    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiting caller
    pending.lock().clear();
}

fn route(pending: &PendingMap, id: &str, reply: Reply) {
    match pending.lock().remove(id) {
        Some(tx) => {
            // Caller may have timed out already
            let _ = tx.send(reply);
        }
        None => debug!("Dropping reply for unknown id {}", id),
    }
}
