//! Unix Socket Server (Hardened)
//!
//! Newline-delimited JSON over a Unix domain socket. Each connection owns its
//! own receive buffer; requests on a connection are answered in order, and
//! daemon events are pushed to every connection as notification envelopes.
//!
//! # Security Features
//! - **Socket permissions**: mode 0660 with stale-socket and symlink checks
//! - **Peer credentials**: audit logging of UID/GID/PID for every connection
//! - **Connection limits**: maximum concurrent connections enforced
//! - **Message limits**: oversize records are discarded, never buffered
//! - **Write timeouts**: a stuck client cannot stall its connection task forever

use crate::dispatch::Dispatcher;
use apu_core::{DaemonEvent, EventBus};
use apu_error::{ApuError, Result};
use apu_protocol::{
    encode_record, Envelope, ErrorCode, ErrorResponse, LineBuffer, Request, EVENT_ID_PREFIX,
    MAX_MESSAGE_SIZE,
};
use serde_json::Value;
use std::future::Future;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Security Constants
// ============================================================================

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 64;

/// Write timeout per record
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket permissions (0660 = owner and group read/write)
const SOCKET_MODE: u32 = 0o660;

/// Socket read size
const READ_CHUNK_SIZE: usize = 8192;

/// Pending notifications per connection before a slow client starts missing some
const OUTBOUND_CAPACITY: usize = 64;

/// Client credentials from Unix socket peer
#[derive(Debug, Clone, Copy)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
}

/// Get peer credentials (uid, gid, pid) from Unix socket
fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    // SAFETY: ucred is a simple C struct with no pointers. Zeroing it is safe and creates a valid initial state.
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: getsockopt is safe when:
    // 1. fd is a valid socket file descriptor (borrowed from the live stream)
    // 2. cred is properly initialized (zeroed above)
    // 3. len is set to the correct size of ucred struct
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    (result == 0).then_some(PeerCredentials {
        uid: cred.uid,
        gid: cred.gid,
        pid: cred.pid,
    })
}

/// Push channel shared by every connection. Each envelope is encoded once.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<Vec<u8>>>,
    seq: Arc<AtomicU64>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Broadcaster {
    /// Send one envelope to every connected client
    pub fn broadcast(&self, envelope: &Envelope) {
        match encode_record(envelope) {
            Ok(bytes) => {
                // No connected clients is fine
                let _ = self.tx.send(Arc::new(bytes));
            }
            Err(e) => error!("Failed to encode broadcast: {}", e),
        }
    }

    /// Wrap a daemon event as a notification envelope and broadcast it
    pub fn broadcast_event(&self, event: &DaemonEvent) {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = Envelope::Request(Request::new(
            format!("{}{}", EVENT_ID_PREFIX, n),
            event.method(),
            Some(event.params()),
        ));
        trace!("Broadcasting {}", event.method());
        self.broadcast(&envelope);
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.tx.subscribe()
    }
}

// ============================================================================
// Socket Setup
// ============================================================================

/// Refuse symlinks and live sockets; remove a stale socket file
fn prepare_socket_path(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(ApuError::config(format!("Socket path must be absolute: {}", path.display())));
    }

    let metadata = match path.symlink_metadata() {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if metadata.file_type().is_symlink() {
        return Err(ApuError::config("Socket path is a symlink - refusing for security"));
    }
    if !metadata.file_type().is_socket() {
        return Err(ApuError::config(format!(
            "{} exists and is not a socket",
            path.display()
        )));
    }
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        return Err(ApuError::config(format!(
            "Another daemon is already listening on {}",
            path.display()
        )));
    }

    std::fs::remove_file(path)?;
    debug!("Removed stale socket {}", path.display());
    Ok(())
}

// ============================================================================
// Server
// ============================================================================

/// Serve until `shutdown` completes, then remove the socket
pub async fn run_server(
    socket_path: &Path,
    dispatcher: Arc<Dispatcher>,
    events: EventBus,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    prepare_socket_path(socket_path)?;

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!("Listening on {} (mode {:o})", socket_path.display(), SOCKET_MODE);
    info!("Security: max_conn={}, max_msg={}", MAX_CONNECTIONS, MAX_MESSAGE_SIZE);

    let broadcaster = Broadcaster::default();
    let forwarder = tokio::spawn(forward_events(events.subscribe(), broadcaster.clone()));
    let active = Arc::new(AtomicUsize::new(0));
    let mut total: u64 = 0;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = active.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        active.fetch_add(1, Ordering::SeqCst);
                        total += 1;
                        let dispatcher = dispatcher.clone();
                        let outbound = broadcaster.subscribe();
                        let active = active.clone();

                        tokio::spawn(async move {
                            handle_client(stream, dispatcher, outbound).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    forwarder.abort();
    if let Err(e) = std::fs::remove_file(socket_path) {
        warn!("Failed to remove socket: {}", e);
    }
    info!("Server stopped (handled {} total connections)", total);
    Ok(())
}

async fn forward_events(mut rx: broadcast::Receiver<DaemonEvent>, broadcaster: Broadcaster) {
    loop {
        match rx.recv().await {
            Ok(event) => broadcaster.broadcast_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Event forwarder skipped {} event(s)", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Serve one connection until EOF, a read error or a failed write
async fn handle_client(
    stream: UnixStream,
    dispatcher: Arc<Dispatcher>,
    mut outbound: broadcast::Receiver<Arc<Vec<u8>>>,
) {
    let Some(cred) = get_peer_credentials(&stream) else {
        error!("Failed to get peer credentials, rejecting connection");
        return;
    };
    info!("Connection from uid={}, gid={}, pid={}", cred.uid, cred.gid, cred.pid);

    let (mut reader, mut writer) = stream.into_split();
    let mut buffer = LineBuffer::new(MAX_MESSAGE_SIZE);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut request_count: u64 = 0;

    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                let n = match read {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        debug!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                        break;
                    }
                };

                for record in buffer.push(&chunk[..n]) {
                    let Some(reply) = handle_record(&dispatcher, &record, &cred).await else {
                        continue;
                    };
                    request_count += 1;
                    if send_record(&mut writer, &reply).await.is_err() {
                        return;
                    }
                }
            }
            pushed = outbound.recv() => {
                match pushed {
                    Ok(bytes) => {
                        if send_record(&mut writer, &bytes).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client uid={}, pid={} missed {} notification(s)", cred.uid, cred.pid, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    debug!(
        "Client disconnected: uid={}, pid={}, requests={}",
        cred.uid, cred.pid, request_count
    );
}

/// Decode and dispatch one record. Malformed records produce no reply; a
/// well-formed record that is not a request gets `INVALID_REQUEST` when it
/// carries an id.
async fn handle_record(dispatcher: &Dispatcher, record: &str, cred: &PeerCredentials) -> Option<Vec<u8>> {
    let value: Value = match serde_json::from_str(record) {
        Ok(value) => value,
        Err(e) => {
            debug!("Dropping malformed record from uid={}: {}", cred.uid, e);
            return None;
        }
    };
    let id = value.get("id").and_then(Value::as_str).map(str::to_string);

    let envelope = match serde_json::from_value::<Request>(value) {
        Ok(request) => {
            trace!("Request {} ({}) from uid={}", request.method, request.id, cred.uid);
            dispatcher.dispatch(&request, cred).await
        }
        Err(e) => {
            let Some(id) = id else {
                debug!("Dropping record without id from uid={}", cred.uid);
                return None;
            };
            Envelope::Error(ErrorResponse::new(id, ErrorCode::InvalidRequest, format!("Invalid request: {}", e)))
        }
    };

    match encode_record(&envelope) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            error!("Failed to encode reply to {}: {}", envelope.id(), e);
            let fallback = ErrorResponse::new(envelope.id(), ErrorCode::InternalError, "Serialization error");
            encode_record(&fallback).ok()
        }
    }
}

/// Write one encoded record with timeout
async fn send_record(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> std::result::Result<(), ()> {
    match timeout(WRITE_TIMEOUT, writer.write_all(bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            warn!("Write timeout");
            Err(())
        }
    }
}
