//! Unix socket bridge between the hub and the browser-side shim.
//!
//! The shim forwards page requests and tab lifecycle events as NDJSON
//! envelopes and executes `host_call` frames on the hub's behalf. Exactly one
//! shim is active; a newer connection evicts the older one.

use crate::host::{BookmarkProvider, HostError, TabHost};
use crate::registry::RegistryHandle;
use crate::router::{Dispatch, InboundMessage, MessageRouter, ResponseOutcome};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
#[cfg(unix)]
use std::{fs, os::unix::fs::PermissionsExt};
use tabdeck_core::bridge_ipc::{
    BridgeEnvelope, BridgeMsg, HostCall, HostCallPayload, HostResultPayload, ProtocolVersion,
    ResponsePayload,
};
#[cfg(unix)]
use tabdeck_core::bridge_ipc::{
    decode_frame, encode_frame, recover_request_id, FrameError, CURRENT_PROTOCOL_VERSION,
};
use tabdeck_core::{BookmarkNode, CreateTab, HostTab, HostWindow};
#[cfg(unix)]
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{unix::OwnedWriteHalf, UnixListener, UnixStream},
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub const HUB_SENDER_ID: &str = "tabdeck-hub";

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub socket_path: PathBuf,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    /// Largest frame accepted or sent, excluding the trailing newline.
    pub max_frame_bytes: usize,
}

fn make_envelope(request_id: Option<String>, msg: BridgeMsg) -> BridgeEnvelope {
    BridgeEnvelope {
        version: ProtocolVersion::CURRENT,
        sender_id: HUB_SENDER_ID.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        request_id,
        msg,
    }
}

struct ActiveShim {
    conn_id: String,
    sender: mpsc::Sender<BridgeEnvelope>,
    evict: oneshot::Sender<()>,
}

struct PendingCall {
    conn_id: String,
    op: &'static str,
    reply: oneshot::Sender<Result<Value, HostError>>,
}

#[derive(Default)]
struct RemoteState {
    active: Option<ActiveShim>,
    pending: HashMap<String, PendingCall>,
}

/// [`TabHost`] and [`BookmarkProvider`] backed by whichever shim is
/// connected. Calls wait as long as the shim takes; they fail only when no
/// shim is connected or the connection drops.
#[derive(Clone, Default)]
pub struct RemoteHost {
    state: Arc<Mutex<RemoteState>>,
    next_request: Arc<AtomicU64>,
}

impl RemoteHost {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn is_connected(&self) -> bool {
        self.lock().active.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes `conn_id` the active shim. The returned receiver fires when a
    /// newer connection takes over.
    fn attach(&self, conn_id: &str, sender: mpsc::Sender<BridgeEnvelope>) -> oneshot::Receiver<()> {
        let (evict, evicted) = oneshot::channel();
        let previous = {
            let mut state = self.lock();
            state.active.replace(ActiveShim {
                conn_id: conn_id.to_string(),
                sender,
                evict,
            })
        };
        if let Some(previous) = previous {
            info!(
                event = "bridge_shim_replaced",
                previous = %previous.conn_id,
                conn_id = %conn_id
            );
            let _ = previous.evict.send(());
            self.fail_pending(&previous.conn_id);
        }
        evicted
    }

    fn detach(&self, conn_id: &str) {
        {
            let mut state = self.lock();
            if state
                .active
                .as_ref()
                .is_some_and(|active| active.conn_id == conn_id)
            {
                state.active = None;
            }
        }
        self.fail_pending(conn_id);
    }

    fn fail_pending(&self, conn_id: &str) {
        let failed = {
            let mut state = self.lock();
            let ids = state
                .pending
                .iter()
                .filter(|(_, call)| call.conn_id == conn_id)
                .map(|(id, _)| id.clone())
                .collect::<Vec<_>>();
            ids.into_iter()
                .filter_map(|id| state.pending.remove(&id))
                .collect::<Vec<_>>()
        };
        for call in failed {
            debug!(event = "bridge_host_call_dropped", op = call.op, conn_id = %conn_id);
            let _ = call.reply.send(Err(HostError::Disconnected));
        }
    }

    fn take_pending(&self, conn_id: &str, request_id: &str) -> Option<PendingCall> {
        let mut state = self.lock();
        let owned = state
            .pending
            .get(request_id)
            .is_some_and(|call| call.conn_id == conn_id);
        if owned {
            state.pending.remove(request_id)
        } else {
            None
        }
    }

    /// Fails one pending call whose frame could not be carried. Returns false
    /// when no such call is waiting.
    fn fail_call(
        &self,
        conn_id: &str,
        request_id: &str,
        error: impl FnOnce(&'static str) -> HostError,
    ) -> bool {
        let Some(call) = self.take_pending(conn_id, request_id) else {
            return false;
        };
        let error = error(call.op);
        warn!(
            event = "bridge_host_call_failed",
            op = call.op,
            conn_id = %conn_id,
            request_id = %request_id,
            error = %error
        );
        let _ = call.reply.send(Err(error));
        true
    }

    fn resolve(&self, conn_id: &str, request_id: Option<&str>, payload: HostResultPayload) {
        let Some(request_id) = request_id else {
            warn!(event = "bridge_host_result_without_id", conn_id = %conn_id);
            return;
        };
        let Some(call) = self.take_pending(conn_id, request_id) else {
            warn!(
                event = "bridge_host_result_unmatched",
                conn_id = %conn_id,
                request_id = %request_id
            );
            return;
        };
        let result = payload.into_result().map_err(|message| HostError::Rejected {
            op: call.op.to_string(),
            message,
        });
        let _ = call.reply.send(result);
    }

    async fn call(&self, call: HostCall) -> Result<Value, HostError> {
        let op = call.op();
        let request_id = format!("host-{}", self.next_request.fetch_add(1, Ordering::Relaxed) + 1);
        let (reply, result) = oneshot::channel();
        let sender = {
            let mut state = self.lock();
            let Some(active) = state.active.as_ref() else {
                return Err(HostError::Unavailable("no browser shim connected".to_string()));
            };
            let conn_id = active.conn_id.clone();
            let sender = active.sender.clone();
            state.pending.insert(
                request_id.clone(),
                PendingCall {
                    conn_id,
                    op,
                    reply,
                },
            );
            sender
        };

        let envelope = make_envelope(
            Some(request_id.clone()),
            BridgeMsg::HostCall(HostCallPayload { call }),
        );
        if sender.send(envelope).await.is_err() {
            self.lock().pending.remove(&request_id);
            return Err(HostError::Disconnected);
        }
        result.await.map_err(|_| HostError::Disconnected)?
    }

    async fn call_as<T: DeserializeOwned>(&self, call: HostCall) -> Result<T, HostError> {
        let op = call.op();
        let value = self.call(call).await?;
        serde_json::from_value(value).map_err(|err| HostError::Decode {
            op: op.to_string(),
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl TabHost for RemoteHost {
    async fn windows(&self) -> Result<Vec<HostWindow>, HostError> {
        self.call_as(HostCall::Windows).await
    }

    async fn tabs_in_window(&self, window_id: i64) -> Result<Vec<HostTab>, HostError> {
        self.call_as(HostCall::TabsInWindow { window_id }).await
    }

    async fn current_window_tabs(&self) -> Result<Vec<HostTab>, HostError> {
        self.call_as(HostCall::CurrentWindowTabs).await
    }

    async fn create_tab(&self, request: CreateTab) -> Result<HostTab, HostError> {
        self.call_as(HostCall::CreateTab(request)).await
    }

    async fn activate_tab(&self, tab_id: i64) -> Result<(), HostError> {
        self.call(HostCall::ActivateTab { tab_id }).await.map(|_| ())
    }

    async fn remove_tab(&self, tab_id: i64) -> Result<(), HostError> {
        self.call(HostCall::RemoveTab { tab_id }).await.map(|_| ())
    }

    async fn duplicate_tab(&self, tab_id: i64) -> Result<(), HostError> {
        self.call(HostCall::DuplicateTab { tab_id }).await.map(|_| ())
    }

    async fn move_tab(&self, tab_id: i64, index: i64) -> Result<(), HostError> {
        self.call(HostCall::MoveTab { tab_id, index })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl BookmarkProvider for RemoteHost {
    async fn bookmark_tree(&self) -> Result<Vec<BookmarkNode>, HostError> {
        self.call_as(HostCall::BookmarkTree).await
    }
}

#[cfg(not(unix))]
pub async fn run(
    _config: BridgeConfig,
    _router: MessageRouter,
    _registry: RegistryHandle,
    _remote: RemoteHost,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let _ = shutdown.changed().await;
    Ok(())
}

#[cfg(unix)]
pub async fn run(
    config: BridgeConfig,
    router: MessageRouter,
    registry: RegistryHandle,
    remote: RemoteHost,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    if let Some(parent) = config.socket_path.parent() {
        fs::create_dir_all(parent)?;
        let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
    }

    if config.socket_path.exists() {
        let _ = fs::remove_file(&config.socket_path);
    }

    let listener = UnixListener::bind(&config.socket_path)?;
    let _ = fs::set_permissions(&config.socket_path, fs::Permissions::from_mode(0o600));

    let hub = Arc::new(BridgeHub {
        config: config.clone(),
        router,
        registry,
        remote,
        next_conn: AtomicU64::new(0),
    });

    info!(
        event = "bridge_start",
        socket = %config.socket_path.display(),
        queue_capacity = config.queue_capacity
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        let hub = hub.clone();
                        tokio::spawn(async move {
                            hub.handle_connection(stream).await;
                        });
                    }
                    Err(err) => {
                        warn!(event = "bridge_accept_error", error = %err);
                    }
                }
            }
        }
    }

    let _ = fs::remove_file(&config.socket_path);
    info!(event = "bridge_stop");
    Ok(())
}

#[cfg(unix)]
struct BridgeHub {
    config: BridgeConfig,
    router: MessageRouter,
    registry: RegistryHandle,
    remote: RemoteHost,
    next_conn: AtomicU64,
}

#[cfg(unix)]
impl BridgeHub {
    fn next_conn_id(&self) -> String {
        let id = self.next_conn.fetch_add(1, Ordering::Relaxed) + 1;
        format!("conn-{id}")
    }

    async fn handle_connection(self: Arc<Self>, stream: UnixStream) {
        let conn_id = self.next_conn_id();
        let (reader_half, writer_half) = stream.into_split();
        let mut reader = BufReader::new(reader_half);
        let max_frame_bytes = self.config.max_frame_bytes;

        let Some(hello) = read_next_valid_frame(&mut reader, max_frame_bytes).await else {
            return;
        };
        if hello.version.0 > CURRENT_PROTOCOL_VERSION {
            warn!(
                event = "bridge_unsupported_version",
                conn_id = %conn_id,
                version = hello.version.0
            );
            return;
        }
        let BridgeMsg::Hello(payload) = hello.msg else {
            warn!(event = "bridge_expected_hello", conn_id = %conn_id);
            return;
        };
        info!(
            event = "bridge_shim_connected",
            conn_id = %conn_id,
            client_id = %payload.client_id,
            capabilities = ?payload.capabilities
        );

        let (tx, rx) = mpsc::channel::<BridgeEnvelope>(self.config.queue_capacity);
        let write_timeout = self.config.write_timeout;
        let writer = FrameWriter {
            conn_id: conn_id.clone(),
            remote: self.remote.clone(),
            write_timeout,
            max_frame_bytes,
        };
        let mut writer_task = tokio::spawn(writer.run(writer_half, rx));
        let mut writer_finished = false;
        let mut evicted = self.remote.attach(&conn_id, tx.clone());

        loop {
            let envelope = tokio::select! {
                frame = read_next_frame(&mut reader, max_frame_bytes) => match frame {
                    Some(InboundFrame::Envelope(envelope)) => envelope,
                    Some(InboundFrame::Invalid { request_id, error }) => {
                        self.reject_frame(&conn_id, request_id, error);
                        continue;
                    }
                    None => break,
                },
                _ = &mut evicted => {
                    info!(event = "bridge_shim_evicted", conn_id = %conn_id);
                    break;
                }
                _ = &mut writer_task => {
                    writer_finished = true;
                    warn!(event = "bridge_writer_closed", conn_id = %conn_id);
                    break;
                }
            };
            if envelope.version.0 > CURRENT_PROTOCOL_VERSION {
                warn!(
                    event = "bridge_skip_version",
                    conn_id = %conn_id,
                    version = envelope.version.0
                );
                continue;
            }

            match envelope.msg {
                BridgeMsg::Request(payload) => {
                    let dispatch = self.router.handle(InboundMessage {
                        sender: payload.sender,
                        message: payload.message,
                    });
                    if let Dispatch::Pending(handle) = dispatch {
                        let tx = tx.clone();
                        let conn_id = conn_id.clone();
                        let request_id = envelope.request_id;
                        tokio::spawn(async move {
                            match handle.recv().await {
                                ResponseOutcome::Responded(body) => {
                                    let response = make_envelope(
                                        request_id,
                                        BridgeMsg::Response(ResponsePayload { body }),
                                    );
                                    if tx.send(response).await.is_err() {
                                        debug!(event = "bridge_response_dropped", conn_id = %conn_id);
                                    }
                                }
                                ResponseOutcome::Declined | ResponseOutcome::Abandoned => {
                                    debug!(event = "bridge_no_response", conn_id = %conn_id);
                                }
                            }
                        });
                    }
                }
                BridgeMsg::TabUpdated(payload) => {
                    if let Err(err) = self
                        .registry
                        .tab_updated(payload.tab_id, payload.status, payload.tab)
                        .await
                    {
                        warn!(event = "bridge_registry_error", conn_id = %conn_id, error = %err);
                    }
                }
                BridgeMsg::TabRemoved(payload) => {
                    if let Err(err) = self.registry.tab_removed(payload.tab_id).await {
                        warn!(event = "bridge_registry_error", conn_id = %conn_id, error = %err);
                    }
                }
                BridgeMsg::HostResult(payload) => {
                    self.remote
                        .resolve(&conn_id, envelope.request_id.as_deref(), payload);
                }
                BridgeMsg::Hello(_) => {
                    warn!(event = "bridge_unexpected_hello", conn_id = %conn_id);
                }
                BridgeMsg::Response(_) | BridgeMsg::HostCall(_) => {
                    debug!(event = "bridge_ignored_message", conn_id = %conn_id);
                }
            }
        }

        self.remote.detach(&conn_id);
        info!(event = "bridge_shim_disconnected", conn_id = %conn_id);
        drop(tx);
        if !writer_finished {
            let _ = writer_task.await;
        }
    }

    fn reject_frame(&self, conn_id: &str, request_id: Option<String>, error: FrameError) {
        let Some(request_id) = request_id else {
            return;
        };
        let message = error.to_string();
        let failed = self.remote.fail_call(conn_id, &request_id, |op| HostError::Decode {
            op: op.to_string(),
            message,
        });
        if !failed {
            debug!(
                event = "bridge_invalid_frame_unmatched",
                conn_id = %conn_id,
                request_id = %request_id
            );
        }
    }
}

#[cfg(unix)]
struct FrameWriter {
    conn_id: String,
    remote: RemoteHost,
    write_timeout: Duration,
    max_frame_bytes: usize,
}

#[cfg(unix)]
impl FrameWriter {
    async fn run(self, mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<BridgeEnvelope>) {
        let conn_id = self.conn_id.as_str();
        while let Some(envelope) = rx.recv().await {
            let Some(frame) = self.encode(envelope) else {
                continue;
            };
            let send = async {
                writer.write_all(&frame).await?;
                writer.flush().await
            };
            match tokio::time::timeout(self.write_timeout, send).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(event = "bridge_write_error", conn_id = %conn_id, error = %err);
                    break;
                }
                Err(_) => {
                    warn!(event = "bridge_write_timeout", conn_id = %conn_id);
                    break;
                }
            }
        }
    }

    /// Encodes one frame. A response too large to send is replaced by the
    /// same response with empty lists; a host call that cannot be sent fails
    /// its caller.
    fn encode(&self, envelope: BridgeEnvelope) -> Option<Vec<u8>> {
        let conn_id = self.conn_id.as_str();
        let err = match encode_frame(&envelope, self.max_frame_bytes) {
            Ok(frame) => return Some(frame),
            Err(err) => err,
        };
        warn!(event = "bridge_encode_error", conn_id = %conn_id, error = %err);
        match envelope.msg {
            BridgeMsg::Response(ResponsePayload { body }) => {
                let degraded = make_envelope(
                    envelope.request_id,
                    BridgeMsg::Response(ResponsePayload {
                        body: body.emptied(),
                    }),
                );
                match encode_frame(&degraded, self.max_frame_bytes) {
                    Ok(frame) => Some(frame),
                    Err(err) => {
                        warn!(event = "bridge_encode_error", conn_id = %conn_id, error = %err);
                        None
                    }
                }
            }
            BridgeMsg::HostCall(_) => {
                if let Some(request_id) = envelope.request_id.as_deref() {
                    let message = err.to_string();
                    self.remote.fail_call(conn_id, request_id, |op| HostError::Rejected {
                        op: op.to_string(),
                        message,
                    });
                }
                None
            }
            _ => None,
        }
    }
}

#[cfg(unix)]
enum InboundFrame {
    Envelope(BridgeEnvelope),
    Invalid {
        request_id: Option<String>,
        error: FrameError,
    },
}

/// Reads one NDJSON line of at most `max_frame_bytes`. Longer lines are
/// discarded up to their newline without being buffered.
#[cfg(unix)]
async fn read_next_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Option<InboundFrame>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let limit = max_frame_bytes as u64 + 2;
        let mut line = Vec::new();
        let n = match (&mut *reader).take(limit).read_until(b'\n', &mut line).await {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "bridge_read_error", error = %err);
                return None;
            }
        };
        if n == 0 {
            return None;
        }
        if !line.ends_with(b"\n") && n as u64 == limit {
            let skipped = match skip_line(reader).await {
                Ok(skipped) => skipped,
                Err(err) => {
                    warn!(event = "bridge_read_error", error = %err);
                    return None;
                }
            };
            let error = FrameError::OversizedFrame {
                size: line.len() + skipped,
                max: max_frame_bytes,
            };
            warn!(event = "bridge_decode_error", error = %error);
            return Some(InboundFrame::Invalid {
                request_id: recover_request_id(&line),
                error,
            });
        }
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        match decode_frame::<BridgeEnvelope>(&line, max_frame_bytes) {
            Ok(envelope) => return Some(InboundFrame::Envelope(envelope)),
            Err(error) => {
                warn!(event = "bridge_decode_error", error = %error);
                return Some(InboundFrame::Invalid {
                    request_id: recover_request_id(&line),
                    error,
                });
            }
        }
    }
}

#[cfg(unix)]
async fn read_next_valid_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Option<BridgeEnvelope>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_next_frame(reader, max_frame_bytes).await? {
            InboundFrame::Envelope(envelope) => return Some(envelope),
            InboundFrame::Invalid { .. } => continue,
        }
    }
}

/// Consumes the rest of the current line, returning how many bytes it held.
#[cfg(unix)]
async fn skip_line<R>(reader: &mut R) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(skipped);
        }
        match buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(skipped + pos);
            }
            None => {
                let len = buf.len();
                reader.consume(len);
                skipped += len;
            }
        }
    }
}
