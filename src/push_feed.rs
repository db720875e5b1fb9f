use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::backoff::BackoffPolicy;
use crate::config::Settings;
use crate::state::{JobRecord, MatchLogEntry, MatchStatus};

/// Inbound push frames. The event names are part of the backend contract;
/// adding a server event means adding a variant here and handling it in the
/// synchronizer's match.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    StatusUpdate(StatusUpdatePayload),
    LogEntry(LogEntryPayload),
    LogBatch(LogBatchPayload),
    ScoreUpdate(ScoreUpdatePayload),
    MatchEnded(MatchEndedPayload),
    JobStatus(JobRecord),
    JobCompleted(JobCompletedPayload),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdatePayload {
    pub match_id: String,
    pub status: MatchStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub additional_info: Option<AdditionalInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalInfo {
    #[serde(default)]
    pub home_score: Option<u8>,
    #[serde(default)]
    pub away_score: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryPayload {
    pub match_id: String,
    pub minute: u16,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatchPayload {
    pub match_id: String,
    #[serde(default)]
    pub entries: Vec<MatchLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdatePayload {
    pub match_id: String,
    pub home_score: u8,
    pub away_score: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEndedPayload {
    pub match_id: String,
    pub home_score: u8,
    pub away_score: u8,
    #[serde(default)]
    pub winner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCompletedPayload {
    pub job_id: String,
    pub match_id: String,
}

/// Outbound subscription frames, named exactly as the server expects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    SubscribeToMatch { match_id: String },
    #[serde(rename_all = "camelCase")]
    SubscribeToJob { job_id: String },
    #[serde(rename_all = "camelCase")]
    UnsubscribeFromMatch { match_id: String },
    #[serde(rename_all = "camelCase")]
    UnsubscribeFromJob { job_id: String },
}

pub fn decode_server_event(raw: &str) -> Result<ServerEvent> {
    serde_json::from_str(raw).context("unrecognized push frame")
}

pub fn encode_client_command(cmd: &ClientCommand) -> Result<String> {
    serde_json::to_string(cmd).context("failed to encode outbound frame")
}

/// One subscription scope on the shared connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Match(String),
    Job(String),
}

impl Topic {
    pub fn subscribe_command(&self) -> ClientCommand {
        match self {
            Topic::Match(id) => ClientCommand::SubscribeToMatch {
                match_id: id.clone(),
            },
            Topic::Job(id) => ClientCommand::SubscribeToJob { job_id: id.clone() },
        }
    }

    pub fn unsubscribe_command(&self) -> ClientCommand {
        match self {
            Topic::Match(id) => ClientCommand::UnsubscribeFromMatch {
                match_id: id.clone(),
            },
            Topic::Job(id) => ClientCommand::UnsubscribeFromJob { job_id: id.clone() },
        }
    }
}

/// What a subscription observes: connection lifecycle plus decoded events.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Connected,
    Disconnected { reason: String },
    /// The reconnect budget is spent; the connection stays down.
    RetriesExhausted,
    Event(ServerEvent),
    Malformed { detail: String },
}

/// Seam between the synchronizer and the connection manager. The real
/// implementation is [`PushSubscription`]; tests drive the synchronizer with
/// a scripted stand-in.
pub trait PushChannel {
    fn subscribe(&mut self, topic: Topic);
    fn unsubscribe(&mut self, topic: Topic);
    fn try_recv(&mut self) -> Option<PushEvent>;
    fn is_connected(&self) -> bool;
    fn shutdown(&mut self);
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: String,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl PushConfig {
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let url = settings.push_url()?;
        Some(Self {
            url,
            token: settings.api_token.clone(),
            connect_timeout: settings.connect_timeout,
            backoff: settings.backoff,
        })
    }

    /// The auth token rides along as a connection-time query parameter.
    fn connect_url(&self) -> String {
        match &self.token {
            Some(token) if self.url.contains('?') => format!("{}&token={token}", self.url),
            Some(token) => format!("{}?token={token}", self.url),
            None => self.url.clone(),
        }
    }
}

enum SocketCommand {
    Send(ClientCommand),
    Close,
}

struct SocketRuntime {
    cmd_tx: mpsc::Sender<SocketCommand>,
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

struct ManagerInner {
    config: PushConfig,
    socket: Mutex<Option<SocketRuntime>>,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<PushEvent>>>,
    next_subscriber: AtomicU64,
    topics: Mutex<HashMap<Topic, usize>>,
    connected: AtomicBool,
}

/// Process-wide connection manager. Cheap to clone and meant to be passed to
/// every view that needs live updates; subscriptions are reference-counted so
/// views can share topics, and the socket is closed once the last
/// subscription goes away.
#[derive(Clone)]
pub struct PushManager {
    inner: Arc<ManagerInner>,
}

impl PushManager {
    pub fn new(config: PushConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                socket: Mutex::new(None),
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(0),
                topics: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_settings(settings: &Settings) -> Option<Self> {
        PushConfig::from_settings(settings).map(Self::new)
    }

    /// Opens an event stream on the shared connection. The socket itself is
    /// not dialed until some subscription asks for a topic, so holding an
    /// idle subscription costs nothing.
    pub fn open(&self) -> PushSubscription {
        let (tx, rx) = mpsc::channel();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers).insert(id, tx);
        PushSubscription {
            manager: self.clone(),
            id,
            rx,
            held: Vec::new(),
            closed: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    fn ensure_socket(&self) {
        let mut socket = lock(&self.inner.socket);
        if socket.is_some() {
            return;
        }
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let inner = Arc::clone(&self.inner);
        let thread_stop = Arc::clone(&stop);
        let thread = thread::spawn(move || run_socket(inner, cmd_rx, thread_stop));
        *socket = Some(SocketRuntime {
            cmd_tx,
            stop,
            thread,
        });
    }

    fn close_socket(&self) {
        let mut socket = lock(&self.inner.socket);
        let Some(runtime) = socket.take() else {
            return;
        };
        runtime.stop.store(true, Ordering::Relaxed);
        let _ = runtime.cmd_tx.send(SocketCommand::Close);
        let _ = runtime.thread.join();
        self.inner.connected.store(false, Ordering::Relaxed);
    }

    fn acquire(&self, topic: Topic) {
        let first = {
            let mut topics = lock(&self.inner.topics);
            let count = topics.entry(topic.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };
        self.ensure_socket();
        if first {
            self.send_command(topic.subscribe_command());
        }
    }

    fn release(&self, topic: &Topic) {
        let last = {
            let mut topics = lock(&self.inner.topics);
            match topics.get_mut(topic) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    topics.remove(topic);
                    true
                }
                None => false,
            }
        };
        if last {
            self.send_command(topic.unsubscribe_command());
        }
    }

    fn send_command(&self, cmd: ClientCommand) {
        let socket = lock(&self.inner.socket);
        if let Some(runtime) = socket.as_ref() {
            let _ = runtime.cmd_tx.send(SocketCommand::Send(cmd));
        }
    }

    fn drop_subscriber(&self, id: u64) {
        let empty = {
            let mut subscribers = lock(&self.inner.subscribers);
            subscribers.remove(&id);
            subscribers.is_empty()
        };
        if empty {
            self.close_socket();
        }
    }
}

/// A view's scope on the shared push connection. Dropping it releases every
/// held topic and, if it was the last subscription, closes the socket.
pub struct PushSubscription {
    manager: PushManager,
    id: u64,
    rx: mpsc::Receiver<PushEvent>,
    held: Vec<Topic>,
    closed: bool,
}

impl PushChannel for PushSubscription {
    fn subscribe(&mut self, topic: Topic) {
        if self.closed || self.held.contains(&topic) {
            return;
        }
        self.manager.acquire(topic.clone());
        self.held.push(topic);
    }

    fn unsubscribe(&mut self, topic: Topic) {
        if let Some(pos) = self.held.iter().position(|t| t == &topic) {
            self.held.remove(pos);
            self.manager.release(&topic);
        }
    }

    fn try_recv(&mut self) -> Option<PushEvent> {
        self.rx.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for topic in std::mem::take(&mut self.held) {
            self.manager.release(&topic);
        }
        self.manager.drop_subscriber(self.id);
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn run_socket(
    inner: Arc<ManagerInner>,
    cmd_rx: mpsc::Receiver<SocketCommand>,
    stop: Arc<AtomicBool>,
) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            fanout(
                &inner,
                PushEvent::Disconnected {
                    reason: format!("runtime init failed: {err}"),
                },
            );
            fanout(&inner, PushEvent::RetriesExhausted);
            return;
        }
    };

    let url = inner.config.connect_url();
    let mut attempt: u32 = 0;
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        match rt.block_on(connect_with_timeout(&url, inner.config.connect_timeout)) {
            Ok(mut socket) => {
                attempt = 0;
                // Anything queued while offline is stale; the topic registry
                // is the source of truth after a (re)connect.
                while cmd_rx.try_recv().is_ok() {}
                let resubscribe: Vec<Topic> = lock(&inner.topics).keys().cloned().collect();
                let mut session_error = None;
                for topic in resubscribe {
                    if let Err(err) = send_frame(&rt, &mut socket, &topic.subscribe_command()) {
                        session_error = Some(format!("resubscribe failed: {err}"));
                        break;
                    }
                }
                inner.connected.store(true, Ordering::Relaxed);
                fanout(&inner, PushEvent::Connected);

                let reason = match session_error {
                    Some(reason) => reason,
                    None => drive_socket(&rt, &mut socket, &inner, &cmd_rx, &stop),
                };
                inner.connected.store(false, Ordering::Relaxed);
                let _ = rt.block_on(socket.close(None));
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                fanout(&inner, PushEvent::Disconnected { reason });
            }
            Err(err) => {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                fanout(
                    &inner,
                    PushEvent::Disconnected {
                        reason: format!("{err:#}"),
                    },
                );
            }
        }

        match inner.config.backoff.delay_for(attempt) {
            Some(delay) => {
                attempt = attempt.saturating_add(1);
                sleep_unless_stopped(&stop, delay);
            }
            None => {
                fanout(&inner, PushEvent::RetriesExhausted);
                return;
            }
        }
    }
}

async fn connect_with_timeout(url: &str, window: Duration) -> Result<WsStream> {
    match tokio::time::timeout(window, connect_async(url)).await {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(err)) => Err(anyhow!("connect failed: {err}")),
        Err(_) => Err(anyhow!("connect timed out after {:?}", window)),
    }
}

fn drive_socket(
    rt: &tokio::runtime::Runtime,
    socket: &mut WsStream,
    inner: &Arc<ManagerInner>,
    cmd_rx: &mpsc::Receiver<SocketCommand>,
    stop: &Arc<AtomicBool>,
) -> String {
    // Short read slices keep the stop flag and outbound queue responsive.
    const READ_SLICE: Duration = Duration::from_millis(200);

    loop {
        if stop.load(Ordering::Relaxed) {
            return "shutdown".to_string();
        }
        loop {
            match cmd_rx.try_recv() {
                Ok(SocketCommand::Send(cmd)) => {
                    if let Err(err) = send_frame(rt, socket, &cmd) {
                        return format!("send failed: {err}");
                    }
                }
                Ok(SocketCommand::Close) => return "shutdown".to_string(),
                Err(_) => break,
            }
        }

        match rt.block_on(async { tokio::time::timeout(READ_SLICE, socket.next()).await }) {
            Err(_) => continue,
            Ok(None) => return "stream ended".to_string(),
            Ok(Some(Err(err))) => return format!("socket error: {err}"),
            Ok(Some(Ok(Message::Text(raw)))) => match decode_server_event(&raw) {
                Ok(event) => fanout(inner, PushEvent::Event(event)),
                Err(err) => fanout(
                    inner,
                    PushEvent::Malformed {
                        detail: format!("{err:#}"),
                    },
                ),
            },
            Ok(Some(Ok(Message::Close(_)))) => return "closed by server".to_string(),
            Ok(Some(Ok(_))) => {}
        }
    }
}

fn send_frame(
    rt: &tokio::runtime::Runtime,
    socket: &mut WsStream,
    cmd: &ClientCommand,
) -> Result<()> {
    let payload = encode_client_command(cmd)?;
    rt.block_on(socket.send(Message::Text(payload)))
        .map_err(|err| anyhow!("{err}"))
}

fn fanout(inner: &Arc<ManagerInner>, event: PushEvent) {
    let mut subscribers = lock(&inner.subscribers);
    subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
}

fn sleep_unless_stopped(stop: &Arc<AtomicBool>, total: Duration) {
    const SLICE: Duration = Duration::from_millis(100);
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        thread::sleep(SLICE.min(deadline.saturating_duration_since(Instant::now())));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
