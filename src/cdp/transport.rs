use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::CdpError;
use super::types::{CdpEvent, Reply, WireIn};

pub(super) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect policy. One bounded pass by default: step logic retries above
/// this layer, so the link only papers over a single transient drop.
#[derive(Debug, Clone)]
pub struct Reconnect {
    pub attempts: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            attempts: 1,
            first_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// What the io task pulls off the outbound queue: finished frames, or the
/// request to hang up. Queue closure doubles as the shutdown signal when
/// every handle is gone.
pub(super) enum Outbound {
    Frame(String),
    Hangup,
}

struct Listener {
    method: String,
    session_id: Option<String>,
    sink: mpsc::Sender<CdpEvent>,
}

/// The routing table shared between every caller and the io task. Callers
/// insert their own reply slots and event listeners and enforce their own
/// deadlines; the io task only routes inbound frames through the table.
/// Crash bookkeeping lives here too, so a dead tab is known to the dispatch
/// path without any dedicated watcher.
pub struct Router {
    next_id: AtomicU64,
    link_up: AtomicBool,
    event_capacity: usize,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    listeners: Mutex<Vec<Listener>>,
    crashed: Mutex<HashSet<String>>,
}

impl Router {
    pub(super) fn new(event_capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            link_up: AtomicBool::new(true),
            event_capacity,
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            crashed: Mutex::new(HashSet::new()),
        }
    }

    pub(super) fn claim_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Open a reply slot for a command id. If the slot is never filled the
    /// receiver resolves to an error when the sender drops, so a dying link
    /// fails callers immediately instead of letting them wait out their
    /// deadlines.
    pub(super) fn expect_reply(&self, id: u64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        rx
    }

    /// Discard a reply slot after a timeout or a failed write.
    pub(super) fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }

    /// Register an event listener for `(method, sessionId)`. Registration
    /// is synchronous; dropped receivers are pruned during routing.
    pub(super) fn listen(
        &self,
        method: &str,
        session_id: Option<String>,
    ) -> mpsc::Receiver<CdpEvent> {
        let (tx, rx) = mpsc::channel(self.event_capacity);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Listener {
                method: method.to_owned(),
                session_id,
                sink: tx,
            });
        }
        rx
    }

    /// Whether `Inspector.targetCrashed` has been seen for a session.
    pub(super) fn tab_crashed(&self, session_id: &str) -> bool {
        self.crashed
            .lock()
            .map(|crashed| crashed.contains(session_id))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_link_up(&self) -> bool {
        self.link_up.load(Ordering::Relaxed)
    }

    fn set_link(&self, up: bool) {
        self.link_up.store(up, Ordering::Relaxed);
    }

    /// Route one inbound frame. Frames that fit neither the reply nor the
    /// event shape are dropped.
    fn route(&self, text: &str) {
        let Ok(frame) = serde_json::from_str::<WireIn>(text) else {
            return;
        };
        match frame {
            WireIn::Reply(reply) => {
                let slot = self
                    .pending
                    .lock()
                    .ok()
                    .and_then(|mut pending| pending.remove(&reply.id));
                if let Some(slot) = slot {
                    let _ = slot.send(reply);
                }
            }
            WireIn::Event(event) => {
                if event.method == "Inspector.targetCrashed" {
                    if let (Some(session), Ok(mut crashed)) =
                        (&event.session_id, self.crashed.lock())
                    {
                        crashed.insert(session.clone());
                    }
                }
                if let Ok(mut listeners) = self.listeners.lock() {
                    listeners.retain(|listener| {
                        let wanted = listener.method == event.method
                            && listener.session_id == event.session_id;
                        if wanted {
                            listener.sink.try_send(event.clone()).is_ok()
                                || !listener.sink.is_closed()
                        } else {
                            !listener.sink.is_closed()
                        }
                    });
                }
            }
        }
    }

    /// Fail every pending command at once by dropping its reply slot.
    fn abandon_pending(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

/// Open the WebSocket with a bounded handshake.
pub(super) async fn open_link(url: &str, timeout: Duration) -> Result<WsStream, CdpError> {
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok((socket, _))) => Ok(socket),
        Ok(Err(e)) => Err(CdpError::Unreachable(format!(
            "WebSocket handshake failed: {e}"
        ))),
        Err(_) => Err(CdpError::Unreachable(format!("connect to {url} timed out"))),
    }
}

/// The io task: writes queued frames and routes inbound traffic, rebuilding
/// the socket once on a transient drop. It exits on hangup, when every
/// handle is gone, or when reconnection gives up — after which the closed
/// queue makes every later send fail fast with `Unreachable`.
pub(super) async fn run_link(
    mut socket: WsStream,
    mut outbound: mpsc::Receiver<Outbound>,
    router: Arc<Router>,
    url: String,
    reconnect: Reconnect,
    connect_timeout: Duration,
) {
    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(Outbound::Frame(frame)) => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        // The frame is lost with the socket; its reply slot
                        // is abandoned during the rebuild.
                        match rebuild(&router, &url, &reconnect, connect_timeout).await {
                            Some(fresh) => socket = fresh,
                            None => break,
                        }
                    }
                }
                Some(Outbound::Hangup) | None => break,
            },
            inbound = socket.next() => match inbound {
                Some(Ok(Message::Text(text))) => router.route(&text),
                Some(Ok(Message::Close(_)) | Err(_)) | None => {
                    match rebuild(&router, &url, &reconnect, connect_timeout).await {
                        Some(fresh) => socket = fresh,
                        None => break,
                    }
                }
                Some(Ok(_)) => {} // binary / ping / pong
            },
        }
    }

    router.set_link(false);
    router.abandon_pending();
    let _ = socket.close(None).await;
}

/// One bounded reconnect pass with exponential backoff. In-flight commands
/// are failed up front; `None` means the link stays down.
async fn rebuild(
    router: &Router,
    url: &str,
    policy: &Reconnect,
    connect_timeout: Duration,
) -> Option<WsStream> {
    router.set_link(false);
    router.abandon_pending();

    let mut delay = policy.first_delay;
    for _ in 0..policy.attempts {
        tokio::time::sleep(delay).await;
        if let Ok(socket) = open_link(url, connect_timeout).await {
            router.set_link(true);
            return Some(socket);
        }
        delay = (delay * 2).min(policy.max_delay);
    }
    None
}
