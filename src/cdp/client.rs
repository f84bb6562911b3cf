use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio::time::Duration;

use super::error::CdpError;
use super::transport::{Outbound, Reconnect, Router, open_link, run_link};
use super::types::{CdpEvent, encode_frame};

/// Connection parameters for the browser-level socket.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Timeout for the WebSocket handshake (default: 10s).
    pub connect_timeout: Duration,
    /// Per-command reply deadline (default: 30s).
    pub command_timeout: Duration,
    /// Capacity of the outbound queue and event channels (default: 256).
    pub channel_capacity: usize,
    pub reconnect: Reconnect,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            channel_capacity: 256,
            reconnect: Reconnect::default(),
        }
    }
}

/// The shared half of every handle: the routing table plus the outbound
/// queue. All command dispatch — browser-level or session-scoped — funnels
/// through [`Wire::call`], which is where deadlines, link loss, and crashed
/// tabs are enforced.
#[derive(Clone)]
struct Wire {
    router: Arc<Router>,
    outbound: mpsc::Sender<Outbound>,
}

impl Wire {
    async fn call(
        &self,
        scope: Option<&str>,
        method: &str,
        params: Option<serde_json::Value>,
        deadline: Duration,
    ) -> Result<serde_json::Value, CdpError> {
        // A tab known to have crashed fails before touching the wire.
        if let Some(session) = scope {
            if self.router.tab_crashed(session) {
                return Err(CdpError::TargetCrashed);
            }
        }

        let id = self.router.claim_id();
        let reply = self.router.expect_reply(id);
        let frame = encode_frame(id, method, params, scope);

        if self.outbound.send(Outbound::Frame(frame)).await.is_err() {
            self.router.forget(id);
            return Err(CdpError::Unreachable("link task has exited".into()));
        }

        // The deadline belongs to the caller: nothing inside the io task
        // tracks time on our behalf.
        match tokio::time::timeout(deadline, reply).await {
            Ok(Ok(reply)) => reply.outcome().map_err(|e| CdpError::Browser {
                method: method.to_owned(),
                code: e.code,
                message: e.message,
            }),
            Ok(Err(_)) => Err(CdpError::Unreachable(
                "link dropped while a reply was pending".into(),
            )),
            Err(_) => {
                self.router.forget(id);
                Err(CdpError::NoReply {
                    method: method.to_owned(),
                    waited_ms: deadline.as_millis(),
                })
            }
        }
    }
}

/// A connection to the browser endpoint, multiplexing every session over
/// one WebSocket. Attaching to a target yields a [`Session`].
pub struct Connector {
    wire: Wire,
    config: ConnectorConfig,
    /// One mutex per targetId so two tasks never attach to the same tab
    /// concurrently; the guard rides inside the returned `Session`.
    attach_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Connector {
    /// Open the browser-level WebSocket and start the io task.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Unreachable` if the handshake fails or times out.
    pub async fn connect(url: &str, config: ConnectorConfig) -> Result<Self, CdpError> {
        let socket = open_link(url, config.connect_timeout).await?;
        let router = Arc::new(Router::new(config.channel_capacity));
        let (outbound, rx) = mpsc::channel(config.channel_capacity);

        tokio::spawn(run_link(
            socket,
            rx,
            Arc::clone(&router),
            url.to_owned(),
            config.reconnect.clone(),
            config.connect_timeout,
        ));

        Ok(Self {
            wire: Wire { router, outbound },
            config,
            attach_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Send a browser-level command (no session scope).
    ///
    /// # Errors
    ///
    /// Returns `CdpError::NoReply` on a missed deadline, `CdpError::Browser`
    /// for browser-reported failures, or `CdpError::Unreachable` once the
    /// link is gone.
    pub async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CdpError> {
        self.wire
            .call(None, method, params, self.config.command_timeout)
            .await
    }

    /// Register for browser-level events (e.g. `Target.targetCreated`
    /// after `Target.setDiscoverTargets`). Registration is synchronous.
    pub fn subscribe(&self, method: &str) -> mpsc::Receiver<CdpEvent> {
        self.wire.router.listen(method, None)
    }

    /// Attach to a target via `Target.attachToTarget {flatten: true}`,
    /// holding the per-target lock for the lifetime of the session.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Browser` when the target cannot be attached, or
    /// `CdpError::Malformed` when the reply carries no session id.
    pub async fn attach(&self, target_id: &str) -> Result<Session, CdpError> {
        let lock = {
            let mut locks = self.attach_locks.lock().await;
            Arc::clone(locks.entry(target_id.to_owned()).or_default())
        };
        let guard = lock.lock_owned().await;

        let reply = self
            .wire
            .call(
                None,
                "Target.attachToTarget",
                Some(serde_json::json!({ "targetId": target_id, "flatten": true })),
                self.config.command_timeout,
            )
            .await?;
        let session_id = reply["sessionId"]
            .as_str()
            .ok_or_else(|| CdpError::Malformed("attach reply carried no sessionId".into()))?
            .to_owned();

        Ok(Session {
            wire: self.wire.clone(),
            session_id,
            target_id: target_id.to_owned(),
            command_timeout: self.config.command_timeout,
            _tab_lock: Arc::new(guard),
        })
    }

    /// Hang up: the io task fails anything in flight, closes the socket,
    /// and exits, after which every handle errors fast.
    pub async fn close(self) {
        let _ = self.wire.outbound.send(Outbound::Hangup).await;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.wire.router.is_link_up()
    }
}

/// One attached debugging session bound to one target. Clonable; clones
/// share the wire and the per-target attach guard. Crash state is not held
/// here at all — the router records `Inspector.targetCrashed` while
/// routing, and [`Wire::call`] consults it on every send.
#[derive(Clone)]
pub struct Session {
    wire: Wire,
    session_id: String,
    target_id: String,
    command_timeout: Duration,
    _tab_lock: Arc<OwnedMutexGuard<()>>,
}

impl Session {
    /// Send a session-scoped command with the default deadline.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::TargetCrashed` once the tab has crashed, plus the
    /// failure modes of [`Connector::send`].
    pub async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CdpError> {
        self.wire
            .call(Some(&self.session_id), method, params, self.command_timeout)
            .await
    }

    /// Like [`send`](Self::send) with a caller-chosen deadline.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, CdpError> {
        self.wire
            .call(Some(&self.session_id), method, params, timeout)
            .await
    }

    /// Register for events scoped to this session. Registration is
    /// synchronous.
    pub fn subscribe(&self, method: &str) -> mpsc::Receiver<CdpEvent> {
        self.wire
            .router
            .listen(method, Some(self.session_id.clone()))
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.wire.router.tab_crashed(&self.session_id)
    }
}
