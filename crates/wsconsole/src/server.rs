//! Listener / acceptor (§4.6): binds a TCP port, negotiates the fixed
//! subprotocol, and drives one [`ServerSession`] per accepted connection on
//! its own task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use wsconsole_crypto::CipherMode;
use wsconsole_protocol::RequestId;
use wsconsole_session::{CommandLine, ServerSession, Session, SessionEvent};
use wsconsole_transport::{
    Connection, ConnectionId, Transport, WebSocketConnection, WebSocketTransport, DEFAULT_HANDSHAKE_TIMEOUT,
    REQUIRED_SUBPROTOCOL,
};

use crate::WsConsoleError;

/// A session shared between the task driving its poll loop and the
/// acceptor's broadcast helpers. Guarded by an async mutex per §5 — there
/// is exactly one task at a time ever awaiting it.
pub type SharedSession = Arc<Mutex<ServerSession<WebSocketConnection>>>;

/// The acceptor's live-sessions set. Entries are added on accept and
/// removed on disconnect; nothing outside this crate mutates it directly.
pub type LiveSessions = Arc<Mutex<HashMap<ConnectionId, SharedSession>>>;

/// Builder for [`ConsoleServer`].
pub struct ConsoleServerBuilder {
    bind_addr: String,
    subprotocol: String,
    handshake_timeout: Duration,
    cipher_mode: CipherMode,
}

impl ConsoleServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:19131".to_string(),
            subprotocol: REQUIRED_SUBPROTOCOL.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            cipher_mode: CipherMode::LEGACY_DEFAULT,
        }
    }

    /// Sets the address to bind the listener to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Overrides the required `Sec-WebSocket-Protocol` value, in place of
    /// [`REQUIRED_SUBPROTOCOL`] — for tests standing in for a
    /// differently-versioned client.
    pub fn subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    /// Overrides how long an in-flight upgrade handshake gets before the
    /// accept fails, in place of [`DEFAULT_HANDSHAKE_TIMEOUT`].
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the cipher mode a caller's `on_client` callback should prefer
    /// when it calls `enableEncryption` on a freshly accepted session —
    /// see [`ConsoleServer::cipher_mode`].
    pub fn cipher_mode(mut self, mode: CipherMode) -> Self {
        self.cipher_mode = mode;
        self
    }

    /// Binds the listener, ready to [`ConsoleServer::run`].
    pub async fn build(self) -> Result<ConsoleServer, WsConsoleError> {
        let transport =
            WebSocketTransport::bind_with(&self.bind_addr, self.subprotocol, self.handshake_timeout).await?;
        Ok(ConsoleServer {
            transport,
            live_sessions: Arc::new(Mutex::new(HashMap::new())),
            cipher_mode: self.cipher_mode,
        })
    }
}

impl Default for ConsoleServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running listener for the game's scripting console protocol.
pub struct ConsoleServer {
    transport: WebSocketTransport,
    live_sessions: LiveSessions,
    cipher_mode: CipherMode,
}

impl ConsoleServer {
    pub fn builder() -> ConsoleServerBuilder {
        ConsoleServerBuilder::new()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, WsConsoleError> {
        Ok(self.transport.local_addr()?)
    }

    /// The cipher mode configured via [`ConsoleServerBuilder::cipher_mode`],
    /// for callers that want a consistent default to pass to
    /// `enableEncryption` rather than hardcoding one per call site.
    pub fn cipher_mode(&self) -> CipherMode {
        self.cipher_mode
    }

    /// A handle to the live-sessions set, for inspecting who's connected
    /// outside of a `client` callback.
    pub fn live_sessions(&self) -> LiveSessions {
        Arc::clone(&self.live_sessions)
    }

    /// Runs the accept loop. For each accepted connection, constructs a
    /// session and invokes `on_client` with it before the session starts
    /// polling — the callback is where a caller registers subscriptions,
    /// chat filters, or an encryption handshake for that connection.
    ///
    /// Runs until the process is terminated or the transport errors.
    pub async fn run(
        mut self,
        mut on_client: impl FnMut(&mut ServerSession<WebSocketConnection>) + Send + 'static,
    ) -> Result<(), WsConsoleError> {
        tracing::info!("console listener running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let id = conn.id();
                    let mut server_session = ServerSession::new(Session::new(conn));
                    on_client(&mut server_session);

                    let shared: SharedSession = Arc::new(Mutex::new(server_session));
                    self.live_sessions.lock().await.insert(id, Arc::clone(&shared));

                    let live_sessions = Arc::clone(&self.live_sessions);
                    tokio::spawn(async move {
                        drive_session(id, shared, live_sessions).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }

    /// Sends `line` as a fire-and-forget command to every live session.
    pub async fn broadcast_command(&self, line: impl Into<CommandLine> + Clone) -> Result<(), WsConsoleError> {
        let sessions = self.live_sessions.lock().await;
        for session in sessions.values() {
            session
                .lock()
                .await
                .send_command(line.clone(), |_frame| {})?;
        }
        Ok(())
    }

    /// Sends a bare `subscribe` frame for `event_name` to every live
    /// session, bypassing each session's own first-listener bookkeeping —
    /// broadcast subscriptions are a raw wire action, not a per-session
    /// listener.
    pub async fn broadcast_subscribe(&self, event_name: &str) -> Result<(), WsConsoleError> {
        self.broadcast_raw(wsconsole_protocol::Purpose::Subscribe, event_name).await
    }

    /// Counterpart to [`Self::broadcast_subscribe`].
    pub async fn broadcast_unsubscribe(&self, event_name: &str) -> Result<(), WsConsoleError> {
        self.broadcast_raw(wsconsole_protocol::Purpose::Unsubscribe, event_name).await
    }

    async fn broadcast_raw(
        &self,
        purpose: wsconsole_protocol::Purpose,
        event_name: &str,
    ) -> Result<(), WsConsoleError> {
        let sessions = self.live_sessions.lock().await;
        for session in sessions.values() {
            session.lock().await.session_mut().send_frame(
                purpose.clone(),
                serde_json::Value::Null,
                RequestId::SENTINEL,
                wsconsole_protocol::ExtraHeaders::with_event_name(event_name),
            )?;
        }
        Ok(())
    }

    /// Disconnects every live session; `force` skips the graceful
    /// `closewebsocket` command and closes the socket directly.
    pub async fn disconnect_all(&self, force: bool) -> Result<(), WsConsoleError> {
        let sessions = self.live_sessions.lock().await;
        for session in sessions.values() {
            session.lock().await.disconnect(force).await?;
        }
        Ok(())
    }
}

/// Drives one session's poll loop until it disconnects or errors, then
/// removes it from the live-sessions set.
async fn drive_session(id: ConnectionId, session: SharedSession, live_sessions: LiveSessions) {
    loop {
        let events = {
            let mut session = session.lock().await;
            session.poll().await
        };

        let mut done = false;
        for event in &events {
            match event {
                SessionEvent::Disconnect => {
                    tracing::info!(%id, "session disconnected");
                    done = true;
                }
                SessionEvent::Error(e) => {
                    tracing::warn!(%id, error = %e, "session error");
                }
                _ => {}
            }
        }

        if done {
            break;
        }
    }

    live_sessions.lock().await.remove(&id);
}
