//! High-level async facade (§4.7): awaitable commands with timeout and
//! cancellation, and a `waitForEvent`/`once` pair built on the same
//! subscribe/unsubscribe primitives the server role already exposes.
//!
//! Per §5's single-threaded-per-session model, a [`ConsoleFacade`] *owns*
//! its [`ServerSession`] outright rather than sharing it behind a lock —
//! an awaitable operation here drives the session's own `poll()` loop
//! itself, inline, until its responder or subscription fires. There is
//! never a second task contending for the same session at the same time.
//! (The listener's broadcast helpers in [`crate::server`] are the
//! exception: they go through a shared `Mutex` because they genuinely
//! are a second caller, accepting that a send queued there only reaches
//! the wire on that session's next `poll()` cycle.)

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::time::Instant;
use wsconsole_protocol::{Frame, Purpose, RequestId};
use wsconsole_session::{CommandLine, ServerSession, SessionError, SessionEvent};
use wsconsole_transport::Connection;

use crate::WsConsoleError;

/// The `0x80000000` high bit that marks a command response as an error
/// per §4.7's convention.
const COMMAND_ERROR_BIT: i64 = 0x8000_0000;

/// An async wrapper that drives a [`ServerSession`] and resolves
/// request/response and event-wait operations as futures.
pub struct ConsoleFacade<C: Connection> {
    session: ServerSession<C>,
}

impl<C: Connection> ConsoleFacade<C> {
    pub fn new(session: ServerSession<C>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &ServerSession<C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ServerSession<C> {
        &mut self.session
    }

    pub fn into_inner(self) -> ServerSession<C> {
        self.session
    }

    /// Awaits `sendCommand`'s response, optionally with a timeout.
    /// Rejects on a peer-reported `error` frame, a command response with
    /// the high status bit set, disconnection, or a timeout.
    pub async fn send_command(
        &mut self,
        line: impl Into<CommandLine>,
        timeout: Option<Duration>,
    ) -> Result<Frame, WsConsoleError> {
        let slot: Arc<StdMutex<Option<Frame>>> = Arc::new(StdMutex::new(None));
        let slot_for_closure = Arc::clone(&slot);
        let request_id = self.session.send_command(line, move |frame: &Frame| {
            *slot_for_closure.lock().unwrap() = Some(frame.clone());
        })?;

        let frame = self.drive_until(request_id, &slot, timeout).await?;
        interpret_command_response(frame)
    }

    /// Awaits `sendCommandLegacy`'s response. See [`Self::send_command`].
    pub async fn send_command_legacy(
        &mut self,
        name: &str,
        overload: &str,
        input: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<Frame, WsConsoleError> {
        let slot: Arc<StdMutex<Option<Frame>>> = Arc::new(StdMutex::new(None));
        let slot_for_closure = Arc::clone(&slot);
        let request_id = self
            .session
            .send_command_legacy(name, overload, input, move |frame: &Frame| {
                *slot_for_closure.lock().unwrap() = Some(frame.clone());
            })?;

        let frame = self.drive_until(request_id, &slot, timeout).await?;
        interpret_command_response(frame)
    }

    /// Polls the session in a loop until `slot` is filled, the session
    /// disconnects, or `timeout` elapses. On timeout, the responder is
    /// cleared (§5 cancellation-as-timeout).
    async fn drive_until(
        &mut self,
        request_id: RequestId,
        slot: &StdMutex<Option<Frame>>,
        timeout: Option<Duration>,
    ) -> Result<Frame, WsConsoleError> {
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if let Some(frame) = slot.lock().unwrap().take() {
                return Ok(frame);
            }

            let events = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, self.session.poll()).await {
                        Ok(events) => events,
                        Err(_) => {
                            self.cancel(request_id);
                            return Err(SessionError::TimedOut.into());
                        }
                    }
                }
                None => self.session.poll().await,
            };

            if let Some(frame) = slot.lock().unwrap().take() {
                return Ok(frame);
            }

            if events.iter().any(|e| matches!(e, SessionEvent::Disconnect)) {
                self.cancel(request_id);
                return Err(SessionError::Cancelled.into());
            }
        }
    }

    /// Removes a pending responder without waiting for its reply.
    pub fn cancel(&mut self, request_id: RequestId) {
        self.session.session_mut().clear_responder(request_id);
    }

    /// `waitForEvent`: subscribes, resolves on the first frame passing
    /// `filter` (or the first frame at all, if `filter` is `None`), then
    /// unsubscribes.
    pub async fn wait_for_event(
        &mut self,
        event_name: &str,
        timeout: Option<Duration>,
        filter: Option<Box<dyn Fn(&Frame) -> bool + Send>>,
    ) -> Result<Frame, WsConsoleError> {
        let slot: Arc<StdMutex<Option<Frame>>> = Arc::new(StdMutex::new(None));
        let slot_for_closure = Arc::clone(&slot);
        let listener_id = self.session.subscribe(event_name, move |frame: &Frame| {
            if let Some(f) = &filter {
                if !f(frame) {
                    return;
                }
            }
            *slot_for_closure.lock().unwrap() = Some(frame.clone());
        })?;

        let deadline = timeout.map(|d| Instant::now() + d);
        let result = loop {
            if let Some(frame) = slot.lock().unwrap().take() {
                break Ok(frame);
            }

            let events = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, self.session.poll()).await {
                        Ok(events) => events,
                        Err(_) => break Err(SessionError::TimedOut.into()),
                    }
                }
                None => self.session.poll().await,
            };

            if let Some(frame) = slot.lock().unwrap().take() {
                break Ok(frame);
            }
            if events.iter().any(|e| matches!(e, SessionEvent::Disconnect)) {
                break Err(SessionError::Cancelled.into());
            }
        };

        self.session.unsubscribe(event_name, listener_id)?;
        result
    }

    /// Convenience combining [`Self::wait_for_event`] with an ordinary
    /// callback, for callers that want a listener-style API without
    /// managing the subscription handle themselves.
    pub async fn once(
        &mut self,
        event_name: &str,
        mut listener: impl FnMut(&Frame) + Send + 'static,
    ) -> Result<(), WsConsoleError> {
        let frame = self.wait_for_event(event_name, None, None).await?;
        listener(&frame);
        Ok(())
    }

    /// `enableEncryption()`, as an awaitable. Resolves to `true` once
    /// activation completes, `false` if a handshake was already pending
    /// or active.
    pub async fn enable_encryption(&mut self, mode: wsconsole_crypto::CipherMode) -> Result<bool, WsConsoleError> {
        let slot: Arc<StdMutex<Option<bool>>> = Arc::new(StdMutex::new(None));
        let slot_for_closure = Arc::clone(&slot);
        let started = self.session.enable_encryption(mode, move |activated| {
            *slot_for_closure.lock().unwrap() = Some(activated);
        })?;
        if !started {
            return Ok(false);
        }

        loop {
            if let Some(activated) = slot.lock().unwrap().take() {
                return Ok(activated);
            }
            let events = self.session.poll().await;
            if let Some(activated) = slot.lock().unwrap().take() {
                return Ok(activated);
            }
            if events.iter().any(|e| matches!(e, SessionEvent::Disconnect)) {
                return Ok(false);
            }
        }
    }
}

/// Applies §4.7's command-error convention: a frame with purpose `error`,
/// or a command response whose `statusCode` has the high bit set, rejects
/// the awaitable instead of resolving it.
fn interpret_command_response(frame: Frame) -> Result<Frame, WsConsoleError> {
    if *frame.purpose() == Purpose::Error {
        let status_code = status_code_of(&frame);
        let status_message = status_message_of(&frame);
        return Err(SessionError::ClientError { status_code, status_message }.into());
    }

    let status_code = status_code_of(&frame);
    if status_code & COMMAND_ERROR_BIT != 0 {
        let status_message = status_message_of(&frame);
        return Err(SessionError::CommandFailed { status_code, status_message }.into());
    }

    Ok(frame)
}

fn status_code_of(frame: &Frame) -> i64 {
    frame.body.get("statusCode").and_then(|v| v.as_i64()).unwrap_or(0)
}

fn status_message_of(frame: &Frame) -> String {
    frame
        .body
        .get("statusMessage")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdSyncMutex;
    use tokio::sync::mpsc;
    use wsconsole_protocol::{Header, ProtocolVersion};
    use wsconsole_session::Session;
    use wsconsole_transport::{ConnectionId, TransportError};

    /// An in-memory [`Connection`] double whose `recv` genuinely suspends
    /// until a frame is pushed, instead of reporting a spurious
    /// disconnect on an empty queue. The facade itself only ever touches
    /// the session from one task; a second task (standing in for "the
    /// peer") observes `outbound` and injects replies via `inbound_tx`.
    struct MockConnection {
        inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
        inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        outbound: StdSyncMutex<Vec<Vec<u8>>>,
        id: ConnectionId,
    }

    impl MockConnection {
        fn new() -> Self {
            static NEXT: AtomicU64 = AtomicU64::new(1);
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                inbound_tx: tx,
                inbound_rx: tokio::sync::Mutex::new(rx),
                outbound: StdSyncMutex::new(Vec::new()),
                id: ConnectionId::new(NEXT.fetch_add(1, Ordering::Relaxed)),
            }
        }

        fn push_inbound(&self, frame: &Frame) {
            let _ = self.inbound_tx.send(serde_json::to_vec(frame).unwrap());
        }

        fn last_sent(&self) -> Option<Frame> {
            self.outbound
                .lock()
                .unwrap()
                .last()
                .map(|bytes| serde_json::from_slice(bytes).unwrap())
        }
    }

    impl Connection for MockConnection {
        type Error = TransportError;

        async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
            self.outbound.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
            Ok(self.inbound_rx.lock().await.recv().await)
        }

        async fn close(&self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn id(&self) -> ConnectionId {
            self.id
        }
    }

    /// Delegates to a shared [`MockConnection`] so a second task can
    /// observe/inject on the same connection a `Session` owns.
    struct ArcConn(Arc<MockConnection>);

    impl Connection for ArcConn {
        type Error = TransportError;

        async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
            self.0.send(data).await
        }

        async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
            self.0.recv().await
        }

        async fn close(&self) -> Result<(), Self::Error> {
            self.0.close().await
        }

        fn id(&self) -> ConnectionId {
            self.0.id()
        }
    }

    fn command_response_frame(request_id: RequestId, status_code: i64) -> Frame {
        Frame {
            header: Header::new(ProtocolVersion::V1_2_0, Purpose::CommandResponse).with_request_id(request_id),
            body: serde_json::json!({"statusCode": status_code}),
        }
    }

    /// Waits for a frame to show up in `conn`'s outbound queue and
    /// injects `make_reply(request_id)` back as an inbound frame.
    async fn respond_to_next_request(conn: Arc<MockConnection>, make_reply: impl FnOnce(RequestId) -> Frame) {
        loop {
            if let Some(frame) = conn.last_sent() {
                conn.push_inbound(&make_reply(frame.request_id()));
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_send_command_resolves_with_response_frame() {
        let conn = Arc::new(MockConnection::new());
        let mut facade = ConsoleFacade::new(ServerSession::new(Session::new(ArcConn(Arc::clone(&conn)))));

        let responder = tokio::spawn(respond_to_next_request(Arc::clone(&conn), |id| command_response_frame(id, 0)));

        let result = facade.send_command("/say hi", None).await.unwrap();
        responder.await.unwrap();

        assert_eq!(result.body["statusCode"], 0);
        assert_eq!(*result.purpose(), Purpose::CommandResponse);
    }

    #[tokio::test]
    async fn test_send_command_rejects_on_high_bit_status() {
        let conn = Arc::new(MockConnection::new());
        let mut facade = ConsoleFacade::new(ServerSession::new(Session::new(ArcConn(Arc::clone(&conn)))));

        tokio::spawn(respond_to_next_request(Arc::clone(&conn), |id| {
            command_response_frame(id, COMMAND_ERROR_BIT | 5)
        }));

        let err = facade.send_command("/bad", None).await.unwrap_err();
        assert!(matches!(
            err,
            WsConsoleError::Session(SessionError::CommandFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_command_times_out_and_cancels_responder() {
        let conn = Arc::new(MockConnection::new());
        let mut facade = ConsoleFacade::new(ServerSession::new(Session::new(ArcConn(conn))));

        let err = facade
            .send_command("/never-answered", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();

        assert!(matches!(err, WsConsoleError::Session(SessionError::TimedOut)));
    }

    #[tokio::test]
    async fn test_wait_for_event_resolves_on_matching_frame() {
        let conn = Arc::new(MockConnection::new());
        let mut facade = ConsoleFacade::new(ServerSession::new(Session::new(ArcConn(Arc::clone(&conn)))));

        let wait = facade.wait_for_event("TestEvent", Some(Duration::from_millis(500)), None);
        tokio::pin!(wait);

        // Drive just enough to flush the `subscribe` frame, then inject
        // the matching `event` frame and let the wait resolve.
        conn.push_inbound(&Frame {
            header: Header::new(ProtocolVersion::V1_2_0, Purpose::Event)
                .with_extra(wsconsole_protocol::ExtraHeaders::with_event_name("TestEvent")),
            body: serde_json::json!({"value": 1}),
        });

        let frame = wait.await.unwrap();
        assert_eq!(frame.body["value"], 1);
    }
}
