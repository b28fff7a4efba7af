//! The session: one WebSocket's worth of protocol state.
//!
//! A `Session` owns the connection, the codec, the (optional) cipher
//! channel, and the two dispatch tables that decide what happens to an
//! inbound frame:
//!
//! ```text
//!   bytes in → (decipher?) → decode → dispatch:
//!       1. pending_responders[requestId]   (a reply we're waiting on)
//!       2. purpose_handlers[purpose]       (an unsolicited frame we handle)
//!       3. CustomFrame                     (nobody claimed it)
//! ```
//!
//! Server role (`crate::server_role`) and client role (`crate::client_role`)
//! are thin wrappers that register responders/handlers on top of this.

use std::collections::{HashMap, VecDeque};

use wsconsole_crypto::{CipherChannel, CipherMode, DerivedKey};
use wsconsole_protocol::{Codec, ExtraHeaders, Frame, JsonCodec, ProtocolVersion, Purpose, RequestId};
use wsconsole_transport::Connection;

use crate::dispatch::{DispatchOutcome, Handler, Responder, SessionEvent};
use crate::error::SessionError;

/// Where a session's encryption channel stands.
///
/// Monotonic: `None → Negotiating → Active`. There is no path back to an
/// earlier state; a second handshake attempt while `Negotiating` or
/// `Active` is rejected (§3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionState {
    None,
    Negotiating,
    Active,
}

/// One WebSocket connection's protocol state.
///
/// Generic over the [`Connection`] so the session engine can run against a
/// real `WebSocketConnection` or a test double without recompiling the
/// dispatch logic.
pub struct Session<C: Connection> {
    connection: C,
    codec: JsonCodec,
    cipher: Option<CipherChannel>,
    encryption_state: EncryptionState,
    negotiated_version: ProtocolVersion,
    pending_responders: HashMap<RequestId, Responder<C>>,
    purpose_handlers: HashMap<Purpose, Handler<C>>,
    outbound_queue: VecDeque<Vec<u8>>,
    pending_events: VecDeque<SessionEvent>,
}

impl<C: Connection> Session<C> {
    /// Wraps an already-accepted connection. Starts at the lowest protocol
    /// version with no encryption negotiated.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            codec: JsonCodec,
            cipher: None,
            encryption_state: EncryptionState::None,
            negotiated_version: ProtocolVersion::default(),
            pending_responders: HashMap::new(),
            purpose_handlers: HashMap::new(),
            outbound_queue: VecDeque::new(),
            pending_events: VecDeque::new(),
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn negotiated_version(&self) -> ProtocolVersion {
        self.negotiated_version
    }

    pub fn set_negotiated_version(&mut self, version: ProtocolVersion) {
        self.negotiated_version = version;
    }

    pub fn encryption_state(&self) -> EncryptionState {
        self.encryption_state
    }

    /// Whether ciphertext has actually started arriving from the peer, as
    /// opposed to this side's own `Active` state (the two can race near
    /// the handshake boundary — see [`wsconsole_crypto::CipherChannel`]).
    pub fn inbound_ciphertext_confirmed(&self) -> bool {
        self.cipher
            .as_ref()
            .map(CipherChannel::inbound_confirmed)
            .unwrap_or(false)
    }

    /// Begins the handshake. Fails if a handshake is already pending or
    /// the channel is already active — the transition is monotonic.
    pub fn begin_negotiating(&mut self) -> Result<(), SessionError> {
        if self.encryption_state != EncryptionState::None {
            return Err(wsconsole_crypto::CryptoError::AlreadyNegotiating.into());
        }
        self.encryption_state = EncryptionState::Negotiating;
        Ok(())
    }

    /// Installs the derived cipher and flips the channel to `Active`.
    /// Called by both sides at their own activation point (§4.2): the
    /// initiator after processing the peer's response, the responder
    /// immediately after sending its response.
    pub fn activate_cipher(&mut self, mode: CipherMode, key: &DerivedKey) {
        self.cipher = Some(CipherChannel::new(mode, key));
        self.encryption_state = EncryptionState::Active;
        self.pending_events.push_back(SessionEvent::EncryptionEnabled);
        tracing::info!(?mode, "encryption activated");
    }

    /// Registers a one-shot (or multi-shot) callback keyed by `requestId`.
    ///
    /// # Errors
    /// [`SessionError::ResponderAlreadyRegistered`] if one is already
    /// outstanding for this id — at most one per id (§3 invariants).
    pub fn set_responder(
        &mut self,
        request_id: RequestId,
        responder: Responder<C>,
    ) -> Result<(), SessionError> {
        if self.pending_responders.contains_key(&request_id) {
            tracing::error!(%request_id, "responder already registered for this request id");
            return Err(SessionError::ResponderAlreadyRegistered(request_id));
        }
        self.pending_responders.insert(request_id, responder);
        Ok(())
    }

    /// Removes a registered responder without invoking it.
    pub fn clear_responder(&mut self, request_id: RequestId) -> Option<Responder<C>> {
        self.pending_responders.remove(&request_id)
    }

    /// Registers a handler for unsolicited frames of the given purpose.
    ///
    /// # Errors
    /// [`SessionError::HandlerAlreadyRegistered`] if one already exists.
    pub fn set_handler(&mut self, purpose: Purpose, handler: Handler<C>) -> Result<(), SessionError> {
        if self.purpose_handlers.contains_key(&purpose) {
            tracing::error!(purpose = purpose.wire_value(), "handler already registered for this purpose");
            return Err(SessionError::HandlerAlreadyRegistered(purpose.wire_value()));
        }
        self.purpose_handlers.insert(purpose, handler);
        Ok(())
    }

    /// Removes a registered handler.
    pub fn clear_handler(&mut self, purpose: &Purpose) -> Option<Handler<C>> {
        self.purpose_handlers.remove(purpose)
    }

    /// Builds, encodes, encrypts (if active) and queues a frame for send.
    /// The encode/encrypt step runs synchronously, under the cipher state
    /// at the moment of the call — this is what makes the activation
    /// point in §4.2 land on the correct frame even though the actual
    /// socket write happens later, after dispatch (see [`Self::poll`]).
    pub fn send_frame(
        &mut self,
        purpose: Purpose,
        body: serde_json::Value,
        request_id: RequestId,
        extra: ExtraHeaders,
    ) -> Result<(), SessionError> {
        let header = wsconsole_protocol::Header::new(self.negotiated_version, purpose)
            .with_request_id(request_id)
            .with_extra(extra);
        let frame = Frame {
            header,
            body,
        };
        self.send_message(&frame)
    }

    /// Bypass for pre-built envelopes (used by man-in-the-middle style
    /// relays that forward an already-shaped frame verbatim). Still
    /// subject to encryption like any other outbound frame.
    pub fn send_message(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let bytes = self.codec.encode(frame).map_err(SessionError::from)?;
        let bytes = match &mut self.cipher {
            Some(cipher) => cipher.encrypt_outbound(&bytes),
            None => bytes,
        };
        self.outbound_queue.push_back(bytes);
        Ok(())
    }

    /// Queues a raw lifecycle event, to be returned from the next
    /// [`Self::poll`]. Used by roles that need to surface something
    /// outside the {Message, CustomFrame} shape driven by dispatch.
    pub fn emit(&mut self, event: SessionEvent) {
        self.pending_events.push_back(event);
    }

    /// Reads one inbound message, dispatches it, flushes the outbound
    /// queue, and returns every lifecycle event produced in the process
    /// (in emission order). An empty, non-[`SessionEvent::Disconnect`]
    /// result never happens: at minimum a `Message` is always emitted for
    /// a successfully decoded frame.
    ///
    /// Anything queued by [`Self::send_frame`] since the last call is
    /// flushed *before* the next `recv`, so a greeting sent right after
    /// `accept` (with no inbound frame yet) still reaches the peer even
    /// if the connection then closes.
    pub async fn poll(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.flush_outbound(&mut events).await.is_err() {
            return events;
        }

        let raw = match self.connection.recv().await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                events.push(SessionEvent::Disconnect);
                return events;
            }
            Err(e) => {
                events.push(SessionEvent::Error(e.into()));
                return events;
            }
        };

        let plaintext = match &mut self.cipher {
            Some(cipher) => cipher.decrypt_inbound(&raw),
            None => raw,
        };

        let frame: Frame = match self.codec.decode(&plaintext) {
            Ok(frame) => frame,
            Err(e) => {
                events.push(SessionEvent::Error(e.into()));
                return events;
            }
        };

        if frame.header.version > self.negotiated_version {
            tracing::debug!(
                from = ?self.negotiated_version,
                to = ?frame.header.version,
                "peer advertised a higher protocol version, raising negotiated_version"
            );
            self.negotiated_version = frame.header.version;
        }

        events.push(SessionEvent::Message(frame.clone()));
        self.dispatch(frame, &mut events);

        while let Some(pending) = self.pending_events.pop_front() {
            events.push(pending);
        }

        let _ = self.flush_outbound(&mut events).await;
        events
    }

    /// Drains [`Self::outbound_queue`] onto the socket, in FIFO order.
    /// Stops and returns `Err` on the first send failure (the remaining
    /// queued bytes stay queued for the next attempt).
    async fn flush_outbound(&mut self, events: &mut Vec<SessionEvent>) -> Result<(), ()> {
        while let Some(buf) = self.outbound_queue.pop_front() {
            if let Err(e) = self.connection.send(&buf).await {
                events.push(SessionEvent::Error(e.into()));
                return Err(());
            }
        }
        Ok(())
    }

    /// Runs the three-step ordered lookup described at the top of this
    /// module. Responders and handlers are removed from their table
    /// before invocation (and reinserted on `Keep`) so the callback can
    /// freely call back into `self` — e.g. to send a reply — without a
    /// re-entrant mutable borrow.
    fn dispatch(&mut self, frame: Frame, events: &mut Vec<SessionEvent>) {
        let request_id = frame.request_id();

        if !request_id.is_sentinel() && self.pending_responders.contains_key(&request_id) {
            let mut responder = self.pending_responders.remove(&request_id).expect("just checked");
            match responder(self, &frame) {
                Ok(DispatchOutcome::Keep) => {
                    self.pending_responders.insert(request_id, responder);
                }
                Ok(DispatchOutcome::Consume) => {}
                Err(e) => events.push(SessionEvent::Error(e)),
            }
            return;
        }

        let purpose = frame.purpose().clone();
        if let Some(mut handler) = self.purpose_handlers.remove(&purpose) {
            match handler(self, &frame) {
                Ok(DispatchOutcome::Keep) => {
                    self.purpose_handlers.insert(purpose, handler);
                }
                Ok(DispatchOutcome::Consume) => {}
                Err(e) => events.push(SessionEvent::Error(e)),
            }
            return;
        }

        events.push(SessionEvent::CustomFrame(frame));
    }

    /// Closes the underlying connection. No synthesized responses are
    /// sent for outstanding responders — they are simply dropped.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.pending_responders.clear();
        self.connection.close().await.map_err(SessionError::from)
    }
}
