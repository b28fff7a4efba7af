//! The server role (§4.4): the side that *drives* the game — issuing
//! commands, subscribing to events and chat, fetching catalog data, and
//! initiating the encryption handshake.
//!
//! `ServerSession` does not thread any of this through [`Session`]'s own
//! dispatch tables beyond what correlates by `requestId` (commands,
//! `fetchData`, the handshake). Named-event and chat fan-out instead
//! inspect the `Message` event [`Session::poll`] already produces, since a
//! single inbound frame there may need to reach more than one listener —
//! something the one-handler-per-purpose table can't express.

use std::collections::HashMap;

use wsconsole_crypto::{CipherMode, EphemeralKeypair};
use wsconsole_protocol::{
    CommandVersion, DataType, ExtraHeaders, Frame, Purpose, RequestId,
};
use wsconsole_transport::Connection;

use crate::dispatch::{DispatchOutcome, SessionEvent};
use crate::error::SessionError;
use crate::handshake;
use crate::session::{EncryptionState, Session};

/// A command line, accepted as either a single string or a token array
/// (joined with a single space), matching both call shapes the original
/// driver exposes.
pub enum CommandLine {
    Single(String),
    Tokens(Vec<String>),
}

impl CommandLine {
    fn joined(&self) -> String {
        match self {
            Self::Single(s) => s.clone(),
            Self::Tokens(tokens) => tokens.join(" "),
        }
    }
}

impl From<&str> for CommandLine {
    fn from(s: &str) -> Self {
        Self::Single(s.to_string())
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(tokens: Vec<String>) -> Self {
        Self::Tokens(tokens)
    }
}

type ResponseCallback = Box<dyn FnMut(&Frame) + Send>;
type EventListener = Box<dyn FnMut(&Frame) + Send>;

/// The server side of a session: can command, subscribe, fetch data, and
/// initiate encryption.
pub struct ServerSession<C: Connection> {
    session: Session<C>,
    event_subscriptions: HashMap<String, Vec<(u64, EventListener)>>,
    chat_listeners: HashMap<RequestId, EventListener>,
    next_listener_id: u64,
}

impl<C: Connection> ServerSession<C> {
    pub fn new(session: Session<C>) -> Self {
        Self {
            session,
            event_subscriptions: HashMap::new(),
            chat_listeners: HashMap::new(),
            next_listener_id: 1,
        }
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<C> {
        &mut self.session
    }

    /// Drives one inbound/outbound cycle, then fans named `event` and
    /// `chat` frames out to subscribed listeners on top of whatever
    /// [`Session::poll`] itself reports.
    pub async fn poll(&mut self) -> Vec<SessionEvent> {
        let events = self.session.poll().await;
        for event in &events {
            if let SessionEvent::Message(frame) = event {
                match frame.purpose() {
                    Purpose::Event => self.dispatch_named_event(frame),
                    Purpose::Chat => self.dispatch_chat(frame),
                    _ => {}
                }
            }
        }
        events
    }

    fn dispatch_named_event(&mut self, frame: &Frame) {
        let name = frame.resolved_event_name();
        let Some(listeners) = self.event_subscriptions.get(&name) else {
            return;
        };
        // Copy the listener ids before iterating, per §4.4: a listener
        // may itself subscribe/unsubscribe without corrupting this pass.
        let ids: Vec<u64> = listeners.iter().map(|(id, _)| *id).collect();
        for id in ids {
            let Some(bucket) = self.event_subscriptions.get_mut(&name) else {
                continue;
            };
            let Some(pos) = bucket.iter().position(|(lid, _)| *lid == id) else {
                continue;
            };
            let (_, mut listener) = bucket.remove(pos);
            listener(frame);
            if let Some(bucket) = self.event_subscriptions.get_mut(&name) {
                bucket.push((id, listener));
            }
        }
    }

    fn dispatch_chat(&mut self, frame: &Frame) {
        let ids: Vec<RequestId> = self.chat_listeners.keys().copied().collect();
        for id in ids {
            if let Some(mut listener) = self.chat_listeners.remove(&id) {
                listener(frame);
                self.chat_listeners.insert(id, listener);
            }
        }
    }

    fn fresh_command_request(
        &mut self,
        body: serde_json::Value,
        mut on_response: ResponseCallback,
    ) -> Result<RequestId, SessionError> {
        let request_id = RequestId::new();
        self.session.set_responder(
            request_id,
            Box::new(move |_session, frame| {
                on_response(frame);
                Ok(DispatchOutcome::Consume)
            }),
        )?;
        self.session
            .send_frame(Purpose::CommandRequest, body, request_id, ExtraHeaders::default())?;
        Ok(request_id)
    }

    /// `sendCommand`.
    pub fn send_command(
        &mut self,
        line: impl Into<CommandLine>,
        on_response: impl FnMut(&Frame) + Send + 'static,
    ) -> Result<RequestId, SessionError> {
        let body = serde_json::json!({
            "version": CommandVersion::DEFAULT,
            "commandLine": line.into().joined(),
            "origin": {"type": "player"},
        });
        self.fresh_command_request(body, Box::new(on_response))
    }

    /// `sendCommandLegacy`.
    pub fn send_command_legacy(
        &mut self,
        name: &str,
        overload: &str,
        input: serde_json::Value,
        on_response: impl FnMut(&Frame) + Send + 'static,
    ) -> Result<RequestId, SessionError> {
        let body = serde_json::json!({
            "version": CommandVersion::DEFAULT,
            "name": name,
            "overload": overload,
            "input": input,
            "origin": {"type": "player"},
        });
        self.fresh_command_request(body, Box::new(on_response))
    }

    /// `sendAgentCommand`.
    pub fn send_agent_command(
        &mut self,
        line: impl Into<CommandLine>,
        mut on_response: impl FnMut(&Frame) + Send + 'static,
    ) -> Result<RequestId, SessionError> {
        let request_id = RequestId::new();
        self.session.set_responder(
            request_id,
            Box::new(move |_session, frame| {
                on_response(frame);
                Ok(DispatchOutcome::Consume)
            }),
        )?;
        let body = serde_json::json!({
            "version": CommandVersion::DEFAULT,
            "commandLine": line.into().joined(),
            "origin": {"type": "player"},
        });
        self.session
            .send_frame(Purpose::ActionAgent, body, request_id, ExtraHeaders::default())?;
        Ok(request_id)
    }

    /// `subscribe`: sends `subscribe` only when this is the event's first
    /// listener. Returns a handle for [`Self::unsubscribe`].
    pub fn subscribe(
        &mut self,
        event_name: &str,
        listener: impl FnMut(&Frame) + Send + 'static,
    ) -> Result<u64, SessionError> {
        let id = self.next_listener_id;
        self.next_listener_id += 1;

        let bucket = self.event_subscriptions.entry(event_name.to_string()).or_default();
        let was_empty = bucket.is_empty();
        bucket.push((id, Box::new(listener)));

        if was_empty {
            self.session.send_frame(
                Purpose::Subscribe,
                serde_json::Value::Null,
                RequestId::SENTINEL,
                ExtraHeaders::with_event_name(event_name),
            )?;
        }
        Ok(id)
    }

    /// `unsubscribe`: sends `unsubscribe` only when the removed listener
    /// was the last one for this event.
    pub fn unsubscribe(&mut self, event_name: &str, listener_id: u64) -> Result<(), SessionError> {
        let Some(bucket) = self.event_subscriptions.get_mut(event_name) else {
            return Ok(());
        };
        bucket.retain(|(id, _)| *id != listener_id);
        if bucket.is_empty() {
            self.event_subscriptions.remove(event_name);
            self.session.send_frame(
                Purpose::Unsubscribe,
                serde_json::Value::Null,
                RequestId::SENTINEL,
                ExtraHeaders::with_event_name(event_name),
            )?;
        }
        Ok(())
    }

    /// `subscribeChat`. Filters are optional; `None` matches any value.
    pub fn subscribe_chat(
        &mut self,
        sender: Option<&str>,
        receiver: Option<&str>,
        message: Option<&str>,
        listener: impl FnMut(&Frame) + Send + 'static,
    ) -> Result<RequestId, SessionError> {
        let request_id = RequestId::new();
        self.chat_listeners.insert(request_id, Box::new(listener));
        let body = serde_json::json!({
            "sender": sender,
            "receiver": receiver,
            "message": message,
        });
        self.session
            .send_frame(Purpose::ChatSubscribe, body, request_id, ExtraHeaders::default())?;
        Ok(request_id)
    }

    /// `unsubscribeChat`: removes a single filter by the id returned from
    /// [`Self::subscribe_chat`].
    pub fn unsubscribe_chat(&mut self, request_id: RequestId) -> Result<(), SessionError> {
        self.chat_listeners.remove(&request_id);
        let body = serde_json::json!({"requestId": request_id.to_string()});
        self.session.send_frame(
            Purpose::ChatUnsubscribe,
            body,
            RequestId::SENTINEL,
            ExtraHeaders::default(),
        )
    }

    /// `unsubscribeChatAll`: tears down every chat filter at once. Per
    /// this implementation's decision on the open wire shape, the body is
    /// an empty object rather than an explicit `requestId: null`.
    pub fn unsubscribe_chat_all(&mut self) -> Result<(), SessionError> {
        self.chat_listeners.clear();
        self.session.send_frame(
            Purpose::ChatUnsubscribe,
            serde_json::json!({}),
            RequestId::SENTINEL,
            ExtraHeaders::default(),
        )
    }

    /// `fetchData`.
    pub fn fetch_data(
        &mut self,
        data_type: DataType,
        mut on_response: impl FnMut(&Frame) + Send + 'static,
    ) -> Result<RequestId, SessionError> {
        let request_id = RequestId::new();
        self.session.set_responder(
            request_id,
            Box::new(move |_session, frame| {
                on_response(frame);
                Ok(DispatchOutcome::Consume)
            }),
        )?;
        let extra = ExtraHeaders::with_data_type(data_type.as_str());
        self.session.send_frame(
            Purpose::FetchData(data_type),
            serde_json::Value::Null,
            request_id,
            extra,
        )?;
        Ok(request_id)
    }

    /// `enableEncryption`. Returns `false` immediately without sending
    /// anything if a handshake is already pending or complete (§3
    /// invariant: `Active` is monotonic).
    pub fn enable_encryption(
        &mut self,
        mode: CipherMode,
        mut on_complete: impl FnMut(bool) + Send + 'static,
    ) -> Result<bool, SessionError> {
        if self.session.encryption_state() != EncryptionState::None {
            return Ok(false);
        }
        self.session.begin_negotiating()?;

        let keypair = EphemeralKeypair::generate();
        let salt = wsconsole_crypto::generate_salt();
        let salt_b64 = wsconsole_crypto::encode_salt(&salt);
        let request_id = RequestId::new();
        let version = self.session.negotiated_version();

        if version.uses_legacy_encryption() {
            let command_line = handshake::format_legacy_command(&keypair.public_key_base64(), &salt_b64, mode);
            let salt_for_responder = salt_b64.clone();
            self.session.set_responder(
                request_id,
                Box::new(move |session, frame| {
                    let activated = respond_to_legacy_handshake(session, frame, &keypair, &salt_for_responder, mode);
                    on_complete(activated);
                    Ok(DispatchOutcome::Consume)
                }),
            )?;
            let body = serde_json::json!({
                "version": CommandVersion::DEFAULT,
                "commandLine": command_line,
                "origin": {"type": "player"},
            });
            self.session
                .send_frame(Purpose::CommandRequest, body, request_id, ExtraHeaders::default())?;
        } else {
            let public_key_b64 = keypair.public_key_base64();
            let salt_for_responder = salt_b64.clone();
            self.session.set_responder(
                request_id,
                Box::new(move |session, frame| {
                    let activated = respond_to_v2_handshake(session, frame, &keypair, &salt_for_responder, mode);
                    on_complete(activated);
                    Ok(DispatchOutcome::Consume)
                }),
            )?;
            let body = serde_json::json!({
                "mode": mode.wire_value(),
                "publicKey": public_key_b64,
                "salt": salt_b64,
            });
            self.session
                .send_frame(Purpose::WsEncrypt, body, request_id, ExtraHeaders::default())?;
        }
        Ok(true)
    }

    /// `disconnect`. `force` closes the socket directly; otherwise a
    /// graceful `closewebsocket` command is sent and the game is trusted
    /// to close its end.
    pub async fn disconnect(&mut self, force: bool) -> Result<(), SessionError> {
        if force {
            self.session.close().await
        } else {
            let body = serde_json::json!({
                "version": CommandVersion::DEFAULT,
                "commandLine": "closewebsocket",
                "origin": {"type": "player"},
            });
            self.session
                .send_frame(Purpose::CommandRequest, body, RequestId::new(), ExtraHeaders::default())
        }
    }
}

fn respond_to_legacy_handshake<C: Connection>(
    session: &mut Session<C>,
    frame: &Frame,
    keypair: &EphemeralKeypair,
    salt_b64: &str,
    mode: CipherMode,
) -> bool {
    let status_ok = frame
        .body
        .get("statusCode")
        .and_then(serde_json::Value::as_i64)
        == Some(0);
    if !status_ok {
        return false;
    }
    let Some(peer_public_key) = frame.body.get("publicKey").and_then(serde_json::Value::as_str) else {
        return false;
    };
    match handshake::derive_shared_key(keypair, peer_public_key, salt_b64) {
        Ok(key) => {
            session.activate_cipher(mode, &key);
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "legacy encryption handshake failed");
            false
        }
    }
}

fn respond_to_v2_handshake<C: Connection>(
    session: &mut Session<C>,
    frame: &Frame,
    keypair: &EphemeralKeypair,
    salt_b64: &str,
    mode: CipherMode,
) -> bool {
    let Some(peer_public_key) = frame.body.get("publicKey").and_then(serde_json::Value::as_str) else {
        return false;
    };
    match handshake::derive_shared_key(keypair, peer_public_key, salt_b64) {
        Ok(key) => {
            session.activate_cipher(mode, &key);
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "ws:encrypt handshake failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::collections::VecDeque;
    use wsconsole_protocol::ProtocolVersion;
    use wsconsole_transport::{ConnectionId, TransportError};

    struct MockConnection {
        inbound: Mutex<VecDeque<Option<Vec<u8>>>>,
        outbound: Mutex<Vec<Vec<u8>>>,
        id: ConnectionId,
    }

    impl MockConnection {
        fn new(inbound: Vec<Vec<u8>>) -> Self {
            static NEXT: AtomicU64 = AtomicU64::new(1);
            Self {
                inbound: Mutex::new(inbound.into_iter().map(Some).collect()),
                outbound: Mutex::new(Vec::new()),
                id: ConnectionId::new(NEXT.fetch_add(1, Ordering::Relaxed)),
            }
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.outbound.lock().unwrap().clone()
        }

        fn push_inbound(&self, raw: Vec<u8>) {
            self.inbound.lock().unwrap().push_back(Some(raw));
        }
    }

    impl Connection for MockConnection {
        type Error = TransportError;

        async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
            self.outbound.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
            Ok(self.inbound.lock().unwrap().pop_front().flatten())
        }

        async fn close(&self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn id(&self) -> ConnectionId {
            self.id
        }
    }

    fn server() -> ServerSession<MockConnection> {
        ServerSession::new(Session::new(MockConnection::new(vec![])))
    }

    fn sent_json(server: &ServerSession<MockConnection>, index: usize) -> serde_json::Value {
        let raw = server.session().connection().sent()[index].clone();
        serde_json::from_slice(&raw).unwrap()
    }

    #[test]
    fn test_subscribe_sends_frame_only_for_first_listener() {
        let mut server = server();

        server.subscribe("PlayerJoined", |_f| {}).unwrap();
        server.subscribe("PlayerJoined", |_f| {}).unwrap();

        assert_eq!(server.session().connection().sent().len(), 1);
        let sent = sent_json(&server, 0);
        assert_eq!(sent["header"]["messagePurpose"], "subscribe");
        assert_eq!(sent["header"]["eventName"], "PlayerJoined");
    }

    #[test]
    fn test_unsubscribe_sends_frame_only_after_last_listener_removed() {
        let mut server = server();
        let a = server.subscribe("PlayerJoined", |_f| {}).unwrap();
        let b = server.subscribe("PlayerJoined", |_f| {}).unwrap();

        server.unsubscribe("PlayerJoined", a).unwrap();
        assert_eq!(server.session().connection().sent().len(), 0, "one listener remains");

        server.unsubscribe("PlayerJoined", b).unwrap();
        assert_eq!(server.session().connection().sent().len(), 1);
        assert_eq!(sent_json(&server, 0)["header"]["messagePurpose"], "unsubscribe");
    }

    #[tokio::test]
    async fn test_named_event_reaches_subscribed_listener() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut server = server();
        let received_clone = received.clone();
        server
            .subscribe("PlayerJoined", move |frame| {
                received_clone.lock().unwrap().push(frame.body.clone());
            })
            .unwrap();

        let frame = serde_json::to_vec(&serde_json::json!({
            "header": {
                "version": ProtocolVersion::V1_1_0.wire_value(),
                "requestId": RequestId::SENTINEL.to_string(),
                "messagePurpose": "event",
                "eventName": "PlayerJoined",
            },
            "body": {"player": "Steve"},
        }))
        .unwrap();
        server.session_mut().connection().push_inbound(frame);

        let events = server.poll().await;
        assert!(matches!(events[0], SessionEvent::Message(_)));
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe_chat_all_sends_empty_object_body() {
        let mut server = server();
        server.subscribe_chat(None, None, None, |_f| {}).unwrap();

        server.unsubscribe_chat_all().unwrap();

        let last = sent_json(&server, server.session().connection().sent().len() - 1);
        assert_eq!(last["header"]["messagePurpose"], "chat:unsubscribe");
        assert_eq!(last["body"], serde_json::json!({}));
    }

    #[test]
    fn test_fetch_data_registers_responder_and_sends_typed_purpose() {
        let mut server = server();

        server.fetch_data(DataType::Block, |_f| {}).unwrap();

        let sent = sent_json(&server, 0);
        assert_eq!(sent["header"]["messagePurpose"], "data:block");
        assert_eq!(sent["header"]["dataType"], "block");
    }

    #[tokio::test]
    async fn test_enable_encryption_legacy_activates_on_success_response() {
        let mut server = server();
        let activated = Arc::new(Mutex::new(false));
        let activated_clone = activated.clone();

        server
            .enable_encryption(CipherMode::Cfb8, move |ok| {
                *activated_clone.lock().unwrap() = ok;
            })
            .unwrap();

        let sent = sent_json(&server, 0);
        assert_eq!(sent["header"]["messagePurpose"], "commandRequest");
        let command_line = sent["body"]["commandLine"].as_str().unwrap();
        let parsed = handshake::parse_legacy_command(command_line).unwrap();
        assert_eq!(parsed.mode, CipherMode::Cfb8);
        let request_id = sent["header"]["requestId"].as_str().unwrap().to_string();

        let peer_keys = EphemeralKeypair::generate();
        let reply = serde_json::to_vec(&serde_json::json!({
            "header": {
                "version": ProtocolVersion::V0_0_4.wire_value(),
                "requestId": request_id,
                "messagePurpose": "commandResponse",
            },
            "body": {"statusCode": 0, "publicKey": peer_keys.public_key_base64()},
        }))
        .unwrap();
        server.session_mut().connection().push_inbound(reply);

        server.poll().await;

        assert!(*activated.lock().unwrap());
        assert_eq!(server.session().encryption_state(), EncryptionState::Active);
    }

    #[test]
    fn test_enable_encryption_rejects_second_attempt() {
        let mut server = server();

        let first = server.enable_encryption(CipherMode::Cfb8, |_ok| {}).unwrap();
        let second = server.enable_encryption(CipherMode::Cfb8, |_ok| {}).unwrap();

        assert!(first);
        assert!(!second);
    }
}
