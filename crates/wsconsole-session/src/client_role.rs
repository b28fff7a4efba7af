//! The client role (§4.5): the side that *is* the game from the wire's
//! point of view. In this codebase that's not the real game (which is the
//! thing `ServerSession` talks to in production) but the simulated peer
//! used for testing, MITM relaying, and the low-level test client.
//!
//! Like [`crate::server_role::ServerSession`], role-specific demultiplexing
//! happens in [`ClientSession::poll`] against the `Message` event
//! [`Session::poll`] already reports, rather than through `Session`'s own
//! purpose-handler table — these fields live on `ClientSession`, not
//! `Session`, and a handler only ever needs `&mut Session<C>` to respond,
//! which is a disjoint field borrow away.

use std::collections::HashMap;

use wsconsole_crypto::{CipherMode, EphemeralKeypair};
use wsconsole_protocol::{DataType, ExtraHeaders, Frame, Purpose, RequestId};
use wsconsole_transport::Connection;

use crate::dispatch::SessionEvent;
use crate::error::SessionError;
use crate::handshake;
use crate::session::{EncryptionState, Session};

type CommandHandler<C> = Box<dyn FnMut(&mut Session<C>, RequestId, &str) + Send>;
type CommandLegacyHandler<C> =
    Box<dyn FnMut(&mut Session<C>, RequestId, &str, &str, serde_json::Value) + Send>;
type AgentActionHandler<C> = Box<dyn FnMut(&mut Session<C>, RequestId, &str) + Send>;
type SubscriptionHandler<C> = Box<dyn FnMut(&mut Session<C>, &str) + Send>;
type ChatSubscribeHandler<C> =
    Box<dyn FnMut(&mut Session<C>, RequestId, Option<String>, Option<String>, Option<String>) + Send>;
type ChatUnsubscribeHandler<C> = Box<dyn FnMut(&mut Session<C>, RequestId) + Send>;
type EncryptRequestHandler = Box<dyn FnMut(&Frame) -> bool + Send>;
type DataResponder<C> = Box<dyn FnMut(&mut ClientSession<C>, RequestId) + Send>;

/// The client side of a session: answers commands, runs subscription
/// gates, and responds to encryption handshakes rather than initiating them.
pub struct ClientSession<C: Connection> {
    session: Session<C>,
    command_handler: Option<CommandHandler<C>>,
    command_legacy_handler: Option<CommandLegacyHandler<C>>,
    agent_action_handler: Option<AgentActionHandler<C>>,
    subscribe_handler: Option<SubscriptionHandler<C>>,
    unsubscribe_handler: Option<SubscriptionHandler<C>>,
    chat_subscribe_handler: Option<ChatSubscribeHandler<C>>,
    chat_unsubscribe_handler: Option<ChatUnsubscribeHandler<C>>,
    encrypt_request_handler: Option<EncryptRequestHandler>,
    data_responders: HashMap<DataType, DataResponder<C>>,
    subscription_gates: HashMap<String, bool>,
}

impl<C: Connection> ClientSession<C> {
    pub fn new(session: Session<C>) -> Self {
        Self {
            session,
            command_handler: None,
            command_legacy_handler: None,
            agent_action_handler: None,
            subscribe_handler: None,
            unsubscribe_handler: None,
            chat_subscribe_handler: None,
            chat_unsubscribe_handler: None,
            encrypt_request_handler: None,
            data_responders: HashMap::new(),
            subscription_gates: HashMap::new(),
        }
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<C> {
        &mut self.session
    }

    /// Drives one inbound/outbound cycle, demultiplexing role-level frames
    /// on top of whatever [`Session::poll`] itself reports.
    pub async fn poll(&mut self) -> Vec<SessionEvent> {
        let events = self.session.poll().await;
        for event in &events {
            if let SessionEvent::Message(frame) = event {
                self.dispatch_role_frame(frame);
            }
        }
        events
    }

    fn dispatch_role_frame(&mut self, frame: &Frame) {
        match frame.purpose().clone() {
            Purpose::CommandRequest => self.dispatch_command(frame),
            Purpose::ActionAgent => self.dispatch_agent_action(frame),
            Purpose::Subscribe => self.dispatch_subscription(frame, true),
            Purpose::Unsubscribe => self.dispatch_subscription(frame, false),
            Purpose::ChatSubscribe => self.dispatch_chat_subscribe(frame),
            Purpose::ChatUnsubscribe => self.dispatch_chat_unsubscribe(frame),
            Purpose::WsEncrypt => self.dispatch_encrypt_request(frame),
            Purpose::FetchData(data_type) => self.dispatch_fetch_data(frame, data_type),
            _ => {}
        }
    }

    /// `command`. A legacy `enableencryption ...` command line is handled
    /// in full here (key derivation, response, activation) before the
    /// registered handler ever sees it; anything else reaches the handler.
    fn dispatch_command(&mut self, frame: &Frame) {
        let request_id = frame.request_id();
        let command_line = frame.body.get("commandLine").and_then(serde_json::Value::as_str);

        if let Some(command_line) = command_line {
            if self.try_handle_legacy_encryption(request_id, command_line) {
                return;
            }
            if let Some(handler) = self.command_handler.as_mut() {
                handler(&mut self.session, request_id, command_line);
            }
            return;
        }

        let name = frame.body.get("name").and_then(serde_json::Value::as_str).unwrap_or_default();
        let overload = frame.body.get("overload").and_then(serde_json::Value::as_str).unwrap_or_default();
        let input = frame.body.get("input").cloned().unwrap_or(serde_json::Value::Null);
        if let Some(handler) = self.command_legacy_handler.as_mut() {
            handler(&mut self.session, request_id, name, overload, input);
        }
    }

    /// The legacy `handleEncryptionHandshake` helper: unconditionally fails
    /// for anything that isn't the `enableencryption` synthetic command.
    fn try_handle_legacy_encryption(&mut self, request_id: RequestId, command_line: &str) -> bool {
        if self.session.encryption_state() != EncryptionState::None {
            return false;
        }
        let Some(request) = handshake::parse_legacy_command(command_line) else {
            return false;
        };

        let keypair = EphemeralKeypair::generate();
        let Ok(key) = handshake::derive_shared_key(&keypair, &request.public_key_b64, &request.salt_b64)
        else {
            return false;
        };

        let _ = self.session.begin_negotiating();
        let body = serde_json::json!({
            "statusCode": 0,
            "publicKey": keypair.public_key_base64(),
        });
        if self
            .session
            .send_frame(Purpose::CommandResponse, body, request_id, ExtraHeaders::default())
            .is_err()
        {
            return false;
        }
        self.session.activate_cipher(request.mode, &key);
        true
    }

    /// `agentAction`.
    fn dispatch_agent_action(&mut self, frame: &Frame) {
        let request_id = frame.request_id();
        let command_line = frame.body.get("commandLine").and_then(serde_json::Value::as_str).unwrap_or_default();
        if let Some(handler) = self.agent_action_handler.as_mut() {
            handler(&mut self.session, request_id, command_line);
        }
    }

    /// `subscribe`/`unsubscribe`: flips this event's gate, idempotently.
    fn dispatch_subscription(&mut self, frame: &Frame, subscribing: bool) {
        let event_name = frame.resolved_event_name();
        let was_set = self.subscription_gates.get(&event_name).copied().unwrap_or(false);
        if was_set == subscribing {
            return;
        }
        self.subscription_gates.insert(event_name.clone(), subscribing);

        if subscribing {
            if let Some(handler) = self.subscribe_handler.as_mut() {
                handler(&mut self.session, &event_name);
            }
        } else if let Some(handler) = self.unsubscribe_handler.as_mut() {
            handler(&mut self.session, &event_name);
        }
    }

    fn dispatch_chat_subscribe(&mut self, frame: &Frame) {
        let request_id = frame.request_id();
        let field = |name: &str| frame.body.get(name).and_then(serde_json::Value::as_str).map(str::to_string);
        if let Some(handler) = self.chat_subscribe_handler.as_mut() {
            handler(&mut self.session, request_id, field("sender"), field("receiver"), field("message"));
        }
    }

    fn dispatch_chat_unsubscribe(&mut self, frame: &Frame) {
        let request_id = frame
            .body
            .get("requestId")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse::<uuid::Uuid>().ok())
            .map(RequestId)
            .unwrap_or(RequestId::SENTINEL);
        if let Some(handler) = self.chat_unsubscribe_handler.as_mut() {
            handler(&mut self.session, request_id);
        }
    }

    /// `encryptRequest` (V2). Cancellable: if the registered handler
    /// returns `true`, the handshake is abandoned without a response.
    fn dispatch_encrypt_request(&mut self, frame: &Frame) {
        if self.session.encryption_state() != EncryptionState::None {
            return;
        }
        let cancelled = self.encrypt_request_handler.as_mut().map(|h| h(frame)).unwrap_or(false);
        if cancelled {
            return;
        }

        let request_id = frame.request_id();
        let Some(peer_public_key) = frame.body.get("publicKey").and_then(serde_json::Value::as_str) else {
            return;
        };
        let Some(salt_b64) = frame.body.get("salt").and_then(serde_json::Value::as_str) else {
            return;
        };
        let mode = frame
            .body
            .get("mode")
            .and_then(serde_json::Value::as_str)
            .and_then(|m| CipherMode::parse(m).ok())
            .unwrap_or(CipherMode::LEGACY_DEFAULT);

        let keypair = EphemeralKeypair::generate();
        let Ok(key) = handshake::derive_shared_key(&keypair, peer_public_key, salt_b64) else {
            return;
        };

        let _ = self.session.begin_negotiating();
        let body = serde_json::json!({"publicKey": keypair.public_key_base64()});
        if self
            .session
            .send_frame(Purpose::WsEncrypt, body, request_id, ExtraHeaders::default())
            .is_err()
        {
            return;
        }
        self.session.activate_cipher(mode, &key);
    }

    fn dispatch_fetch_data(&mut self, frame: &Frame, data_type: DataType) {
        let request_id = frame.request_id();
        if let Some(mut responder) = self.data_responders.remove(&data_type) {
            responder(self, request_id);
            self.data_responders.insert(data_type, responder);
        }
    }

    pub fn set_command_handler(&mut self, handler: impl FnMut(&mut Session<C>, RequestId, &str) + Send + 'static) {
        self.command_handler = Some(Box::new(handler));
    }

    pub fn set_command_legacy_handler(
        &mut self,
        handler: impl FnMut(&mut Session<C>, RequestId, &str, &str, serde_json::Value) + Send + 'static,
    ) {
        self.command_legacy_handler = Some(Box::new(handler));
    }

    pub fn set_agent_action_handler(&mut self, handler: impl FnMut(&mut Session<C>, RequestId, &str) + Send + 'static) {
        self.agent_action_handler = Some(Box::new(handler));
    }

    pub fn set_subscribe_handler(&mut self, handler: impl FnMut(&mut Session<C>, &str) + Send + 'static) {
        self.subscribe_handler = Some(Box::new(handler));
    }

    pub fn set_unsubscribe_handler(&mut self, handler: impl FnMut(&mut Session<C>, &str) + Send + 'static) {
        self.unsubscribe_handler = Some(Box::new(handler));
    }

    pub fn set_chat_subscribe_handler(
        &mut self,
        handler: impl FnMut(&mut Session<C>, RequestId, Option<String>, Option<String>, Option<String>) + Send + 'static,
    ) {
        self.chat_subscribe_handler = Some(Box::new(handler));
    }

    pub fn set_chat_unsubscribe_handler(&mut self, handler: impl FnMut(&mut Session<C>, RequestId) + Send + 'static) {
        self.chat_unsubscribe_handler = Some(Box::new(handler));
    }

    /// Registers the cancellable V2 handshake observer. Return `true` from
    /// the closure to cancel; anything else lets the handshake proceed.
    pub fn set_encrypt_request_handler(&mut self, handler: impl FnMut(&Frame) -> bool + Send + 'static) {
        self.encrypt_request_handler = Some(Box::new(handler));
    }

    /// `setDataResponser`. The responder gets `&mut ClientSession<C>`, so it
    /// can answer through [`Self::respond_data`] like any other handler.
    pub fn set_data_responder(
        &mut self,
        data_type: DataType,
        responder: impl FnMut(&mut ClientSession<C>, RequestId) + Send + 'static,
    ) {
        self.data_responders.insert(data_type, Box::new(responder));
    }

    /// Answers a pending `data:<type>` request from inside a data responder.
    pub fn respond_data(
        &mut self,
        request_id: RequestId,
        data_type: &DataType,
        body: serde_json::Value,
    ) -> Result<(), SessionError> {
        let extra = ExtraHeaders::with_data_type(data_type.as_str());
        self.session.send_frame(Purpose::Data, body, request_id, extra)
    }

    /// Answers a pending `command`/`commandLegacy` request.
    pub fn respond_command(
        &mut self,
        request_id: RequestId,
        status_code: i64,
        body: serde_json::Value,
    ) -> Result<(), SessionError> {
        let mut full_body = match body {
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            other => serde_json::json!({"result": other}),
        };
        if let serde_json::Value::Object(map) = &mut full_body {
            map.insert("statusCode".to_string(), status_code.into());
        }
        self.session
            .send_frame(Purpose::CommandResponse, full_body, request_id, ExtraHeaders::default())
    }

    /// Answers a pending `agentAction` request.
    pub fn respond_agent_action(
        &mut self,
        request_id: RequestId,
        action: &str,
        action_name: &str,
        body: serde_json::Value,
    ) -> Result<(), SessionError> {
        let extra = ExtraHeaders::with_action(action, action_name);
        self.session.send_frame(Purpose::ActionAgent, body, request_id, extra)
    }

    /// `publishEvent`: only transmits if the named event's gate is open.
    pub fn publish_event(&mut self, event_name: &str, body: serde_json::Value) -> Result<(), SessionError> {
        if !self.subscription_gates.get(event_name).copied().unwrap_or(false) {
            return Ok(());
        }
        self.send_event(event_name, body)
    }

    /// `sendEvent`: transmits unconditionally, regardless of subscription state.
    pub fn send_event(&mut self, event_name: &str, body: serde_json::Value) -> Result<(), SessionError> {
        let version = self.session.negotiated_version();
        let (body, extra) = if version.event_name_in_header() {
            (body, ExtraHeaders::with_event_name(event_name))
        } else {
            let mut body = body;
            if let serde_json::Value::Object(map) = &mut body {
                map.insert("eventName".to_string(), event_name.into());
            }
            (body, ExtraHeaders::default())
        };
        self.session
            .send_frame(Purpose::Event, body, RequestId::SENTINEL, extra)
    }

    /// Sends an unsolicited `chat` frame matching an active filter.
    pub fn send_chat(
        &mut self,
        sender: &str,
        receiver: &str,
        chat_message: &str,
        chat_type: &str,
    ) -> Result<(), SessionError> {
        let body = serde_json::json!({
            "sender": sender,
            "receiver": receiver,
            "chatMessage": chat_message,
            "chatType": chat_type,
        });
        self.session
            .send_frame(Purpose::Chat, body, RequestId::SENTINEL, ExtraHeaders::default())
    }
}
