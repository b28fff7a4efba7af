//! Stands up both ends of the console bridge over a real loopback socket:
//! a server role driving commands/subscriptions/encryption through
//! [`ConsoleFacade`], and a simulated game answering them through
//! [`ClientSession`].
//!
//! Run with `cargo run -p bridge-demo`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;
use wsconsole::{ConsoleFacade, WsConsoleError};
use wsconsole_crypto::CipherMode;
use wsconsole_protocol::{ExtraHeaders, ProtocolVersion, Purpose, RequestId};
use wsconsole_session::{ClientSession, ServerSession, Session, SessionEvent};
use wsconsole_transport::{Connection, ConnectionId, Transport, TransportError, WebSocketTransport, REQUIRED_SUBPROTOCOL};

type ClientWsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Adapts a client-side `tokio-tungstenite` stream to [`Connection`], so
/// the simulated game can drive a [`ClientSession`] the same way the real
/// game drives one over the listener's [`WebSocketConnection`].
struct GameConnection {
    id: ConnectionId,
    ws: Mutex<ClientWsStream>,
}

impl GameConnection {
    async fn connect(addr: &str) -> Result<Self, WsConsoleError> {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let mut request = format!("ws://{addr}/").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", REQUIRED_SUBPROTOCOL.parse().unwrap());
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::AcceptFailed(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e)))?;
        Ok(Self {
            id: ConnectionId::new(NEXT.fetch_add(1, Ordering::Relaxed)),
            ws: Mutex::new(ws),
        })
    }
}

impl Connection for GameConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.ws
            .lock()
            .await
            .send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(|e| TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e)))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        loop {
            match self.ws.lock().await.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )))
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.ws
            .lock()
            .await
            .close(None)
            .await
            .map_err(|e| TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e)))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Runs the simulated game: answers commands, pushes a `PlayerMessage`
/// event as soon as the server subscribes, and falls in with a V2
/// encryption handshake the server side initiates partway through.
async fn run_game(addr: String) {
    let conn = GameConnection::connect(&addr).await.expect("connect as game");
    let mut session = Session::new(conn);
    session.set_negotiated_version(ProtocolVersion::V1_4_0);
    let mut client = ClientSession::new(session);

    client.set_command_handler(|session, request_id, command_line| {
        println!("[game] received command: {command_line}");
        let body = serde_json::json!({"message": format!("ack: {command_line}")});
        let _ = session.send_frame(Purpose::CommandResponse, body, request_id, ExtraHeaders::default());
    });

    client.set_subscribe_handler(|session, event_name| {
        println!("[game] subscribed: {event_name}");
        let body = serde_json::json!({"sender": "Steve", "message": "hello from the game"});
        let extra = ExtraHeaders::with_event_name(event_name);
        let _ = session.send_frame(Purpose::Event, body, RequestId::SENTINEL, extra);
    });

    loop {
        let events = client.poll().await;
        if events.iter().any(|e| matches!(e, SessionEvent::Disconnect)) {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::try_init().ok();

    let mut transport = WebSocketTransport::bind("127.0.0.1:0").await?;
    let addr = transport.local_addr()?.to_string();

    let game = tokio::spawn(run_game(addr));

    let conn = transport.accept().await?;
    let mut session = Session::new(conn);
    session.set_negotiated_version(ProtocolVersion::V1_4_0);
    let mut facade = ConsoleFacade::new(ServerSession::new(session));

    let response = facade
        .send_command("/say Hi, there!", Some(Duration::from_secs(5)))
        .await?;
    println!("command response: {}", response.body);

    facade
        .session_mut()
        .subscribe("PlayerMessage", |frame| {
            println!("[server] event PlayerMessage: {}", frame.body);
        })?;

    // Driving the session once more is what actually delivers the event
    // above to the listener; `enable_encryption` does that as a side
    // effect of its own poll loop.
    let activated = facade.enable_encryption(CipherMode::Cfb8).await?;
    println!("encryption activated: {activated}");

    let response = facade
        .send_command("/say Still here, encrypted now.", Some(Duration::from_secs(5)))
        .await?;
    println!("command response (encrypted): {}", response.body);

    // Force-close rather than the graceful `closewebsocket` request: this
    // demo's simulated game has no special handling for that command, so
    // a graceful request would never actually be acted on.
    facade.session_mut().disconnect(true).await?;
    let _ = game.await;

    Ok(())
}
