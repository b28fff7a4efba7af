//! Integration tests for the console listener and facade, driving a real
//! TCP loopback connection with a raw `tokio-tungstenite` client standing
//! in for "the game".

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use wsconsole::prelude::*;
use wsconsole_protocol::Header;

type ClientWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a listener on a random port, with no per-connection setup, and
/// returns its address.
async fn start_server() -> (String, LiveSessions) {
    let server = ConsoleServer::builder().bind("127.0.0.1:0").build().await.expect("bind");
    let addr = server.local_addr().expect("local addr").to_string();
    let live_sessions = server.live_sessions();

    tokio::spawn(async move {
        let _ = server.run(|_session| {}).await;
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    (addr, live_sessions)
}

/// Connects as the required `com.microsoft.minecraft.wsencrypt`
/// subprotocol, matching what a real game client offers.
async fn connect(addr: &str) -> ClientWs {
    let mut request = format!("ws://{addr}/").into_client_request().expect("request");
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        wsconsole_transport::REQUIRED_SUBPROTOCOL.parse().unwrap(),
    );
    let (ws, _) = tokio_tungstenite::connect_async(request).await.expect("connect");
    ws
}

async fn connect_with_subprotocol(addr: &str, subprotocol: &str) -> Result<ClientWs, tokio_tungstenite::tungstenite::Error> {
    let mut request = format!("ws://{addr}/").into_client_request().expect("request");
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", subprotocol.parse().unwrap());
    tokio_tungstenite::connect_async(request).await.map(|(ws, _)| ws)
}

fn recv_frame(msg: Message) -> Frame {
    serde_json::from_slice(&msg.into_data()).expect("decode frame")
}

#[tokio::test]
async fn test_accepts_required_subprotocol_and_rejects_others() {
    let (addr, _) = start_server().await;

    assert!(connect_with_subprotocol(&addr, "com.microsoft.minecraft.wsencrypt").await.is_ok());
    assert!(connect_with_subprotocol(&addr, "some-other-protocol").await.is_err());
}

#[tokio::test]
async fn test_builder_subprotocol_override_accepts_custom_protocol_and_rejects_default() {
    let server = ConsoleServer::builder()
        .bind("127.0.0.1:0")
        .subprotocol("com.example.testprotocol")
        .build()
        .await
        .expect("bind");
    let addr = server.local_addr().expect("local addr").to_string();

    tokio::spawn(async move {
        let _ = server.run(|_session| {}).await;
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(connect_with_subprotocol(&addr, "com.example.testprotocol").await.is_ok());
    assert!(connect_with_subprotocol(&addr, wsconsole_transport::REQUIRED_SUBPROTOCOL)
        .await
        .is_err());
}

#[tokio::test]
async fn test_builder_handshake_timeout_rejects_slow_upgrade() {
    let server = ConsoleServer::builder()
        .bind("127.0.0.1:0")
        .handshake_timeout(Duration::from_millis(50))
        .build()
        .await
        .expect("bind");
    let addr = server.local_addr().expect("local addr").to_string();
    let live_sessions = server.live_sessions();

    tokio::spawn(async move {
        let _ = server.run(|_session| {}).await;
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // A bare TCP connection that never sends an upgrade request at all.
    // If the handshake timeout didn't apply, the accept loop would hang
    // here forever instead of moving on to the next connection.
    let _stalled = tokio::net::TcpStream::connect(&addr).await.expect("tcp connect");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut ws = connect(&addr).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(live_sessions.lock().await.len(), 1, "the stalled handshake was abandoned, not accepted");
    let _ = ws.close(None).await;
}

#[tokio::test]
async fn test_server_sends_command_and_receives_response() {
    let server = ConsoleServer::builder().bind("127.0.0.1:0").build().await.expect("bind");
    let addr = server.local_addr().expect("local addr").to_string();

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let mut ready_tx = Some(ready_tx);

    tokio::spawn(async move {
        let _ = server
            .run(move |session| {
                session
                    .send_command("/say Hi, there!", |_frame| {})
                    .expect("send_command");
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(());
                }
            })
            .await;
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut ws = connect(&addr).await;
    ready_rx.await.ok();

    let request = recv_frame(ws.next().await.unwrap().unwrap());
    assert_eq!(*request.purpose(), Purpose::CommandRequest);
    assert_eq!(request.body["commandLine"], "/say Hi, there!");

    let response = Frame {
        header: Header::new(ProtocolVersion::V0_0_1, Purpose::CommandResponse).with_request_id(request.request_id()),
        body: serde_json::json!({"message": "Yes! I am here!"}),
    };
    ws.send(Message::Binary(serde_json::to_vec(&response).unwrap().into()))
        .await
        .unwrap();

    // The server's response callback has no externally observable side
    // effect in this minimal harness beyond not erroring; the goal here is
    // exercising the listener's accept -> session -> dispatch path end to
    // end on a real socket.
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_facade_send_command_round_trip_over_loopback() {
    use wsconsole_session::Session;
    use wsconsole_transport::{Connection, WebSocketTransport};

    let transport_listener = WebSocketTransport::bind("127.0.0.1:0").await.expect("bind");
    let addr = transport_listener.local_addr().expect("addr");

    let accept_task = tokio::spawn(async move {
        let mut transport = transport_listener;
        let conn = transport.accept().await.expect("accept");
        let mut facade = ConsoleFacade::new(ServerSession::new(Session::new(conn)));
        facade.send_command("/say Hi, there!", Some(Duration::from_secs(2))).await
    });

    let mut ws = connect(&addr.to_string()).await;
    let request = recv_frame(ws.next().await.unwrap().unwrap());
    assert_eq!(request.body["commandLine"], "/say Hi, there!");

    let response = Frame {
        header: Header::new(ProtocolVersion::V0_0_1, Purpose::CommandResponse).with_request_id(request.request_id()),
        body: serde_json::json!({"message": "Yes! I am here!"}),
    };
    ws.send(Message::Binary(serde_json::to_vec(&response).unwrap().into()))
        .await
        .unwrap();

    let result = accept_task.await.unwrap().expect("facade resolves");
    assert_eq!(result.body["message"], "Yes! I am here!");
}

#[tokio::test]
async fn test_disconnect_all_closes_every_live_session() {
    let (addr, live_sessions) = start_server().await;
    let _ws1 = connect(&addr).await;
    let _ws2 = connect(&addr).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(live_sessions.lock().await.len(), 2);
}

#[tokio::test]
async fn test_broadcast_subscribe_reaches_connected_session() {
    let server = ConsoleServer::builder().bind("127.0.0.1:0").build().await.expect("bind");
    let addr = server.local_addr().expect("local addr").to_string();
    let live_sessions = server.live_sessions();

    tokio::spawn(async move {
        let _ = server.run(|_session| {}).await;
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut ws = connect(&addr).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sessions: Vec<_> = live_sessions.lock().await.values().cloned().collect();
    assert_eq!(sessions.len(), 1);

    sessions[0]
        .lock()
        .await
        .session_mut()
        .send_frame(
            Purpose::Subscribe,
            serde_json::Value::Null,
            wsconsole_protocol::RequestId::SENTINEL,
            wsconsole_protocol::ExtraHeaders::with_event_name("PlayerMessage"),
        )
        .expect("send_frame");

    let frame = recv_frame(ws.next().await.unwrap().unwrap());
    assert_eq!(*frame.purpose(), Purpose::Subscribe);
    assert_eq!(frame.resolved_event_name(), "PlayerMessage");
}

#[tokio::test]
async fn test_subscribe_omits_event_name_header_before_v1_1_0() {
    let server = ConsoleServer::builder().bind("127.0.0.1:0").build().await.expect("bind");
    let addr = server.local_addr().expect("local addr").to_string();

    tokio::spawn(async move {
        let _ = server
            .run(|session| {
                session
                    .session_mut()
                    .send_frame(
                        Purpose::Subscribe,
                        serde_json::Value::Null,
                        wsconsole_protocol::RequestId::SENTINEL,
                        wsconsole_protocol::ExtraHeaders::with_event_name("PlayerMessage"),
                    )
                    .expect("send_frame");
            })
            .await;
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut ws = connect(&addr).await;
    let frame = recv_frame(ws.next().await.unwrap().unwrap());
    // Default negotiated version is the floor (V0_0_1), which carries the
    // event name in the body rather than the header.
    assert!(frame.header.extra.event_name.is_none());
    assert_eq!(frame.body["eventName"], "PlayerMessage");
}

#[tokio::test]
async fn test_command_response_with_high_bit_status_is_surfaced_as_error() {
    use wsconsole_session::Session;
    use wsconsole_transport::WebSocketTransport;

    let mut transport_listener = WebSocketTransport::bind("127.0.0.1:0").await.expect("bind");
    let addr = transport_listener.local_addr().expect("addr");

    let accept_task = tokio::spawn(async move {
        let conn = transport_listener.accept().await.expect("accept");
        let mut facade = ConsoleFacade::new(ServerSession::new(Session::new(conn)));
        facade.send_command("/bogus", Some(Duration::from_secs(2))).await
    });

    let mut ws = connect(&addr.to_string()).await;
    let request = recv_frame(ws.next().await.unwrap().unwrap());

    let response = Frame {
        header: Header::new(ProtocolVersion::V0_0_1, Purpose::CommandResponse).with_request_id(request.request_id()),
        body: serde_json::json!({"statusCode": 0x80000000u32, "statusMessage": "Unknown command"}),
    };
    ws.send(Message::Binary(serde_json::to_vec(&response).unwrap().into()))
        .await
        .unwrap();

    let result = accept_task.await.unwrap();
    assert!(result.is_err());
}
