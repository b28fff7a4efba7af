//! Integration tests for the WebSocket transport.
//!
//! These spin up a real WebSocket server and client to verify that data
//! actually flows over the network, and that the handshake layer
//! negotiates the required subprotocol and tolerates the game's
//! non-standard short key.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use wsconsole_transport::{Connection, Transport, WebSocketTransport, REQUIRED_SUBPROTOCOL};

    async fn connect_client(
        addr: &str,
    ) -> tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    > {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        let mut request = format!("ws://{addr}").into_client_request().unwrap();
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            REQUIRED_SUBPROTOCOL.parse().unwrap(),
        );
        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .expect("client should connect");
        ws
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let mut client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.expect("task should complete");

        assert!(server_conn.id().into_inner() > 0);

        server_conn
            .send(b"hello from server")
            .await
            .expect("send should succeed");

        use futures_util::StreamExt;
        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"hello from server");

        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::Message;
        client_ws
            .send(Message::Binary(b"hello from client".to_vec().into()))
            .await
            .unwrap();

        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, b"hello from client");

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.unwrap();

        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::Message;
        let mut client_ws = client_ws;
        client_ws.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_rejects_missing_subprotocol() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        let server_handle = tokio::spawn(async move { transport.accept().await });

        let url = format!("ws://{addr}");
        let connect_result = tokio_tungstenite::connect_async(&url).await;
        assert!(connect_result.is_err(), "handshake without the required subprotocol should fail");

        let accept_result = server_handle.await.unwrap();
        assert!(accept_result.is_err());
    }

    #[tokio::test]
    async fn test_bind_with_overridden_subprotocol_accepts_it_and_rejects_default() {
        let mut transport = WebSocketTransport::bind_with("127.0.0.1:0", "com.example.testprotocol", Duration::from_secs(5))
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();

        let server_handle = tokio::spawn(async move { transport.accept().await });

        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        let mut request = format!("ws://{addr}").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", REQUIRED_SUBPROTOCOL.parse().unwrap());
        let connect_result = tokio_tungstenite::connect_async(request).await;
        assert!(connect_result.is_err(), "default subprotocol should be rejected once overridden");

        let accept_result = server_handle.await.unwrap();
        assert!(accept_result.is_err());
    }

    #[tokio::test]
    async fn test_bind_with_short_handshake_timeout_abandons_stalled_upgrade() {
        let transport = WebSocketTransport::bind_with("127.0.0.1:0", REQUIRED_SUBPROTOCOL, Duration::from_millis(50))
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap().to_string();
        let mut transport = transport;

        let server_handle = tokio::spawn(async move { transport.accept().await });

        // Connect the raw TCP socket but never send an upgrade request.
        let _stalled = tokio::net::TcpStream::connect(&addr).await.expect("tcp connect");

        let accept_result = server_handle.await.unwrap();
        assert!(accept_result.is_err(), "handshake should time out rather than hang");
    }
}
