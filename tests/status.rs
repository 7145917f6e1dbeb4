mod common;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use zbproxy::core::minecraft::{DEFAULT_FAVICON, ZERO_MS_PONG};
use zbproxy::core::protocol::{encode_pong, encode_status_response, parse_ping};
use zbproxy::handler::{read_packet, read_packet_opt};

use common::*;

async fn request_status(proxy: std::net::SocketAddr) -> (TcpStream, BytesMut, serde_json::Value) {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    let mut wire = handshake("mc.example.com", 1).encode();
    wire.extend_from_slice(&status_request());
    client.write_all(&wire).await.unwrap();

    let mut buf = BytesMut::new();
    let response = read_one(&mut client, &mut buf).await;
    assert_eq!(response.id, 0x00);
    let doc = serde_json::from_str(&string_body(&response)).unwrap();
    (client, buf, doc)
}

#[tokio::test]
async fn test_synthesized_status_fields() {
    let (backend, _arrivals) = echo_backend().await;
    let mut opts = ServiceOptions::new(backend);
    opts.minecraft = r#"{
        "MotdDescription": "{NAME} -> {HOST}:{PORT}",
        "MotdFavicon": "{DEFAULT_MOTD}",
        "OnlineCount": { "Max": 50, "Online": 7 }
    }"#;
    let proxy = start_proxy(opts).await;

    let (mut client, mut buf, doc) = request_status(proxy.addr).await;
    assert_eq!(doc["version"]["protocol"], PROTOCOL);
    assert_eq!(
        doc["description"]["text"],
        format!("Test -> 127.0.0.1:{}", backend.port())
    );
    assert_eq!(doc["players"]["max"], 50);
    assert_eq!(doc["players"]["online"], 7);
    assert_eq!(doc["favicon"], DEFAULT_FAVICON);

    // Normal ping mode echoes the payload
    client.write_all(&ping(123_456_789)).await.unwrap();
    let pong = read_one(&mut client, &mut buf).await;
    assert_eq!(parse_ping(&pong).unwrap(), 123_456_789);

    // Then the proxy hangs up
    assert!(read_packet_opt(&mut client, &mut buf).await.unwrap().is_none());
    assert_eq!(proxy.service.online.current(), 0);
}

#[tokio::test]
async fn test_status_shows_live_online_count() {
    let (backend, _arrivals) = echo_backend().await;
    let mut opts = ServiceOptions::new(backend);
    opts.minecraft = r#"{ "MotdDescription": "hello", "OnlineCount": { "Max": 10 } }"#;
    let proxy = start_proxy(opts).await;

    let _held = proxy.service.online.try_acquire(None);
    let (_client, _buf, doc) = request_status(proxy.addr).await;
    assert_eq!(doc["players"]["online"], 1);
    assert!(doc.get("favicon").is_none());
}

#[tokio::test]
async fn test_zero_ms_ping_mode() {
    let (backend, _arrivals) = echo_backend().await;
    let mut opts = ServiceOptions::new(backend);
    opts.minecraft = r#"{ "MotdDescription": "fast", "PingMode": "0ms" }"#;
    let proxy = start_proxy(opts).await;

    let (mut client, mut buf, _doc) = request_status(proxy.addr).await;
    client.write_all(&ping(42)).await.unwrap();
    let pong = read_one(&mut client, &mut buf).await;
    assert_eq!(parse_ping(&pong).unwrap(), ZERO_MS_PONG);
}

#[tokio::test]
async fn test_disconnect_ping_mode() {
    let (backend, _arrivals) = echo_backend().await;
    let mut opts = ServiceOptions::new(backend);
    opts.minecraft = r#"{ "MotdDescription": "bye", "PingMode": "disconnect" }"#;
    let proxy = start_proxy(opts).await;

    let (mut client, mut buf, _doc) = request_status(proxy.addr).await;
    // The ping may or may not be written before the close is seen
    let _ = client.write_all(&ping(42)).await;
    let next = read_packet_opt(&mut client, &mut buf).await;
    assert!(matches!(next, Ok(None) | Err(_)));
}

#[tokio::test]
async fn test_status_pass_through_is_verbatim() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let canned = encode_status_response(r#"{"description":{"text":"real backend"}}"#);
    let canned_for_backend = canned.clone();
    let backend_task = tokio::spawn(async move {
        let (mut stream, _) = backend.accept().await.unwrap();
        let mut buf = BytesMut::new();
        let hs = read_packet(&mut stream, &mut buf).await.unwrap();
        let request = read_packet(&mut stream, &mut buf).await.unwrap();
        assert_eq!(request.id, 0x00);
        stream.write_all(&canned_for_backend).await.unwrap();
        let ping = read_packet(&mut stream, &mut buf).await.unwrap();
        stream
            .write_all(&encode_pong(parse_ping(&ping).unwrap()))
            .await
            .unwrap();
        hs.frame().to_vec()
    });

    // A player cap turns on interception without synthesizing status
    let mut opts = ServiceOptions::new(backend_addr);
    opts.minecraft = r#"{ "OnlineCount": { "Max": 100, "EnableMaxLimit": true } }"#;
    let proxy = start_proxy(opts).await;

    let sent_handshake = handshake("mc.example.com\0FML\0", 1).encode();
    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    let mut wire = sent_handshake.clone();
    wire.extend_from_slice(&status_request());
    client.write_all(&wire).await.unwrap();

    let mut received = vec![0u8; canned.len()];
    client.read_exact(&mut received).await.unwrap();
    assert_eq!(received, canned);

    client.write_all(&ping(99)).await.unwrap();
    let mut buf = BytesMut::new();
    let pong = read_one(&mut client, &mut buf).await;
    assert_eq!(parse_ping(&pong).unwrap(), 99);

    assert_eq!(backend_task.await.unwrap(), sent_handshake);
    assert_eq!(proxy.service.online.current(), 0);
}
