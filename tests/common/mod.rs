//! Loopback harness shared by the integration tests
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use zbproxy::config::{ConnConfig, ServiceConfig, ServiceFile};
use zbproxy::core::protocol::{
    decode_varint, encode_packet, encode_string, Handshake, LoginStart, RawPacket,
};
use zbproxy::core::hooks::LoginObserver;
use zbproxy::core::{AccessLists, DecodeResult, ListStore, Service, Strategy};
use zbproxy::handler::read_packet;
use zbproxy::server_runner::serve;

pub const PROTOCOL: i32 = 763;

pub struct Harness {
    pub addr: SocketAddr,
    pub service: Arc<Service>,
    token: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Options for one proxied service
pub struct ServiceOptions<'a> {
    pub backend: SocketAddr,
    pub minecraft: &'a str,
    pub ip_access: &'a str,
    pub lists: AccessLists,
    pub strategy: Strategy,
    /// `TargetAddress` in the service record, the backend IP when unset
    pub target_host: Option<&'a str>,
    /// Address recorded as the startup resolution, the backend when unset
    pub resolved: Option<SocketAddr>,
    pub observer: Option<Arc<dyn LoginObserver>>,
}

impl<'a> ServiceOptions<'a> {
    pub fn new(backend: SocketAddr) -> Self {
        Self {
            backend,
            minecraft: "{}",
            ip_access: "{}",
            lists: AccessLists::default(),
            strategy: Strategy::Origin,
            target_host: None,
            resolved: None,
            observer: None,
        }
    }
}

pub fn test_conn_config() -> ConnConfig {
    ConnConfig {
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        status_timeout: Duration::from_secs(2),
        buffer_size: 4096,
        ..ConnConfig::default()
    }
}

pub async fn start_proxy(opts: ServiceOptions<'_>) -> Harness {
    let text = format!(
        r#"{{
            "Name": "Test",
            "TargetAddress": "{}",
            "TargetPort": {},
            "Listen": 25565,
            "Flow": "origin",
            "IPAccess": {},
            "Minecraft": {}
        }}"#,
        opts.target_host
            .map(str::to_string)
            .unwrap_or_else(|| opts.backend.ip().to_string()),
        opts.backend.port(),
        opts.ip_access,
        opts.minecraft
    );
    let raw: ServiceFile = serde_json::from_str(&text).unwrap();
    let config = ServiceConfig::resolve(&raw).unwrap();
    let mut builder = Service::builder()
        .config(config)
        .target(opts.resolved.unwrap_or(opts.backend))
        .strategy(opts.strategy)
        .lists(Arc::new(ListStore::new(opts.lists)))
        .conn_config(test_conn_config());
    if let Some(observer) = opts.observer {
        builder = builder.observer(observer);
    }
    let service = Arc::new(builder.build().unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    tokio::spawn(serve(listener, Arc::clone(&service), token.clone()));
    Harness {
        addr,
        service,
        token,
    }
}

/// What an echo backend saw before it started echoing
#[derive(Debug)]
pub struct Arrival {
    pub handshake: Handshake,
    pub name: String,
}

/// Backend that records the negotiation, then echoes every byte back
pub async fn echo_backend() -> (SocketAddr, mpsc::UnboundedReceiver<Arrival>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                let Ok(handshake) = read_packet(&mut stream, &mut buf).await else {
                    return;
                };
                let Ok(login) = read_packet(&mut stream, &mut buf).await else {
                    return;
                };
                let _ = tx.send(Arrival {
                    handshake: Handshake::parse(&handshake).unwrap(),
                    name: LoginStart::parse(&login).unwrap().name,
                });
                if !buf.is_empty() && stream.write_all(&buf).await.is_err() {
                    return;
                }
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    (addr, rx)
}

/// Backend that echoes raw bytes without parsing anything
pub async fn raw_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

pub fn handshake(host: &str, next_state: i32) -> Handshake {
    Handshake {
        protocol_version: PROTOCOL,
        host: host.to_string(),
        port: 25565,
        next_state,
    }
}

pub fn login_start(name: &str) -> Vec<u8> {
    let mut body = Vec::new();
    encode_string(name, &mut body);
    encode_packet(0x00, &body)
}

pub fn status_request() -> Vec<u8> {
    encode_packet(0x00, &[])
}

pub fn ping(payload: i64) -> Vec<u8> {
    encode_packet(0x01, &payload.to_be_bytes())
}

/// Connect and send a full login negotiation
///
/// Write errors are ignored: a rejected peer may be reset before the
/// negotiation is written.
pub async fn login(proxy: SocketAddr, host: &str, name: &str) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let mut wire = handshake(host, 2).encode();
    wire.extend_from_slice(&login_start(name));
    let _ = stream.write_all(&wire).await;
    stream
}

pub async fn read_one(stream: &mut TcpStream, buf: &mut BytesMut) -> RawPacket {
    tokio::time::timeout(Duration::from_secs(3), read_packet(stream, buf))
        .await
        .expect("timed out waiting for a packet")
        .unwrap()
}

/// The single string field of a status response or disconnect packet
pub fn string_body(packet: &RawPacket) -> String {
    let body = packet.body();
    let DecodeResult::Ok(len, prefix) = decode_varint(body) else {
        panic!("bad string prefix");
    };
    String::from_utf8(body[prefix..prefix + len as usize].to_vec()).unwrap()
}

/// Poll until the service's online counter reaches `expected`
pub async fn wait_online(service: &Service, expected: usize) {
    for _ in 0..150 {
        if service.online.current() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "online counter stuck at {}, expected {}",
        service.online.current(),
        expected
    );
}
