//! Connection handling logic
//!
//! The protocol interceptor: reads the handshake, answers or forwards status
//! requests, enforces login policy and hands admitted logins to the relay.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

use crate::core::minecraft::{self, Destination, PingMode};
use crate::core::protocol::{
    decode_frame, encode_login_disconnect, encode_pong, encode_status_response, parse_ping,
    Handshake, LoginStart, RawPacket, MAX_PACKET_LEN, STATUS_REQUEST_ID,
};
use crate::core::{relay, ConnContext, DecodeResult, RelayReport, Service};
use crate::error::{ProxyError, Result};
use crate::logger::log;

/// How long a rejected client gets to read its disconnect message
const DISCONNECT_LINGER: Duration = Duration::from_secs(1);

const INITIAL_READ_BUF: usize = 1024;

/// Read one complete packet, or `None` on a clean EOF between packets
///
/// Bytes after the packet stay in `buf`.
pub async fn read_packet_opt<R>(stream: &mut R, buf: &mut BytesMut) -> Result<Option<RawPacket>>
where
    R: AsyncRead + Unpin,
{
    loop {
        match decode_frame(buf, MAX_PACKET_LEN) {
            DecodeResult::Ok(header, total) => {
                return Ok(Some(RawPacket::split_from(buf, header, total)));
            }
            DecodeResult::NeedMoreData => {}
            DecodeResult::Invalid(e) => return Err(ProxyError::protocol(e)),
        }

        let n = stream.read_buf(buf).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ProxyError::protocol("connection closed with incomplete packet"));
        }
    }
}

/// Read one complete packet; EOF is a protocol fault here
pub async fn read_packet<R>(stream: &mut R, buf: &mut BytesMut) -> Result<RawPacket>
where
    R: AsyncRead + Unpin,
{
    read_packet_opt(stream, buf)
        .await?
        .ok_or_else(|| ProxyError::protocol("connection closed before packet"))
}

/// Process a single accepted connection that passed the admission gate
pub async fn process_connection(
    service: &Service,
    mut stream: TcpStream,
    ctx: &mut ConnContext,
) -> Result<()> {
    if !service.config.minecraft.intercepts() {
        return forward_plain(service, stream, ctx).await;
    }

    let conn = &service.conn_config;
    let deadline = Instant::now() + conn.handshake_timeout;
    let mut buf = BytesMut::with_capacity(INITIAL_READ_BUF);

    let packet = timeout_at(deadline, read_packet(&mut stream, &mut buf))
        .await
        .map_err(|_| ProxyError::Timeout("reading the handshake"))??;
    let handshake = Handshake::parse(&packet).map_err(ProxyError::protocol)?;

    if handshake.is_status() {
        let mc = &service.config.minecraft;
        if mc.synthesizes_status() {
            timeout(
                conn.status_timeout,
                answer_status(service, &mut stream, &mut buf, &handshake),
            )
            .await
            .map_err(|_| ProxyError::Timeout("answering a status request"))??;
            log::connection(service.name(), ctx, "status answered locally");
            return Ok(());
        }
        return forward_status(service, stream, buf, &packet, ctx).await;
    }

    let login_packet = timeout_at(deadline, read_packet(&mut stream, &mut buf))
        .await
        .map_err(|_| ProxyError::Timeout("reading the login start"))??;
    let login = LoginStart::parse(&login_packet).map_err(ProxyError::protocol)?;

    let negotiated = Negotiated {
        handshake_packet: packet,
        handshake,
        login_packet,
        login,
    };
    handle_login(service, stream, buf, negotiated, ctx).await
}

/// Relay the raw byte stream to the static target
async fn forward_plain(service: &Service, client: TcpStream, ctx: &ConnContext) -> Result<()> {
    let backend = dial(service, &Destination::Static).await?;
    log::connection(service.name(), ctx, "forwarding plain TCP");

    let report = relay(
        client,
        backend,
        service.strategy,
        service.conn_config.buffer_size,
        None,
    )
    .await;
    log_report(service, ctx, &report);
    Ok(())
}

fn log_report(service: &Service, ctx: &ConnContext, report: &RelayReport) {
    match &report.error {
        None => {
            log::debug!(service = service.name(), conn = %ctx, up = report.up, down = report.down, "Relay completed");
        }
        Some(e) => {
            log::debug!(service = service.name(), conn = %ctx, up = report.up, down = report.down, error = %e, "Relay ended with error");
        }
    }
}

/// Synthesized status response followed by the ping sub-phase
async fn answer_status(
    service: &Service,
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    handshake: &Handshake,
) -> Result<()> {
    let request = read_packet(stream, buf).await?;
    if request.id != STATUS_REQUEST_ID {
        return Err(ProxyError::protocol("expected status request"));
    }

    let mc = &service.config.minecraft;
    let json = minecraft::status_json(
        handshake.protocol_version,
        &mc.motd_description,
        &mc.motd_favicon,
        mc.online.max,
        service.shown_online(),
    );
    stream.write_all(&encode_status_response(&json)).await?;

    if mc.ping_mode == PingMode::Disconnect {
        return Ok(());
    }
    // Some clients never ping; closing here is not a fault
    let Some(ping) = read_packet_opt(stream, buf).await? else {
        return Ok(());
    };
    let payload = parse_ping(&ping).map_err(ProxyError::protocol)?;
    let reply = match mc.ping_mode {
        PingMode::ZeroMs => minecraft::ZERO_MS_PONG,
        _ => payload,
    };
    stream.write_all(&encode_pong(reply)).await?;
    Ok(())
}

/// Hand the status exchange to the backend untouched
async fn forward_status(
    service: &Service,
    mut client: TcpStream,
    buf: BytesMut,
    handshake_packet: &RawPacket,
    ctx: &ConnContext,
) -> Result<()> {
    let mut backend = dial(service, &Destination::Static).await?;

    let mut first = Vec::with_capacity(handshake_packet.frame().len() + buf.len());
    first.extend_from_slice(handshake_packet.frame());
    first.extend_from_slice(&buf);
    backend.write_all(&first).await?;

    let exchange = tokio::io::copy_bidirectional(&mut client, &mut backend);
    match timeout(service.conn_config.status_timeout, exchange).await {
        Ok(Ok((up, down))) => {
            log::debug!(service = service.name(), conn = %ctx, up = up, down = down, "Status passed through");
        }
        Ok(Err(e)) => {
            log::debug!(service = service.name(), conn = %ctx, error = %e, "Status pass-through ended with error");
        }
        Err(_) => {
            log::debug!(service = service.name(), conn = %ctx, "Status pass-through timed out");
        }
    }
    Ok(())
}

/// Everything read from the client during negotiation
struct Negotiated {
    handshake_packet: RawPacket,
    handshake: Handshake,
    login_packet: RawPacket,
    login: LoginStart,
}

async fn handle_login(
    service: &Service,
    client: TcpStream,
    leftover: BytesMut,
    negotiated: Negotiated,
    ctx: &mut ConnContext,
) -> Result<()> {
    let mc = &service.config.minecraft;
    let name = negotiated.login.name.as_str();
    let cap = mc.online.cap();
    ctx.tag("player", name);

    if let Some(max) = cap {
        if service.online.current() >= max {
            log::rejected(service.name(), ctx, "online player limit reached");
            disconnect(client, &minecraft::server_full_message(service.name(), name, mc.online.max)).await;
            return Ok(());
        }
    }

    let verdict = mc.name_access.evaluate(&service.lists.snapshot(), name);
    if !verdict.admits() {
        log::rejected(service.name(), ctx, verdict.as_str());
        disconnect(client, &minecraft::kick_message(service.name(), name)).await;
        return Ok(());
    }

    let destination =
        minecraft::resolve_destination(&negotiated.handshake.host, mc.any_dest_root.as_deref());
    if let Destination::Dynamic(label) = &destination {
        log::debug!(service = service.name(), conn = %ctx, target = %label, "Any-destination overrode target");
    }
    let mut backend = dial(service, &destination).await?;

    let outbound = match &mc.hostname_rewrite {
        Some(rewritten) => minecraft::rewrite_handshake(
            &negotiated.handshake,
            rewritten,
            mc.ignore_fml_suffix,
            service.config.target_port,
        )
        .encode(),
        None => negotiated.handshake_packet.frame().to_vec(),
    };
    let mut first = outbound;
    first.extend_from_slice(negotiated.login_packet.frame());
    first.extend_from_slice(&leftover);
    backend.write_all(&first).await?;

    let Some(guard) = service.online.try_acquire(cap) else {
        // Lost the race for the last slot while dialing
        log::rejected(service.name(), ctx, "online player limit reached");
        drop(backend);
        disconnect(client, &minecraft::server_full_message(service.name(), name, mc.online.max)).await;
        return Ok(());
    };

    service.observer.player_admitted(service.name(), ctx, name, verdict);

    let report = relay(
        client,
        backend,
        service.strategy,
        service.conn_config.buffer_size,
        Some(guard),
    )
    .await;
    log_report(service, ctx, &report);
    Ok(())
}

/// Connect to the backend within the connect timeout
///
/// The host is resolved on every dial and each address is tried in turn.
async fn dial(service: &Service, destination: &Destination) -> Result<TcpStream> {
    let port = service.config.target_port;
    let host = match destination {
        Destination::Static => service.config.target_host.as_str(),
        Destination::Dynamic(label) => label.as_str(),
    };
    let target = format!("{}:{}", host, port);

    match timeout(service.conn_config.connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            if service.conn_config.tcp_nodelay {
                let _ = stream.set_nodelay(true);
            }
            Ok(stream)
        }
        Ok(Err(source)) => Err(ProxyError::Dial { target, source }),
        Err(_) => Err(ProxyError::Timeout("connecting to the backend")),
    }
}

/// Send a login disconnect, then give the client a moment to read it
async fn disconnect(mut stream: TcpStream, reason_json: &str) {
    if stream
        .write_all(&encode_login_disconnect(reason_json))
        .await
        .is_err()
    {
        return;
    }
    let _ = stream.shutdown().await;

    let mut sink = [0u8; 256];
    let _ = timeout(DISCONNECT_LINGER, async {
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}
