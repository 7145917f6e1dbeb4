//! Minecraft wire protocol parsing (negotiation phase only)
//!
//! Packet layout:
//! - Length (VarInt, counts id + body)
//! - Packet id (VarInt)
//! - Body
//!
//! Only the handshake, status and login-start packets are decoded. Every
//! field is attacker controlled, so all reads are bounds checked and a
//! malformed field yields `DecodeResult::Invalid` instead of panicking.

use bytes::{Bytes, BytesMut};

/// VarInt is at most 5 bytes for a 32-bit value
pub const MAX_VARINT_BYTES: usize = 5;

/// Upper bound for a single packet while negotiating
pub const MAX_PACKET_LEN: usize = 32 * 1024;

/// Vanilla caps the host at 255 chars; Forge appends up to 6 more for its marker
pub const MAX_HOST_CHARS: usize = 255 + 6;

/// Player names are at most 16 chars
pub const MAX_NAME_CHARS: usize = 16;

/// Handshake next-state value for a status request
pub const NEXT_STATE_STATUS: i32 = 1;

/// Handshake next-state value for a login
pub const NEXT_STATE_LOGIN: i32 = 2;

pub const HANDSHAKE_ID: i32 = 0x00;
pub const STATUS_REQUEST_ID: i32 = 0x00;
pub const STATUS_RESPONSE_ID: i32 = 0x00;
pub const PING_ID: i32 = 0x01;
pub const LOGIN_START_ID: i32 = 0x00;
pub const LOGIN_DISCONNECT_ID: i32 = 0x00;

/// Forge compatibility markers appended to the handshake host
const FML_MARKERS: [&str; 3] = ["\0FML\0", "\0FML2\0", "\0FML3\0"];

/// Decode result
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeResult<T> {
    /// Successfully decoded, with the number of bytes consumed
    Ok(T, usize),
    /// Need more data
    NeedMoreData,
    /// Invalid data
    Invalid(&'static str),
}

/// Decode a VarInt from the front of `buf`
pub fn decode_varint(buf: &[u8]) -> DecodeResult<i32> {
    let mut value: u32 = 0;
    for i in 0..MAX_VARINT_BYTES {
        let Some(&byte) = buf.get(i) else {
            return DecodeResult::NeedMoreData;
        };
        if i == MAX_VARINT_BYTES - 1 && byte & 0xF0 != 0 {
            return DecodeResult::Invalid("varint too long");
        }
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return DecodeResult::Ok(value as i32, i + 1);
        }
    }
    DecodeResult::Invalid("varint too long")
}

/// Append a VarInt to `buf`
pub fn encode_varint(value: i32, buf: &mut Vec<u8>) {
    let mut v = value as u32;
    loop {
        if v & !0x7F == 0 {
            buf.push(v as u8);
            return;
        }
        buf.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
}

/// Append a length-prefixed UTF-8 string to `buf`
pub fn encode_string(value: &str, buf: &mut Vec<u8>) {
    encode_varint(value.len() as i32, buf);
    buf.extend_from_slice(value.as_bytes());
}

/// Frame `id` + `body` with its length prefix
pub fn encode_packet(id: i32, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + MAX_VARINT_BYTES);
    encode_varint(id, &mut payload);
    payload.extend_from_slice(body);

    let mut out = Vec::with_capacity(payload.len() + MAX_VARINT_BYTES);
    encode_varint(payload.len() as i32, &mut out);
    out.extend_from_slice(&payload);
    out
}

/// Location of one complete packet inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub id: i32,
    /// Offset of the body from the start of the frame
    pub body_start: usize,
}

/// Check whether `buf` starts with a complete packet frame
///
/// On success the consumed length covers the length prefix, id and body.
pub fn decode_frame(buf: &[u8], max_len: usize) -> DecodeResult<FrameHeader> {
    let (len, prefix) = match decode_varint(buf) {
        DecodeResult::Ok(len, prefix) => (len, prefix),
        DecodeResult::NeedMoreData => return DecodeResult::NeedMoreData,
        DecodeResult::Invalid(e) => return DecodeResult::Invalid(e),
    };
    if len < 1 {
        return DecodeResult::Invalid("empty packet");
    }
    let len = len as usize;
    if len > max_len {
        return DecodeResult::Invalid("packet too large");
    }
    let total = prefix + len;
    if buf.len() < total {
        return DecodeResult::NeedMoreData;
    }
    match decode_varint(&buf[prefix..total]) {
        DecodeResult::Ok(id, id_len) => DecodeResult::Ok(
            FrameHeader {
                id,
                body_start: prefix + id_len,
            },
            total,
        ),
        DecodeResult::NeedMoreData => DecodeResult::Invalid("truncated packet id"),
        DecodeResult::Invalid(e) => DecodeResult::Invalid(e),
    }
}

/// A complete packet as received, kept verbatim for forwarding
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub id: i32,
    frame: Bytes,
    body_start: usize,
}

impl RawPacket {
    /// Split a decoded frame off the front of `buf`
    pub fn split_from(buf: &mut BytesMut, header: FrameHeader, total: usize) -> Self {
        Self {
            id: header.id,
            frame: buf.split_to(total).freeze(),
            body_start: header.body_start,
        }
    }

    /// The whole frame including the length prefix
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    pub fn body(&self) -> &[u8] {
        &self.frame[self.body_start..]
    }
}

/// Cursor over a complete packet body; running out of bytes is invalid
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn varint(&mut self) -> Result<i32, &'static str> {
        match decode_varint(&self.buf[self.pos..]) {
            DecodeResult::Ok(v, n) => {
                self.pos += n;
                Ok(v)
            }
            DecodeResult::NeedMoreData => Err("truncated varint"),
            DecodeResult::Invalid(e) => Err(e),
        }
    }

    fn string(&mut self, max_chars: usize) -> Result<&'a str, &'static str> {
        let len = self.varint()?;
        if len < 0 {
            return Err("negative string length");
        }
        let len = len as usize;
        // UTF-8 needs at most 4 bytes per char
        if len > max_chars * 4 {
            return Err("string too long");
        }
        let bytes = self.take(len).map_err(|_| "truncated string")?;
        let s = std::str::from_utf8(bytes).map_err(|_| "invalid string encoding")?;
        if s.chars().count() > max_chars {
            return Err("string too long");
        }
        Ok(s)
    }

    fn u16(&mut self) -> Result<u16, &'static str> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i64(&mut self) -> Result<i64, &'static str> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_be_bytes(raw))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], &'static str> {
        let end = self.pos.checked_add(n).ok_or("length overflow")?;
        if end > self.buf.len() {
            return Err("truncated field");
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }
}

/// Serverbound handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub host: String,
    pub port: u16,
    pub next_state: i32,
}

impl Handshake {
    pub fn parse(packet: &RawPacket) -> Result<Self, &'static str> {
        if packet.id != HANDSHAKE_ID {
            return Err("unexpected packet id for handshake");
        }
        let mut r = FieldReader::new(packet.body());
        let protocol_version = r.varint()?;
        let host = r.string(MAX_HOST_CHARS)?.to_string();
        let port = r.u16()?;
        let next_state = r.varint()?;
        Ok(Self {
            protocol_version,
            host,
            port,
            next_state,
        })
    }

    pub fn is_status(&self) -> bool {
        self.next_state == NEXT_STATE_STATUS
    }

    /// Encode as a complete framed packet
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.host.len() + 16);
        encode_varint(self.protocol_version, &mut body);
        encode_string(&self.host, &mut body);
        body.extend_from_slice(&self.port.to_be_bytes());
        encode_varint(self.next_state, &mut body);
        encode_packet(HANDSHAKE_ID, &body)
    }
}

/// Serverbound login start; only the name is decoded, trailing fields are
/// version specific and forwarded untouched with the raw frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    pub name: String,
}

impl LoginStart {
    pub fn parse(packet: &RawPacket) -> Result<Self, &'static str> {
        if packet.id != LOGIN_START_ID {
            return Err("unexpected packet id for login start");
        }
        let mut r = FieldReader::new(packet.body());
        let name = r.string(MAX_NAME_CHARS)?;
        if name.is_empty() {
            return Err("empty player name");
        }
        Ok(Self {
            name: name.to_string(),
        })
    }
}

/// Payload of a ping request
pub fn parse_ping(packet: &RawPacket) -> Result<i64, &'static str> {
    if packet.id != PING_ID {
        return Err("unexpected packet id for ping");
    }
    FieldReader::new(packet.body()).i64()
}

/// Clientbound pong
pub fn encode_pong(payload: i64) -> Vec<u8> {
    encode_packet(PING_ID, &payload.to_be_bytes())
}

/// Clientbound status response carrying a JSON document
pub fn encode_status_response(json: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(json.len() + MAX_VARINT_BYTES);
    encode_string(json, &mut body);
    encode_packet(STATUS_RESPONSE_ID, &body)
}

/// Clientbound login disconnect carrying a JSON chat component
pub fn encode_login_disconnect(reason_json: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(reason_json.len() + MAX_VARINT_BYTES);
    encode_string(reason_json, &mut body);
    encode_packet(LOGIN_DISCONNECT_ID, &body)
}

/// Split a Forge compatibility marker off the end of a handshake host
pub fn split_fml_marker(host: &str) -> (&str, Option<&'static str>) {
    for marker in FML_MARKERS {
        if let Some(stripped) = host.strip_suffix(marker) {
            return (stripped, Some(marker));
        }
    }
    (host, None)
}
