//! Bidirectional relay between client and backend
//!
//! Each direction runs its own copy loop over borrowed sockets. When either
//! direction stops (EOF, error or panic) both sockets are shut down so the
//! other loop unwinds too; the online slot is released only after both
//! directions have returned.

use std::fmt;
use std::io;
use std::net::Shutdown;

use socket2::SockRef;
use tokio::net::TcpStream;

use super::connection::OnlineGuard;
use super::hooks::CapabilityProbe;
use super::splice::{self, SpliceError, SpliceFlavor};
use super::striped;
use crate::error::{ProxyError, Result};
use crate::logger::log;

/// Relay strategy requested for a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Origin,
    Zerocopy,
    LinuxZerocopy,
    Multiple,
    Auto,
}

impl FlowMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "origin" => Ok(FlowMode::Origin),
            "zerocopy" => Ok(FlowMode::Zerocopy),
            "linux-zerocopy" => Ok(FlowMode::LinuxZerocopy),
            "multiple" => Ok(FlowMode::Multiple),
            "auto" => Ok(FlowMode::Auto),
            other => Err(ProxyError::config(format!("unknown flow type '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowMode::Origin => "origin",
            FlowMode::Zerocopy => "zerocopy",
            FlowMode::LinuxZerocopy => "linux-zerocopy",
            FlowMode::Multiple => "multiple",
            FlowMode::Auto => "auto",
        }
    }
}

impl fmt::Display for FlowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete relay implementation after capability probing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Buffered copy loops
    Origin,
    /// Kernel pipe relay
    Splice(SpliceFlavor),
    /// Striped buffered relay
    Multiple { lanes: usize },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Origin => "origin",
            Strategy::Splice(SpliceFlavor::Default) => "zerocopy",
            Strategy::Splice(SpliceFlavor::Large) => "linux-zerocopy",
            Strategy::Multiple { .. } => "multiple",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a flow mode against what the platform supports
///
/// Preference for `Auto` is LinuxZerocopy, then Zerocopy, then Origin.
/// Unsupported zero-copy modes degrade to Origin. `Multiple` is only ever
/// chosen explicitly.
pub fn select_strategy(mode: FlowMode, probe: &dyn CapabilityProbe, lanes: usize) -> Strategy {
    let large = || probe.splice_available() && probe.pipe_resize_available();
    match mode {
        FlowMode::Origin => Strategy::Origin,
        FlowMode::Multiple => Strategy::Multiple { lanes },
        FlowMode::LinuxZerocopy if large() => Strategy::Splice(SpliceFlavor::Large),
        FlowMode::Zerocopy if probe.splice_available() => Strategy::Splice(SpliceFlavor::Default),
        FlowMode::Auto if large() => Strategy::Splice(SpliceFlavor::Large),
        FlowMode::Auto if probe.splice_available() => Strategy::Splice(SpliceFlavor::Default),
        FlowMode::LinuxZerocopy | FlowMode::Zerocopy | FlowMode::Auto => Strategy::Origin,
    }
}

/// Bytes moved in each direction
#[derive(Debug, Default)]
pub struct RelayReport {
    /// client -> backend
    pub up: u64,
    /// backend -> client
    pub down: u64,
    /// First error seen, if any
    pub error: Option<io::Error>,
}

/// Read whatever is available, waiting for readiness first
async fn read_some(src: &TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        src.readable().await?;
        match src.try_read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

pub(crate) async fn write_all(dst: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        dst.writable().await?;
        match dst.try_write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Buffered copy of one direction until EOF
pub(crate) async fn copy_buffered(src: &TcpStream, dst: &TcpStream, buffer_size: usize) -> io::Result<u64> {
    let mut buf = vec![0u8; buffer_size];
    let mut total: u64 = 0;
    loop {
        let n = read_some(src, &mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        write_all(dst, &buf[..n]).await?;
        total += n as u64;
    }
}

fn shutdown_both(stream: &TcpStream) {
    let _ = SockRef::from(stream).shutdown(Shutdown::Both);
}

/// One direction under the chosen strategy, with the splice fallback
async fn pump(src: &TcpStream, dst: &TcpStream, strategy: Strategy, buffer_size: usize) -> io::Result<u64> {
    // Whatever way this direction ends, wake up the other one
    let _closer = scopeguard::guard((src, dst), |(a, b)| {
        shutdown_both(a);
        shutdown_both(b);
    });

    match strategy {
        Strategy::Origin => copy_buffered(src, dst, buffer_size).await,
        Strategy::Splice(flavor) => {
            let outcome = splice::copy(src, dst, flavor).await;
            settle_splice(outcome, src, dst, buffer_size).await
        }
        Strategy::Multiple { lanes } => striped::copy(src, dst, lanes, buffer_size).await,
    }
}

/// Finish a direction after a splice attempt
///
/// A refusal is not fatal: bytes stranded in the pipe go out first, then the
/// rest of the stream is copied through user space.
async fn settle_splice(
    outcome: std::result::Result<u64, SpliceError>,
    src: &TcpStream,
    dst: &TcpStream,
    buffer_size: usize,
) -> io::Result<u64> {
    match outcome {
        Ok(n) => Ok(n),
        Err(SpliceError::Refused { error, pending }) => {
            log::debug!(error = %error, pending = pending.len(), "Splice refused, using buffered copy");
            write_all(dst, &pending).await?;
            let rest = copy_buffered(src, dst, buffer_size).await?;
            Ok(pending.len() as u64 + rest)
        }
        Err(SpliceError::Io(e)) => Err(e),
    }
}

/// Relay until either side closes, then close both and release the slot
pub async fn relay(
    client: TcpStream,
    backend: TcpStream,
    strategy: Strategy,
    buffer_size: usize,
    guard: Option<OnlineGuard>,
) -> RelayReport {
    let (up, down) = tokio::join!(
        pump(&client, &backend, strategy, buffer_size),
        pump(&backend, &client, strategy, buffer_size),
    );
    drop(client);
    drop(backend);
    drop(guard);

    let mut report = RelayReport::default();
    match up {
        Ok(n) => report.up = n,
        Err(e) => report.error = Some(e),
    }
    match down {
        Ok(n) => report.down = n,
        Err(e) => {
            report.error.get_or_insert(e);
        }
    }
    report
}
