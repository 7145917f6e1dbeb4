//! Kernel pipe relay (Linux `splice(2)`).
//!
//! Bytes move socket -> pipe -> socket without entering user space. Each
//! direction owns one non-blocking pipe; readiness comes from tokio through
//! `try_io`, so the task never blocks a worker thread.

use std::io;

use tokio::net::TcpStream;

/// Pipe capacity requested by the tuned (LinuxZerocopy) flavor
pub const LARGE_PIPE_SIZE: usize = 1 << 20;

/// Kernel default pipe capacity
pub const DEFAULT_PIPE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceFlavor {
    /// Default pipe capacity
    Default,
    /// Pipe enlarged with `F_SETPIPE_SZ`
    Large,
}

#[derive(Debug)]
pub enum SpliceError {
    /// The kernel refused this socket pair before anything was relayed.
    /// `pending` holds bytes already pulled into the pipe that still need
    /// to reach the destination.
    Refused { error: io::Error, pending: Vec<u8> },
    /// Ordinary I/O failure mid-relay
    Io(io::Error),
}

impl From<io::Error> for SpliceError {
    fn from(e: io::Error) -> Self {
        SpliceError::Io(e)
    }
}

/// Errors meaning "this pair cannot be spliced" rather than "the peer failed"
pub fn is_refusal(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(code) if code == libc::EINVAL
            || code == libc::ENOSYS
            || code == libc::EPERM
            || code == libc::EOPNOTSUPP
    )
}

#[cfg(target_os = "linux")]
mod imp {
    use super::*;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use tokio::io::Interest;

    pub struct Pipe {
        read: OwnedFd,
        write: OwnedFd,
    }

    impl Pipe {
        pub fn new() -> io::Result<Self> {
            let mut fds = [0 as libc::c_int; 2];
            // SAFETY: fds has room for the two descriptors pipe2 writes
            let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: pipe2 succeeded, both descriptors are fresh and owned here
            let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
            Ok(Self { read, write })
        }

        /// Returns the capacity the kernel actually granted
        pub fn resize(&self, size: usize) -> io::Result<usize> {
            // SAFETY: plain fcntl on a descriptor we own
            let rc = unsafe {
                libc::fcntl(self.write.as_raw_fd(), libc::F_SETPIPE_SZ, size as libc::c_int)
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(rc as usize)
        }

        /// Pull whatever is buffered in the pipe into user space
        fn drain(&self) -> Vec<u8> {
            let mut out = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                // SAFETY: buf is valid for buf.len() bytes
                let n = unsafe {
                    libc::read(self.read.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
                };
                if n <= 0 {
                    return out;
                }
                out.extend_from_slice(&buf[..n as usize]);
            }
        }
    }

    fn splice_fd(fd_in: RawFd, fd_out: RawFd, len: usize) -> io::Result<usize> {
        // SAFETY: null offsets are valid for pipes and sockets
        let n = unsafe {
            libc::splice(
                fd_in,
                std::ptr::null_mut(),
                fd_out,
                std::ptr::null_mut(),
                len,
                libc::SPLICE_F_MOVE | libc::SPLICE_F_NONBLOCK,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    pub async fn copy(
        src: &TcpStream,
        dst: &TcpStream,
        flavor: SpliceFlavor,
    ) -> Result<u64, SpliceError> {
        let pipe = Pipe::new().map_err(|error| SpliceError::Refused {
            error,
            pending: Vec::new(),
        })?;
        let chunk = match flavor {
            SpliceFlavor::Large => pipe.resize(LARGE_PIPE_SIZE).unwrap_or(DEFAULT_PIPE_SIZE),
            SpliceFlavor::Default => DEFAULT_PIPE_SIZE,
        };

        let src_fd = src.as_raw_fd();
        let dst_fd = dst.as_raw_fd();
        let mut total: u64 = 0;

        loop {
            let n = loop {
                src.readable().await?;
                match src.try_io(Interest::READABLE, || {
                    splice_fd(src_fd, pipe.write.as_raw_fd(), chunk)
                }) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(error) if total == 0 && is_refusal(&error) => {
                        return Err(SpliceError::Refused {
                            error,
                            pending: Vec::new(),
                        })
                    }
                    Err(e) => return Err(SpliceError::Io(e)),
                }
            };
            if n == 0 {
                return Ok(total);
            }

            let mut pending = n;
            while pending > 0 {
                dst.writable().await?;
                match dst.try_io(Interest::WRITABLE, || {
                    splice_fd(pipe.read.as_raw_fd(), dst_fd, pending)
                }) {
                    Ok(0) => return Err(SpliceError::Io(io::ErrorKind::WriteZero.into())),
                    Ok(m) => pending -= m,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(error) if total == 0 && is_refusal(&error) => {
                        return Err(SpliceError::Refused {
                            error,
                            pending: pipe.drain(),
                        })
                    }
                    Err(e) => return Err(SpliceError::Io(e)),
                }
            }
            total += n as u64;
        }
    }

    pub fn pipe_supported() -> bool {
        Pipe::new().is_ok()
    }

    pub fn pipe_resize_supported() -> bool {
        Pipe::new()
            .and_then(|p| p.resize(LARGE_PIPE_SIZE))
            .is_ok()
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::*;

    pub async fn copy(
        _src: &TcpStream,
        _dst: &TcpStream,
        _flavor: SpliceFlavor,
    ) -> Result<u64, SpliceError> {
        Err(SpliceError::Refused {
            error: io::Error::new(io::ErrorKind::Unsupported, "splice is Linux only"),
            pending: Vec::new(),
        })
    }

    pub fn pipe_supported() -> bool {
        false
    }

    pub fn pipe_resize_supported() -> bool {
        false
    }
}

pub use imp::{copy, pipe_resize_supported, pipe_supported};
