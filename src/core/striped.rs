//! Striped relay used by the `multiple` flow.
//!
//! One direction is split into a reader stage and a writer stage. The
//! reader cuts the stream into chunks at whatever size each read returns,
//! tags them with a sequence number and deals them round-robin onto
//! `lanes` bounded channels, so up to `lanes` chunks are in flight while the
//! writer is still flushing. The writer drains lanes in sequence order and
//! checks every tag, so the delivered stream is byte-identical to a plain
//! copy.
//!
//! Everything stays on the one backend connection. Each chunk is read
//! straight into its own buffer and handed to the writer without copying.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::relay::write_all;

/// Accepted lane counts
pub const MIN_LANES: usize = 2;
pub const MAX_LANES: usize = 64;

#[derive(Debug)]
struct Chunk {
    seq: u64,
    data: Bytes,
}

/// Read whatever is available into the spare capacity of `buf`
async fn read_into(src: &TcpStream, buf: &mut BytesMut) -> io::Result<usize> {
    loop {
        src.readable().await?;
        match src.try_read_buf(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Relay `src` into `dst` through `lanes` in-flight buffers
pub async fn copy(src: &TcpStream, dst: &TcpStream, lanes: usize, buffer_size: usize) -> io::Result<u64> {
    let lanes = lanes.clamp(MIN_LANES, MAX_LANES);
    let (senders, mut receivers): (Vec<_>, Vec<_>) =
        (0..lanes).map(|_| mpsc::channel::<Chunk>(1)).unzip();

    let reader = async move {
        let mut buf = BytesMut::with_capacity(buffer_size);
        let mut seq: u64 = 0;
        loop {
            buf.reserve(buffer_size);
            let n = read_into(src, &mut buf).await?;
            if n == 0 {
                // Dropping the senders tells the writer the stream ended
                return Ok::<_, io::Error>(());
            }
            let chunk = Chunk {
                seq,
                data: buf.split().freeze(),
            };
            let lane = (seq % lanes as u64) as usize;
            if senders[lane].send(chunk).await.is_err() {
                // Writer is gone; its error is reported from its side
                return Ok(());
            }
            seq += 1;
        }
    };

    let writer = async move {
        let mut next: u64 = 0;
        let mut total: u64 = 0;
        loop {
            let lane = (next % lanes as u64) as usize;
            let Some(chunk) = receivers[lane].recv().await else {
                return Ok::<_, io::Error>(total);
            };
            if chunk.seq != next {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("chunk {} arrived on lane {} while expecting {}", chunk.seq, lane, next),
                ));
            }
            write_all(dst, &chunk.data).await?;
            total += chunk.data.len() as u64;
            next += 1;
        }
    };

    let ((), total) = tokio::try_join!(reader, writer)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn pair(listener: &TcpListener) -> (TcpStream, TcpStream) {
        let addr = listener.local_addr().unwrap();
        let a = TcpStream::connect(addr).await.unwrap();
        let (b, _) = listener.accept().await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_chunks_own_their_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut out, src) = pair(&listener).await;
        let mut buf = BytesMut::with_capacity(64);

        out.write_all(b"first").await.unwrap();
        let n = read_into(&src, &mut buf).await.unwrap();
        let first: Bytes = buf.split().freeze();
        assert_eq!(n, 5);

        out.write_all(b"second").await.unwrap();
        buf.reserve(64);
        read_into(&src, &mut buf).await.unwrap();
        let second = buf.split().freeze();

        // Reusing the read buffer leaves handed-off chunks untouched
        assert_eq!(&first[..], b"first");
        assert_eq!(&second[..], b"second");
    }

    #[tokio::test]
    async fn test_striped_copy_preserves_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (mut src_out, src_in) = pair(&listener).await;
        let (dst_in, mut dst_out) = pair(&listener).await;

        let payload: Vec<u8> = (0..500_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            // Uneven writes so chunk boundaries vary
            for part in payload.chunks(1337) {
                src_out.write_all(part).await.unwrap();
            }
            src_out.shutdown().await.unwrap();
        });

        let collector = tokio::spawn(async move {
            let mut received = Vec::new();
            dst_out.read_to_end(&mut received).await.unwrap();
            received
        });

        // Small buffer forces many chunks across all lanes
        let moved = copy(&src_in, &dst_in, 4, 512).await.unwrap();
        writer.await.unwrap();
        drop(dst_in);

        let received = collector.await.unwrap();
        assert_eq!(moved, expected.len() as u64);
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_striped_copy_empty_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (src_out, src_in) = pair(&listener).await;
        let (dst_in, _dst_out) = pair(&listener).await;
        drop(src_out);

        assert_eq!(copy(&src_in, &dst_in, 3, 1024).await.unwrap(), 0);
    }
}
