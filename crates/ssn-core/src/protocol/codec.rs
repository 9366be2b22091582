//! Async framing over a byte stream.
//!
//! Writes go out in chunks of at most [`WRITE_CHUNK_SIZE`] bytes. Every
//! underlying read or write is bounded by its own deadline; callers running
//! multi-round exchanges get a fresh deadline per call.

use super::packet::{encode, PacketHeader, HEADER_SIZE};
use super::types::PacketType;
use crate::error::{Error, Result};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Maximum bytes per underlying write call.
pub const WRITE_CHUNK_SIZE: usize = 1024;

/// Default per-call read/write deadline.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Payload ceiling for frames read by the server side.
pub const INBOUND_PAYLOAD_LIMIT: u32 = 4096;

/// Payload ceiling for frames read by the client during a PULL.
pub const PULL_PAYLOAD_LIMIT: u32 = 16 * 1024 * 1024;

/// Initial receive buffer for the PULL reader.
pub const PULL_INITIAL_BUFFER: usize = 64 * 1024;

fn io_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Transport("connection closed".into()),
        _ => Error::Transport(e.to_string()),
    }
}

/// Write already-encoded bytes in bounded chunks.
///
/// Bytes already on the wire when an error occurs stay sent; the caller only
/// learns that the write as a whole failed.
pub async fn write_framed<W>(stream: &mut W, bytes: &[u8], deadline: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for chunk in bytes.chunks(WRITE_CHUNK_SIZE) {
        timeout(deadline, stream.write_all(chunk))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(io_error)?;
    }
    timeout(deadline, stream.flush())
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(io_error)
}

/// Encode and write one packet.
pub async fn write_packet<W>(
    stream: &mut W,
    packet_type: PacketType,
    payload: &[u8],
    deadline: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(packet_type, payload)?;
    write_framed(stream, &bytes, deadline).await
}

/// Read exactly one header.
pub async fn read_header<R>(stream: &mut R, deadline: Duration) -> Result<PacketHeader>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_SIZE];
    timeout(deadline, stream.read_exact(&mut buf))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(io_error)?;
    PacketHeader::from_bytes(&buf)
}

/// Fill `buf` completely from the stream.
pub async fn read_payload<R>(stream: &mut R, buf: &mut [u8], deadline: Duration) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    timeout(deadline, stream.read_exact(buf))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(io_error)?;
    Ok(())
}

/// A frame borrowed from a [`FrameReader`]'s buffer.
#[derive(Debug)]
pub struct Frame<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u8],
}

impl Frame<'_> {
    /// Packet type for dispatch.
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type()
    }
}

/// Reads frames into a reusable buffer under a payload ceiling.
///
/// The buffer starts at the requested size and is grown on demand, never
/// past the ceiling.
#[derive(Debug)]
pub struct FrameReader {
    buf: Vec<u8>,
    limit: u32,
    deadline: Duration,
}

impl FrameReader {
    /// Create a reader with an initial buffer size and a payload ceiling.
    pub fn new(initial: usize, limit: u32, deadline: Duration) -> Self {
        Self {
            buf: vec![0u8; initial.min(limit as usize)],
            limit,
            deadline,
        }
    }

    /// Fixed-size reader for the server side.
    pub fn inbound(limit: u32, deadline: Duration) -> Self {
        Self::new(limit as usize, limit, deadline)
    }

    /// Growable reader for PULL replies.
    pub fn pull(limit: u32, deadline: Duration) -> Self {
        Self::new(PULL_INITIAL_BUFFER, limit, deadline)
    }

    /// Read the next frame.
    ///
    /// A header announcing more than the ceiling fails before any payload
    /// byte is consumed.
    pub async fn read_frame<R>(&mut self, stream: &mut R) -> Result<Frame<'_>>
    where
        R: AsyncRead + Unpin,
    {
        let header = read_header(stream, self.deadline).await?;
        if header.length > self.limit {
            return Err(Error::ResourceLimitExceeded {
                length: header.length,
                limit: self.limit,
            });
        }

        let len = header.length as usize;
        if self.buf.len() < len {
            let grown = len.max(self.buf.len().saturating_mul(2)).min(self.limit as usize);
            self.buf.resize(grown, 0);
        }

        read_payload(stream, &mut self.buf[..len], self.deadline).await?;
        Ok(Frame {
            header,
            payload: &self.buf[..len],
        })
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const T: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_write_then_read_frame() {
        let (mut a, mut b) = duplex(64 * 1024);
        write_packet(&mut a, PacketType::Pull, b"1234", T).await.expect("write");

        let mut reader = FrameReader::inbound(INBOUND_PAYLOAD_LIMIT, T);
        let frame = reader.read_frame(&mut b).await.expect("read");
        assert_eq!(frame.packet_type(), PacketType::Pull);
        assert_eq!(frame.payload, b"1234");
    }

    #[tokio::test]
    async fn test_large_write_is_chunked_and_complete() {
        let (mut a, mut b) = duplex(512);
        let payload = vec![7u8; 10 * WRITE_CHUNK_SIZE + 3];
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            write_packet(&mut a, PacketType::PushPost, &payload, T).await
        });

        let mut reader = FrameReader::pull(PULL_PAYLOAD_LIMIT, T);
        let frame = reader.read_frame(&mut b).await.expect("read");
        assert_eq!(frame.payload, expected.as_slice());
        writer.await.expect("join").expect("write");
    }

    #[tokio::test]
    async fn test_oversize_header_rejected_before_payload() {
        let (mut a, mut b) = duplex(1024);
        let header = PacketHeader::new(PacketType::Auth, INBOUND_PAYLOAD_LIMIT + 1);
        write_framed(&mut a, &header.to_bytes(), T).await.expect("write");

        let mut reader = FrameReader::inbound(INBOUND_PAYLOAD_LIMIT, T);
        let err = reader.read_frame(&mut b).await.expect_err("must fail");
        assert!(matches!(
            err,
            Error::ResourceLimitExceeded { length: 4097, limit: 4096 }
        ));
    }

    #[tokio::test]
    async fn test_pull_reader_grows_to_fit() {
        let (mut a, mut b) = duplex(256 * 1024);
        let payload = vec![1u8; PULL_INITIAL_BUFFER + 10];
        let writer = tokio::spawn(async move {
            write_packet(&mut a, PacketType::PushPost, &payload, T).await
        });

        let mut reader = FrameReader::pull(PULL_PAYLOAD_LIMIT, T);
        assert_eq!(reader.capacity(), PULL_INITIAL_BUFFER);
        let len = reader.read_frame(&mut b).await.expect("read").payload.len();
        assert_eq!(len, PULL_INITIAL_BUFFER + 10);
        assert!(reader.capacity() >= PULL_INITIAL_BUFFER + 10);
        assert!(reader.capacity() <= PULL_PAYLOAD_LIMIT as usize);
        writer.await.expect("join").expect("write");
    }

    #[tokio::test]
    async fn test_short_read_is_transport_error() {
        let (mut a, mut b) = duplex(64);
        write_framed(&mut a, &[b'S', 0, 0], T).await.expect("write");
        drop(a);
        let err = read_header(&mut b, T).await.expect_err("must fail");
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let (_a, mut b) = duplex(64);
        let err = read_header(&mut b, Duration::from_millis(50))
            .await
            .expect_err("must time out");
        assert!(matches!(err, Error::Timeout));
    }
}
