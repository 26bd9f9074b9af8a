//! Cubeland wire framing — the fixed header every packet starts with.
//!
//! These types ARE the protocol. A frame is an 8-byte header followed by the
//! payload, zero-padded to a 4-byte boundary. The header length field counts
//! 4-byte words, not bytes, and both 16-bit fields are big-endian on the
//! wire. Changing anything here is a breaking protocol change.

use bytes::{Buf, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest payload a frame can carry.
///
/// The header stores the padded length as a 16-bit count of 4-byte words,
/// so the hard ceiling is 65535 words. The protocol's nominal limit is
/// 256 KiB; this is the largest value actually encodable.
pub const MAX_PAYLOAD: usize = 0xFFFF * 4;

/// On-wire layout of the frame header. Big-endian 16-bit fields.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
struct RawHeader {
    /// Protocol endpoint (see [`crate::proto::endpoint`]).
    endpoint: u8,
    /// Message type within the endpoint's sub-type space.
    kind: u8,
    /// Request/response correlator. 0 = unsolicited.
    tag: U16<BigEndian>,
    /// Payload length in 4-byte words (padded).
    words: U16<BigEndian>,
    /// Reserved, must be zero.
    reserved: [u8; 2],
}

// Compile-time size guard. If this fails, the wire format silently changed.
assert_eq_size!(RawHeader, [u8; 8]);

/// Decoded frame header, host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub endpoint: u8,
    pub kind: u8,
    pub tag: u16,
    /// Padded payload length in 4-byte words.
    pub words: u16,
}

impl FrameHeader {
    /// Padded payload length in bytes.
    pub fn payload_len(&self) -> usize {
        self.words as usize * 4
    }
}

/// A complete frame: decoded header plus the padded payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    /// Payload including zero padding up to the 4-byte boundary.
    pub payload: Bytes,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the connection in the middle of a frame.
    #[error("connection closed mid-frame")]
    ShortRead,

    #[error("payload of {0} bytes exceeds maximum {MAX_PAYLOAD}")]
    OversizePayload(usize),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Number of 4-byte words needed to hold `len` bytes.
fn words_for(len: usize) -> usize {
    (len + 3) / 4
}

/// Encode a complete frame into a single contiguous buffer.
///
/// The payload is copied and zero-padded to a 4-byte boundary so the whole
/// frame can be handed to the transport as one write.
pub fn encode_frame(
    endpoint: u8,
    kind: u8,
    tag: u16,
    payload: &[u8],
) -> Result<Bytes, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::OversizePayload(payload.len()));
    }

    let words = words_for(payload.len());
    let header = RawHeader {
        endpoint,
        kind,
        tag: U16::new(tag),
        words: U16::new(words as u16),
        reserved: [0; 2],
    };

    let mut buf = BytesMut::with_capacity(HEADER_LEN + words * 4);
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(payload);
    buf.resize(HEADER_LEN + words * 4, 0);
    Ok(buf.freeze())
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Incremental frame decoder for a buffered byte stream.
///
/// Feed bytes into a [`BytesMut`] as they arrive and call [`decode`] until it
/// returns `None`; partial frames stay in the buffer untouched. This keeps
/// frame reassembly independent of read sizes, so the read loop can use any
/// cancellation-safe read primitive.
///
/// [`decode`]: FrameDecoder::decode
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    /// Reject frames whose reserved header bytes are non-zero.
    pub strict: bool,
}

impl FrameDecoder {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Try to pull one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` if the buffer does not yet hold a full frame.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = self.parse_header(&buf[..HEADER_LEN])?;
        let total = HEADER_LEN + header.payload_len();
        if buf.len() < total {
            // Make sure the next read can complete the frame in one go.
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let payload = buf.split_to(header.payload_len()).freeze();
        Ok(Some(Frame { header, payload }))
    }

    fn parse_header(&self, bytes: &[u8]) -> Result<FrameHeader, FrameError> {
        let raw = RawHeader::read_from(bytes)
            .ok_or(FrameError::Malformed("header size mismatch"))?;

        if self.strict && raw.reserved != [0; 2] {
            return Err(FrameError::Malformed("reserved header bytes set"));
        }

        Ok(FrameHeader {
            endpoint: raw.endpoint,
            kind: raw.kind,
            tag: raw.tag.get(),
            words: raw.words.get(),
        })
    }
}

// ── Blocking-style frame I/O ──────────────────────────────────────────────────

/// Read exactly one frame from an async stream.
///
/// Used by clients and tests; the server's session loop uses [`FrameDecoder`]
/// so reads stay cancellation-safe inside `select!`.
pub async fn read_frame<R>(stream: &mut R, strict: bool) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut head)
        .await
        .map_err(eof_as_short_read)?;

    let header = FrameDecoder::new(strict).parse_header(&head)?;

    let mut payload = vec![0u8; header.payload_len()];
    if !payload.is_empty() {
        stream
            .read_exact(&mut payload)
            .await
            .map_err(eof_as_short_read)?;
    }

    Ok(Frame {
        header,
        payload: Bytes::from(payload),
    })
}

/// Encode and write one frame as a single contiguous write.
pub async fn write_frame<W>(
    stream: &mut W,
    endpoint: u8,
    kind: u8,
    tag: u16,
    payload: &[u8],
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(endpoint, kind, tag, payload)?;
    stream.write_all(&frame).await?;
    Ok(())
}

fn eof_as_short_read(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ShortRead
    } else {
        FrameError::Io(e)
    }
}

// ── Tag allocation ────────────────────────────────────────────────────────────

/// Per-session 16-bit tag counter.
///
/// Tags correlate responses to requests; zero means "unsolicited" and is
/// never handed out, so the counter skips it on wrap.
#[derive(Debug)]
pub struct TagAllocator {
    next: AtomicU16,
}

impl TagAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU16::new(1),
        }
    }

    pub fn allocate(&self) -> u16 {
        loop {
            let tag = self.next.fetch_add(1, Ordering::Relaxed);
            if tag != 0 {
                return tag;
            }
        }
    }
}

impl Default for TagAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
