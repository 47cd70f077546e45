//! # Frame Stream I/O
//!
//! [`FrameReader`] delimits frames on any `AsyncRead` using only the header's
//! trailer offset and the trailer's authentication size. It does no structural
//! validation beyond what is needed to find the next frame boundary; that
//! CPU-bound step is [`FrameUnit::from_raw`], which callers may run off the
//! I/O task.

use crate::error::ProtocolError;
use crate::frame::{
    fixed_str, padded_len, Frame, COMM_VERIFICATION_SIZE, DEFAULT_MAX_FRAME_SIZE,
    FRAME_ENDPOINT_WIDTH, HEADER_SIZE, MAX_AUTH_SIZE, MIN_TRAILER_SIZE,
};
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Bytes of one frame as delimited on the wire
#[derive(Debug, Clone)]
pub enum RawFrame {
    /// A fully delimited frame
    Complete(Bytes),
    /// Bytes whose framing fields were unusable; they have been consumed
    Unframeable { bytes: Bytes, cause: ProtocolError },
}

impl RawFrame {
    pub fn bytes(&self) -> &Bytes {
        match self {
            RawFrame::Complete(bytes) => bytes,
            RawFrame::Unframeable { bytes, .. } => bytes,
        }
    }
}

/// A frame that could not be decoded
#[derive(Debug, Clone)]
pub struct MalformedFrame {
    /// Creator named in the header, when the header got that far
    pub station: Option<String>,
    pub cause: ProtocolError,
    pub raw: Bytes,
}

/// Outcome of decoding one raw frame
#[derive(Debug, Clone)]
pub enum FrameUnit {
    Parsed { frame: Frame, raw: Bytes },
    Malformed(MalformedFrame),
}

impl FrameUnit {
    pub fn from_raw(raw: RawFrame) -> Self {
        match raw {
            RawFrame::Complete(bytes) => match Frame::decode(&bytes) {
                Ok(frame) => FrameUnit::Parsed { frame, raw: bytes },
                Err(cause) => FrameUnit::Malformed(MalformedFrame {
                    station: header_creator(&bytes),
                    cause,
                    raw: bytes,
                }),
            },
            RawFrame::Unframeable { bytes, cause } => FrameUnit::Malformed(MalformedFrame {
                station: header_creator(&bytes),
                cause,
                raw: bytes,
            }),
        }
    }
}

fn header_creator(bytes: &[u8]) -> Option<String> {
    let field = bytes.get(8..8 + FRAME_ENDPOINT_WIDTH)?;
    let name = fixed_str(field);
    (!name.is_empty()).then_some(name)
}

/// Reads length-delimited CD1.1 frames from an async byte stream
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_frame_size(inner, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size: max_frame_size.max(HEADER_SIZE + MIN_TRAILER_SIZE),
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary. A
    /// stream that ends partway through a frame is `UnexpectedEof`.
    pub async fn read_frame(&mut self) -> io::Result<Option<RawFrame>> {
        let mut buf = BytesMut::zeroed(HEADER_SIZE);
        let mut filled = 0;
        while filled < HEADER_SIZE {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream closed after {filled} of {HEADER_SIZE} header bytes"),
                ));
            }
            filled += n;
        }

        let trailer_offset = i64::from((&buf[4..8]).get_i32());
        let max_offset = self.max_frame_size - MIN_TRAILER_SIZE;
        if trailer_offset < HEADER_SIZE as i64 || trailer_offset > max_offset as i64 {
            debug!(trailer_offset, "Unusable trailer offset in frame header");
            return Ok(Some(RawFrame::Unframeable {
                cause: ProtocolError::invalid_trailer_offset(
                    trailer_offset,
                    HEADER_SIZE,
                    max_offset,
                ),
                bytes: buf.freeze(),
            }));
        }

        // Payload plus the fixed auth key id and auth size fields
        let offset = trailer_offset as usize;
        self.read_more(&mut buf, offset - HEADER_SIZE + 8).await?;

        let auth_size = i64::from((&buf[offset + 4..offset + 8]).get_i32());
        let limit = MAX_AUTH_SIZE.min(self.max_frame_size - offset - MIN_TRAILER_SIZE);
        if auth_size < 0 || auth_size > limit as i64 {
            debug!(auth_size, "Unusable authentication size in frame trailer");
            return Ok(Some(RawFrame::Unframeable {
                cause: ProtocolError::InvalidAuthSize {
                    size: auth_size,
                    limit,
                },
                bytes: buf.freeze(),
            }));
        }

        self.read_more(&mut buf, padded_len(auth_size as usize) + COMM_VERIFICATION_SIZE)
            .await?;
        Ok(Some(RawFrame::Complete(buf.freeze())))
    }

    async fn read_more(&mut self, buf: &mut BytesMut, n: usize) -> io::Result<()> {
        let start = buf.len();
        buf.resize(start + n, 0);
        self.inner.read_exact(&mut buf[start..]).await?;
        Ok(())
    }
}

/// Encode a frame and write it to the stream in full
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    let bytes = frame
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameType;
    use crate::payload::{Alert, Payload};

    fn encoded_alert(creator: &str, message: &str) -> Bytes {
        Frame::new(creator, "0", 1, Payload::Alert(Alert::new(message)))
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let first = encoded_alert("AAA", "one");
        let second = encoded_alert("BBB", "second message");
        let mut wire = first.to_vec();
        wire.extend_from_slice(&second);

        let mut reader = FrameReader::new(&wire[..]);
        let a = reader.read_frame().await.unwrap().unwrap();
        let b = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(a.bytes(), &first);
        assert_eq!(b.bytes(), &second);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let frame = encoded_alert("AAA", "one");
        let mut reader = FrameReader::new(&frame[..frame.len() - 3]);
        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut reader = FrameReader::new(&frame[..10]);
        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_bad_trailer_offset_consumes_header() {
        let mut frame = encoded_alert("XYZ", "one").to_vec();
        frame[4..8].copy_from_slice(&(-1i32).to_be_bytes());

        let mut reader = FrameReader::new(&frame[..]);
        let raw = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(raw.bytes().len(), HEADER_SIZE);

        let FrameUnit::Malformed(malformed) = FrameUnit::from_raw(raw) else {
            panic!("expected malformed unit");
        };
        assert_eq!(malformed.station.as_deref(), Some("XYZ"));
        assert!(malformed.cause.is_framing_error());
    }

    #[tokio::test]
    async fn test_unknown_type_is_malformed_but_delimited() {
        let mut frame = encoded_alert("XYZ", "one").to_vec();
        frame[0..4].copy_from_slice(&42i32.to_be_bytes());
        let len = frame.len();

        let mut reader = FrameReader::new(&frame[..]);
        let raw = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(raw.bytes().len(), len);

        let FrameUnit::Malformed(malformed) = FrameUnit::from_raw(raw) else {
            panic!("expected malformed unit");
        };
        assert_eq!(
            malformed.cause,
            ProtocolError::UnknownFrameType { frame_type: 42 }
        );
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_frame_then_parse() {
        let frame = Frame::new("ABC", "0", 3, Payload::Alert(Alert::new("hi")));
        let (mut client, server) = tokio::io::duplex(1024);
        write_frame(&mut client, &frame).await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server);
        let raw = reader.read_frame().await.unwrap().unwrap();
        match FrameUnit::from_raw(raw) {
            FrameUnit::Parsed { frame: parsed, .. } => {
                assert_eq!(parsed.frame_type(), FrameType::Alert);
                assert_eq!(parsed.payload, frame.payload);
            }
            FrameUnit::Malformed(m) => panic!("unexpected malformed frame: {}", m.cause),
        }
        assert!(reader.read_frame().await.unwrap().is_none());
    }
}
