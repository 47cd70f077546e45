//! # CD1.1 Frame Layout
//!
//! Every frame is `header | payload | trailer`, all fields big-endian:
//!
//! ```text
//! header (36 bytes)
//!   frame_type        i32
//!   trailer_offset    i32   byte offset of the trailer from the frame start
//!   frame_creator     8     null-padded ASCII
//!   frame_destination 8     null-padded ASCII
//!   sequence_number   u64
//!   series            i32
//! trailer (16 bytes minimum)
//!   auth_key_id       i32
//!   auth_size         i32   unpadded length of auth_value
//!   auth_value        auth_size rounded up to a multiple of 4
//!   comm_verification u64
//! ```
//!
//! Decoding is strict: the trailer offset must land inside the frame, the
//! payload must be consumed exactly, and nothing may follow the trailer.

use crate::checksum::embed_comm_verification;
use crate::error::{ProtocolError, ProtocolResult};
use crate::payload::Payload;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Encoded header size
pub const HEADER_SIZE: usize = 36;

/// Trailer size with an empty authentication value
pub const MIN_TRAILER_SIZE: usize = 16;

/// Width of the comm verification field at the end of the trailer
pub const COMM_VERIFICATION_SIZE: usize = 8;

/// Width of the creator and destination header fields
pub const FRAME_ENDPOINT_WIDTH: usize = 8;

/// Largest authentication value accepted
pub const MAX_AUTH_SIZE: usize = 64 * 1024;

/// Default upper bound for a single frame on the wire
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// CD1.1 frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum FrameType {
    ConnectionRequest = 1,
    ConnectionResponse = 2,
    OptionRequest = 3,
    OptionResponse = 4,
    Data = 5,
    Acknack = 6,
    Alert = 7,
    CommandRequest = 8,
    CommandResponse = 9,
    CdOneEncapsulation = 13,
}

impl FrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::ConnectionRequest => "CONNECTION_REQUEST",
            FrameType::ConnectionResponse => "CONNECTION_RESPONSE",
            FrameType::OptionRequest => "OPTION_REQUEST",
            FrameType::OptionResponse => "OPTION_RESPONSE",
            FrameType::Data => "DATA",
            FrameType::Acknack => "ACKNACK",
            FrameType::Alert => "ALERT",
            FrameType::CommandRequest => "COMMAND_REQUEST",
            FrameType::CommandResponse => "COMMAND_RESPONSE",
            FrameType::CdOneEncapsulation => "CD_ONE_ENCAPSULATION",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame header
///
/// `trailer_offset` reflects the decoded value; encoding always recomputes it
/// from the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub trailer_offset: i32,
    pub frame_creator: String,
    pub frame_destination: String,
    pub sequence_number: u64,
    pub series: i32,
}

impl FrameHeader {
    fn decode(buf: &mut &[u8]) -> ProtocolResult<Self> {
        ensure_remaining(buf, "frame header", HEADER_SIZE)?;

        let raw_type = buf.get_i32();
        let frame_type = FrameType::try_from(raw_type)
            .map_err(|_| ProtocolError::UnknownFrameType { frame_type: raw_type })?;
        let trailer_offset = buf.get_i32();
        let frame_creator = get_fixed_str(buf, "frame creator", FRAME_ENDPOINT_WIDTH)?;
        let frame_destination = get_fixed_str(buf, "frame destination", FRAME_ENDPOINT_WIDTH)?;
        let sequence_number = buf.get_u64();
        let series = buf.get_i32();

        Ok(Self {
            frame_type,
            trailer_offset,
            frame_creator,
            frame_destination,
            sequence_number,
            series,
        })
    }

    fn encode(&self, trailer_offset: i32, buf: &mut BytesMut) -> ProtocolResult<()> {
        buf.put_i32(self.frame_type.into());
        buf.put_i32(trailer_offset);
        put_fixed_str(buf, "frame creator", &self.frame_creator, FRAME_ENDPOINT_WIDTH)?;
        put_fixed_str(
            buf,
            "frame destination",
            &self.frame_destination,
            FRAME_ENDPOINT_WIDTH,
        )?;
        buf.put_u64(self.sequence_number);
        buf.put_i32(self.series);
        Ok(())
    }
}

/// Frame trailer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameTrailer {
    pub auth_key_id: i32,
    /// Unpadded authentication value
    pub auth_value: Vec<u8>,
    pub comm_verification: u64,
}

impl FrameTrailer {
    fn decode(buf: &mut &[u8]) -> ProtocolResult<Self> {
        ensure_remaining(buf, "frame trailer", MIN_TRAILER_SIZE)?;

        let auth_key_id = buf.get_i32();
        let auth_size = buf.get_i32();
        if auth_size < 0 || auth_size as usize > MAX_AUTH_SIZE {
            return Err(ProtocolError::InvalidAuthSize {
                size: i64::from(auth_size),
                limit: MAX_AUTH_SIZE,
            });
        }

        let auth_size = auth_size as usize;
        let padded = padded_len(auth_size);
        ensure_remaining(buf, "authentication value", padded + COMM_VERIFICATION_SIZE)?;
        let auth_value = buf[..auth_size].to_vec();
        buf.advance(padded);
        let comm_verification = buf.get_u64();

        Ok(Self {
            auth_key_id,
            auth_value,
            comm_verification,
        })
    }

    fn encoded_len(&self) -> usize {
        MIN_TRAILER_SIZE + padded_len(self.auth_value.len())
    }

    fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        if self.auth_value.len() > MAX_AUTH_SIZE {
            return Err(ProtocolError::InvalidAuthSize {
                size: self.auth_value.len() as i64,
                limit: MAX_AUTH_SIZE,
            });
        }

        buf.put_i32(self.auth_key_id);
        buf.put_i32(self.auth_value.len() as i32);
        buf.put_slice(&self.auth_value);
        buf.put_bytes(0, padded_len(self.auth_value.len()) - self.auth_value.len());
        // Filled in once the whole frame is laid out
        buf.put_u64(0);
        Ok(())
    }
}

/// A complete CD1.1 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Payload,
    pub trailer: FrameTrailer,
}

impl Frame {
    /// Build a frame around a payload with an empty authentication trailer
    pub fn new(
        creator: impl Into<String>,
        destination: impl Into<String>,
        sequence_number: u64,
        payload: Payload,
    ) -> Self {
        Self {
            header: FrameHeader {
                frame_type: payload.frame_type(),
                trailer_offset: 0,
                frame_creator: creator.into(),
                frame_destination: destination.into(),
                sequence_number,
                series: 0,
            },
            payload,
            trailer: FrameTrailer::default(),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    /// Decode one complete frame, rejecting anything not exactly frame-shaped
    pub fn decode(data: &[u8]) -> ProtocolResult<Self> {
        let min = HEADER_SIZE + MIN_TRAILER_SIZE;
        if data.len() < min {
            return Err(ProtocolError::frame_too_small(min, data.len(), "CD1.1 frame"));
        }

        let mut buf = data;
        let header = FrameHeader::decode(&mut buf)?;

        let max_offset = data.len() - MIN_TRAILER_SIZE;
        let offset = i64::from(header.trailer_offset);
        if offset < HEADER_SIZE as i64 || offset > max_offset as i64 {
            return Err(ProtocolError::invalid_trailer_offset(
                offset,
                HEADER_SIZE,
                max_offset,
            ));
        }

        let offset = offset as usize;
        let payload = Payload::decode(header.frame_type, &data[HEADER_SIZE..offset])?;

        let mut trailer_buf = &data[offset..];
        let trailer = FrameTrailer::decode(&mut trailer_buf)?;
        if trailer_buf.has_remaining() {
            return Err(ProtocolError::TrailingBytes {
                context: "frame trailer",
                extra: trailer_buf.remaining(),
            });
        }

        Ok(Self {
            header,
            payload,
            trailer,
        })
    }

    /// Encode with a freshly computed trailer offset and comm verification
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        if self.payload.frame_type() != self.header.frame_type {
            return Err(ProtocolError::UnexpectedPayload {
                expected: self.header.frame_type,
                got: self.payload.frame_type(),
            });
        }

        let mut payload = BytesMut::new();
        self.payload.encode(&mut payload)?;

        let trailer_offset = HEADER_SIZE + payload.len();
        let total = trailer_offset + self.trailer.encoded_len();
        if total > DEFAULT_MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: DEFAULT_MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        self.header.encode(trailer_offset as i32, &mut buf)?;
        buf.put_slice(&payload);
        self.trailer.encode(&mut buf)?;
        embed_comm_verification(&mut buf);

        Ok(buf.freeze())
    }
}

/// Round a length up to the next multiple of 4
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(4) * 4
}

pub(crate) fn ensure_remaining(buf: &[u8], field: &'static str, need: usize) -> ProtocolResult<()> {
    if buf.len() < need {
        return Err(ProtocolError::truncated(field, need, buf.len()));
    }
    Ok(())
}

/// Read a null-padded fixed-width string field
pub(crate) fn get_fixed_str(
    buf: &mut &[u8],
    field: &'static str,
    width: usize,
) -> ProtocolResult<String> {
    ensure_remaining(buf, field, width)?;
    let value = fixed_str(&buf[..width]);
    buf.advance(width);
    Ok(value)
}

/// Decode a fixed-width field, ignoring embedded nulls and surrounding spaces
pub fn fixed_str(raw: &[u8]) -> String {
    let text: Vec<u8> = raw.iter().copied().filter(|b| *b != 0).collect();
    String::from_utf8_lossy(&text).trim().to_string()
}

/// Write a string into a fixed-width field, null-padding the remainder
pub(crate) fn put_fixed_str(
    buf: &mut BytesMut,
    field: &'static str,
    value: &str,
    width: usize,
) -> ProtocolResult<()> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(ProtocolError::FieldTooLong {
            field,
            len: bytes.len(),
            width,
        });
    }
    buf.put_slice(bytes);
    buf.put_bytes(0, width - bytes.len());
    Ok(())
}
