//! Frame payloads handled by the station receiver
//!
//! Connection exchanges (request and response share one layout), acknacks and
//! alerts are decoded into typed structures. Every other frame type is carried
//! through as opaque bytes.

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{ensure_remaining, get_fixed_str, padded_len, put_fixed_str, FrameType};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;

/// Encoded connection exchange size
pub const CONNECTION_EXCHANGE_SIZE: usize = 32;

/// Width of the acknack frame set name
pub const FRAME_SET_WIDTH: usize = 20;

/// Acknack size with no gaps
pub const ACKNACK_MIN_SIZE: usize = FRAME_SET_WIDTH + 8 + 8 + 4;

/// Payload of CONNECTION_REQUEST and CONNECTION_RESPONSE frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionExchange {
    pub major_version: u16,
    pub minor_version: u16,
    pub station_or_responder_name: String,
    pub station_or_responder_type: String,
    pub service_type: String,
    pub ip_address: Ipv4Addr,
    pub port: u16,
    pub second_ip_address: Ipv4Addr,
    pub second_port: u16,
}

impl ConnectionExchange {
    pub fn decode(buf: &mut &[u8]) -> ProtocolResult<Self> {
        ensure_remaining(buf, "connection exchange", CONNECTION_EXCHANGE_SIZE)?;

        let major_version = buf.get_u16();
        let minor_version = buf.get_u16();
        let station_or_responder_name = get_fixed_str(buf, "station or responder name", 8)?;
        let station_or_responder_type = get_fixed_str(buf, "station or responder type", 4)?;
        let service_type = get_fixed_str(buf, "service type", 4)?;
        let ip_address = Ipv4Addr::from(buf.get_u32());
        let port = buf.get_u16();
        let second_ip_address = Ipv4Addr::from(buf.get_u32());
        let second_port = buf.get_u16();

        Ok(Self {
            major_version,
            minor_version,
            station_or_responder_name,
            station_or_responder_type,
            service_type,
            ip_address,
            port,
            second_ip_address,
            second_port,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        buf.put_u16(self.major_version);
        buf.put_u16(self.minor_version);
        put_fixed_str(
            buf,
            "station or responder name",
            &self.station_or_responder_name,
            8,
        )?;
        put_fixed_str(
            buf,
            "station or responder type",
            &self.station_or_responder_type,
            4,
        )?;
        put_fixed_str(buf, "service type", &self.service_type, 4)?;
        buf.put_u32(u32::from(self.ip_address));
        buf.put_u16(self.port);
        buf.put_u32(u32::from(self.second_ip_address));
        buf.put_u16(self.second_port);
        Ok(())
    }
}

/// Acknowledgment of received frames with the outstanding gaps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknack {
    pub frame_set_acked: String,
    pub lowest_seq_num: u64,
    pub highest_seq_num: u64,
    /// Flattened `[start, end)` pairs, end exclusive
    pub gaps: Vec<u64>,
}

impl Acknack {
    pub fn new(
        frame_set_acked: impl Into<String>,
        lowest_seq_num: u64,
        highest_seq_num: u64,
        gaps: Vec<u64>,
    ) -> Self {
        Self {
            frame_set_acked: frame_set_acked.into(),
            lowest_seq_num,
            highest_seq_num,
            gaps,
        }
    }

    pub fn gap_count(&self) -> usize {
        self.gaps.len() / 2
    }

    /// Gaps as `(start, end)` pairs
    pub fn gap_ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.gaps.chunks_exact(2).map(|pair| (pair[0], pair[1]))
    }

    pub fn decode(buf: &mut &[u8]) -> ProtocolResult<Self> {
        ensure_remaining(buf, "acknack", ACKNACK_MIN_SIZE)?;

        let frame_set_acked = get_fixed_str(buf, "frame set acked", FRAME_SET_WIDTH)?;
        let lowest_seq_num = buf.get_u64();
        let highest_seq_num = buf.get_u64();
        let gap_count = buf.get_i32();
        if gap_count < 0 {
            return Err(ProtocolError::InvalidGapCount {
                count: i64::from(gap_count),
            });
        }

        let need = (gap_count as usize)
            .checked_mul(16)
            .ok_or(ProtocolError::InvalidGapCount {
                count: i64::from(gap_count),
            })?;
        ensure_remaining(buf, "acknack gaps", need)?;
        let gaps = (0..gap_count as usize * 2).map(|_| buf.get_u64()).collect();

        Ok(Self {
            frame_set_acked,
            lowest_seq_num,
            highest_seq_num,
            gaps,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        if self.gaps.len() % 2 != 0 {
            return Err(ProtocolError::OddGapArray {
                len: self.gaps.len(),
            });
        }
        let gap_count = i32::try_from(self.gap_count()).map_err(|_| {
            ProtocolError::InvalidGapCount {
                count: self.gap_count() as i64,
            }
        })?;

        put_fixed_str(buf, "frame set acked", &self.frame_set_acked, FRAME_SET_WIDTH)?;
        buf.put_u64(self.lowest_seq_num);
        buf.put_u64(self.highest_seq_num);
        buf.put_i32(gap_count);
        for value in &self.gaps {
            buf.put_u64(*value);
        }
        Ok(())
    }
}

/// Alert message, usually announcing an imminent disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub message: String,
}

impl Alert {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn decode(buf: &mut &[u8]) -> ProtocolResult<Self> {
        ensure_remaining(buf, "alert size", 4)?;
        let size = buf.get_i32();
        if size < 0 {
            return Err(ProtocolError::truncated("alert message", 0, buf.len()));
        }

        let padded = padded_len(size as usize);
        ensure_remaining(buf, "alert message", padded)?;
        let message = get_fixed_str(buf, "alert message", padded)?;
        Ok(Self { message })
    }

    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        let len = self.message.len();
        buf.put_i32(len as i32);
        put_fixed_str(buf, "alert message", &self.message, padded_len(len))
    }
}

/// Decoded frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    ConnectionRequest(ConnectionExchange),
    ConnectionResponse(ConnectionExchange),
    Acknack(Acknack),
    Alert(Alert),
    Opaque { frame_type: FrameType, bytes: Bytes },
}

impl Payload {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Payload::ConnectionRequest(_) => FrameType::ConnectionRequest,
            Payload::ConnectionResponse(_) => FrameType::ConnectionResponse,
            Payload::Acknack(_) => FrameType::Acknack,
            Payload::Alert(_) => FrameType::Alert,
            Payload::Opaque { frame_type, .. } => *frame_type,
        }
    }

    /// Decode a payload region, which must be consumed exactly
    pub fn decode(frame_type: FrameType, data: &[u8]) -> ProtocolResult<Self> {
        let mut buf = data;
        let payload = match frame_type {
            FrameType::ConnectionRequest => {
                Payload::ConnectionRequest(ConnectionExchange::decode(&mut buf)?)
            }
            FrameType::ConnectionResponse => {
                Payload::ConnectionResponse(ConnectionExchange::decode(&mut buf)?)
            }
            FrameType::Acknack => Payload::Acknack(Acknack::decode(&mut buf)?),
            FrameType::Alert => Payload::Alert(Alert::decode(&mut buf)?),
            other => {
                buf = &[];
                Payload::Opaque {
                    frame_type: other,
                    bytes: Bytes::copy_from_slice(data),
                }
            }
        };

        if buf.has_remaining() {
            return Err(ProtocolError::TrailingBytes {
                context: "frame payload",
                extra: buf.remaining(),
            });
        }
        Ok(payload)
    }

    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        match self {
            Payload::ConnectionRequest(exchange) | Payload::ConnectionResponse(exchange) => {
                exchange.encode(buf)
            }
            Payload::Acknack(acknack) => acknack.encode(buf),
            Payload::Alert(alert) => alert.encode(buf),
            Payload::Opaque { bytes, .. } => {
                buf.put_slice(bytes);
                Ok(())
            }
        }
    }

    /// Borrow the connection request body, if this is one
    pub fn as_connection_request(&self) -> Option<&ConnectionExchange> {
        match self {
            Payload::ConnectionRequest(exchange) => Some(exchange),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ConnectionExchange {
        ConnectionExchange {
            major_version: 1,
            minor_version: 1,
            station_or_responder_name: "ABC".to_string(),
            station_or_responder_type: "IDC".to_string(),
            service_type: "TCP".to_string(),
            ip_address: Ipv4Addr::new(192, 168, 1, 20),
            port: 8100,
            second_ip_address: Ipv4Addr::UNSPECIFIED,
            second_port: 0,
        }
    }

    #[test]
    fn test_connection_exchange_layout() {
        let mut buf = BytesMut::new();
        request().encode(&mut buf).unwrap();
        assert_eq!(buf.len(), CONNECTION_EXCHANGE_SIZE);
        assert_eq!(&buf[4..12], b"ABC\0\0\0\0\0");
        assert_eq!(&buf[20..24], &[192, 168, 1, 20]);
        assert_eq!(&buf[24..26], &8100u16.to_be_bytes());

        let decoded = Payload::decode(FrameType::ConnectionRequest, &buf).unwrap();
        assert_eq!(decoded, Payload::ConnectionRequest(request()));
    }

    #[test]
    fn test_connection_exchange_truncated() {
        let err = Payload::decode(FrameType::ConnectionRequest, &[0u8; 20]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { need: 32, .. }));
    }

    #[test]
    fn test_acknack_gaps() {
        let acknack = Acknack::new("ABC:0", 100, 200, vec![120, 130, 150, 160]);
        let mut buf = BytesMut::new();
        acknack.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), ACKNACK_MIN_SIZE + 32);
        assert_eq!(&buf[36..40], &2i32.to_be_bytes());

        let Payload::Acknack(decoded) = Payload::decode(FrameType::Acknack, &buf).unwrap() else {
            panic!("expected acknack");
        };
        assert_eq!(decoded.gap_count(), 2);
        assert_eq!(
            decoded.gap_ranges().collect::<Vec<_>>(),
            vec![(120, 130), (150, 160)]
        );
    }

    #[test]
    fn test_acknack_rejects_odd_gap_array() {
        let acknack = Acknack::new("ABC:0", 1, 2, vec![5]);
        let err = acknack.encode(&mut BytesMut::new()).unwrap_err();
        assert_eq!(err, ProtocolError::OddGapArray { len: 1 });
    }

    #[test]
    fn test_acknack_rejects_negative_gap_count() {
        let mut buf = BytesMut::new();
        Acknack::new("X", 0, 0, vec![]).encode(&mut buf).unwrap();
        let len = buf.len();
        buf[len - 4..].copy_from_slice(&(-1i32).to_be_bytes());

        let err = Payload::decode(FrameType::Acknack, &buf).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidGapCount { count: -1 });
    }

    #[test]
    fn test_acknack_gap_count_exceeds_payload() {
        let mut buf = BytesMut::new();
        Acknack::new("X", 0, 0, vec![1, 2]).encode(&mut buf).unwrap();
        let count_at = FRAME_SET_WIDTH + 16;
        buf[count_at..count_at + 4].copy_from_slice(&3i32.to_be_bytes());

        let err = Payload::decode(FrameType::Acknack, &buf).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { need: 48, .. }));
    }

    #[test]
    fn test_alert_padding() {
        let mut buf = BytesMut::new();
        Alert::new("bye").encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &3i32.to_be_bytes());

        let decoded = Payload::decode(FrameType::Alert, &buf).unwrap();
        assert_eq!(decoded, Payload::Alert(Alert::new("bye")));
    }

    #[test]
    fn test_opaque_payload_passthrough() {
        let data = [1u8, 2, 3, 4, 5];
        let payload = Payload::decode(FrameType::Data, &data).unwrap();
        assert_eq!(payload.frame_type(), FrameType::Data);
        assert!(payload.as_connection_request().is_none());

        let mut buf = BytesMut::new();
        payload.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &data);
    }

    #[test]
    fn test_payload_trailing_bytes() {
        let mut buf = BytesMut::new();
        request().encode(&mut buf).unwrap();
        buf.put_u8(0);
        let err = Payload::decode(FrameType::ConnectionResponse, &buf).unwrap_err();
        assert!(matches!(err, ProtocolError::TrailingBytes { extra: 1, .. }));
    }
}
