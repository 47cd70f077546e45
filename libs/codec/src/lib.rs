//! # CD1.1 Frame Codec
//!
//! ## Purpose
//!
//! Wire-level boundary for the station receiver: the CD1.1 header/trailer
//! layout, the payloads this subsystem reads and writes, comm verification,
//! and async frame delimiting over a byte stream.
//!
//! ## What This Crate Contains
//! - [`Frame`], [`FrameHeader`], [`FrameTrailer`] and the [`FrameType`] registry
//! - [`ConnectionExchange`], [`Acknack`] and [`Alert`] payloads
//! - [`FrameReader`] / [`write_frame`] for async streams
//! - [`FrameUnit`] for turning delimited bytes into parsed or malformed units
//!
//! ## What This Crate Does NOT Contain
//! - Data frame channel subframes or sample decoding (carried as opaque bytes)
//! - Station lookup or connection handling (belongs in services/connman)
//! - Gap bookkeeping (belongs in libs/gaps)

pub mod checksum;
pub mod error;
pub mod frame;
pub mod payload;
pub mod stream;

pub use checksum::{compute_comm_verification, embed_comm_verification, verify_comm_verification};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{
    Frame, FrameHeader, FrameTrailer, FrameType, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
    MIN_TRAILER_SIZE,
};
pub use payload::{Acknack, Alert, ConnectionExchange, Payload};
pub use stream::{write_frame, FrameReader, FrameUnit, MalformedFrame, RawFrame};
