//! Protocol module implements the framing, handshake, and value encoding
//! that clients and servers speak over a connection.
//!
//! This module contains three main components:
//!
//! - `wire`: the tagged binary value encoding used for message headers and
//!   call bodies.
//!
//! - `codec`: the pluggable codec abstraction (split read/write halves), the
//!   process-wide codec registry, and the built-in length-delimited binary
//!   codec.
//!
//! - `handshake`: the once-per-connection `Options` record that selects the
//!   codec and carries connection timeouts, exchanged in a fixed JSON-line
//!   format so the server can parse it before any codec is negotiated.

pub mod codec;
pub mod handshake;
pub mod wire;

use crate::{DecodeRecord, EncodeRecord};

/// Magic constant opening every connection; anything else is not ours.
pub const HANDSHAKE_MAGIC: u32 = 0x3bef5c;

/// Upper bound for a single header or body frame on the wire.
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Per-message metadata, exchanged in both directions.
///
/// A request carries the target endpoint and a client-assigned sequence
/// number; the matching reply echoes the sequence number and reports a
/// failure, if any, as a non-empty `error` string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// Target endpoint in `"Service.Method"` form.
    pub service_method: String,
    /// Client-assigned sequence number, starting at 1 and strictly
    /// increasing for the lifetime of a client.
    pub seq: u64,
    /// Empty on success; the server-reported failure otherwise.
    pub error: String,
}

EncodeRecord!(Header, service_method, seq, error);
DecodeRecord!(Header, service_method, seq, error);
