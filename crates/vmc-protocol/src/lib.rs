//! VMC Serial Protocol
//!
//! This crate provides the wire-level pieces for talking to a vending machine
//! controller (VMC) over its half-duplex serial link: frame encoding/decoding,
//! stream resynchronization, and the command code tables.
//!
//! # Protocol Overview
//!
//! The VMC is always the polling master. It sends a `POLL` frame, and the host
//! answers either with a pending command frame or with an idle `ACK`. Every
//! data frame in either direction is acknowledged.
//!
//! ```text
//! +------+------+-----+-----+--------+--------------+-----+
//! | 0xFA | 0xFB | cmd | len | pack_no| data[len-1]  | xor |
//! +------+------+-----+-----+--------+--------------+-----+
//! ```
//!
//! The `ACK` frame is the fixed 5-byte form `FA FB 42 00 43`.
//!
//! # Example
//!
//! ```rust
//! use vmc_protocol::{encode, FrameReader, OutboundCommand};
//!
//! let bytes = encode(OutboundCommand::RequestStatusSimple.code(), 1, &[]).unwrap();
//! assert_eq!(bytes, vec![0xFA, 0xFB, 0x53, 0x01, 0x01, 0x52]);
//!
//! let mut reader = FrameReader::new();
//! let frames = reader.push(&bytes);
//! assert_eq!(frames.len(), 1);
//! ```

mod constants;
mod error;
mod frame;
mod responses;

pub use constants::*;
pub use error::*;
pub use frame::*;
pub use responses::*;
