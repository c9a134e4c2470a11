//! Frame encoding/decoding utilities.
//!
//! Every frame starts with the `FA FB` marker and ends with an XOR checksum
//! over all preceding bytes:
//!
//! ```text
//! +------+------+-----+-----+---------+----------------+-----+
//! | 0xFA | 0xFB | cmd | len | pack_no | data[0..len-1] | xor |
//! +------+------+-----+-----+---------+----------------+-----+
//! ```
//!
//! When `len` is zero the packet number is absent (this is the ACK form).

use bytes::BytesMut;

use crate::constants::*;
use crate::error::{ProtocolError, ProtocolResult};

/// XOR of every byte in `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Build a frame for transmission.
///
/// The ACK command always produces the fixed `FA FB 42 00 43` frame; the
/// packet number and payload are ignored for it.
pub fn encode(command: u8, pack_no: u8, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    if command == CMD_ACK {
        return Ok(ACK_FRAME.to_vec());
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLong {
            max: MAX_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + 2 + payload.len());
    buf.extend_from_slice(&STX);
    buf.push(command);
    buf.push(1 + payload.len() as u8);
    buf.push(pack_no);
    buf.extend_from_slice(payload);
    buf.push(checksum(&buf));
    Ok(buf)
}

/// A complete frame split into its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command code.
    pub command: u8,
    /// Packet number, absent for zero-length frames.
    pub pack_no: Option<u8>,
    /// Data bytes following the packet number.
    pub payload: Vec<u8>,
    /// Checksum byte as received.
    pub checksum: u8,
    /// XOR computed over the received bytes.
    computed: u8,
}

impl Frame {
    /// Split a buffer holding exactly one frame into its fields.
    ///
    /// The checksum is recorded but not enforced; see [`Frame::verify`].
    pub fn decode(buf: &[u8]) -> ProtocolResult<Frame> {
        if buf.len() < MIN_FRAME_LEN {
            return Err(ProtocolError::FrameTooShort {
                expected: MIN_FRAME_LEN,
                actual: buf.len(),
            });
        }
        if buf[..2] != STX {
            return Err(ProtocolError::MissingMarker);
        }

        let len = buf[LEN_OFFSET] as usize;
        let declared = frame_len(buf[LEN_OFFSET]);
        if buf.len() != declared {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }

        let (pack_no, payload) = if len > 0 {
            (
                Some(buf[PACK_NO_OFFSET]),
                buf[PACK_NO_OFFSET + 1..buf.len() - 1].to_vec(),
            )
        } else {
            (None, Vec::new())
        };

        Ok(Frame {
            command: buf[CMD_OFFSET],
            pack_no,
            payload,
            checksum: buf[buf.len() - 1],
            computed: checksum(&buf[..buf.len() - 1]),
        })
    }

    /// XOR computed over the received bytes.
    pub fn computed(&self) -> u8 {
        self.computed
    }

    /// Whether the trailing checksum matches the frame contents.
    pub fn checksum_ok(&self) -> bool {
        self.checksum == self.computed
    }

    /// Return an error if the trailing checksum is wrong.
    pub fn verify(&self) -> ProtocolResult<()> {
        if self.checksum_ok() {
            Ok(())
        } else {
            Err(ProtocolError::ChecksumMismatch {
                expected: self.computed,
                actual: self.checksum,
            })
        }
    }

    /// Whether this is a POLL from the VMC.
    pub fn is_poll(&self) -> bool {
        self.command == CMD_POLL
    }

    /// Whether this is an ACK.
    pub fn is_ack(&self) -> bool {
        self.command == CMD_ACK
    }
}

/// Total size of a frame whose length byte is `len`.
pub fn frame_len(len: u8) -> usize {
    HEADER_LEN + len as usize + 1
}

/// Reassembles frames from a byte stream.
///
/// Resynchronization is driven solely by the start marker: whenever the last
/// two buffered bytes are `FA FB`, everything before them is discarded. A
/// marker pair inside a payload therefore restarts the frame as well.
#[derive(Debug)]
pub struct FrameReader {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
    /// Bytes thrown away while hunting for a marker.
    discarded: u64,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    /// Create a new frame reader.
    pub fn new() -> Self {
        FrameReader {
            buffer: BytesMut::with_capacity(frame_len(u8::MAX)),
            discarded: 0,
        }
    }

    /// Feed a single byte, returning a frame if it completed one.
    pub fn push_byte(&mut self, byte: u8) -> Option<Frame> {
        self.buffer.extend_from_slice(&[byte]);

        let n = self.buffer.len();
        if n >= 2 && self.buffer[n - 2..] == STX {
            if n > 2 {
                self.discarded += (n - 2) as u64;
                log::trace!("resync: discarded {} bytes before marker", n - 2);
            }
            self.buffer.clear();
            self.buffer.extend_from_slice(&STX);
            return None;
        }

        if self.buffer.len() < MIN_FRAME_LEN {
            return None;
        }
        if self.buffer.len() < frame_len(self.buffer[LEN_OFFSET]) {
            return None;
        }

        let raw = self.buffer.split().freeze();
        match Frame::decode(&raw) {
            Ok(frame) => Some(frame),
            Err(e) => {
                // Only reachable when no marker preceded the bytes.
                self.discarded += raw.len() as u64;
                log::debug!("dropping unanchored bytes ({}): {:02X?}", e, &raw[..]);
                None
            }
        }
    }

    /// Feed a chunk of bytes, returning every frame it completed.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        data.iter().filter_map(|&b| self.push_byte(b)).collect()
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes discarded as noise since creation.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_status_request() {
        let frame = encode(0x53, 1, &[]).unwrap();
        assert_eq!(frame, vec![0xFA, 0xFB, 0x53, 0x01, 0x01, 0x52]);
    }

    #[test]
    fn test_encode_ack_is_fixed() {
        assert_eq!(encode(CMD_ACK, 0, &[]).unwrap(), ACK_FRAME.to_vec());
        // Packet number and payload never leak into an ACK.
        assert_eq!(encode(CMD_ACK, 77, &[1, 2, 3]).unwrap(), vec![0xFA, 0xFB, 0x42, 0x00, 0x43]);
    }

    #[test]
    fn test_checksum_law() {
        let payloads: [&[u8]; 4] = [&[], &[0x00, 0x0A], &[0xFF; 10], &[0x12, 0x34, 0x56, 0x78]];
        for (i, payload) in payloads.iter().enumerate() {
            let frame = encode(0x03, i as u8 + 1, payload).unwrap();
            let (body, last) = frame.split_at(frame.len() - 1);
            assert_eq!(checksum(body), last[0]);
        }
    }

    #[test]
    fn test_encode_dispense() {
        let frame = encode(0x03, 7, &[0x00, 0x0A]).unwrap();
        assert_eq!(&frame[..7], &[0xFA, 0xFB, 0x03, 0x03, 0x07, 0x00, 0x0A]);
        assert_eq!(frame.len(), 8);
    }

    #[test]
    fn test_encode_payload_too_long() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            encode(0x70, 1, &payload),
            Err(ProtocolError::PayloadTooLong { max: 254, actual: 255 })
        );
        assert!(encode(0x70, 1, &payload[..MAX_PAYLOAD_LEN]).is_ok());
    }

    #[test]
    fn test_decode_fields() {
        let raw = encode(0x04, 9, &[0x02]).unwrap();
        let frame = Frame::decode(&raw).unwrap();
        assert_eq!(frame.command, 0x04);
        assert_eq!(frame.pack_no, Some(9));
        assert_eq!(frame.payload, vec![0x02]);
        assert!(frame.checksum_ok());
    }

    #[test]
    fn test_decode_zero_length() {
        let frame = Frame::decode(&ACK_FRAME).unwrap();
        assert!(frame.is_ack());
        assert_eq!(frame.pack_no, None);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            Frame::decode(&[0xFA, 0xFB, 0x41]),
            Err(ProtocolError::FrameTooShort { expected: 5, actual: 3 })
        ));
        assert_eq!(Frame::decode(&[0x00, 0xFB, 0x41, 0x00, 0x00]), Err(ProtocolError::MissingMarker));
        assert!(matches!(
            Frame::decode(&[0xFA, 0xFB, 0x41, 0x02, 0x00, 0x00]),
            Err(ProtocolError::LengthMismatch { declared: 7, actual: 6 })
        ));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut raw = encode(0x21, 3, &[0x01, 0x00, 0x64]).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let frame = Frame::decode(&raw).unwrap();
        assert!(!frame.checksum_ok());
        assert_eq!(frame.computed() ^ 0x01, frame.checksum);
        assert!(matches!(frame.verify(), Err(ProtocolError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_reader_resync_discards_noise() {
        let mut reader = FrameReader::new();
        let frames = reader.push(&[0x00, 0x11, 0xFA, 0xFB, 0x53, 0x01, 0x01, 0x52]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x53);
        assert_eq!(frames[0].pack_no, Some(1));
        assert_eq!(reader.buffered_len(), 0);
        assert_eq!(reader.discarded(), 2);
    }

    #[test]
    fn test_reader_partial() {
        let mut reader = FrameReader::new();
        let raw = encode(0x04, 2, &[0x02]).unwrap();

        assert!(reader.push(&raw[..4]).is_empty());
        assert_eq!(reader.buffered_len(), 4);

        let frames = reader.push(&raw[4..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![0x02]);
    }

    #[test]
    fn test_reader_multiple() {
        let mut reader = FrameReader::new();
        let mut stream = Vec::new();
        stream.extend_from_slice(&[0xFA, 0xFB, 0x41, 0x00, 0x40]);
        stream.extend_from_slice(&ACK_FRAME);
        stream.extend_from_slice(&encode(0x21, 5, &[0x01, 0x02]).unwrap());

        let frames = reader.push(&stream);
        let commands: Vec<u8> = frames.iter().map(|f| f.command).collect();
        assert_eq!(commands, vec![0x41, 0x42, 0x21]);
    }

    #[test]
    fn test_reader_marker_inside_payload_restarts_frame() {
        let mut reader = FrameReader::new();
        // Payload contains FA FB, which restarts the frame mid-way.
        let raw = encode(0x21, 1, &[0xFA, 0xFB, 0x41, 0x00, 0x40]).unwrap();
        let frames = reader.push(&raw);
        // The bytes after the embedded marker look like a POLL.
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_poll());
    }

    #[test]
    fn test_reader_drops_unanchored_garbage() {
        let mut reader = FrameReader::new();
        // Five bytes of noise with a zero length byte at offset 3.
        assert!(reader.push(&[0x01, 0x02, 0x03, 0x00, 0x04]).is_empty());
        assert_eq!(reader.buffered_len(), 0);
        assert_eq!(reader.discarded(), 5);

        let frames = reader.push(&ACK_FRAME);
        assert_eq!(frames.len(), 1);
    }
}
