//! Rolling packet number.

use vmc_protocol::{PACK_NO_MAX, PACK_NO_MIN};

/// Packet number stamped on every host-initiated frame.
///
/// Always in `1..=255`; advancing past 255 wraps to 1, never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceManager {
    current: u8,
}

impl Default for SequenceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceManager {
    /// Start at packet number 1.
    pub fn new() -> Self {
        SequenceManager { current: PACK_NO_MIN }
    }

    /// Start at a given packet number; 0 is mapped to 1.
    pub fn starting_at(value: u8) -> Self {
        SequenceManager {
            current: value.max(PACK_NO_MIN),
        }
    }

    /// The packet number the next command frame will carry.
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Move to the next packet number, returning it.
    pub fn advance(&mut self) -> u8 {
        self.current = if self.current >= PACK_NO_MAX {
            PACK_NO_MIN
        } else {
            self.current + 1
        };
        self.current
    }
}
