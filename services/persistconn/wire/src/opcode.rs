//! Opcode byte carried at the start of every inbound frame.
//!
//! The opcode is a raw bit set, not an ASCII digit. Bits outside the four
//! known flags are retained so the value round-trips unchanged.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Inbound frame opcode bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Opcode: u8 {
        /// First frame of a request; carries command list and argument
        const INIT = 0x01;
        /// Frame carries a data block
        const BLOCK = 0x02;
        /// Last frame of a request
        const END = 0x04;
        /// Host allows a streaming handler (recorded, not acted upon)
        const ALLOW_STREAM = 0x08;
    }
}

impl Opcode {
    /// Build an opcode from the raw wire byte, keeping unknown bits
    pub fn from_byte(byte: u8) -> Self {
        Self::from_bits_retain(byte)
    }

    /// Raw wire byte
    pub fn to_byte(self) -> u8 {
        self.bits()
    }

    /// Frame begins a request
    pub fn is_init(self) -> bool {
        self.contains(Opcode::INIT)
    }

    /// Frame carries a data block
    pub fn has_block(self) -> bool {
        self.contains(Opcode::BLOCK)
    }

    /// Frame ends a request
    pub fn is_end(self) -> bool {
        self.contains(Opcode::END)
    }

    /// Host allows streaming
    pub fn allows_stream(self) -> bool {
        self.contains(Opcode::ALLOW_STREAM)
    }
}
