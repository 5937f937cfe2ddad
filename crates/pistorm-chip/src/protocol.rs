//! Host ↔ adapter strobe protocol.
//!
//! The adapter exposes four 16-bit pseudo-registers on the one physical data
//! lane, selected by A0/A1. A memory cycle is issued by strobing DATA (writes
//! only), ADDR_LO and finally ADDR_HI; the ADDR_HI payload carries the cycle
//! opcode in bits 9..8 and address bits 23..16 in bits 7..0. The final
//! strobe starts the cycle and raises TXN_IN_PROGRESS until it completes.
//!
//! ```text
//! ADDR_HI payload
//!  15      10  9  8  7               0
//! ┌──────────┬─────┬─────────────────┐
//! │ reserved │ op  │  address 23..16 │
//! └──────────┴─────┴─────────────────┘
//! ```
//!
//! Status cycles select the STATUS pseudo-register directly and carry no
//! opcode: the adapter answers a status read immediately, without raising
//! the handshake.

// ── Pseudo-registers ─────────────────────────────────────────────────────────

/// Logical registers multiplexed over the data lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PseudoRegister {
    /// Data word for the next write, or the result of the last read.
    Data = 0,
    /// Address bits 15..0.
    AddrLo = 1,
    /// Opcode and address bits 23..16; strobing it starts the cycle.
    AddrHi = 2,
    /// Adapter status / control.
    Status = 3,
}

impl PseudoRegister {
    /// Register index as driven on A1:A0.
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Decode A1:A0.
    #[must_use]
    pub const fn from_index(index: u8) -> Self {
        match index & 0b11 {
            0 => Self::Data,
            1 => Self::AddrLo,
            2 => Self::AddrHi,
            _ => Self::Status,
        }
    }
}

// ── Bus cycles ───────────────────────────────────────────────────────────────

/// Every cycle the host can ask the adapter to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusCycle {
    /// 16-bit write.
    WriteWord,
    /// 8-bit write; the byte lane follows address parity.
    WriteByte,
    /// 16-bit read.
    ReadWord,
    /// 8-bit read.
    ReadByte,
    /// Write the adapter status register.
    WriteStatus,
    /// Read the adapter status register.
    ReadStatus,
}

/// ADDR_HI opcode values (bits 9..8 of the payload).
pub mod opcode {
    /// 16-bit write.
    pub const WRITE_WORD: u16 = 0b00;
    /// 8-bit write.
    pub const WRITE_BYTE: u16 = 0b01;
    /// 16-bit read.
    pub const READ_WORD: u16 = 0b10;
    /// 8-bit read.
    pub const READ_BYTE: u16 = 0b11;
    /// Position of the opcode inside the ADDR_HI payload.
    pub const SHIFT: u16 = 8;
}

impl BusCycle {
    /// ADDR_HI opcode, or `None` for status cycles.
    #[must_use]
    pub const fn opcode(self) -> Option<u16> {
        match self {
            Self::WriteWord => Some(opcode::WRITE_WORD),
            Self::WriteByte => Some(opcode::WRITE_BYTE),
            Self::ReadWord => Some(opcode::READ_WORD),
            Self::ReadByte => Some(opcode::READ_BYTE),
            Self::WriteStatus | Self::ReadStatus => None,
        }
    }

    /// Decode an ADDR_HI payload back into a memory cycle.
    #[must_use]
    pub const fn from_addr_hi(payload: u16) -> Self {
        match (payload >> opcode::SHIFT) & 0b11 {
            opcode::WRITE_WORD => Self::WriteWord,
            opcode::WRITE_BYTE => Self::WriteByte,
            opcode::READ_WORD => Self::ReadWord,
            _ => Self::ReadByte,
        }
    }

    /// Whether the cycle moves data from the remote bus to the host.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::ReadWord | Self::ReadByte | Self::ReadStatus)
    }

    /// Short name for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::WriteWord => "write16",
            Self::WriteByte => "write8",
            Self::ReadWord => "read16",
            Self::ReadByte => "read8",
            Self::WriteStatus => "write_status",
            Self::ReadStatus => "read_status",
        }
    }
}

// ── Address encoding ─────────────────────────────────────────────────────────

/// Address lines on the remote bus.
pub const ADDRESS_BITS: u32 = 24;

/// Mask applied to host addresses; bits 31..24 are not wired.
pub const ADDRESS_MASK: u32 = (1 << ADDRESS_BITS) - 1;

/// ADDR_LO payload for `address`.
#[must_use]
pub const fn addr_lo(address: u32) -> u16 {
    (address & 0xFFFF) as u16
}

/// ADDR_HI payload for `address` and a memory-cycle opcode.
#[must_use]
pub const fn addr_hi(address: u32, op: u16) -> u16 {
    (op << opcode::SHIFT) | (((address & ADDRESS_MASK) >> 16) as u16)
}

/// Reassemble a 24-bit address from ADDR_LO / ADDR_HI payloads.
#[must_use]
pub const fn decode_address(lo: u16, hi: u16) -> u32 {
    (((hi & 0xFF) as u32) << 16) | lo as u32
}

// ── Byte lanes ───────────────────────────────────────────────────────────────

/// Half of a 16-bit bus cell, selected by address parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteLane {
    /// Even address: bits 15..8 (upper data strobe).
    Upper,
    /// Odd address: bits 7..0 (lower data strobe).
    Lower,
}

impl ByteLane {
    /// Lane addressed by `address`.
    #[must_use]
    pub const fn for_address(address: u32) -> Self {
        if address & 1 == 0 {
            Self::Upper
        } else {
            Self::Lower
        }
    }

    /// DATA payload for a byte write. Even addresses replicate the byte into
    /// both halves of the cell; odd addresses use the low half only.
    #[must_use]
    pub const fn write_payload(self, byte: u8) -> u16 {
        match self {
            Self::Upper => ((byte as u16) << 8) | byte as u16,
            Self::Lower => byte as u16,
        }
    }

    /// Pick this lane out of a 16-bit cell.
    #[must_use]
    pub const fn extract(self, word: u16) -> u8 {
        match self {
            Self::Upper => (word >> 8) as u8,
            Self::Lower => (word & 0xFF) as u8,
        }
    }

    /// Replace this lane of `word` with `byte`.
    #[must_use]
    pub const fn merge(self, word: u16, byte: u8) -> u16 {
        match self {
            Self::Upper => (word & 0x00FF) | ((byte as u16) << 8),
            Self::Lower => (word & 0xFF00) | byte as u16,
        }
    }
}

// ── Status register ──────────────────────────────────────────────────────────

/// Status register bits.
pub mod status {
    /// Host → adapter: hold the adapter state machine in INIT.
    pub const INIT: u16 = 1 << 0;
    /// Host → adapter: release the remote RESET line (0 asserts reset).
    pub const RESET: u16 = 1 << 1;
    /// Adapter → host: interrupt priority level, bits 15..13.
    pub const IPL_MASK: u16 = 0xE000;
    /// Shift of the IPL field.
    pub const IPL_SHIFT: u16 = 13;

    /// Extract the interrupt priority level (0..=7).
    #[must_use]
    pub const fn ipl(status: u16) -> u8 {
        ((status & IPL_MASK) >> IPL_SHIFT) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_hi_carries_opcode_and_high_bits() {
        assert_eq!(addr_hi(0x00AB_CDEF, opcode::WRITE_WORD), 0x00AB);
        assert_eq!(addr_hi(0x00AB_CDEF, opcode::WRITE_BYTE), 0x01AB);
        assert_eq!(addr_hi(0x00AB_CDEF, opcode::READ_WORD), 0x02AB);
        assert_eq!(addr_hi(0x00AB_CDEF, opcode::READ_BYTE), 0x03AB);
    }

    #[test]
    fn upper_address_bits_are_not_wired() {
        assert_eq!(addr_hi(0xFF12_3456, opcode::READ_WORD), addr_hi(0x0012_3456, opcode::READ_WORD));
    }

    #[test]
    fn address_round_trips_through_payloads() {
        let addr = 0x00DF_F09A;
        let hi = addr_hi(addr, opcode::READ_BYTE);
        assert_eq!(decode_address(addr_lo(addr), hi), addr);
        assert_eq!(BusCycle::from_addr_hi(hi), BusCycle::ReadByte);
    }

    #[test]
    fn opcodes_are_distinct() {
        let cycles = [
            BusCycle::WriteWord,
            BusCycle::WriteByte,
            BusCycle::ReadWord,
            BusCycle::ReadByte,
        ];
        for (i, a) in cycles.iter().enumerate() {
            for b in &cycles[i + 1..] {
                assert_ne!(a.opcode(), b.opcode());
            }
        }
        assert_eq!(BusCycle::WriteStatus.opcode(), None);
        assert_eq!(BusCycle::ReadStatus.opcode(), None);
    }

    #[test]
    fn byte_lanes_follow_parity() {
        assert_eq!(ByteLane::for_address(0x10), ByteLane::Upper);
        assert_eq!(ByteLane::for_address(0x11), ByteLane::Lower);
        assert_eq!(ByteLane::Upper.write_payload(0x5A), 0x5A5A);
        assert_eq!(ByteLane::Lower.write_payload(0x5A), 0x005A);
        assert_eq!(ByteLane::Upper.extract(0x1234), 0x12);
        assert_eq!(ByteLane::Lower.extract(0x1234), 0x34);
        assert_eq!(ByteLane::Upper.merge(0x1234, 0xAB), 0xAB34);
        assert_eq!(ByteLane::Lower.merge(0x1234, 0xAB), 0x12AB);
    }

    #[test]
    fn ipl_extraction() {
        assert_eq!(status::ipl(0x0000), 0);
        assert_eq!(status::ipl(0x2000), 1);
        assert_eq!(status::ipl(0xE003), 7);
    }

    #[test]
    fn pseudo_register_index_round_trip() {
        for reg in [
            PseudoRegister::Data,
            PseudoRegister::AddrLo,
            PseudoRegister::AddrHi,
            PseudoRegister::Status,
        ] {
            assert_eq!(PseudoRegister::from_index(reg.index()), reg);
        }
    }
}
