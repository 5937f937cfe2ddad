//! Single bus operations

use crate::error::{PistormError, Result};
use bitflags::bitflags;

/// Transfer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Width {
    /// 8 bits.
    Byte = 1,
    /// 16 bits.
    Word = 2,
    /// 32 bits, as two 16-bit cycles.
    Long = 4,
}

impl Width {
    /// Size in bytes.
    pub const fn bytes(self) -> u8 {
        self as u8
    }

    /// Mask covering the width.
    pub const fn mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::Long => 0xFFFF_FFFF,
        }
    }
}

impl TryFrom<u8> for Width {
    type Error = PistormError;

    fn try_from(bytes: u8) -> Result<Self> {
        match bytes {
            1 => Ok(Self::Byte),
            2 => Ok(Self::Word),
            4 => Ok(Self::Long),
            other => Err(PistormError::invalid_argument(format!(
                "width {other} (expected 1, 2 or 4)"
            ))),
        }
    }
}

bitflags! {
    /// Per-op modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpFlags: u16 {
        /// Access the adapter status register; address and width are ignored.
        const STATUS = 1 << 0;
    }
}

/// One read or write on the remote bus.
///
/// `value` is the input for writes and is replaced with the result for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusOp {
    /// Remote address; bits 31..24 are ignored.
    pub address: u32,
    /// Data in (write) or out (read).
    pub value: u32,
    /// Transfer width.
    pub width: Width,
    /// Direction.
    pub is_read: bool,
    /// Modifiers.
    pub flags: OpFlags,
}

impl BusOp {
    /// Read of `width` at `address`.
    pub const fn read(address: u32, width: Width) -> Self {
        Self {
            address,
            value: 0,
            width,
            is_read: true,
            flags: OpFlags::empty(),
        }
    }

    /// Write of `value` (truncated to `width`) at `address`.
    pub const fn write(address: u32, value: u32, width: Width) -> Self {
        Self {
            address,
            value,
            width,
            is_read: false,
            flags: OpFlags::empty(),
        }
    }

    /// Status-register read.
    pub const fn read_status() -> Self {
        Self {
            address: 0,
            value: 0,
            width: Width::Word,
            is_read: true,
            flags: OpFlags::STATUS,
        }
    }

    /// Status-register write.
    pub const fn write_status(value: u16) -> Self {
        Self {
            address: 0,
            value: value as u32,
            width: Width::Word,
            is_read: false,
            flags: OpFlags::STATUS,
        }
    }

    /// Whether this op targets the status register.
    pub const fn is_status(&self) -> bool {
        self.flags.contains(OpFlags::STATUS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(Width::try_from(1).unwrap(), Width::Byte);
        assert_eq!(Width::try_from(4).unwrap(), Width::Long);
        for bad in [0u8, 3, 8] {
            assert!(matches!(
                Width::try_from(bad),
                Err(PistormError::InvalidArgument { .. })
            ));
        }
        assert_eq!(Width::Word.mask(), 0xFFFF);
    }

    #[test]
    fn constructors() {
        let op = BusOp::write(0x10, 0x11, Width::Byte);
        assert!(!op.is_read && !op.is_status());
        assert!(BusOp::read_status().is_status());
        assert_eq!(BusOp::write_status(0x2).value, 2);
    }
}
