//! Fixed-layout command structs and ioctl numbers
//!
//! Every struct is `repr(C)` with no implicit padding (checked by the
//! `Pod` derive), so the same bytes cross a process or kernel boundary.
//!
//! | Command | Number | Dir | Arg |
//! |---------|--------|-----|-----|
//! | SETUP | `'p'` 0x00 | none | |
//! | RESET_SM | `'p'` 0x01 | none | |
//! | PULSE_RESET | `'p'` 0x02 | none | |
//! | GET_PINS | `'p'` 0x03 | R | [`RawPins`] (8) |
//! | QUERY | `'p'` 0x04 | R | [`RawQuery`] (40) |
//! | BUSOP | `'p'` 0x10 | RW | [`RawBusOp`] (12) |
//! | BATCH | `'p'` 0x11 | RW | [`RawBatch`] (16) |

use crate::capabilities::{Capabilities, CapabilityQuery};
use crate::error::{PistormError, Result};
use crate::link::PinLevels;
use crate::op::{BusOp, OpFlags, Width};
use bytemuck::{Pod, Zeroable};

// ── ioctl numbering (asm-generic/ioctl.h) ────────────────────────────────────

const IOC_NONE: u32 = 0;
const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

/// ioctl type byte.
pub const MAGIC: u8 = b'p';

#[allow(clippy::cast_possible_truncation)]
const fn ioc(dir: u32, nr: u8, size: usize) -> u32 {
    (dir << 30) | ((size as u32 & 0x3FFF) << 16) | ((MAGIC as u32) << 8) | nr as u32
}

/// Reprogram pins and clock.
pub const PISTORM_IOC_SETUP: u32 = ioc(IOC_NONE, 0x00, 0);
/// Run the state-machine reset.
pub const PISTORM_IOC_RESET_SM: u32 = ioc(IOC_NONE, 0x01, 0);
/// Pulse the remote reset line.
pub const PISTORM_IOC_PULSE_RESET: u32 = ioc(IOC_NONE, 0x02, 0);
/// Raw level snapshot.
pub const PISTORM_IOC_GET_PINS: u32 = ioc(IOC_READ, 0x03, std::mem::size_of::<RawPins>());
/// Capability query.
pub const PISTORM_IOC_QUERY: u32 = ioc(IOC_READ, 0x04, std::mem::size_of::<RawQuery>());
/// One bus op.
pub const PISTORM_IOC_BUSOP: u32 = ioc(IOC_READ | IOC_WRITE, 0x10, std::mem::size_of::<RawBusOp>());
/// A batch of bus ops.
pub const PISTORM_IOC_BATCH: u32 = ioc(IOC_READ | IOC_WRITE, 0x11, std::mem::size_of::<RawBatch>());

// ── Wire structs ─────────────────────────────────────────────────────────────

/// BUSOP argument.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RawBusOp {
    /// Remote address.
    pub addr: u32,
    /// Data in (write) or out (read).
    pub value: u32,
    /// 1, 2 or 4.
    pub width: u8,
    /// Nonzero for reads.
    pub is_read: u8,
    /// Bit 0: status-register mode.
    pub flags: u16,
}

/// GET_PINS result.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RawPins {
    /// GPIO 0-31.
    pub gplev0: u32,
    /// GPIO 32-53.
    pub gplev1: u32,
}

/// QUERY result.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RawQuery {
    /// ABI version.
    pub abi_version: u32,
    /// Capability bits.
    pub capabilities: u32,
    /// Always zero.
    pub reserved: [u32; 8],
}

/// BATCH argument.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RawBatch {
    /// User pointer to `ops_count` [`RawBusOp`]s.
    pub ops_ptr: u64,
    /// Number of ops, 1..=1024.
    pub ops_count: u32,
    /// Always zero.
    pub reserved: u32,
}

// ── Conversions ──────────────────────────────────────────────────────────────

impl TryFrom<RawBusOp> for BusOp {
    type Error = PistormError;

    fn try_from(raw: RawBusOp) -> Result<Self> {
        let flags = OpFlags::from_bits(raw.flags).ok_or_else(|| {
            PistormError::invalid_argument(format!("unknown op flags {:#06x}", raw.flags))
        })?;
        // Status mode ignores the width field.
        let width = if flags.contains(OpFlags::STATUS) {
            Width::Word
        } else {
            Width::try_from(raw.width)?
        };
        Ok(Self {
            address: raw.addr,
            value: raw.value,
            width,
            is_read: raw.is_read != 0,
            flags,
        })
    }
}

impl From<BusOp> for RawBusOp {
    fn from(op: BusOp) -> Self {
        Self {
            addr: op.address,
            value: op.value,
            width: op.width.bytes(),
            is_read: u8::from(op.is_read),
            flags: op.flags.bits(),
        }
    }
}

impl From<PinLevels> for RawPins {
    fn from(levels: PinLevels) -> Self {
        Self {
            gplev0: levels.gplev0,
            gplev1: levels.gplev1,
        }
    }
}

impl From<RawPins> for PinLevels {
    fn from(raw: RawPins) -> Self {
        Self {
            gplev0: raw.gplev0,
            gplev1: raw.gplev1,
        }
    }
}

impl From<CapabilityQuery> for RawQuery {
    fn from(q: CapabilityQuery) -> Self {
        Self {
            abi_version: q.abi_version,
            capabilities: q.capabilities.bits(),
            reserved: [0; 8],
        }
    }
}

impl From<RawQuery> for CapabilityQuery {
    fn from(raw: RawQuery) -> Self {
        Self {
            abi_version: raw.abi_version,
            capabilities: Capabilities::from_bits_retain(raw.capabilities),
            reserved: [0; 8],
        }
    }
}

/// Decode a whole batch before anything touches the bus.
///
/// # Errors
///
/// Returns `InvalidArgument` for a bad count or any undecodable op.
pub fn decode_batch(raw: &[RawBusOp]) -> Result<Vec<BusOp>> {
    crate::batch::validate_count(raw.len())?;
    raw.iter()
        .enumerate()
        .map(|(i, &r)| {
            BusOp::try_from(r).map_err(|e| PistormError::invalid_argument(format!("op {i}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes() {
        assert_eq!(std::mem::size_of::<RawBusOp>(), 12);
        assert_eq!(std::mem::size_of::<RawPins>(), 8);
        assert_eq!(std::mem::size_of::<RawQuery>(), 40);
        assert_eq!(std::mem::size_of::<RawBatch>(), 16);
    }

    #[test]
    fn ioctl_numbers() {
        assert_eq!(PISTORM_IOC_SETUP, 0x7000);
        assert_eq!(PISTORM_IOC_RESET_SM, 0x7001);
        assert_eq!(PISTORM_IOC_PULSE_RESET, 0x7002);
        assert_eq!(PISTORM_IOC_GET_PINS, 0x8008_7003);
        assert_eq!(PISTORM_IOC_QUERY, 0x8028_7004);
        assert_eq!(PISTORM_IOC_BUSOP, 0xC00C_7010);
        assert_eq!(PISTORM_IOC_BATCH, 0xC010_7011);
    }

    #[test]
    fn busop_byte_layout() {
        let raw = RawBusOp::from(BusOp::write(0x00DF_F180, 0x4000, Width::Word));
        let bytes = bytemuck::bytes_of(&raw);
        assert_eq!(&bytes[0..4], &0x00DF_F180u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &0x4000u32.to_ne_bytes());
        assert_eq!(bytes[8], 2);
        assert_eq!(bytes[9], 0);
        assert_eq!(&bytes[10..12], &[0, 0]);
    }

    #[test]
    fn bad_width_rejected_unless_status() {
        let raw = RawBusOp {
            width: 3,
            ..RawBusOp::default()
        };
        assert!(BusOp::try_from(raw).is_err());

        let status = RawBusOp {
            width: 3,
            flags: 1,
            is_read: 1,
            ..RawBusOp::default()
        };
        let op = BusOp::try_from(status).unwrap();
        assert!(op.is_status() && op.is_read);
    }

    #[test]
    fn unknown_flags_rejected() {
        let raw = RawBusOp {
            width: 2,
            flags: 0x8000,
            ..RawBusOp::default()
        };
        assert!(matches!(
            BusOp::try_from(raw),
            Err(PistormError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn query_reserved_is_zero() {
        let raw = RawQuery {
            abi_version: 1,
            capabilities: 0x1,
            reserved: [7; 8],
        };
        let q = CapabilityQuery::from(raw);
        assert_eq!(q.reserved, [0; 8]);
        assert_eq!(RawQuery::from(q).reserved, [0; 8]);
    }

    #[test]
    fn batch_decoding_names_bad_op() {
        let ops = [
            RawBusOp::from(BusOp::read(0, Width::Byte)),
            RawBusOp {
                width: 9,
                ..RawBusOp::default()
            },
        ];
        let err = decode_batch(&ops).unwrap_err();
        assert!(err.to_string().contains("op 1"));
        assert!(decode_batch(&[]).is_err());
    }
}
