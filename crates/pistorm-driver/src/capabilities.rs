//! Capability query
//!
//! QUERY reports a fixed ABI version and a capability bitset. Clients treat
//! an unset bit as "unsupported" and fall back to the single-op path; bits
//! added by newer drivers are carried through untouched rather than
//! rejected. The reserved words always travel as zero.

use bitflags::bitflags;

/// Command ABI version spoken by this crate.
pub const ABI_VERSION: u32 = 1;

bitflags! {
    /// Features a bridge implementation offers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Single BUSOP.
        const BUSOP = 1 << 0;
        /// BATCH of up to 1024 ops.
        const BATCH = 1 << 1;
        /// STATUS-mode ops.
        const STATUS = 1 << 2;
        /// RESET_SM and PULSE_RESET.
        const RESET = 1 << 3;
    }
}

/// Answer to QUERY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityQuery {
    /// ABI version of the responder.
    pub abi_version: u32,
    /// Supported features.
    pub capabilities: Capabilities,
    /// Reserved; always zero.
    pub reserved: [u32; 8],
}

impl CapabilityQuery {
    /// What an in-process device offers.
    pub const fn current() -> Self {
        Self {
            abi_version: ABI_VERSION,
            capabilities: Capabilities::all(),
            reserved: [0; 8],
        }
    }

    /// Whether every bit of `caps` is offered.
    pub const fn supports(&self, caps: Capabilities) -> bool {
        self.capabilities.contains(caps)
    }
}

impl std::fmt::Display for CapabilityQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ABI v{} caps {:#x}", self.abi_version, self.capabilities.bits())?;
        let names: Vec<&str> = self.capabilities.iter_names().map(|(name, _)| name).collect();
        if !names.is_empty() {
            write!(f, " ({})", names.join(" | "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_offers_everything() {
        let q = CapabilityQuery::current();
        assert_eq!(q.abi_version, 1);
        assert_eq!(q.capabilities.bits(), 0xF);
        assert!(q.supports(Capabilities::BATCH | Capabilities::STATUS));
        assert_eq!(q.reserved, [0; 8]);
    }

    #[test]
    fn unknown_bits_are_kept() {
        let caps = Capabilities::from_bits_retain(0x1 | 0x100);
        assert!(caps.contains(Capabilities::BUSOP));
        assert!(!caps.contains(Capabilities::BATCH));
        assert_eq!(caps.bits(), 0x101);
    }

    #[test]
    fn busop_only_driver() {
        let q = CapabilityQuery {
            abi_version: 1,
            capabilities: Capabilities::BUSOP,
            reserved: [0; 8],
        };
        assert!(!q.supports(Capabilities::BATCH));
        assert_eq!(q.to_string(), "ABI v1 caps 0x1 (BUSOP)");
    }
}
