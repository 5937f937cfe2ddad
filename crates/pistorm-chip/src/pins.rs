//! Header pin assignment.
//!
//! ```text
//! GPIO  Signal            Direction
//! ────  ────────────────  ──────────────────────────────
//!  0    TXN_IN_PROGRESS   in   handshake, high while the CPLD runs a cycle
//!  1    IPL_ZERO          in   high when no interrupt is pending
//!  2    A0                out  register select bit 0
//!  3    A1                out  register select bit 1
//!  4    CLK               alt0 GPCLK0, ~200 MHz
//!  5    RESET             out
//!  6    RD                out  read strobe
//!  7    WR                out  write strobe
//!  8-23 D0..D15           bidirectional data lane
//! ```

/// Fixed assignment of logical signals to GPIO numbers.
///
/// The data lane is always reprogrammed as one block; there is no
/// partial-width direction switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMap {
    /// Handshake line, asserted while a bus cycle is in flight.
    pub txn_in_progress: u8,
    /// Interrupt sample line, high when IPL is zero.
    pub ipl_zero: u8,
    /// Register select, low bit.
    pub a0: u8,
    /// Register select, high bit.
    pub a1: u8,
    /// Bus clock output.
    pub clk: u8,
    /// Reset line.
    pub reset: u8,
    /// Read strobe.
    pub rd: u8,
    /// Write strobe.
    pub wr: u8,
    /// First data pin (D0); D15 is `data_base + 15`.
    pub data_base: u8,
}

/// Number of data lines.
pub const DATA_WIDTH: u8 = 16;

impl PinMap {
    /// The PiStorm wiring.
    pub const PISTORM: Self = Self {
        txn_in_progress: 0,
        ipl_zero: 1,
        a0: 2,
        a1: 3,
        clk: 4,
        reset: 5,
        rd: 6,
        wr: 7,
        data_base: 8,
    };

    /// GPIO number of data bit `bit` (0..16).
    #[must_use]
    pub const fn data(&self, bit: u8) -> u8 {
        self.data_base + bit
    }

    /// Last GPIO number used by the bridge.
    #[must_use]
    pub const fn highest_pin(&self) -> u8 {
        self.data_base + DATA_WIDTH - 1
    }

    /// Level-register mask covering the data lane.
    #[must_use]
    pub const fn data_mask(&self) -> u32 {
        0xFFFF << self.data_base
    }

    /// Mask of every line the host drives during a strobe and clears after it:
    /// data lane, register select, reset, read and write strobes.
    #[must_use]
    pub const fn clear_mask(&self) -> u32 {
        self.data_mask()
            | (1 << self.a0)
            | (1 << self.a1)
            | (1 << self.reset)
            | (1 << self.rd)
            | (1 << self.wr)
    }

    /// Place a 16-bit word on the data lane.
    #[must_use]
    pub const fn data_bits(&self, word: u16) -> u32 {
        (word as u32) << self.data_base
    }

    /// Extract the data lane from a level word.
    #[must_use]
    pub const fn data_from_levels(&self, levels: u32) -> u16 {
        ((levels >> self.data_base) & 0xFFFF) as u16
    }

    /// Register-select bits for pseudo-register index `reg` (0..4).
    #[must_use]
    pub const fn select_bits(&self, reg: u8) -> u32 {
        (((reg & 1) as u32) << self.a0) | ((((reg >> 1) & 1) as u32) << self.a1)
    }

    /// Every GPIO the bridge owns except the clock, which is muxed to GPCLK0
    /// rather than driven as a line.
    #[must_use]
    pub fn lines(&self) -> Vec<u8> {
        (0..=self.highest_pin()).filter(|&p| p != self.clk).collect()
    }

    /// The control outputs: register select, reset and both strobes.
    #[must_use]
    pub const fn control_outputs(&self) -> [u8; 5] {
        [self.a0, self.a1, self.reset, self.rd, self.wr]
    }
}

impl Default for PinMap {
    fn default() -> Self {
        Self::PISTORM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_mask_matches_adapter_wiring() {
        // Data 8..23, A0, A1, RESET, RD, WR
        assert_eq!(PinMap::PISTORM.clear_mask(), 0x00FF_FFEC);
    }

    #[test]
    fn data_lane_round_trip() {
        let map = PinMap::PISTORM;
        let bits = map.data_bits(0xBEEF);
        assert_eq!(bits, 0x00BE_EF00);
        assert_eq!(map.data_from_levels(bits | 0x3), 0xBEEF);
    }

    #[test]
    fn select_bits_encode_a0_a1() {
        let map = PinMap::PISTORM;
        assert_eq!(map.select_bits(0), 0);
        assert_eq!(map.select_bits(1), 1 << 2);
        assert_eq!(map.select_bits(2), 1 << 3);
        assert_eq!(map.select_bits(3), (1 << 2) | (1 << 3));
    }

    #[test]
    fn lines_skip_clock() {
        let lines = PinMap::PISTORM.lines();
        assert_eq!(lines.len(), 23);
        assert!(!lines.contains(&4));
        assert_eq!(lines.last(), Some(&23));
    }
}
