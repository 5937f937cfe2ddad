//! GPIO block register map (BCM2835 family).
//!
//! ```text
//! 0x00  GPFSEL0   function select, GPIO 0-9   (3 bits per pin)
//! 0x04  GPFSEL1   function select, GPIO 10-19
//! 0x08  GPFSEL2   function select, GPIO 20-29
//! 0x1c  GPSET0    write 1 to drive high
//! 0x28  GPCLR0    write 1 to drive low
//! 0x34  GPLEV0    pin levels 0-31
//! 0x38  GPLEV1    pin levels 32-53
//! ```
//!
//! The bridge never reprograms a single data pin: the three function-select
//! words are precomputed for "data lane in" and "data lane out" and written
//! as a unit.

use crate::pins::PinMap;

// ── Block placement ──────────────────────────────────────────────────────────

/// Offset of the GPIO block from the peripheral base.
pub const GPIO_BLOCK_OFFSET: u32 = 0x0020_0000;

/// Bytes mapped for the GPIO block (one page).
pub const GPIO_BLOCK_LEN: usize = 0x1000;

// ── Register offsets ─────────────────────────────────────────────────────────

/// Function select, GPIO 0-9.
pub const GPFSEL0: usize = 0x00;
/// Function select, GPIO 10-19.
pub const GPFSEL1: usize = 0x04;
/// Function select, GPIO 20-29.
pub const GPFSEL2: usize = 0x08;
/// Output set, GPIO 0-31.
pub const GPSET0: usize = 0x1C;
/// Output clear, GPIO 0-31.
pub const GPCLR0: usize = 0x28;
/// Pin level, GPIO 0-31.
pub const GPLEV0: usize = 0x34;
/// Pin level, GPIO 32-53.
pub const GPLEV1: usize = 0x38;

// ── Function select codes ────────────────────────────────────────────────────

/// Function-select codes (3 bits per pin).
pub mod fsel {
    /// Plain input.
    pub const INPUT: u32 = 0b000;
    /// Plain output.
    pub const OUTPUT: u32 = 0b001;
    /// Alternate function 0 (GPCLK0 on GPIO 4).
    pub const ALT0: u32 = 0b100;
}

/// Set the 3-bit function of `pin` inside its function-select word.
#[must_use]
pub const fn set_fsel(word: u32, pin: u8, func: u32) -> u32 {
    let shift = (pin as u32 % 10) * 3;
    (word & !(0b111 << shift)) | ((func & 0b111) << shift)
}

/// Precomputed GPFSEL0..2 words for both data-lane directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSelect {
    /// Data lane as inputs; control outputs and clock configured.
    pub input: [u32; 3],
    /// Data lane as outputs; control outputs and clock configured.
    pub output: [u32; 3],
}

impl FunctionSelect {
    /// Compute the function-select words for a pin map.
    #[must_use]
    pub const fn for_pins(map: &PinMap) -> Self {
        let mut input = [0u32; 3];

        input[(map.a0 / 10) as usize] = set_fsel(input[(map.a0 / 10) as usize], map.a0, fsel::OUTPUT);
        input[(map.a1 / 10) as usize] = set_fsel(input[(map.a1 / 10) as usize], map.a1, fsel::OUTPUT);
        input[(map.clk / 10) as usize] = set_fsel(input[(map.clk / 10) as usize], map.clk, fsel::ALT0);
        input[(map.reset / 10) as usize] =
            set_fsel(input[(map.reset / 10) as usize], map.reset, fsel::OUTPUT);
        input[(map.rd / 10) as usize] = set_fsel(input[(map.rd / 10) as usize], map.rd, fsel::OUTPUT);
        input[(map.wr / 10) as usize] = set_fsel(input[(map.wr / 10) as usize], map.wr, fsel::OUTPUT);

        let mut output = input;
        let mut bit = 0;
        while bit < crate::pins::DATA_WIDTH {
            let pin = map.data(bit);
            let idx = (pin / 10) as usize;
            output[idx] = set_fsel(output[idx], pin, fsel::OUTPUT);
            bit += 1;
        }

        Self { input, output }
    }

    /// Words for the requested direction.
    #[must_use]
    pub const fn words(&self, output: bool) -> [u32; 3] {
        if output {
            self.output
        } else {
            self.input
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_select_matches_known_words() {
        // GPFSEL words used by every PiStorm host implementation.
        let fs = FunctionSelect::for_pins(&PinMap::PISTORM);
        assert_eq!(fs.input, [0x0024_C240, 0x0000_0000, 0x0000_0000]);
        assert_eq!(fs.output, [0x0924_C240, 0x0924_9249, 0x0000_0249]);
    }

    #[test]
    fn set_fsel_replaces_only_target_field() {
        let word = 0xFFFF_FFFF;
        let updated = set_fsel(word, 13, fsel::INPUT);
        assert_eq!(updated, 0xFFFF_FFFF & !(0b111 << 9));
    }

    #[test]
    fn register_offsets_non_overlapping() {
        assert_ne!(GPSET0, GPCLR0);
        assert_ne!(GPLEV0, GPLEV1);
        assert!(GPLEV1 + 4 <= GPIO_BLOCK_LEN);
    }
}
