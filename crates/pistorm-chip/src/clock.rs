//! GPCLK0 general-purpose clock generator.
//!
//! The adapter CPLD is clocked from GPIO 4 muxed to GPCLK0. Bringing the
//! clock up is a fixed sequence on two registers of the clock-manager block:
//!
//! ```text
//! CM_GP0CTL  PASSWD | KILL            stop the generator
//!            wait until BUSY clears
//! CM_GP0DIV  PASSWD | div << 12       integer divisor
//! CM_GP0CTL  PASSWD | src | ENAB      select source and start
//!            wait until BUSY sets
//! ```
//!
//! Every write must carry [`PASSWD`] in bits 31..24 or the hardware ignores it.

// ── Block placement ──────────────────────────────────────────────────────────

/// Offset of the clock-manager block from the peripheral base.
pub const GPCLK_BLOCK_OFFSET: u32 = 0x0010_1000;

/// Bytes mapped for the clock-manager block (one page).
pub const GPCLK_BLOCK_LEN: usize = 0x1000;

/// GPCLK0 control register.
pub const CM_GP0CTL: usize = 0x70;

/// GPCLK0 divider register.
pub const CM_GP0DIV: usize = 0x74;

// ── Bit layout ───────────────────────────────────────────────────────────────

/// Write password.
pub const PASSWD: u32 = 0x5A00_0000;
/// Enable the generator.
pub const ENAB: u32 = 1 << 4;
/// Stop the generator immediately.
pub const KILL: u32 = 1 << 5;
/// Generator running.
pub const BUSY: u32 = 1 << 7;

/// Shift of the integer divisor inside `CM_GP0DIV`.
pub const DIVI_SHIFT: u32 = 12;
/// Largest integer divisor (12-bit field).
pub const DIVI_MAX: u32 = 0xFFF;

/// Default clock source (PLLC).
pub const DEFAULT_SOURCE: u32 = 5;
/// Default integer divisor.
pub const DEFAULT_DIVISOR: u32 = 6;

/// Clock sources selectable in `CM_GP0CTL` bits 3..0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClockSource {
    /// Ground (clock off).
    Gnd = 0,
    /// 19.2 MHz crystal.
    Oscillator = 1,
    /// PLLA.
    PllA = 4,
    /// PLLC.
    PllC = 5,
    /// PLLD.
    PllD = 6,
    /// HDMI auxiliary.
    HdmiAux = 7,
}

impl ClockSource {
    /// Decode a source number; unknown values yield `None`.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Gnd),
            1 => Some(Self::Oscillator),
            4 => Some(Self::PllA),
            5 => Some(Self::PllC),
            6 => Some(Self::PllD),
            7 => Some(Self::HdmiAux),
            _ => None,
        }
    }
}

/// Whether `divisor` fits the integer divider field.
#[must_use]
pub const fn divisor_valid(divisor: u32) -> bool {
    divisor >= 1 && divisor <= DIVI_MAX
}

/// `CM_GP0CTL` word that stops the generator.
#[must_use]
pub const fn ctl_kill() -> u32 {
    PASSWD | KILL
}

/// `CM_GP0CTL` word that starts the generator from `source`.
#[must_use]
pub const fn ctl_enable(source: ClockSource) -> u32 {
    PASSWD | (source as u32 & 0xF) | ENAB
}

/// `CM_GP0DIV` word for an integer divisor.
#[must_use]
pub const fn div_word(divisor: u32) -> u32 {
    PASSWD | ((divisor & DIVI_MAX) << DIVI_SHIFT)
}
