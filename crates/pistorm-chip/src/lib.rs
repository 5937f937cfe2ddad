//! Wiring and protocol model for the PiStorm GPIO bus bridge.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of how the Raspberry Pi header is wired to the adapter CPLD
//! and how host strobe sequences are encoded: pin numbers, the GPIO block
//! register map, function-select words, the four pseudo-registers, bus-cycle
//! opcodes, status-register bits and the GPCLK0 clock generator.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pins`] | Logical signal → GPIO pin map, data-lane and clear masks |
//! | [`regs`] | GPIO block register offsets, function-select words |
//! | [`protocol`] | Pseudo-registers, bus-cycle opcodes, status bits, byte lanes |
//! | [`clock`] | GPCLK0 control/divider registers and bit layout |
//! | [`peri`] | Peripheral base addresses and device-tree `soc/ranges` parsing |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod peri;
pub mod pins;
pub mod protocol;
pub mod regs;
