//! GPIO character-device link
//!
//! Uses the Linux GPIO v2 uAPI: one line request covering every bridge pin
//! except the clock, then `SET_VALUES` / `GET_VALUES` / `SET_CONFIG` on the
//! returned request descriptor. No memory is mapped, so it runs without
//! root, at the cost of one syscall per pin update.
//!
//! GPCLK0 cannot be muxed onto the clock pin through this interface; the bus
//! clock has to be started by something else (a device-tree overlay, or a
//! previous MMIO session). `prepare` reports it as not ready.
//!
//! Line masks in the uAPI index the request's offset array, not GPIO
//! numbers; `LineIndex` translates between the two.

#![allow(clippy::cast_possible_truncation)]

use crate::config::{BridgeConfig, ClockConfig};
use crate::error::{PistormError, Result};
use crate::io::ioctl;
use crate::link::{BackendType, BusDirection, BusLink, ClockState, PinLevels, PINS};
use bytemuck::{Pod, Zeroable};
use pistorm_chip::protocol::PseudoRegister;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

// ── v2 uAPI (linux/gpio.h) ───────────────────────────────────────────────────

const GPIO_V2_LINES_MAX: usize = 64;
const GPIO_MAX_NAME_SIZE: usize = 32;
const GPIO_V2_LINE_NUM_ATTRS_MAX: usize = 10;

const GPIO_V2_LINE_FLAG_INPUT: u64 = 1 << 2;
const GPIO_V2_LINE_FLAG_OUTPUT: u64 = 1 << 3;

const GPIO_V2_LINE_ATTR_ID_FLAGS: u32 = 1;
const GPIO_V2_LINE_ATTR_ID_OUTPUT_VALUES: u32 = 2;

// _IOWR(0xB4, 0x07, struct gpio_v2_line_request)
const GPIO_V2_GET_LINE_IOCTL: libc::c_ulong = 0xC250_B407;
// _IOWR(0xB4, 0x0D, struct gpio_v2_line_config)
const GPIO_V2_LINE_SET_CONFIG_IOCTL: libc::c_ulong = 0xC110_B40D;
// _IOWR(0xB4, 0x0E, struct gpio_v2_line_values)
const GPIO_V2_LINE_GET_VALUES_IOCTL: libc::c_ulong = 0xC010_B40E;
// _IOWR(0xB4, 0x0F, struct gpio_v2_line_values)
const GPIO_V2_LINE_SET_VALUES_IOCTL: libc::c_ulong = 0xC010_B40F;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LineAttribute {
    id: u32,
    padding: u32,
    /// `flags`, `values` or `debounce_period_us`, by `id`.
    value: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LineConfigAttribute {
    attr: LineAttribute,
    mask: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LineConfig {
    flags: u64,
    num_attrs: u32,
    padding: [u32; 5],
    attrs: [LineConfigAttribute; GPIO_V2_LINE_NUM_ATTRS_MAX],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LineRequest {
    offsets: [u32; GPIO_V2_LINES_MAX],
    consumer: [u8; GPIO_MAX_NAME_SIZE],
    config: LineConfig,
    num_lines: u32,
    event_buffer_size: u32,
    padding: [u32; 5],
    fd: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
struct LineValues {
    bits: u64,
    mask: u64,
}

const _: () = assert!(std::mem::size_of::<LineConfig>() == 272);
const _: () = assert!(std::mem::size_of::<LineRequest>() == 592);

// ── Line index translation ───────────────────────────────────────────────────

/// Mapping between GPIO numbers and positions in the line request.
#[derive(Debug, Clone)]
struct LineIndex {
    gpios: Vec<u8>,
}

impl LineIndex {
    fn new(gpios: Vec<u8>) -> Self {
        Self { gpios }
    }

    /// GPIO-number mask → request-index mask.
    fn to_lines(&self, gpio_mask: u32) -> u64 {
        self.gpios
            .iter()
            .enumerate()
            .filter(|&(_, &g)| gpio_mask & (1u32 << g) != 0)
            .fold(0u64, |acc, (i, _)| acc | (1u64 << i))
    }

    /// Request-index bits → GPIO-number bits.
    fn to_gpios(&self, line_bits: u64) -> u32 {
        self.gpios
            .iter()
            .enumerate()
            .filter(|&(i, _)| line_bits & (1u64 << i) != 0)
            .fold(0u32, |acc, (_, &g)| acc | (1u32 << g))
    }

    fn all(&self) -> u64 {
        (1u64 << self.gpios.len()) - 1
    }
}

fn control_mask() -> u32 {
    PINS.control_outputs()
        .iter()
        .fold(0u32, |acc, &pin| acc | (1u32 << pin))
}

// ── Link ─────────────────────────────────────────────────────────────────────

/// GPIO link over a v2 line request.
#[derive(Debug)]
pub struct GpioChipLink {
    chip: PathBuf,
    request: OwnedFd,
    index: LineIndex,
    direction: BusDirection,
}

impl GpioChipLink {
    /// Request every bridge line from the configured chip.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the chip cannot be opened or the lines
    /// are busy.
    pub fn open(config: &BridgeConfig) -> Result<Self> {
        Self::open_chip(&config.gpiochip)
    }

    fn open_chip(path: &Path) -> Result<Self> {
        let chip: File = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| PistormError::device_unavailable(format!("cannot open {}: {e}", path.display())))?;

        let index = LineIndex::new(PINS.lines());

        let mut req = LineRequest::zeroed();
        for (slot, &gpio) in req.offsets.iter_mut().zip(&index.gpios) {
            *slot = u32::from(gpio);
        }
        let consumer = b"pistorm";
        req.consumer[..consumer.len()].copy_from_slice(consumer);
        req.num_lines = index.gpios.len() as u32;
        req.config = line_config(&index, BusDirection::Input);

        ioctl(chip.as_fd(), GPIO_V2_GET_LINE_IOCTL, &mut req).map_err(|e| {
            PistormError::device_unavailable(format!("line request on {} failed: {e}", path.display()))
        })?;

        // SAFETY: GET_LINE succeeded, so req.fd is a fresh descriptor the
        // kernel handed to us and nothing else owns.
        let request = unsafe { OwnedFd::from_raw_fd(req.fd) };

        tracing::info!("Requested {} lines from {}", index.gpios.len(), path.display());
        Ok(Self {
            chip: path.to_path_buf(),
            request,
            index,
            direction: BusDirection::Input,
        })
    }

    fn output_gpios(&self) -> u32 {
        match self.direction {
            BusDirection::Input => control_mask(),
            BusDirection::Output => control_mask() | PINS.data_mask(),
        }
    }

    /// Drive `high` high and `low` low; lines that are not outputs are skipped.
    fn drive(&mut self, high: u32, low: u32) {
        let outputs = self.output_gpios();
        let mut values = LineValues {
            bits: self.index.to_lines(high & outputs),
            mask: self.index.to_lines((high | low) & outputs),
        };
        if values.mask == 0 {
            return;
        }
        if let Err(e) = ioctl(self.request.as_fd(), GPIO_V2_LINE_SET_VALUES_IOCTL, &mut values) {
            tracing::warn!("{}: SET_VALUES failed: {e}", self.chip.display());
        }
    }
}

fn line_config(index: &LineIndex, direction: BusDirection) -> LineConfig {
    let outputs = match direction {
        BusDirection::Input => control_mask(),
        BusDirection::Output => control_mask() | PINS.data_mask(),
    };
    let output_lines = index.to_lines(outputs);

    let mut config = LineConfig::zeroed();
    config.flags = GPIO_V2_LINE_FLAG_INPUT;
    config.num_attrs = 2;
    config.attrs[0] = LineConfigAttribute {
        attr: LineAttribute {
            id: GPIO_V2_LINE_ATTR_ID_FLAGS,
            padding: 0,
            value: GPIO_V2_LINE_FLAG_OUTPUT,
        },
        mask: output_lines,
    };
    config.attrs[1] = LineConfigAttribute {
        attr: LineAttribute {
            id: GPIO_V2_LINE_ATTR_ID_OUTPUT_VALUES,
            padding: 0,
            value: 0,
        },
        mask: output_lines,
    };
    config
}

impl BusLink for GpioChipLink {
    fn backend_type(&self) -> BackendType {
        BackendType::GpioChip
    }

    fn direction(&self) -> BusDirection {
        self.direction
    }

    fn program_direction(&mut self, direction: BusDirection) {
        let mut config = line_config(&self.index, direction);
        match ioctl(self.request.as_fd(), GPIO_V2_LINE_SET_CONFIG_IOCTL, &mut config) {
            Ok(_) => self.direction = direction,
            Err(e) => tracing::warn!("{}: SET_CONFIG {direction:?} failed: {e}", self.chip.display()),
        }
    }

    fn strobe_write(&mut self, payload: u16, reg: PseudoRegister) {
        let wr = 1 << PINS.wr;
        self.drive(PINS.data_bits(payload) | PINS.select_bits(reg.index()), 0);
        self.drive(wr, 0);
        self.drive(0, wr);
        self.drive(0, PINS.clear_mask());
    }

    fn assert_read(&mut self, reg: PseudoRegister) {
        self.drive(PINS.select_bits(reg.index()), 0);
        self.drive(1 << PINS.rd, 0);
    }

    fn release(&mut self) {
        self.drive(0, PINS.clear_mask());
    }

    fn sample_levels(&mut self) -> PinLevels {
        let mut values = LineValues {
            bits: 0,
            mask: self.index.all(),
        };
        match ioctl(self.request.as_fd(), GPIO_V2_LINE_GET_VALUES_IOCTL, &mut values) {
            Ok(_) => PinLevels::from_gplev0(self.index.to_gpios(values.bits)),
            Err(e) => {
                tracing::warn!("{}: GET_VALUES failed: {e}", self.chip.display());
                // Report a pending handshake so the engine times out rather
                // than trusting a fabricated level word.
                PinLevels::from_gplev0(1 << PINS.txn_in_progress)
            }
        }
    }

    fn prepare(&mut self, _clock: &ClockConfig) -> ClockState {
        self.release();
        if self.direction != BusDirection::Input {
            self.program_direction(BusDirection::Input);
        }
        ClockState::NotReady(
            "GPCLK0 cannot be muxed through the GPIO character device; the bus clock must be supplied externally"
                .into(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uapi_layout() {
        assert_eq!(std::mem::size_of::<LineAttribute>(), 16);
        assert_eq!(std::mem::size_of::<LineConfigAttribute>(), 24);
        assert_eq!(std::mem::size_of::<LineValues>(), 16);
    }

    #[test]
    fn line_index_skips_clock() {
        let index = LineIndex::new(PINS.lines());
        // GPIO 0..3 keep their position; GPIO 5 is line 4.
        assert_eq!(index.to_lines(1 << 3), 1 << 3);
        assert_eq!(index.to_lines(1 << 5), 1 << 4);
        assert_eq!(index.to_lines(1 << 4), 0);
        assert_eq!(index.to_gpios(1 << 4), 1 << 5);
        assert_eq!(index.to_gpios(index.to_lines(0x00FF_FFEF)), 0x00FF_FFEF);
        assert_eq!(index.all().count_ones(), 23);
    }

    #[test]
    fn output_config_covers_data_lane() {
        let index = LineIndex::new(PINS.lines());
        let input = line_config(&index, BusDirection::Input);
        let output = line_config(&index, BusDirection::Output);
        assert_eq!(input.attrs[0].mask.count_ones(), 5);
        assert_eq!(output.attrs[0].mask.count_ones(), 21);
        assert_eq!(input.flags, GPIO_V2_LINE_FLAG_INPUT);
    }

    #[test]
    #[ignore] // Requires a GPIO chip with free lines 0-23
    fn open_chip0() {
        let link = GpioChipLink::open(&BridgeConfig::default()).unwrap();
        assert_eq!(link.direction(), BusDirection::Input);
    }
}
