//! Register-mapped GPIO link
//!
//! Drives the pins through the GPIO block mapped from `/dev/mem` (GPIO and
//! GPCLK0) or, without root, `/dev/gpiomem` (GPIO only). Every strobe is a
//! handful of volatile stores:
//!
//! ```text
//! GPSET0 = data << 8 | reg << 2     payload and register select
//! GPSET0 = 1 << WR                  write strobe high
//! GPCLR0 = 1 << WR                  write strobe low
//! GPCLR0 = clear mask               drop payload, select, RD, WR
//! ```

use crate::config::{BridgeConfig, ClockConfig};
use crate::error::{PistormError, Result};
use crate::link::{BackendType, BusDirection, BusLink, ClockState, PinLevels, PINS};
use crate::mmio::{ClockBlock, ClockReg, GpioBlock, GpioReg};
use pistorm_chip::clock;
use pistorm_chip::protocol::PseudoRegister;
use pistorm_chip::regs::FunctionSelect;
use rustix::fs::OFlags;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};

const DEV_MEM: &str = "/dev/mem";
const DEV_GPIOMEM: &str = "/dev/gpiomem";

/// Extra WR pulses for STATUS writes; the adapter latches STATUS slower.
const STATUS_WR_HOLD: usize = 2;
/// RD assertions before sampling STATUS.
const STATUS_RD_HOLD: usize = 4;

/// Bound on each BUSY wait while reprogramming GPCLK0.
const CLOCK_BUSY_WAIT: Duration = Duration::from_millis(10);

/// GPIO link over mapped peripheral registers.
#[derive(Debug)]
pub struct MmioLink {
    gpio: GpioBlock,
    clock: Option<ClockBlock>,
    fsel: FunctionSelect,
    direction: BusDirection,
}

impl MmioLink {
    /// Map `/dev/mem` at the configured peripheral base, falling back to
    /// `/dev/gpiomem` (no clock control) when `/dev/mem` is not accessible.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if neither node can be opened and mapped.
    pub fn open(config: &BridgeConfig) -> Result<Self> {
        match Self::open_mem(config.resolved_peri_base()) {
            Ok(link) => Ok(link),
            Err(mem_err) => {
                tracing::debug!("{DEV_MEM}: {mem_err}; trying {DEV_GPIOMEM}");
                Self::open_gpiomem().map_err(|e| {
                    PistormError::device_unavailable(format!("{DEV_MEM}: {mem_err}; {DEV_GPIOMEM}: {e}"))
                })
            }
        }
    }

    fn open_mem(peri_base: u32) -> Result<Self> {
        #[allow(clippy::cast_possible_wrap)]
        let sync = OFlags::SYNC.bits() as i32;

        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync)
            .open(DEV_MEM)
            .map_err(|e| PistormError::device_unavailable(format!("cannot open {DEV_MEM}: {e}")))?;

        let gpio = GpioBlock::map_mem(&mem, peri_base)?;
        let clock = ClockBlock::map_mem(&mem, peri_base)?;

        tracing::info!("Mapped GPIO and GPCLK at peripheral base {peri_base:#010x}");
        Ok(Self::from_blocks(gpio, Some(clock)))
    }

    fn open_gpiomem() -> Result<Self> {
        let file: File = OpenOptions::new()
            .read(true)
            .write(true)
            .open(DEV_GPIOMEM)
            .map_err(|e| PistormError::device_unavailable(format!("cannot open {DEV_GPIOMEM}: {e}")))?;

        let gpio = GpioBlock::map_gpiomem(&file)?;
        tracing::info!("Mapped GPIO through {DEV_GPIOMEM}; bus clock must already be running");
        Ok(Self::from_blocks(gpio, None))
    }

    fn from_blocks(gpio: GpioBlock, clock: Option<ClockBlock>) -> Self {
        Self {
            gpio,
            clock,
            fsel: FunctionSelect::for_pins(&PINS),
            direction: BusDirection::Input,
        }
    }

    fn start_clock(&mut self, config: &ClockConfig) -> ClockState {
        let Some(cm) = self.clock.as_mut() else {
            return ClockState::NotReady(format!(
                "{DEV_GPIOMEM} does not expose the clock manager"
            ));
        };

        let source = match config.validate() {
            Ok(source) => source,
            Err(e) => return ClockState::NotReady(e.to_string()),
        };

        cm.write(ClockReg::Gp0Ctl, clock::ctl_kill());
        if !wait_for(|| cm.read(ClockReg::Gp0Ctl) & clock::BUSY == 0) {
            return ClockState::NotReady("GPCLK0 stayed BUSY after KILL".into());
        }

        cm.write(ClockReg::Gp0Div, clock::div_word(config.divisor));
        cm.write(ClockReg::Gp0Ctl, clock::ctl_enable(source));

        if !wait_for(|| cm.read(ClockReg::Gp0Ctl) & clock::BUSY != 0) {
            return ClockState::NotReady("GPCLK0 never reported BUSY after ENAB".into());
        }

        tracing::info!(
            "GPCLK0 running: ctl={:#010x} div={:#010x}",
            cm.read(ClockReg::Gp0Ctl),
            cm.read(ClockReg::Gp0Div)
        );
        ClockState::Running
    }
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !done() {
        if start.elapsed() >= CLOCK_BUSY_WAIT {
            return false;
        }
        std::thread::sleep(Duration::from_micros(10));
    }
    true
}

impl BusLink for MmioLink {
    fn backend_type(&self) -> BackendType {
        BackendType::Mmio
    }

    fn direction(&self) -> BusDirection {
        self.direction
    }

    fn program_direction(&mut self, direction: BusDirection) {
        self.gpio
            .write_fsel(self.fsel.words(direction == BusDirection::Output));
        self.direction = direction;
    }

    fn strobe_write(&mut self, payload: u16, reg: PseudoRegister) {
        let hold = if reg == PseudoRegister::Status { STATUS_WR_HOLD } else { 1 };

        self.gpio
            .write(GpioReg::Set0, PINS.data_bits(payload) | PINS.select_bits(reg.index()));
        for _ in 0..hold {
            self.gpio.write(GpioReg::Set0, 1 << PINS.wr);
        }
        self.gpio.write(GpioReg::Clr0, 1 << PINS.wr);
        self.gpio.write(GpioReg::Clr0, PINS.clear_mask());
    }

    fn assert_read(&mut self, reg: PseudoRegister) {
        let hold = if reg == PseudoRegister::Status { STATUS_RD_HOLD } else { 1 };

        self.gpio.write(GpioReg::Set0, PINS.select_bits(reg.index()));
        for _ in 0..hold {
            self.gpio.write(GpioReg::Set0, 1 << PINS.rd);
        }
    }

    fn release(&mut self) {
        self.gpio.write(GpioReg::Clr0, PINS.clear_mask());
    }

    fn sample_levels(&mut self) -> PinLevels {
        PinLevels {
            gplev0: self.gpio.read(GpioReg::Lev0),
            gplev1: self.gpio.read(GpioReg::Lev1),
        }
    }

    fn prepare(&mut self, clock: &ClockConfig) -> ClockState {
        let state = self.start_clock(clock);
        self.gpio.write(GpioReg::Clr0, PINS.clear_mask());
        // The input words also mux the clock pin to GPCLK0.
        self.program_direction(BusDirection::Input);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires hardware (root and a PiStorm adapter)
    fn open_and_prepare() {
        let mut link = MmioLink::open(&BridgeConfig::default()).unwrap();
        let state = link.prepare(&ClockConfig::default());
        println!("clock: {state:?}");
        println!("levels: {:?}", link.sample_levels());
        assert_eq!(link.direction(), BusDirection::Input);
    }
}
