//! Pin-level link to the adapter
//!
//! `BusLink` is the only layer that touches pins. It knows how to switch the
//! data lane, pulse a strobe and sample levels; it knows nothing about
//! transactions, timeouts or addresses. Failure is never reported here: a
//! broken link shows up one layer up as a handshake that never clears.

use crate::backends::{GpioChipLink, MmioLink, SimulatedLink};
use crate::config::{BridgeConfig, ClockConfig};
use crate::error::{PistormError, Result};
use pistorm_chip::pins::PinMap;
use pistorm_chip::protocol::PseudoRegister;
use std::fmt::Debug;
use std::str::FromStr;

/// Wiring every backend drives.
pub const PINS: PinMap = PinMap::PISTORM;

/// Direction of the 16-bit data lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusDirection {
    /// Host samples the lane. The idle state.
    #[default]
    Input,
    /// Host drives the lane.
    Output,
}

/// Raw level snapshot of GPIO 0..53.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinLevels {
    /// GPIO 0-31.
    pub gplev0: u32,
    /// GPIO 32-53.
    pub gplev1: u32,
}

impl PinLevels {
    /// Snapshot from a GPIO 0-31 level word.
    pub const fn from_gplev0(gplev0: u32) -> Self {
        Self { gplev0, gplev1: 0 }
    }

    /// Whether the adapter is still running a bus cycle.
    pub const fn handshake_pending(&self) -> bool {
        self.gplev0 & (1 << PINS.txn_in_progress) != 0
    }

    /// Whether the interrupt line reports level zero.
    pub const fn ipl_zero(&self) -> bool {
        self.gplev0 & (1 << PINS.ipl_zero) != 0
    }

    /// The 16-bit data lane.
    pub const fn data(&self) -> u16 {
        PINS.data_from_levels(self.gplev0)
    }
}

/// Outcome of bringing the bus clock up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockState {
    /// GPCLK0 is running on the clock pin.
    Running,
    /// The backend could not start the clock; transactions will likely time out.
    NotReady(String),
}

impl ClockState {
    /// Whether the clock is running.
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Pin-level access to the adapter.
///
/// Implementations must keep the data lane direction they report in
/// `direction()` in sync with the hardware, and may assume the caller never
/// strobes while the lane is an input or samples while it is an output.
pub trait BusLink: Debug + Send {
    /// Backend identifier.
    fn backend_type(&self) -> BackendType;

    /// Current data lane direction.
    fn direction(&self) -> BusDirection;

    /// Reprogram the whole data lane. Called only when the direction changes.
    fn program_direction(&mut self, direction: BusDirection);

    /// Drive `payload` onto the lane with register select `reg`, pulse WR high
    /// then low, then clear every non-persistent control line.
    fn strobe_write(&mut self, payload: u16, reg: PseudoRegister);

    /// Select `reg` and hold RD asserted until `release`.
    fn assert_read(&mut self, reg: PseudoRegister);

    /// Clear register select, RD and WR.
    fn release(&mut self);

    /// Sample the level registers.
    fn sample_levels(&mut self) -> PinLevels;

    /// Program the pin functions and start the bus clock. Leaves the lane as input.
    fn prepare(&mut self, clock: &ClockConfig) -> ClockState;

    /// Switch the data lane if it is not already `direction`.
    ///
    /// Returns whether the lane was reprogrammed.
    fn configure_direction(&mut self, direction: BusDirection) -> bool {
        if self.direction() == direction {
            return false;
        }
        self.program_direction(direction);
        true
    }
}

impl<L: BusLink + ?Sized> BusLink for Box<L> {
    fn backend_type(&self) -> BackendType {
        (**self).backend_type()
    }

    fn direction(&self) -> BusDirection {
        (**self).direction()
    }

    fn program_direction(&mut self, direction: BusDirection) {
        (**self).program_direction(direction);
    }

    fn strobe_write(&mut self, payload: u16, reg: PseudoRegister) {
        (**self).strobe_write(payload, reg);
    }

    fn assert_read(&mut self, reg: PseudoRegister) {
        (**self).assert_read(reg);
    }

    fn release(&mut self) {
        (**self).release();
    }

    fn sample_levels(&mut self) -> PinLevels {
        (**self).sample_levels()
    }

    fn prepare(&mut self, clock: &ClockConfig) -> ClockState {
        (**self).prepare(clock)
    }

    fn configure_direction(&mut self, direction: BusDirection) -> bool {
        (**self).configure_direction(direction)
    }
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// GPIO and GPCLK registers mapped from `/dev/mem` or `/dev/gpiomem`
    Mmio,

    /// Linux GPIO character device
    GpioChip,

    /// Bridge kernel driver (`/dev/pistorm*`)
    Kernel,

    /// Software model of the adapter, no hardware required
    Simulated,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mmio => write!(f, "MMIO"),
            Self::GpioChip => write!(f, "gpiochip"),
            Self::Kernel => write!(f, "Kernel"),
            Self::Simulated => write!(f, "Simulated"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendSelection {
    /// Automatically select best available
    #[default]
    Auto,

    /// Force the kernel driver
    Kernel,

    /// Force register-mapped GPIO
    Mmio,

    /// Force the GPIO character device
    GpioChip,

    /// Force the simulated adapter
    Simulated,
}

impl FromStr for BackendSelection {
    type Err = PistormError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "kernel" => Ok(Self::Kernel),
            "mmio" | "mem" => Ok(Self::Mmio),
            "gpiochip" | "cdev" => Ok(Self::GpioChip),
            "sim" | "simulated" => Ok(Self::Simulated),
            other => Err(PistormError::invalid_argument(format!(
                "unknown backend {other:?} (expected auto, kernel, mmio, gpiochip or sim)"
            ))),
        }
    }
}

/// Open an in-process pin link.
///
/// `Auto` tries register-mapped GPIO first, then the GPIO character device.
/// The kernel driver is not a pin link; reach it through [`crate::connect`].
///
/// # Errors
///
/// Returns `DeviceUnavailable` if no requested backend can be opened, or
/// `InvalidArgument` for `Kernel`.
pub fn open_link(selection: BackendSelection, config: &BridgeConfig) -> Result<Box<dyn BusLink>> {
    match selection {
        BackendSelection::Auto => {
            match MmioLink::open(config) {
                Ok(link) => {
                    tracing::info!("Using MMIO link");
                    return Ok(Box::new(link));
                }
                Err(e) => tracing::debug!("MMIO link unavailable: {e}"),
            }

            tracing::info!("MMIO unavailable, using {}", config.gpiochip.display());
            GpioChipLink::open(config).map(|l| Box::new(l) as Box<dyn BusLink>)
        }

        BackendSelection::Mmio => MmioLink::open(config).map(|l| Box::new(l) as Box<dyn BusLink>),

        BackendSelection::GpioChip => {
            GpioChipLink::open(config).map(|l| Box::new(l) as Box<dyn BusLink>)
        }

        BackendSelection::Simulated => {
            // Nobody holds a handle to read the traffic logs back.
            let link = SimulatedLink::new();
            link.handle().set_recording(false);
            Ok(Box::new(link))
        }

        BackendSelection::Kernel => Err(PistormError::invalid_argument(
            "the kernel driver owns the pins; open it with connect()",
        )),
    }
}
