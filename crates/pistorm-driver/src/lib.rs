//! Pure Rust bridge between a Raspberry Pi GPIO header and a 68000-family
//! bus adapter.
//!
//! The adapter's CPLD exposes four pseudo-registers (DATA, ADDR_LO, ADDR_HI,
//! STATUS) over a 16-bit data bus, a 2-bit register select, RD/WR strobes
//! and one handshake line. This crate turns that into word, byte, long and
//! status transactions on the remote bus, plus reset and batching.
//!
//! # Layers
//!
//! ```text
//! BusControl        — command surface (BusDevice in-process, KernelClient via ioctl)
//!   └─ TransactionEngine — bus cycles, handshake waits, timeouts
//!        └─ BusLink      — pin driver (Mmio, GpioChip, Simulated)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use pistorm_driver::{connect, BridgeConfig, BusControl};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = connect(BridgeConfig::from_env()?)?;
//! bus.write16(0x00DF_F180, 0x4000)?;
//! let id = bus.read16(0x00DF_F004)?;
//! println!("{:?}: {id:#06x}", bus.backend_type());
//! # Ok(())
//! # }
//! ```
//!
//! # Simulated adapter
//!
//! ```
//! use pistorm_driver::{BridgeConfig, BusControl, BusDevice};
//!
//! let (device, sim) = BusDevice::simulated(BridgeConfig::simulated());
//! device.setup().unwrap();
//! device.write16(0x1000, 0xBEEF).unwrap();
//! assert_eq!(device.read16(0x1000).unwrap(), 0xBEEF);
//! assert_eq!(sim.peek_word(0x1000), 0xBEEF);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod abi;
pub mod backends;
mod batch;
mod capabilities;
mod config;
mod control;
mod device;
mod engine;
mod error;
mod io;
mod kernel;
mod link;
pub mod mmio;
mod op;
pub mod reset;

/// Wiring and protocol constants (re-exported from pistorm-chip).
pub mod chip {
    pub use pistorm_chip::pins::PinMap;
    pub use pistorm_chip::protocol::{status, BusCycle, ByteLane, PseudoRegister};
    pub use pistorm_chip::{clock, peri};
}

pub use batch::{run_batch, validate_count, MAX_BATCH_OPS};
pub use capabilities::{Capabilities, CapabilityQuery, ABI_VERSION};
pub use config::{
    detect_peri_base, parse_hex, BridgeConfig, ClockConfig, ResetConfig, TimingPolicy,
    DEFAULT_GPIOCHIP, DEFAULT_KERNEL_DEVICE,
};
pub use control::{connect, BusControl};
pub use device::{BusDevice, Command, DeviceEngine, LinkOpener, Reply};
pub use engine::{BusStats, TransactionEngine, TxnPhase};
pub use error::{PistormError, Result};
pub use kernel::KernelClient;
pub use link::{
    open_link, BackendSelection, BackendType, BusDirection, BusLink, ClockState, PinLevels, PINS,
};
pub use op::{BusOp, OpFlags, Width};
pub use reset::{ResetOutcome, ResetPhase};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        connect, BackendSelection, BridgeConfig, BusControl, BusDevice, BusOp, Capabilities,
        PistormError, ResetOutcome, Result, Width,
    };
}
