//! `BusLink` implementations
//!
//! Three backends available:
//! - **Mmio**: GPIO/GPCLK registers mapped from `/dev/mem` (or `/dev/gpiomem`)
//! - **GpioChip**: Linux GPIO character device, no mapped memory
//! - **Simulated**: software model of the adapter, for CI and fault injection
//!
//! The bridge kernel driver owns its own pins and is reached through
//! [`crate::KernelClient`] instead.

pub mod direct;
pub mod gpiochip;
pub mod simulated;

pub use direct::MmioLink;
pub use gpiochip::GpioChipLink;
pub use simulated::{
    CycleRecord, HandshakeMode, SimHandle, SimulatedLink, StatusEvent, HISTORY_LIMIT,
};
