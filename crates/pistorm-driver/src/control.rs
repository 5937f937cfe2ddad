//! Client surface shared by the in-process device and the kernel client
//!
//! Front-ends (CPU emulation loops, interrupt pollers, tools) program against
//! [`BusControl`] and do not care whether the pins are driven in this
//! process or by the kernel driver.

use crate::batch::MAX_BATCH_OPS;
use crate::capabilities::{Capabilities, CapabilityQuery};
use crate::config::{BridgeConfig, ResetConfig};
use crate::device::BusDevice;
use crate::error::{PistormError, Result};
use crate::kernel::KernelClient;
use crate::link::{BackendSelection, BackendType, PinLevels};
use crate::op::{BusOp, Width};
use crate::reset::{self, ResetOutcome};
use pistorm_chip::protocol::status;

/// Command surface of one bridge.
///
/// Every method is serialized against every other call on the same bridge.
pub trait BusControl: Send + Sync {
    /// Backend driving the pins.
    fn backend_type(&self) -> BackendType;

    /// SETUP: program pins and the bus clock.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the link cannot be opened.
    fn setup(&self) -> Result<()>;

    /// RESET_SM.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` before a successful SETUP.
    fn reset_state_machine(&self) -> Result<()>;

    /// PULSE_RESET.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` before a successful SETUP.
    fn pulse_reset(&self) -> Result<()>;

    /// GET_PINS: raw level snapshot, for debugging.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` before a successful SETUP.
    fn pins(&self) -> Result<PinLevels>;

    /// QUERY.
    ///
    /// # Errors
    ///
    /// Returns an error only if the responder cannot be reached.
    fn query(&self) -> Result<CapabilityQuery>;

    /// BUSOP: execute one op, filling `op.value` for reads.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the handshake never clears.
    fn bus_op(&self, op: &mut BusOp) -> Result<()>;

    /// BATCH: execute `ops` in order, filling read results.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty or oversized batch, or
    /// `BatchFailed` on the first failing op.
    fn batch(&self, ops: &mut [BusOp]) -> Result<()>;

    /// Interrupt priority level (0..=7).
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the bus does not go idle.
    fn interrupt_level(&self) -> Result<u8> {
        if self.pins()?.ipl_zero() {
            return Ok(0);
        }
        Ok(status::ipl(self.read_status()?))
    }

    /// Reset and wait for the bus; see [`reset::reset_and_wait`].
    ///
    /// # Errors
    ///
    /// Returns errors from the control surface, never from a silent bus.
    fn reset_and_wait(&self, tag: &str, config: &ResetConfig) -> Result<ResetOutcome> {
        reset::reset_and_wait(self, tag, config)
    }

    /// Run any number of ops, as BATCH when offered and as single BUSOPs
    /// otherwise. Large slices are split into maximal batches.
    ///
    /// # Errors
    ///
    /// Returns `BatchFailed` with `completed` counted from the start of
    /// `ops`; ops from that index on are left as submitted.
    fn submit(&self, ops: &mut [BusOp]) -> Result<()> {
        if !self.query()?.supports(Capabilities::BATCH) {
            return run_sequential(self, ops);
        }
        let mut done = 0;
        for chunk in ops.chunks_mut(MAX_BATCH_OPS) {
            let len = chunk.len();
            self.batch(chunk).map_err(|e| match e {
                PistormError::BatchFailed { completed, source } => PistormError::BatchFailed {
                    completed: done + completed,
                    source,
                },
                other => PistormError::batch_failed(done, other),
            })?;
            done += len;
        }
        Ok(())
    }

    // ── Helpers over BUSOP ───────────────────────────────────────────────────

    /// 8-bit read.
    ///
    /// # Errors
    ///
    /// As [`BusControl::bus_op`].
    #[allow(clippy::cast_possible_truncation)]
    fn read8(&self, address: u32) -> Result<u8> {
        let mut op = BusOp::read(address, Width::Byte);
        self.bus_op(&mut op)?;
        Ok(op.value as u8)
    }

    /// 16-bit read.
    ///
    /// # Errors
    ///
    /// As [`BusControl::bus_op`].
    #[allow(clippy::cast_possible_truncation)]
    fn read16(&self, address: u32) -> Result<u16> {
        let mut op = BusOp::read(address, Width::Word);
        self.bus_op(&mut op)?;
        Ok(op.value as u16)
    }

    /// 32-bit read.
    ///
    /// # Errors
    ///
    /// As [`BusControl::bus_op`].
    fn read32(&self, address: u32) -> Result<u32> {
        let mut op = BusOp::read(address, Width::Long);
        self.bus_op(&mut op)?;
        Ok(op.value)
    }

    /// 8-bit write.
    ///
    /// # Errors
    ///
    /// As [`BusControl::bus_op`].
    fn write8(&self, address: u32, value: u8) -> Result<()> {
        self.bus_op(&mut BusOp::write(address, u32::from(value), Width::Byte))
    }

    /// 16-bit write.
    ///
    /// # Errors
    ///
    /// As [`BusControl::bus_op`].
    fn write16(&self, address: u32, value: u16) -> Result<()> {
        self.bus_op(&mut BusOp::write(address, u32::from(value), Width::Word))
    }

    /// 32-bit write.
    ///
    /// # Errors
    ///
    /// As [`BusControl::bus_op`].
    fn write32(&self, address: u32, value: u32) -> Result<()> {
        self.bus_op(&mut BusOp::write(address, value, Width::Long))
    }

    /// Status-register read.
    ///
    /// # Errors
    ///
    /// As [`BusControl::bus_op`].
    #[allow(clippy::cast_possible_truncation)]
    fn read_status(&self) -> Result<u16> {
        let mut op = BusOp::read_status();
        self.bus_op(&mut op)?;
        Ok(op.value as u16)
    }

    /// Status-register write.
    ///
    /// # Errors
    ///
    /// As [`BusControl::bus_op`].
    fn write_status(&self, value: u16) -> Result<()> {
        self.bus_op(&mut BusOp::write_status(value))
    }
}

/// Run `ops` one BUSOP at a time with the batch write-back rule.
pub(crate) fn run_sequential<C: BusControl + ?Sized>(control: &C, ops: &mut [BusOp]) -> Result<()> {
    let mut work = ops.to_vec();
    for (i, op) in work.iter_mut().enumerate() {
        if let Err(e) = control.bus_op(op) {
            ops[..i].copy_from_slice(&work[..i]);
            return Err(PistormError::batch_failed(i, e));
        }
    }
    ops.copy_from_slice(&work);
    Ok(())
}

/// Open the bridge described by `config` and run SETUP.
///
/// `Kernel` uses the kernel driver node. `Auto` uses it when the node
/// exists and otherwise drives the pins in-process. Every other selection
/// drives the pins in-process with that backend.
///
/// # Errors
///
/// Returns `DeviceUnavailable` if nothing can be opened.
pub fn connect(config: BridgeConfig) -> Result<Box<dyn BusControl>> {
    let control: Box<dyn BusControl> = match config.backend {
        BackendSelection::Kernel => Box::new(KernelClient::open(&config)?),
        BackendSelection::Auto if config.kernel_device.exists() => match KernelClient::open(&config) {
            Ok(client) => Box::new(client),
            Err(e) => {
                tracing::info!("Kernel driver present but unusable ({e}); driving pins in-process");
                Box::new(BusDevice::new(config))
            }
        },
        _ => Box::new(BusDevice::new(config)),
    };

    control.setup()?;
    tracing::info!("Connected via {} backend", control.backend_type());
    Ok(control)
}
