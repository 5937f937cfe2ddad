//! Bridge device handle and command dispatch
//!
//! A `BusDevice` owns at most one session (an engine over an open link) and
//! serializes every command on it behind one mutex: SETUP, RESET_SM,
//! PULSE_RESET, GET_PINS, BUSOP and BATCH all take the same lock, so a
//! 32-bit op or a batch is never interleaved with another caller. QUERY is
//! static and needs no session.
//!
//! Until SETUP succeeds every bus command fails fast with
//! `DeviceUnavailable`. A clock that cannot be started does not fail SETUP;
//! it is logged and recorded, and [`BusDevice::ensure_clock`] reports it.

use crate::abi::{self, RawBusOp, RawPins, RawQuery};
use crate::backends::SimHandle;
use crate::batch;
use crate::capabilities::CapabilityQuery;
use crate::config::{BridgeConfig, ResetConfig};
use crate::control::BusControl;
use crate::engine::{BusStats, TransactionEngine};
use crate::error::{PistormError, Result};
use crate::link::{open_link, BackendSelection, BackendType, BusLink, ClockState, PinLevels};
use crate::op::BusOp;
use crate::reset::{self, ResetOutcome};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Engine type held by a device session.
pub type DeviceEngine = TransactionEngine<Box<dyn BusLink>>;

/// Opens the link for a session.
pub type LinkOpener = Box<dyn Fn(&BridgeConfig) -> Result<Box<dyn BusLink>> + Send + Sync>;

/// One command of the device surface.
#[derive(Debug)]
pub enum Command<'a> {
    /// Program pins and the bus clock.
    Setup,
    /// Reset the adapter state machine.
    ResetSm,
    /// Pulse the remote reset line.
    PulseReset,
    /// Raw level snapshot.
    GetPins,
    /// Capability query.
    Query,
    /// One op, results written in place.
    BusOp(&'a mut RawBusOp),
    /// Ops in order, results written in place.
    Batch(&'a mut [RawBusOp]),
}

/// Result of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Command completed; any results were written into its arguments.
    Done,
    /// GET_PINS result.
    Pins(RawPins),
    /// QUERY result.
    Query(RawQuery),
}

#[derive(Debug)]
struct Session {
    engine: DeviceEngine,
    clock: ClockState,
}

/// In-process bridge device.
pub struct BusDevice {
    config: BridgeConfig,
    opener: LinkOpener,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for BusDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusDevice")
            .field("config", &self.config)
            .field("session", &self.lock().as_ref().map(|s| s.engine.link().backend_type()))
            .finish_non_exhaustive()
    }
}

impl BusDevice {
    /// Device opening its link with [`open_link`] on SETUP.
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_opener(config, |c| open_link(c.backend, c))
    }

    /// Device opening its link with `opener` on SETUP.
    pub fn with_opener(
        config: BridgeConfig,
        opener: impl Fn(&BridgeConfig) -> Result<Box<dyn BusLink>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            opener: Box::new(opener),
            session: Mutex::new(None),
        }
    }

    /// Device over a simulated adapter, plus a handle onto that adapter.
    pub fn simulated(config: BridgeConfig) -> (Self, SimHandle) {
        let handle = SimHandle::default();
        let adapter = handle.clone();
        let device = Self::with_opener(config, move |_| Ok(Box::new(adapter.link())));
        (device, handle)
    }

    /// Configuration the device was created with.
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // The bus is re-established by the next SETUP, so a panic while holding
    // the lock does not make the session unusable.
    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive ownership of the engine.
    ///
    /// Multi-step sequences that must not be interleaved with other callers
    /// (e.g. an emulator's interrupt check followed by a vector fetch) go
    /// through here.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` before a successful SETUP, or whatever `f` returns.
    pub fn with_exclusive<T>(&self, f: impl FnOnce(&mut DeviceEngine) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let session = guard
            .as_mut()
            .ok_or_else(|| PistormError::device_unavailable("SETUP has not completed"))?;
        f(&mut session.engine)
    }

    /// Program pins and clock, opening the link if there is no session.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the link cannot be opened.
    pub fn setup_session(&self) -> Result<ClockState> {
        let mut guard = self.lock();

        if guard.is_none() {
            let link = (self.opener)(&self.config).map_err(|e| match e {
                PistormError::DeviceUnavailable { .. } => e,
                other => PistormError::device_unavailable(other.to_string()),
            })?;
            tracing::info!("Opened {} link", link.backend_type());
            *guard = Some(Session {
                engine: TransactionEngine::new(link, self.config.timing),
                clock: ClockState::NotReady("not prepared".into()),
            });
        }

        let session = guard
            .as_mut()
            .ok_or_else(|| PistormError::device_unavailable("session vanished during SETUP"))?;
        session.clock = session.engine.setup(&self.config.clock);
        if let ClockState::NotReady(reason) = &session.clock {
            tracing::warn!("SETUP completed without a bus clock: {reason}");
        }
        Ok(session.clock.clone())
    }

    /// Whether SETUP has succeeded.
    pub fn is_ready(&self) -> bool {
        self.lock().is_some()
    }

    /// Confirm the bus clock is running.
    ///
    /// # Errors
    ///
    /// Returns `ClockNotReady` with the recorded reason, or `DeviceUnavailable`
    /// before SETUP.
    pub fn ensure_clock(&self) -> Result<()> {
        match self.lock().as_ref().map(|s| &s.clock) {
            None => Err(PistormError::device_unavailable("SETUP has not completed")),
            Some(ClockState::Running) => Ok(()),
            Some(ClockState::NotReady(reason)) => Err(PistormError::clock_not_ready(reason.clone())),
        }
    }

    /// Counters of the current session (zero without one).
    pub fn stats(&self) -> BusStats {
        self.lock()
            .as_ref()
            .map(|s| s.engine.stats())
            .unwrap_or_default()
    }

    /// End the session; the next bus command fails until SETUP runs again.
    pub fn teardown(&self) {
        if let Some(session) = self.lock().take() {
            log_stats(&session.engine.stats());
        }
    }

    /// Execute one command of the device surface.
    ///
    /// # Errors
    ///
    /// As the corresponding [`BusControl`] method. Raw ops are decoded before
    /// the bus is touched, so malformed input fails with `InvalidArgument`
    /// and no side effects.
    pub fn dispatch(&self, command: Command<'_>) -> Result<Reply> {
        match command {
            Command::Setup => self.setup().map(|()| Reply::Done),
            Command::ResetSm => self.reset_state_machine().map(|()| Reply::Done),
            Command::PulseReset => self.pulse_reset().map(|()| Reply::Done),
            Command::GetPins => self.pins().map(|p| Reply::Pins(p.into())),
            Command::Query => self.query().map(|q| Reply::Query(q.into())),
            Command::BusOp(raw) => {
                let mut op = BusOp::try_from(*raw)?;
                self.bus_op(&mut op)?;
                *raw = op.into();
                Ok(Reply::Done)
            }
            Command::Batch(raw) => {
                let mut ops = abi::decode_batch(raw)?;
                match self.batch(&mut ops) {
                    Ok(()) => {
                        for (dst, op) in raw.iter_mut().zip(&ops) {
                            dst.value = op.value;
                        }
                        Ok(Reply::Done)
                    }
                    Err(e) => {
                        if let PistormError::BatchFailed { completed, .. } = &e {
                            for (dst, op) in raw.iter_mut().zip(&ops).take(*completed) {
                                dst.value = op.value;
                            }
                        }
                        Err(e)
                    }
                }
            }
        }
    }
}

impl BusControl for BusDevice {
    fn backend_type(&self) -> BackendType {
        if let Some(session) = self.lock().as_ref() {
            return session.engine.link().backend_type();
        }
        match self.config.backend {
            BackendSelection::GpioChip => BackendType::GpioChip,
            BackendSelection::Simulated => BackendType::Simulated,
            BackendSelection::Kernel => BackendType::Kernel,
            BackendSelection::Auto | BackendSelection::Mmio => BackendType::Mmio,
        }
    }

    fn setup(&self) -> Result<()> {
        self.setup_session().map(|_| ())
    }

    fn reset_state_machine(&self) -> Result<()> {
        let config = self.config.reset;
        self.with_exclusive(|engine| {
            reset::reset_state_machine(engine, &config);
            Ok(())
        })
    }

    fn pulse_reset(&self) -> Result<()> {
        let config = self.config.reset;
        self.with_exclusive(|engine| {
            reset::pulse_reset(engine, &config);
            Ok(())
        })
    }

    fn pins(&self) -> Result<PinLevels> {
        self.with_exclusive(|engine| Ok(engine.sample_levels()))
    }

    fn query(&self) -> Result<CapabilityQuery> {
        Ok(CapabilityQuery::current())
    }

    fn bus_op(&self, op: &mut BusOp) -> Result<()> {
        self.with_exclusive(|engine| engine.execute(op))
    }

    fn batch(&self, ops: &mut [BusOp]) -> Result<()> {
        batch::validate_count(ops.len())?;
        self.with_exclusive(|engine| batch::run_batch(engine, ops))
    }

    fn interrupt_level(&self) -> Result<u8> {
        self.with_exclusive(DeviceEngine::interrupt_level)
    }

    // The whole sequence holds the lock, so no other op lands between INIT
    // and the end of warmup.
    fn reset_and_wait(&self, tag: &str, config: &ResetConfig) -> Result<ResetOutcome> {
        self.with_exclusive(|engine| reset::reset_engine_and_wait(engine, tag, config))
    }
}

fn log_stats(stats: &BusStats) {
    tracing::info!(
        "bus stats: {} transactions, {} timeouts, {} status reads, {} status writes, {} batches ({} ops), {} direction switches",
        stats.transactions,
        stats.timeouts,
        stats.status_reads,
        stats.status_writes,
        stats.batches,
        stats.batch_ops,
        stats.direction_switches
    );
}

impl Drop for BusDevice {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            log_stats(&session.engine.stats());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Width;

    #[test]
    fn commands_fail_before_setup() {
        let (device, _sim) = BusDevice::simulated(BridgeConfig::simulated());
        assert!(!device.is_ready());
        assert!(matches!(
            device.read16(0),
            Err(PistormError::DeviceUnavailable { .. })
        ));
        assert!(matches!(
            device.dispatch(Command::GetPins),
            Err(PistormError::DeviceUnavailable { .. })
        ));
        // QUERY needs no session.
        assert!(matches!(device.dispatch(Command::Query), Ok(Reply::Query(_))));
    }

    #[test]
    fn setup_failure_keeps_device_unavailable() {
        let device = BusDevice::with_opener(BridgeConfig::simulated(), |_| {
            Err(PistormError::invalid_argument("no such chip"))
        });
        assert!(matches!(device.setup(), Err(PistormError::DeviceUnavailable { .. })));
        assert!(matches!(device.pins(), Err(PistormError::DeviceUnavailable { .. })));
    }

    #[test]
    fn clock_fault_is_not_fatal() {
        let (device, sim) = BusDevice::simulated(BridgeConfig::simulated());
        sim.set_clock_fault("PLL locked out");
        device.setup().unwrap();
        assert!(matches!(device.ensure_clock(), Err(PistormError::ClockNotReady { .. })));
        device.write16(0x100, 0x1234).unwrap();
        assert_eq!(device.read16(0x100).unwrap(), 0x1234);
    }

    #[test]
    fn dispatch_busop_writes_result_in_place() {
        let (device, sim) = BusDevice::simulated(BridgeConfig::simulated());
        device.dispatch(Command::Setup).unwrap();
        sim.poke_word(0x400, 0xA55A);

        let mut raw = RawBusOp::from(BusOp::read(0x400, Width::Word));
        device.dispatch(Command::BusOp(&mut raw)).unwrap();
        assert_eq!(raw.value, 0xA55A);
    }

    #[test]
    fn dispatch_rejects_bad_width_without_touching_bus() {
        let (device, sim) = BusDevice::simulated(BridgeConfig::simulated());
        device.setup().unwrap();
        sim.clear_history();

        let mut raw = RawBusOp {
            addr: 0,
            value: 0,
            width: 3,
            is_read: 1,
            flags: 0,
        };
        let err = device.dispatch(Command::BusOp(&mut raw)).unwrap_err();
        assert!(matches!(err, PistormError::InvalidArgument { .. }));
        assert!(sim.strobes().is_empty());
    }

    #[test]
    fn teardown_ends_session() {
        let (device, _sim) = BusDevice::simulated(BridgeConfig::simulated());
        device.setup().unwrap();
        device.write8(1, 2).unwrap();
        assert_eq!(device.stats().transactions, 1);
        device.teardown();
        assert!(device.write8(1, 2).is_err());
        assert_eq!(device.stats(), BusStats::default());
    }

    #[test]
    fn setup_is_repeatable() {
        let (device, sim) = BusDevice::simulated(BridgeConfig::simulated());
        device.setup().unwrap();
        device.setup().unwrap();
        assert_eq!(sim.prepared(), 2);
    }
}
