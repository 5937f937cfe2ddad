//! Bus transaction engine
//!
//! Encodes reads and writes as strobe sequences on a [`BusLink`] and enforces
//! the completion handshake.
//!
//! ```text
//! Idle ─► AddressPhase ─► DataPhase (writes) ─► StrobeIssued ─► AwaitingCompletion
//!                                                                 ├─► Completed
//!                                                                 └─► TimedOut
//! ```
//!
//! | Op | Strobes (lane = output) | Then (lane = input) |
//! |----|-------------------------|---------------------|
//! | write16 | DATA, ADDR_LO, ADDR_HI(WRITE_WORD) | wait handshake |
//! | write8 | DATA (lane-placed), ADDR_LO, ADDR_HI(WRITE_BYTE) | wait handshake |
//! | read16 / read8 | ADDR_LO, ADDR_HI(READ_*) | RD on DATA, wait, sample |
//! | write_status | STATUS | none |
//! | read_status | none | RD on STATUS, wait, sample |
//!
//! 32-bit ops are two 16-bit ops, high word at `addr` first, low word at
//! `addr + 2` second. They are not atomic; the engine is `&mut self`
//! throughout so only one owner can drive it.
//!
//! On timeout the lane is forced back to input and every strobe line is
//! released before the error is returned, so the bus is never left driven.

use crate::config::{ClockConfig, TimingPolicy};
use crate::error::{PistormError, Result};
use crate::link::{BusDirection, BusLink, ClockState, PinLevels};
use crate::op::{BusOp, Width};
use pistorm_chip::protocol::{self, status, BusCycle, ByteLane, PseudoRegister};
use std::time::Instant;

/// Where the current transaction is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnPhase {
    /// No transaction in flight.
    #[default]
    Idle,
    /// Address strobes being issued.
    AddressPhase,
    /// Data strobe being issued.
    DataPhase,
    /// Final strobe issued; the adapter owns the bus.
    StrobeIssued,
    /// Polling the handshake.
    AwaitingCompletion,
    /// Last transaction completed.
    Completed,
    /// Last transaction timed out.
    TimedOut,
}

/// Counters kept per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    /// Memory cycles issued (a 32-bit op counts two).
    pub transactions: u64,
    /// Handshake timeouts.
    pub timeouts: u64,
    /// Status-register reads.
    pub status_reads: u64,
    /// Status-register writes.
    pub status_writes: u64,
    /// Batches executed.
    pub batches: u64,
    /// Ops executed inside batches.
    pub batch_ops: u64,
    /// Data lane direction changes.
    pub direction_switches: u64,
}

/// Drives bus transactions over one link.
#[derive(Debug)]
pub struct TransactionEngine<L: BusLink> {
    link: L,
    timing: TimingPolicy,
    stats: BusStats,
    phase: TxnPhase,
}

impl<L: BusLink> TransactionEngine<L> {
    /// Engine over `link` with the given handshake policy.
    pub fn new(link: L, timing: TimingPolicy) -> Self {
        Self {
            link,
            timing,
            stats: BusStats::default(),
            phase: TxnPhase::Idle,
        }
    }

    /// Program pins and start the clock; leaves the lane as input.
    pub fn setup(&mut self, clock: &ClockConfig) -> ClockState {
        let state = self.link.prepare(clock);
        self.phase = TxnPhase::Idle;
        match &state {
            ClockState::Running => tracing::info!("{} link ready", self.link.backend_type()),
            ClockState::NotReady(reason) => {
                tracing::warn!("{} link ready but bus clock is not: {reason}", self.link.backend_type());
            }
        }
        state
    }

    /// Handshake policy in effect.
    pub const fn timing(&self) -> TimingPolicy {
        self.timing
    }

    /// Replace the handshake policy.
    pub fn set_timing(&mut self, timing: TimingPolicy) {
        self.timing = timing;
    }

    /// Counters so far.
    pub const fn stats(&self) -> BusStats {
        self.stats
    }

    /// Phase of the last transaction.
    pub const fn phase(&self) -> TxnPhase {
        self.phase
    }

    /// The underlying link.
    pub const fn link(&self) -> &L {
        &self.link
    }

    /// Consume the engine, returning the link.
    pub fn into_link(self) -> L {
        self.link
    }

    pub(crate) fn record_batch(&mut self, ops: usize) {
        self.stats.batches += 1;
        self.stats.batch_ops += ops as u64;
    }

    // ── Memory cycles ────────────────────────────────────────────────────────

    /// 16-bit write.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the handshake does not clear.
    pub fn write16(&mut self, address: u32, data: u16) -> Result<()> {
        self.memory_write(BusCycle::WriteWord, address, data)
    }

    /// 8-bit write; the byte lands in the lane selected by address parity.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the handshake does not clear.
    pub fn write8(&mut self, address: u32, data: u8) -> Result<()> {
        let payload = ByteLane::for_address(address).write_payload(data);
        self.memory_write(BusCycle::WriteByte, address, payload)
    }

    /// 32-bit write: high word at `address`, then low word at `address + 2`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if either half times out.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write32(&mut self, address: u32, data: u32) -> Result<()> {
        self.write16(address, (data >> 16) as u16)?;
        self.write16(address.wrapping_add(2), data as u16)
    }

    /// 16-bit read.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the handshake does not clear.
    pub fn read16(&mut self, address: u32) -> Result<u16> {
        self.memory_read(BusCycle::ReadWord, address)
    }

    /// 8-bit read from the lane selected by address parity.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the handshake does not clear.
    pub fn read8(&mut self, address: u32) -> Result<u8> {
        let word = self.memory_read(BusCycle::ReadByte, address)?;
        Ok(ByteLane::for_address(address).extract(word))
    }

    /// 32-bit read: high word at `address`, then low word at `address + 2`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if either half times out.
    pub fn read32(&mut self, address: u32) -> Result<u32> {
        let hi = self.read16(address)?;
        let lo = self.read16(address.wrapping_add(2))?;
        Ok((u32::from(hi) << 16) | u32::from(lo))
    }

    // ── Status register ──────────────────────────────────────────────────────

    /// Write the adapter status register. The adapter latches it without a
    /// handshake.
    pub fn write_status(&mut self, value: u16) {
        self.switch(BusDirection::Output);
        self.link.strobe_write(value, PseudoRegister::Status);
        self.switch(BusDirection::Input);
        self.stats.status_writes += 1;
        tracing::trace!("status <- {value:#06x}");
    }

    /// Read the adapter status register.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if a memory cycle is still holding the handshake.
    pub fn read_status(&mut self) -> Result<u16> {
        self.switch(BusDirection::Input);
        self.link.assert_read(PseudoRegister::Status);
        let levels = self.await_completion(BusCycle::ReadStatus.name())?;
        self.link.release();
        self.stats.status_reads += 1;
        let value = levels.data();
        tracing::trace!("status -> {value:#06x}");
        Ok(value)
    }

    /// Current interrupt priority level. The IPL-zero pin is sampled first;
    /// STATUS is only read when an interrupt is pending.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the bus does not go idle.
    pub fn interrupt_level(&mut self) -> Result<u8> {
        self.switch(BusDirection::Input);
        let levels = self.await_completion("interrupt_level")?;
        if levels.ipl_zero() {
            return Ok(0);
        }
        Ok(status::ipl(self.read_status()?))
    }

    /// Raw level snapshot. The lane is made an input first.
    pub fn sample_levels(&mut self) -> PinLevels {
        self.switch(BusDirection::Input);
        self.link.sample_levels()
    }

    // ── Generic op ───────────────────────────────────────────────────────────

    /// Execute one op, storing the result in `op.value` for reads.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the handshake does not clear.
    #[allow(clippy::cast_possible_truncation)]
    pub fn execute(&mut self, op: &mut BusOp) -> Result<()> {
        if op.is_status() {
            if op.is_read {
                op.value = u32::from(self.read_status()?);
            } else {
                self.write_status(op.value as u16);
            }
            return Ok(());
        }

        match (op.width, op.is_read) {
            (Width::Byte, true) => op.value = u32::from(self.read8(op.address)?),
            (Width::Word, true) => op.value = u32::from(self.read16(op.address)?),
            (Width::Long, true) => op.value = self.read32(op.address)?,
            (Width::Byte, false) => self.write8(op.address, op.value as u8)?,
            (Width::Word, false) => self.write16(op.address, op.value as u16)?,
            (Width::Long, false) => self.write32(op.address, op.value)?,
        }
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn switch(&mut self, direction: BusDirection) {
        if self.link.configure_direction(direction) {
            self.stats.direction_switches += 1;
        }
    }

    fn issue_address(&mut self, cycle: BusCycle, address: u32) {
        let op = cycle.opcode().unwrap_or(protocol::opcode::READ_WORD);
        self.phase = TxnPhase::AddressPhase;
        self.link
            .strobe_write(protocol::addr_lo(address), PseudoRegister::AddrLo);
        self.link
            .strobe_write(protocol::addr_hi(address, op), PseudoRegister::AddrHi);
        self.phase = TxnPhase::StrobeIssued;
        self.stats.transactions += 1;
    }

    fn memory_write(&mut self, cycle: BusCycle, address: u32, payload: u16) -> Result<()> {
        tracing::trace!("{} {address:#08x} <- {payload:#06x}", cycle.name());
        self.switch(BusDirection::Output);
        self.phase = TxnPhase::DataPhase;
        self.link.strobe_write(payload, PseudoRegister::Data);
        self.issue_address(cycle, address);
        self.switch(BusDirection::Input);
        self.await_completion(cycle.name())?;
        self.phase = TxnPhase::Completed;
        Ok(())
    }

    fn memory_read(&mut self, cycle: BusCycle, address: u32) -> Result<u16> {
        self.switch(BusDirection::Output);
        self.issue_address(cycle, address);
        self.switch(BusDirection::Input);
        self.link.assert_read(PseudoRegister::Data);
        let levels = self.await_completion(cycle.name())?;
        self.link.release();
        self.phase = TxnPhase::Completed;
        let data = levels.data();
        tracing::trace!("{} {address:#08x} -> {data:#06x}", cycle.name());
        Ok(data)
    }

    /// Poll the handshake until it clears or the policy timeout expires.
    fn await_completion(&mut self, operation: &'static str) -> Result<PinLevels> {
        self.phase = TxnPhase::AwaitingCompletion;
        let start = Instant::now();
        loop {
            let levels = self.link.sample_levels();
            if !levels.handshake_pending() {
                return Ok(levels);
            }
            if start.elapsed() >= self.timing.timeout {
                return Err(self.abort(operation));
            }
            if self.timing.poll_interval.is_zero() {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(self.timing.poll_interval);
            }
        }
    }

    fn abort(&mut self, operation: &'static str) -> PistormError {
        self.switch(BusDirection::Input);
        self.link.release();
        self.phase = TxnPhase::TimedOut;
        self.stats.timeouts += 1;
        tracing::error!(
            "{operation} timed out after {:?}; handshake still asserted",
            self.timing.timeout
        );
        PistormError::timeout(operation, self.timing.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{HandshakeMode, SimulatedLink};
    use std::time::Duration;

    fn engine() -> TransactionEngine<SimulatedLink> {
        let mut engine = TransactionEngine::new(SimulatedLink::new(), TimingPolicy::default());
        assert!(engine.setup(&ClockConfig::default()).is_running());
        engine
    }

    #[test]
    fn word_round_trip() {
        let mut e = engine();
        e.write16(0, 0xBEEF).unwrap();
        assert_eq!(e.read16(0).unwrap(), 0xBEEF);
        assert_eq!(e.phase(), TxnPhase::Completed);
        assert!(e.link().handle().violations().is_empty());
    }

    #[test]
    fn write_strobe_order() {
        let mut e = engine();
        e.write16(0x00AB_CDEF, 0x1234).unwrap();
        let strobes = e.link().handle().strobes();
        assert_eq!(
            strobes,
            vec![
                (PseudoRegister::Data, 0x1234),
                (PseudoRegister::AddrLo, 0xCDEF),
                (PseudoRegister::AddrHi, 0x00AB),
            ]
        );
    }

    #[test]
    fn read_has_no_data_strobe() {
        let mut e = engine();
        e.read8(0x0001_0003).unwrap();
        let strobes = e.link().handle().strobes();
        assert_eq!(
            strobes,
            vec![(PseudoRegister::AddrLo, 0x0003), (PseudoRegister::AddrHi, 0x0301)]
        );
    }

    #[test]
    fn lane_left_as_input_after_every_op() {
        let mut e = engine();
        e.write8(0x11, 0x42).unwrap();
        assert_eq!(e.link().direction(), BusDirection::Input);
        e.write_status(status::RESET);
        assert_eq!(e.link().direction(), BusDirection::Input);
        e.read32(0x100).unwrap();
        assert_eq!(e.link().direction(), BusDirection::Input);
    }

    #[test]
    fn direction_switch_is_idempotent() {
        let mut e = engine();
        let before = e.link().handle().direction_switches();
        e.sample_levels();
        e.sample_levels();
        assert_eq!(e.link().handle().direction_switches(), before);
        // One write: input → output → input.
        e.write16(0, 0).unwrap();
        assert_eq!(e.link().handle().direction_switches(), before + 2);
        assert_eq!(e.stats().direction_switches, 2);
    }

    #[test]
    fn stuck_handshake_times_out_and_releases_bus() {
        let mut e = TransactionEngine::new(
            SimulatedLink::new(),
            TimingPolicy::with_timeout(Duration::from_millis(1)),
        );
        e.link().handle().set_handshake(HandshakeMode::Stuck);

        let start = Instant::now();
        let err = e.read16(0x40).unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(250));
        assert!(matches!(err, PistormError::Timeout { operation: "read16", duration_ms: 1 }));
        assert_eq!(e.phase(), TxnPhase::TimedOut);
        assert_eq!(e.link().direction(), BusDirection::Input);
        assert_eq!(e.stats().timeouts, 1);
    }

    #[test]
    fn slow_handshake_completes() {
        let mut e = engine();
        e.link().handle().set_handshake(HandshakeMode::Busy(50));
        e.write16(0x2000, 0x5555).unwrap();
        assert_eq!(e.read16(0x2000).unwrap(), 0x5555);
    }

    #[test]
    fn status_write_has_no_handshake_wait() {
        let mut e = engine();
        e.link().handle().set_handshake(HandshakeMode::Stuck);
        e.write_status(status::INIT);
        assert_eq!(e.stats().status_writes, 1);
    }

    #[test]
    fn interrupt_level_reads_status_only_when_pending() {
        let mut e = engine();
        assert_eq!(e.interrupt_level().unwrap(), 0);
        assert_eq!(e.stats().status_reads, 0);

        e.link().handle().set_ipl(6);
        assert_eq!(e.interrupt_level().unwrap(), 6);
        assert_eq!(e.stats().status_reads, 1);
    }

    #[test]
    fn execute_dispatches_on_width() {
        let mut e = engine();
        let mut w = BusOp::write(0x300, 0xDEAD_BEEF, Width::Long);
        e.execute(&mut w).unwrap();
        let mut r = BusOp::read(0x302, Width::Word);
        e.execute(&mut r).unwrap();
        assert_eq!(r.value, 0xBEEF);
        let mut s = BusOp::read_status();
        e.link().handle().set_ipl(2);
        e.execute(&mut s).unwrap();
        assert_eq!(status::ipl(s.value as u16), 2);
    }
}
