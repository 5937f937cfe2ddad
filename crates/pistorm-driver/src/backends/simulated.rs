//! Simulated adapter backend
//!
//! A software model of the adapter CPLD sitting behind the pins. It decodes
//! strobes exactly as the hardware does (DATA / ADDR_LO latch, ADDR_HI
//! starts the cycle, STATUS writes latch control bits) and answers reads on
//! the data lane. This enables:
//!
//! 1. **CI without hardware**: the whole stack above `BusLink` runs
//!    unchanged against it.
//! 2. **Fault injection**: a handshake that is slow, never clears, or only
//!    clears after a number of reset pulses; per-address stalls.
//! 3. **Protocol checking**: every strobe, cycle and status access is
//!    recorded, and pin-discipline violations (strobing while the lane is an
//!    input, sampling the lane while it is an output) are counted.
//!
//! Each traffic log keeps at most [`HISTORY_LIMIT`] entries. Long-running
//! users (the CLI, benchmarks) switch recording off entirely.
//!
//! ## Model
//!
//! ```text
//! memory        24-bit word-addressed, unwritten cells read as 0
//! status (in)   IPL << 13, answered immediately
//! status (out)  last host write; a 0 → RESET transition counts one reset pulse
//! handshake     per HandshakeMode, plus per-address stalls
//! ```
//!
//! The model state lives behind a shared [`SimHandle`] so tests can keep a
//! handle while the link itself is moved into an engine or device.

use crate::config::ClockConfig;
use crate::link::{BackendType, BusDirection, BusLink, ClockState, PinLevels, PINS};
use pistorm_chip::protocol::{self, status, BusCycle, ByteLane, PseudoRegister};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Maximum entries kept per traffic log; later traffic is dropped.
pub const HISTORY_LIMIT: usize = 1 << 16;

fn record<T>(log: &mut Vec<T>, recording: bool, entry: T) {
    if recording && log.len() < HISTORY_LIMIT {
        log.push(entry);
    }
}

/// How the simulated handshake line behaves after a cycle starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    /// Clears before the first sample.
    Immediate,
    /// Stays asserted for this many samples after each cycle.
    Busy(u32),
    /// Never clears.
    Stuck,
    /// Asserted until this many reset pulses have been seen, then immediate.
    ClearsAfterResets(u32),
}

/// One memory cycle as decoded by the simulated adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleRecord {
    /// Cycle kind from the ADDR_HI opcode.
    pub cycle: BusCycle,
    /// 24-bit address.
    pub address: u32,
    /// DATA payload for writes, cell contents for reads.
    pub data: u16,
}

/// Status-register traffic, in order with resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Host wrote STATUS.
    Write(u16),
    /// Host read STATUS.
    Read,
}

#[derive(Debug)]
struct SimState {
    memory: HashMap<u32, u16>,
    ipl: u8,
    host_status: u16,
    resets: u32,

    mode: HandshakeMode,
    busy_samples: u32,
    stalled_addresses: HashSet<u32>,
    stalled: bool,

    direction: BusDirection,
    data_latch: u16,
    addr_lo_latch: u16,
    read_select: Option<PseudoRegister>,
    read_latch: u16,

    clock_fault: Option<String>,
    prepared: u32,

    recording: bool,
    strobes: Vec<(PseudoRegister, u16)>,
    cycles: Vec<CycleRecord>,
    status_events: Vec<StatusEvent>,
    direction_switches: u32,
    violations: Vec<String>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            memory: HashMap::new(),
            ipl: 0,
            host_status: status::RESET,
            resets: 0,
            mode: HandshakeMode::Immediate,
            busy_samples: 0,
            stalled_addresses: HashSet::new(),
            stalled: false,
            direction: BusDirection::Input,
            data_latch: 0,
            addr_lo_latch: 0,
            read_select: None,
            read_latch: 0,
            clock_fault: None,
            prepared: 0,
            recording: true,
            strobes: Vec::new(),
            cycles: Vec::new(),
            status_events: Vec::new(),
            direction_switches: 0,
            violations: Vec::new(),
        }
    }
}

impl SimState {
    fn handshake_pending(&self) -> bool {
        if self.stalled {
            return true;
        }
        match self.mode {
            HandshakeMode::Stuck => true,
            HandshakeMode::ClearsAfterResets(n) => self.resets < n,
            HandshakeMode::Immediate | HandshakeMode::Busy(_) => self.busy_samples > 0,
        }
    }

    fn start_cycle(&mut self, addr_hi: u16) {
        let cycle = BusCycle::from_addr_hi(addr_hi);
        let address = protocol::decode_address(self.addr_lo_latch, addr_hi);
        let cell = address & !1;
        let word = self.memory.get(&cell).copied().unwrap_or(0);

        let data = match cycle {
            BusCycle::WriteWord => {
                self.memory.insert(cell, self.data_latch);
                self.data_latch
            }
            BusCycle::WriteByte => {
                let lane = ByteLane::for_address(address);
                let byte = lane.extract(self.data_latch);
                self.memory.insert(cell, lane.merge(word, byte));
                self.data_latch
            }
            _ => {
                self.read_latch = word;
                word
            }
        };

        record(&mut self.cycles, self.recording, CycleRecord { cycle, address, data });
        self.stalled = self.stalled_addresses.contains(&address);
        self.busy_samples = match self.mode {
            HandshakeMode::Busy(n) => n,
            _ => 0,
        };
    }

    fn write_status(&mut self, value: u16) {
        if self.host_status & status::RESET == 0 && value & status::RESET != 0 {
            self.resets += 1;
        }
        self.host_status = value;
        record(&mut self.status_events, self.recording, StatusEvent::Write(value));
    }
}

/// Shared view of a simulated adapter.
#[derive(Debug, Clone, Default)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// A new link onto this adapter.
    pub fn link(&self) -> SimulatedLink {
        SimulatedLink {
            handle: self.clone(),
        }
    }

    /// Set the handshake behaviour.
    pub fn set_handshake(&self, mode: HandshakeMode) {
        self.lock().mode = mode;
    }

    /// Make every cycle at `address` hang the handshake.
    pub fn stall_address(&self, address: u32) {
        self.lock().stalled_addresses.insert(address & protocol::ADDRESS_MASK);
    }

    /// Drive the interrupt priority level (0..=7).
    pub fn set_ipl(&self, ipl: u8) {
        self.lock().ipl = ipl & 0b111;
    }

    /// Make `prepare` report the clock as not ready.
    pub fn set_clock_fault(&self, reason: impl Into<String>) {
        self.lock().clock_fault = Some(reason.into());
    }

    /// Word stored at the 16-bit cell containing `address`.
    pub fn peek_word(&self, address: u32) -> u16 {
        let cell = address & protocol::ADDRESS_MASK & !1;
        self.lock().memory.get(&cell).copied().unwrap_or(0)
    }

    /// Store a word at the cell containing `address`, behind the bus's back.
    pub fn poke_word(&self, address: u32, value: u16) {
        let cell = address & protocol::ADDRESS_MASK & !1;
        self.lock().memory.insert(cell, value);
    }

    /// Every decoded memory cycle, in order.
    pub fn cycles(&self) -> Vec<CycleRecord> {
        self.lock().cycles.clone()
    }

    /// Every register strobe, in order.
    pub fn strobes(&self) -> Vec<(PseudoRegister, u16)> {
        self.lock().strobes.clone()
    }

    /// Status-register traffic, in order.
    pub fn status_events(&self) -> Vec<StatusEvent> {
        self.lock().status_events.clone()
    }

    /// Number of completed reset pulses (STATUS going from 0 to RESET).
    pub fn resets(&self) -> u32 {
        self.lock().resets
    }

    /// Number of `prepare` calls.
    pub fn prepared(&self) -> u32 {
        self.lock().prepared
    }

    /// Number of data lane direction changes.
    pub fn direction_switches(&self) -> u32 {
        self.lock().direction_switches
    }

    /// Current data lane direction.
    pub fn direction(&self) -> BusDirection {
        self.lock().direction
    }

    /// Pin-discipline violations seen so far.
    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    /// Turn traffic logging on or off. Memory and handshake modelling are
    /// unaffected.
    pub fn set_recording(&self, on: bool) {
        self.lock().recording = on;
    }

    /// Forget recorded traffic; memory and configuration are kept.
    pub fn clear_history(&self) {
        let mut s = self.lock();
        s.strobes.clear();
        s.cycles.clear();
        s.status_events.clear();
        s.violations.clear();
        s.direction_switches = 0;
    }
}

/// `BusLink` onto a simulated adapter.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    handle: SimHandle,
}

impl SimulatedLink {
    /// Link onto a fresh adapter.
    pub fn new() -> Self {
        SimHandle::default().link()
    }

    /// Handle onto this link's adapter.
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new()
    }
}

impl BusLink for SimulatedLink {
    fn backend_type(&self) -> BackendType {
        BackendType::Simulated
    }

    fn direction(&self) -> BusDirection {
        self.handle.lock().direction
    }

    fn program_direction(&mut self, direction: BusDirection) {
        let mut s = self.handle.lock();
        s.direction = direction;
        s.direction_switches += 1;
    }

    fn strobe_write(&mut self, payload: u16, reg: PseudoRegister) {
        let mut s = self.handle.lock();
        if s.direction != BusDirection::Output {
            let recording = s.recording;
            record(
                &mut s.violations,
                recording,
                format!("{reg:?} strobed while the data lane is an input"),
            );
        }
        let recording = s.recording;
        record(&mut s.strobes, recording, (reg, payload));
        match reg {
            PseudoRegister::Data => s.data_latch = payload,
            PseudoRegister::AddrLo => s.addr_lo_latch = payload,
            PseudoRegister::AddrHi => s.start_cycle(payload),
            PseudoRegister::Status => s.write_status(payload),
        }
    }

    fn assert_read(&mut self, reg: PseudoRegister) {
        let mut s = self.handle.lock();
        if reg == PseudoRegister::Status {
            let recording = s.recording;
            record(&mut s.status_events, recording, StatusEvent::Read);
        }
        s.read_select = Some(reg);
    }

    fn release(&mut self) {
        self.handle.lock().read_select = None;
    }

    fn sample_levels(&mut self) -> PinLevels {
        let mut s = self.handle.lock();
        if s.direction == BusDirection::Output {
            let recording = s.recording;
            record(
                &mut s.violations,
                recording,
                "levels sampled while the data lane is an output".into(),
            );
        }

        let pending = s.handshake_pending();
        if s.busy_samples > 0 {
            s.busy_samples -= 1;
        }

        let lane = match s.read_select {
            Some(PseudoRegister::Data) if !pending => s.read_latch,
            Some(PseudoRegister::Status) => u16::from(s.ipl) << status::IPL_SHIFT,
            _ => 0,
        };

        let mut gplev0 = PINS.data_bits(lane);
        if pending {
            gplev0 |= 1 << PINS.txn_in_progress;
        }
        if s.ipl == 0 {
            gplev0 |= 1 << PINS.ipl_zero;
        }
        PinLevels::from_gplev0(gplev0)
    }

    fn prepare(&mut self, _clock: &ClockConfig) -> ClockState {
        let mut s = self.handle.lock();
        s.prepared += 1;
        s.direction = BusDirection::Input;
        s.read_select = None;
        match &s.clock_fault {
            Some(reason) => ClockState::NotReady(reason.clone()),
            None => ClockState::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pistorm_chip::protocol::opcode;

    fn write_word(link: &mut SimulatedLink, addr: u32, data: u16) {
        link.configure_direction(BusDirection::Output);
        link.strobe_write(data, PseudoRegister::Data);
        link.strobe_write(protocol::addr_lo(addr), PseudoRegister::AddrLo);
        link.strobe_write(protocol::addr_hi(addr, opcode::WRITE_WORD), PseudoRegister::AddrHi);
        link.configure_direction(BusDirection::Input);
    }

    #[test]
    fn decodes_word_write() {
        let mut link = SimulatedLink::new();
        write_word(&mut link, 0x00_1234, 0xCAFE);
        let h = link.handle();
        assert_eq!(h.peek_word(0x1234), 0xCAFE);
        assert_eq!(
            h.cycles(),
            vec![CycleRecord {
                cycle: BusCycle::WriteWord,
                address: 0x1234,
                data: 0xCAFE
            }]
        );
        assert!(h.violations().is_empty());
    }

    #[test]
    fn byte_write_touches_one_lane() {
        let mut link = SimulatedLink::new();
        let h = link.handle();
        h.poke_word(0x20, 0x1122);

        link.configure_direction(BusDirection::Output);
        link.strobe_write(ByteLane::Lower.write_payload(0xAB), PseudoRegister::Data);
        link.strobe_write(protocol::addr_lo(0x21), PseudoRegister::AddrLo);
        link.strobe_write(protocol::addr_hi(0x21, opcode::WRITE_BYTE), PseudoRegister::AddrHi);
        assert_eq!(h.peek_word(0x20), 0x11AB);
    }

    #[test]
    fn busy_handshake_counts_down() {
        let mut link = SimulatedLink::new();
        link.handle().set_handshake(HandshakeMode::Busy(2));
        write_word(&mut link, 0, 1);
        assert!(link.sample_levels().handshake_pending());
        assert!(link.sample_levels().handshake_pending());
        assert!(!link.sample_levels().handshake_pending());
    }

    #[test]
    fn reset_pulses_are_counted() {
        let mut link = SimulatedLink::new();
        let h = link.handle();
        h.set_handshake(HandshakeMode::ClearsAfterResets(1));
        assert!(link.sample_levels().handshake_pending());

        link.configure_direction(BusDirection::Output);
        link.strobe_write(0, PseudoRegister::Status);
        link.strobe_write(status::RESET, PseudoRegister::Status);
        link.configure_direction(BusDirection::Input);

        assert_eq!(h.resets(), 1);
        assert!(!link.sample_levels().handshake_pending());
    }

    #[test]
    fn strobe_while_input_is_a_violation() {
        let mut link = SimulatedLink::new();
        link.strobe_write(0, PseudoRegister::Data);
        assert_eq!(link.handle().violations().len(), 1);
    }

    #[test]
    fn status_read_reports_ipl() {
        let mut link = SimulatedLink::new();
        link.handle().set_ipl(5);
        link.assert_read(PseudoRegister::Status);
        let levels = link.sample_levels();
        link.release();
        assert!(!levels.ipl_zero());
        assert_eq!(status::ipl(levels.data()), 5);
    }

    #[test]
    fn recording_off_keeps_memory_working() {
        let mut link = SimulatedLink::new();
        let h = link.handle();
        h.set_recording(false);
        write_word(&mut link, 0x40, 0x5A5A);
        link.strobe_write(0, PseudoRegister::Data);

        assert_eq!(h.peek_word(0x40), 0x5A5A);
        assert!(h.strobes().is_empty());
        assert!(h.cycles().is_empty());
        assert!(h.violations().is_empty());
    }

    #[test]
    fn history_stops_at_limit() {
        let mut link = SimulatedLink::new();
        let h = link.handle();
        link.configure_direction(BusDirection::Output);
        for _ in 0..HISTORY_LIMIT {
            link.strobe_write(0, PseudoRegister::Data);
        }
        link.strobe_write(0xBEEF, PseudoRegister::Data);
        link.strobe_write(protocol::addr_lo(0x80), PseudoRegister::AddrLo);
        link.strobe_write(protocol::addr_hi(0x80, opcode::WRITE_WORD), PseudoRegister::AddrHi);

        assert_eq!(h.strobes().len(), HISTORY_LIMIT);
        assert_eq!(h.cycles().len(), 1);
        assert_eq!(h.peek_word(0x80), 0xBEEF);
    }
}
