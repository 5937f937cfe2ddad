//! Reset-and-wait behaviour against the simulated adapter

use pistorm_driver::backends::{HandshakeMode, StatusEvent};
use pistorm_driver::chip::{status, PseudoRegister};
use pistorm_driver::{BridgeConfig, BusControl, BusDevice, ResetOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn reads_after_last_reset(events: &[StatusEvent]) -> (usize, usize) {
    let last_release = events
        .iter()
        .rposition(|e| *e == StatusEvent::Write(status::RESET))
        .expect("reset released");
    let before = events[..last_release]
        .iter()
        .filter(|e| **e == StatusEvent::Read)
        .count();
    let after = events[last_release..]
        .iter()
        .filter(|e| **e == StatusEvent::Read)
        .count();
    (before, after)
}

#[test]
fn healthy_bus_is_ready_on_first_attempt() {
    let config = BridgeConfig::simulated();
    let (bus, sim) = BusDevice::simulated(config.clone());
    bus.setup().unwrap();

    let outcome = bus.reset_and_wait("test", &config.reset).unwrap();
    assert_eq!(outcome, ResetOutcome::Ready { attempts: 1 });
    assert_eq!(sim.resets(), 1);

    let events = sim.status_events();
    assert_eq!(
        &events[..4],
        &[
            StatusEvent::Write(status::INIT),
            StatusEvent::Write(0),
            StatusEvent::Write(0),
            StatusEvent::Write(status::RESET),
        ]
    );
    assert_eq!(reads_after_last_reset(&events), (0, 64));
}

#[test]
fn retries_until_the_handshake_clears() {
    let config = BridgeConfig::simulated();
    let (bus, sim) = BusDevice::simulated(config.clone());
    bus.setup().unwrap();
    sim.set_handshake(HandshakeMode::ClearsAfterResets(2));

    let outcome = bus.reset_and_wait("test", &config.reset).unwrap();
    assert_eq!(outcome, ResetOutcome::Ready { attempts: 2 });
    assert_eq!(sim.resets(), 2);
    // No warmup on the failed attempt.
    assert_eq!(reads_after_last_reset(&sim.status_events()), (0, 64));
}

#[test]
fn gives_up_after_three_attempts() {
    let config = BridgeConfig::simulated();
    let (bus, sim) = BusDevice::simulated(config.clone());
    bus.setup().unwrap();
    sim.set_handshake(HandshakeMode::Stuck);

    let outcome = bus.reset_and_wait("test", &config.reset).unwrap();
    assert_eq!(outcome, ResetOutcome::Degraded { attempts: 3 });
    assert!(!outcome.is_ready());
    assert_eq!(sim.resets(), 3);
    assert!(!sim.status_events().contains(&StatusEvent::Read));
}

#[test]
fn reset_before_setup_is_an_error() {
    let config = BridgeConfig::simulated();
    let (bus, _sim) = BusDevice::simulated(config.clone());
    assert!(bus.reset_and_wait("test", &config.reset).is_err());
}

#[test]
fn other_callers_wait_for_the_whole_sequence() {
    let mut config = BridgeConfig::simulated();
    config.reset.pulse = Duration::from_millis(20);
    let (bus, sim) = BusDevice::simulated(config.clone());
    bus.setup().unwrap();
    let bus = Arc::new(bus);
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let bus = Arc::clone(&bus);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut i = 0u16;
            while !done.load(Ordering::Relaxed) {
                bus.write16(0x40, i).unwrap();
                i = i.wrapping_add(1);
            }
        })
    };
    std::thread::sleep(Duration::from_millis(2));

    let outcome = bus.reset_and_wait("test", &config.reset).unwrap();
    done.store(true, Ordering::Relaxed);
    writer.join().unwrap();
    assert!(outcome.is_ready());

    // From INIT to the RESET release only STATUS is strobed.
    let strobes = sim.strobes();
    let init = strobes
        .iter()
        .position(|&s| s == (PseudoRegister::Status, status::INIT))
        .expect("INIT written");
    let release = strobes
        .iter()
        .rposition(|&s| s == (PseudoRegister::Status, status::RESET))
        .expect("RESET released");
    assert!(init < release);
    assert!(strobes[init..=release]
        .iter()
        .all(|&(reg, _)| reg == PseudoRegister::Status));
}
