//! Backend selection, capability gating and hardware smoke tests

use pistorm_driver::abi::RawBusOp;
use pistorm_driver::{
    connect, open_link, BackendSelection, BackendType, BridgeConfig, BusControl, BusDevice,
    BusOp, Capabilities, CapabilityQuery, Command, PinLevels, PistormError, Reply, Result, Width,
};
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn selection_parses() {
    assert_eq!("auto".parse::<BackendSelection>().unwrap(), BackendSelection::Auto);
    assert_eq!("mem".parse::<BackendSelection>().unwrap(), BackendSelection::Mmio);
    assert_eq!("cdev".parse::<BackendSelection>().unwrap(), BackendSelection::GpioChip);
    assert_eq!("sim".parse::<BackendSelection>().unwrap(), BackendSelection::Simulated);
    assert!("fpga".parse::<BackendSelection>().is_err());
}

#[test]
fn connect_simulated() {
    let bus = connect(BridgeConfig::simulated()).unwrap();
    assert_eq!(bus.backend_type(), BackendType::Simulated);
    bus.write16(0x10, 0x1234).unwrap();
    assert_eq!(bus.read16(0x10).unwrap(), 0x1234);
}

#[test]
fn kernel_is_not_a_link() {
    let config = BridgeConfig::simulated();
    assert!(open_link(BackendSelection::Kernel, &config).is_err());
}

#[test]
fn missing_kernel_node_is_unavailable() {
    let config = BridgeConfig {
        backend: BackendSelection::Kernel,
        kernel_device: "/nonexistent/pistorm0".into(),
        ..BridgeConfig::default()
    };
    assert!(matches!(connect(config), Err(PistormError::DeviceUnavailable { .. })));
}

#[test]
fn dispatch_before_setup_fails_fast() {
    let (bus, sim) = BusDevice::simulated(BridgeConfig::simulated());
    let mut raw = RawBusOp::from(BusOp::read(0, Width::Word));
    assert!(matches!(
        bus.dispatch(Command::BusOp(&mut raw)),
        Err(PistormError::DeviceUnavailable { .. })
    ));
    assert!(sim.strobes().is_empty());

    assert_eq!(bus.dispatch(Command::Setup).unwrap(), Reply::Done);
    assert!(bus.dispatch(Command::BusOp(&mut raw)).is_ok());
}

/// A responder that only offers single ops.
struct BusOpOnly {
    inner: BusDevice,
    batches: AtomicUsize,
}

impl BusControl for BusOpOnly {
    fn backend_type(&self) -> BackendType {
        self.inner.backend_type()
    }
    fn setup(&self) -> Result<()> {
        self.inner.setup()
    }
    fn reset_state_machine(&self) -> Result<()> {
        self.inner.reset_state_machine()
    }
    fn pulse_reset(&self) -> Result<()> {
        self.inner.pulse_reset()
    }
    fn pins(&self) -> Result<PinLevels> {
        self.inner.pins()
    }
    fn query(&self) -> Result<CapabilityQuery> {
        Ok(CapabilityQuery {
            capabilities: Capabilities::BUSOP,
            ..CapabilityQuery::current()
        })
    }
    fn bus_op(&self, op: &mut BusOp) -> Result<()> {
        self.inner.bus_op(op)
    }
    fn batch(&self, ops: &mut [BusOp]) -> Result<()> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.inner.batch(ops)
    }
}

#[test]
fn submit_falls_back_without_batch_capability() {
    let (inner, sim) = BusDevice::simulated(BridgeConfig::simulated());
    let bus = BusOpOnly {
        inner,
        batches: AtomicUsize::new(0),
    };
    bus.setup().unwrap();

    let mut ops = [
        BusOp::write(0x10, 0x11, Width::Byte),
        BusOp::read(0x10, Width::Byte),
    ];
    bus.submit(&mut ops).unwrap();
    assert_eq!(ops[1].value, 0x11);
    assert_eq!(bus.batches.load(Ordering::Relaxed), 0);
    assert_eq!(sim.cycles().len(), 2);
}

#[test]
#[ignore] // Requires hardware
fn mmio_backend_opens() {
    let config = BridgeConfig {
        backend: BackendSelection::Mmio,
        ..BridgeConfig::default()
    };
    let bus = connect(config).expect("mmio backend");
    println!("MMIO backend: {:?}", bus.backend_type());
    println!("  pins: {:?}", bus.pins().unwrap());
}

#[test]
#[ignore] // Requires hardware
fn gpiochip_backend_opens() {
    let config = BridgeConfig {
        backend: BackendSelection::GpioChip,
        ..BridgeConfig::default()
    };
    let bus = connect(config).expect("gpiochip backend");
    println!("GPIO chip backend: {:?}", bus.backend_type());
    println!("  pins: {:?}", bus.pins().unwrap());
}

#[test]
#[ignore] // Requires the kernel driver
fn kernel_and_in_process_agree_on_abi() {
    let config = BridgeConfig {
        backend: BackendSelection::Kernel,
        ..BridgeConfig::default()
    };
    let bus = connect(config).expect("kernel backend");
    let caps = bus.query().unwrap();
    assert_eq!(caps.abi_version, CapabilityQuery::current().abi_version);
}
