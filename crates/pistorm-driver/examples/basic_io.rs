//! Basic I/O against a bridge
//!
//! Connects using `PISTORM_*` overrides (set `PISTORM_BACKEND=sim` to run
//! without hardware), resets the remote system and round-trips a few words.

use pistorm_driver::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("pistorm_driver=info")
        .init();

    let config = BridgeConfig::from_env()?;
    let bus = connect(config.clone())?;
    println!("Connected via {}: {}\n", bus.backend_type(), bus.query()?);

    let outcome = bus.reset_and_wait("basic_io", &config.reset)?;
    println!("Reset: {outcome:?}");

    let base = 0x0001_0000;
    for (i, pattern) in [0x0000u16, 0xFFFF, 0xA5A5, 0x5A5A].into_iter().enumerate() {
        let addr = base + 2 * i as u32;
        bus.write16(addr, pattern)?;
        let back = bus.read16(addr)?;
        let verdict = if back == pattern { "ok" } else { "MISMATCH" };
        println!("{addr:#08x}: wrote {pattern:#06x} read {back:#06x} {verdict}");
    }

    let mut ops: Vec<BusOp> = (0..16u32)
        .map(|i| BusOp::read(base + 2 * i, Width::Word))
        .collect();
    bus.submit(&mut ops)?;
    println!("\nBatch of {} reads done", ops.len());

    Ok(())
}
