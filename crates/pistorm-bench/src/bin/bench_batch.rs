//! Batch amortization sweep.
//!
//! Reads `len` bytes of remote memory as single BUSOPs, then as batches of
//! 1..=1024 ops, and reports µs/op and the speedup over the single-op path.
//! Against the kernel driver each op or batch is one ioctl, so the curve
//! shows how much of the per-op cost is the crossing rather than the bus.
//!
//! Set `--backend sim` (or `PISTORM_BACKEND=sim`) to run without hardware;
//! the numbers then only measure software overhead.

use anyhow::Result;
use clap::Parser;
use pistorm_driver::{connect, BackendSelection, BridgeConfig, BusControl, BusOp, Width};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const BATCH_SIZES: [usize; 8] = [1, 4, 16, 64, 128, 256, 512, 1024];

#[derive(Parser)]
#[command(name = "bench_batch", about = "Batch vs single-op throughput")]
struct Args {
    /// Backend: auto, kernel, mmio, gpiochip or sim.
    #[arg(long)]
    backend: Option<BackendSelection>,

    /// Bytes to scan per pass.
    #[arg(long, default_value_t = 16384)]
    len: u32,

    /// Start address.
    #[arg(long, default_value_t = 0x00F8_0000)]
    addr: u32,

    /// Passes per configuration.
    #[arg(long, default_value_t = 5)]
    passes: u32,
}

fn scan_ops(addr: u32, len: u32) -> Vec<BusOp> {
    (0..len)
        .map(|i| BusOp::read(addr.wrapping_add(i), Width::Byte))
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args = Args::parse();
    let mut config = BridgeConfig::from_env()?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    let bus = connect(config)?;

    println!("Batch amortization sweep");
    println!("========================");
    println!("Backend : {}  ({})", bus.backend_type(), bus.query()?);
    println!("Scan    : {} bytes at {:#08x}, {} passes", args.len, args.addr, args.passes);
    println!();
    println!(
        "  {:>7}  {:>12}  {:>10}  {:>12}  {:>9}",
        "batch", "total ms", "µs/op", "ops/s", "speedup"
    );
    println!("  {:-<7}  {:-<12}  {:-<10}  {:-<12}  {:-<9}", "", "", "", "", "");

    let ops_per_pass = f64::from(args.len.max(1));
    let passes = f64::from(args.passes.max(1));

    // Single-op baseline.
    let mut ops = scan_ops(args.addr, args.len);
    let t0 = Instant::now();
    for _ in 0..args.passes.max(1) {
        for op in &mut ops {
            bus.bus_op(op)?;
        }
    }
    let single_ms = t0.elapsed().as_secs_f64() * 1000.0 / passes;
    let single_us = single_ms * 1000.0 / ops_per_pass;
    println!(
        "  {:>7}  {:>12.2}  {:>10.2}  {:>12.0}  {:>8.2}×",
        "single",
        single_ms,
        single_us,
        1e6 / single_us,
        1.0
    );

    for &batch in &BATCH_SIZES {
        let mut ops = scan_ops(args.addr, args.len);
        let t0 = Instant::now();
        for _ in 0..args.passes.max(1) {
            for chunk in ops.chunks_mut(batch) {
                bus.batch(chunk)?;
            }
        }
        let total_ms = t0.elapsed().as_secs_f64() * 1000.0 / passes;
        let us_per_op = total_ms * 1000.0 / ops_per_pass;
        println!(
            "  {:>7}  {:>12.2}  {:>10.2}  {:>12.0}  {:>8.2}×",
            batch,
            total_ms,
            us_per_op,
            1e6 / us_per_op,
            single_us / us_per_op
        );
    }

    Ok(())
}
