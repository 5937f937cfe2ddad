//! `pistorm` — command-line interface for the PiStorm GPIO bus bridge.
//!
//! ```text
//! USAGE:
//!   pistorm query                         ABI version and capabilities
//!   pistorm pins                          Raw GPIO level snapshot
//!   pistorm status                        Adapter status register and IPL
//!   pistorm peek <addr> [-w 1|2|4]        Read remote memory
//!   pistorm poke <addr> <value> [-w ..]   Write remote memory
//!   pistorm scan <addr> <len>             Hexdump via batched byte reads
//!   pistorm reset                         Reset the remote system and wait
//!   pistorm selftest <addr> <len>         Write/readback pattern test
//! ```
//!
//! Global flags override `PISTORM_*` environment settings.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pistorm_driver::{
    connect, parse_hex, BackendSelection, BridgeConfig, BusControl, BusOp, PistormError,
    ResetOutcome, Width, MAX_BATCH_OPS,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pistorm", about = "PiStorm GPIO bus bridge CLI", version)]
struct Cli {
    /// Backend: auto, kernel, mmio, gpiochip or sim.
    #[arg(long, global = true)]
    backend: Option<BackendSelection>,

    /// Handshake timeout in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Peripheral base address (hex), overriding the device tree.
    #[arg(long, global = true, value_parser = hex)]
    peri_base: Option<u32>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print ABI version and capabilities.
    Query,
    /// Print a raw level snapshot of the GPIO header.
    Pins,
    /// Read the adapter status register.
    Status,
    /// Read one value from remote memory.
    Peek {
        /// Address (hex).
        #[arg(value_parser = hex)]
        addr: u32,
        /// Access width in bytes.
        #[arg(short, long, default_value = "2", value_parser = width)]
        width: Width,
    },
    /// Write one value to remote memory.
    Poke {
        /// Address (hex).
        #[arg(value_parser = hex)]
        addr: u32,
        /// Value (hex).
        #[arg(value_parser = hex)]
        value: u32,
        /// Access width in bytes.
        #[arg(short, long, default_value = "2", value_parser = width)]
        width: Width,
    },
    /// Hexdump a range of remote memory.
    Scan {
        /// Start address (hex).
        #[arg(value_parser = hex)]
        addr: u32,
        /// Length in bytes (hex).
        #[arg(value_parser = hex)]
        len: u32,
        /// Ops per batch.
        #[arg(long, default_value_t = 256)]
        batch: usize,
    },
    /// Reset the adapter and the remote system, then wait for the bus.
    Reset {
        /// Name used in log lines.
        #[arg(long, default_value = "cli")]
        tag: String,
    },
    /// Write a pattern to remote memory and read it back.
    Selftest {
        /// Start address (hex, even).
        #[arg(value_parser = hex)]
        addr: u32,
        /// Length in bytes (hex).
        #[arg(value_parser = hex)]
        len: u32,
    },
}

fn hex(s: &str) -> std::result::Result<u32, PistormError> {
    parse_hex("value", s)
}

fn width(s: &str) -> std::result::Result<Width, PistormError> {
    let bytes: u8 = s
        .parse()
        .map_err(|_| PistormError::invalid_argument(format!("width {s:?} is not 1, 2 or 4")))?;
    Width::try_from(bytes)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    let mut config = BridgeConfig::from_env()?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(ms) = cli.timeout_ms {
        config.timing.timeout = Duration::from_millis(ms);
    }
    if cli.peri_base.is_some() {
        config.peri_base = cli.peri_base;
    }

    let bus = connect(config.clone())?;

    match cli.command {
        Cmd::Query => cmd_query(bus.as_ref())?,
        Cmd::Pins => cmd_pins(bus.as_ref())?,
        Cmd::Status => cmd_status(bus.as_ref())?,
        Cmd::Peek { addr, width } => cmd_peek(bus.as_ref(), addr, width)?,
        Cmd::Poke { addr, value, width } => cmd_poke(bus.as_ref(), addr, value, width)?,
        Cmd::Scan { addr, len, batch } => cmd_scan(bus.as_ref(), addr, len, batch)?,
        Cmd::Reset { tag } => cmd_reset(bus.as_ref(), &tag, &config)?,
        Cmd::Selftest { addr, len } => cmd_selftest(bus.as_ref(), addr, len)?,
    }

    Ok(())
}

fn cmd_query(bus: &dyn BusControl) -> Result<()> {
    let q = bus.query()?;
    println!("Backend      : {}", bus.backend_type());
    println!("ABI version  : {}", q.abi_version);
    println!("Capabilities : {:#x}", q.capabilities.bits());
    for (name, _) in q.capabilities.iter_names() {
        println!("  {name}");
    }
    Ok(())
}

fn cmd_pins(bus: &dyn BusControl) -> Result<()> {
    let p = bus.pins()?;
    println!("GPLEV0       : {:#010x}", p.gplev0);
    println!("GPLEV1       : {:#010x}", p.gplev1);
    println!("Handshake    : {}", if p.handshake_pending() { "busy" } else { "idle" });
    println!("IPL zero     : {}", p.ipl_zero());
    println!("Data lane    : {:#06x}", p.data());
    Ok(())
}

fn cmd_status(bus: &dyn BusControl) -> Result<()> {
    let value = bus.read_status()?;
    println!("Status       : {value:#06x}");
    println!("IPL          : {}", bus.interrupt_level()?);
    Ok(())
}

fn cmd_peek(bus: &dyn BusControl, addr: u32, width: Width) -> Result<()> {
    let mut op = BusOp::read(addr, width);
    bus.bus_op(&mut op)?;
    let digits = usize::from(width.bytes()) * 2;
    println!("{addr:06x}: {:0digits$x}", op.value);
    Ok(())
}

fn cmd_poke(bus: &dyn BusControl, addr: u32, value: u32, width: Width) -> Result<()> {
    if value & !width.mask() != 0 {
        bail!("value {value:#x} does not fit in {} byte(s)", width.bytes());
    }
    bus.bus_op(&mut BusOp::write(addr, value, width))?;
    Ok(())
}

fn cmd_scan(bus: &dyn BusControl, addr: u32, len: u32, batch: usize) -> Result<()> {
    let batch = batch.clamp(1, MAX_BATCH_OPS);
    let mut ops: Vec<BusOp> = (0..len)
        .map(|i| BusOp::read(addr.wrapping_add(i), Width::Byte))
        .collect();

    for chunk in ops.chunks_mut(batch) {
        bus.batch(chunk)?;
    }

    for (row, line) in ops.chunks(16).enumerate() {
        let base = addr.wrapping_add(u32::try_from(row * 16)?);
        let bytes: Vec<String> = line.iter().map(|op| format!("{:02x}", op.value)).collect();
        let text: String = line
            .iter()
            .map(|op| {
                let c = char::from(u8::try_from(op.value).unwrap_or(b'.'));
                if c.is_ascii_graphic() || c == ' ' { c } else { '.' }
            })
            .collect();
        println!("{base:06x}: {:<47}  {text}", bytes.join(" "));
    }
    Ok(())
}

fn cmd_reset(bus: &dyn BusControl, tag: &str, config: &BridgeConfig) -> Result<()> {
    match bus.reset_and_wait(tag, &config.reset)? {
        ResetOutcome::Ready { attempts } => println!("Bus ready after {attempts} attempt(s)"),
        ResetOutcome::Degraded { attempts } => {
            println!("Bus did not answer after {attempts} attempts; continuing degraded");
        }
    }
    Ok(())
}

fn cmd_selftest(bus: &dyn BusControl, addr: u32, len: u32) -> Result<()> {
    if addr & 1 != 0 || len & 1 != 0 {
        bail!("selftest needs an even address and length");
    }
    let words = len / 2;
    let pattern = |i: u32| -> u32 { (i.wrapping_mul(0x9E37) ^ 0xA5A5) & 0xFFFF };

    let mut writes: Vec<BusOp> = (0..words)
        .map(|i| BusOp::write(addr.wrapping_add(i * 2), pattern(i), Width::Word))
        .collect();
    bus.submit(&mut writes)?;

    let mut reads: Vec<BusOp> = (0..words)
        .map(|i| BusOp::read(addr.wrapping_add(i * 2), Width::Word))
        .collect();
    bus.submit(&mut reads)?;

    let mut failures = 0usize;
    for (i, op) in (0..words).zip(&reads) {
        let want = pattern(i);
        if op.value != want {
            failures += 1;
            if failures <= 16 {
                println!("{:06x}: wrote {want:04x} read {:04x}", op.address, op.value);
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {words} words differ");
    }
    println!("{words} words OK");
    Ok(())
}
