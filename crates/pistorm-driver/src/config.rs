//! Bridge configuration
//!
//! Every timing value the bus protocol depends on is a policy value here,
//! never a constant in the engine. `BridgeConfig::default()` matches the
//! adapter's stock timings; `BridgeConfig::from_env()` applies deployment
//! overrides on top.
//!
//! | Variable | Field | Format |
//! |----------|-------|--------|
//! | `PISTORM_BACKEND` | `backend` | `auto`, `kernel`, `mmio`, `gpiochip`, `sim` |
//! | `PISTORM_PERI_BASE` | `peri_base` | hex (`0xFE000000`) |
//! | `PISTORM_GPIOCHIP` | `gpiochip` | path |
//! | `PISTORM_DEVICE` | `kernel_device` | path |
//! | `PISTORM_TIMEOUT_MS` | `timing.timeout` | decimal ms |
//! | `PISTORM_POLL_US` | `timing.poll_interval` | decimal µs, 0 = spin |
//! | `PISTORM_RESET_PULSE_MS` | `reset.pulse` | decimal ms |
//! | `PISTORM_GPCLK_SRC` | `clock.source` | decimal |
//! | `PISTORM_GPCLK_DIV` | `clock.divisor` | decimal, 1..=4095 |

use crate::error::{PistormError, Result};
use crate::link::BackendSelection;
use pistorm_chip::{clock, peri};
use std::path::PathBuf;
use std::time::Duration;

/// Default character device of the bridge kernel driver.
pub const DEFAULT_KERNEL_DEVICE: &str = "/dev/pistorm0";

/// Default GPIO character device.
pub const DEFAULT_GPIOCHIP: &str = "/dev/gpiochip0";

/// Handshake timeout and poll granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingPolicy {
    /// Longest wait for the handshake line to clear.
    pub timeout: Duration,
    /// Sleep between handshake samples; zero spins.
    pub poll_interval: Duration,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            poll_interval: Duration::ZERO,
        }
    }
}

impl TimingPolicy {
    /// Policy with the given timeout and pure spinning.
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Duration::ZERO,
        }
    }
}

/// GPCLK0 source and integer divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// Clock source number (`CM_GP0CTL` bits 3..0).
    pub source: u32,
    /// Integer divisor, 1..=4095.
    pub divisor: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            source: clock::DEFAULT_SOURCE,
            divisor: clock::DEFAULT_DIVISOR,
        }
    }
}

impl ClockConfig {
    /// Check source and divisor against the hardware fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown source or a divisor outside 1..=4095.
    pub fn validate(&self) -> Result<clock::ClockSource> {
        if !clock::divisor_valid(self.divisor) {
            return Err(PistormError::invalid_argument(format!(
                "GPCLK divisor {} outside 1..={}",
                self.divisor,
                clock::DIVI_MAX
            )));
        }
        clock::ClockSource::from_raw(self.source).ok_or_else(|| {
            PistormError::invalid_argument(format!("unknown GPCLK source {}", self.source))
        })
    }
}

/// Reset sequence timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetConfig {
    /// How long STATUS=INIT is held.
    pub init_hold: Duration,
    /// Settle time after STATUS=0.
    pub init_settle: Duration,
    /// Reset pulse width (STATUS=0 until STATUS=RESET).
    pub pulse: Duration,
    /// Pause after the pulse before polling the handshake.
    pub post_pulse: Duration,
    /// Longest wait for the handshake to clear per attempt.
    pub handshake_wait: Duration,
    /// Interval between handshake samples.
    pub handshake_poll: Duration,
    /// Pause between failed attempts.
    pub retry_backoff: Duration,
    /// Attempts before degrading.
    pub attempts: u32,
    /// Status reads issued as warmup once the bus answers.
    pub warmup_reads: u32,
    /// Sleep once every this many warmup reads.
    pub warmup_sleep_every: u32,
    /// Warmup sleep.
    pub warmup_sleep: Duration,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            init_hold: Duration::from_micros(1500),
            init_settle: Duration::from_micros(100),
            pulse: Duration::from_millis(100),
            post_pulse: Duration::from_micros(1500),
            handshake_wait: Duration::from_millis(20),
            handshake_poll: Duration::from_micros(10),
            retry_backoff: Duration::from_millis(2),
            attempts: 3,
            warmup_reads: 64,
            warmup_sleep_every: 16,
            warmup_sleep: Duration::from_micros(100),
        }
    }
}

impl ResetConfig {
    /// Same sequence with every sleep removed; for simulated buses.
    pub fn immediate() -> Self {
        Self {
            init_hold: Duration::ZERO,
            init_settle: Duration::ZERO,
            pulse: Duration::ZERO,
            post_pulse: Duration::ZERO,
            handshake_wait: Duration::from_millis(1),
            handshake_poll: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            warmup_sleep: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Everything needed to open and drive one bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Which backend to open.
    pub backend: BackendSelection,
    /// Peripheral base override; `None` reads the device tree.
    pub peri_base: Option<u32>,
    /// GPIO character device for the gpiochip backend.
    pub gpiochip: PathBuf,
    /// Kernel driver node.
    pub kernel_device: PathBuf,
    /// Handshake policy.
    pub timing: TimingPolicy,
    /// Bus clock.
    pub clock: ClockConfig,
    /// Reset timings.
    pub reset: ResetConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend: BackendSelection::Auto,
            peri_base: None,
            gpiochip: PathBuf::from(DEFAULT_GPIOCHIP),
            kernel_device: PathBuf::from(DEFAULT_KERNEL_DEVICE),
            timing: TimingPolicy::default(),
            clock: ClockConfig::default(),
            reset: ResetConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Simulated bus with zero-delay reset timings.
    pub fn simulated() -> Self {
        Self {
            backend: BackendSelection::Simulated,
            reset: ResetConfig::immediate(),
            ..Self::default()
        }
    }

    /// Defaults with `PISTORM_*` environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a variable is set but malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a value is present but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("PISTORM_BACKEND") {
            config.backend = v.parse()?;
        }
        if let Some(v) = lookup("PISTORM_PERI_BASE") {
            config.peri_base = Some(parse_hex("PISTORM_PERI_BASE", &v)?);
        }
        if let Some(v) = lookup("PISTORM_GPIOCHIP") {
            config.gpiochip = PathBuf::from(v);
        }
        if let Some(v) = lookup("PISTORM_DEVICE") {
            config.kernel_device = PathBuf::from(v);
        }
        if let Some(v) = lookup("PISTORM_TIMEOUT_MS") {
            config.timing.timeout = Duration::from_millis(parse_dec("PISTORM_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("PISTORM_POLL_US") {
            config.timing.poll_interval = Duration::from_micros(parse_dec("PISTORM_POLL_US", &v)?);
        }
        if let Some(v) = lookup("PISTORM_RESET_PULSE_MS") {
            config.reset.pulse = Duration::from_millis(parse_dec("PISTORM_RESET_PULSE_MS", &v)?);
        }
        if let Some(v) = lookup("PISTORM_GPCLK_SRC") {
            config.clock.source = narrow("PISTORM_GPCLK_SRC", parse_dec("PISTORM_GPCLK_SRC", &v)?)?;
        }
        if let Some(v) = lookup("PISTORM_GPCLK_DIV") {
            config.clock.divisor = narrow("PISTORM_GPCLK_DIV", parse_dec("PISTORM_GPCLK_DIV", &v)?)?;
        }

        config.clock.validate()?;
        Ok(config)
    }

    /// Peripheral base: the override if set, else the device tree, else the default.
    pub fn resolved_peri_base(&self) -> u32 {
        self.peri_base.unwrap_or_else(detect_peri_base)
    }
}

/// Read the peripheral base from the device tree.
pub fn detect_peri_base() -> u32 {
    match std::fs::read(peri::SOC_RANGES_PATH) {
        Ok(bytes) => match peri::parse_soc_ranges(&bytes) {
            Some(base) => {
                if !peri::is_known_base(base) {
                    tracing::warn!("Unrecognised peripheral base {base:#010x} from device tree");
                }
                base
            }
            None => peri::DEFAULT_PERI_BASE,
        },
        Err(e) => {
            tracing::debug!("{} unreadable ({e}), assuming {:#010x}", peri::SOC_RANGES_PATH, peri::DEFAULT_PERI_BASE);
            peri::DEFAULT_PERI_BASE
        }
    }
}

/// Parse a hex value with or without a `0x` prefix.
///
/// # Errors
///
/// Returns `InvalidArgument` naming `what` if `value` is not hex.
pub fn parse_hex(what: &str, value: &str) -> Result<u32> {
    let digits = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .replace('_', "");
    u32::from_str_radix(&digits, 16)
        .map_err(|e| PistormError::invalid_argument(format!("{what}={value:?}: {e}")))
}

fn parse_dec(what: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| PistormError::invalid_argument(format!("{what}={value:?}: {e}")))
}

fn narrow(what: &str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| PistormError::invalid_argument(format!("{what}={value} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.timing.timeout, Duration::from_millis(500));
        assert_eq!(config.reset.pulse, Duration::from_millis(100));
        assert_eq!(config.reset.attempts, 3);
        assert_eq!(config.clock, ClockConfig { source: 5, divisor: 6 });
        assert_eq!(config.backend, BackendSelection::Auto);
    }

    #[test]
    fn environment_overrides() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("PISTORM_BACKEND", "sim"),
            ("PISTORM_PERI_BASE", "0xFE000000"),
            ("PISTORM_TIMEOUT_MS", "1"),
            ("PISTORM_POLL_US", "5"),
            ("PISTORM_RESET_PULSE_MS", "50"),
            ("PISTORM_GPCLK_DIV", "5"),
        ]))
        .unwrap();
        assert_eq!(config.backend, BackendSelection::Simulated);
        assert_eq!(config.peri_base, Some(0xFE00_0000));
        assert_eq!(config.timing.timeout, Duration::from_millis(1));
        assert_eq!(config.timing.poll_interval, Duration::from_micros(5));
        assert_eq!(config.reset.pulse, Duration::from_millis(50));
        assert_eq!(config.clock.divisor, 5);
    }

    #[test]
    fn malformed_values_rejected() {
        for pairs in [
            [("PISTORM_TIMEOUT_MS", "soon")],
            [("PISTORM_PERI_BASE", "0xZZ")],
            [("PISTORM_BACKEND", "fpga")],
            [("PISTORM_GPCLK_DIV", "0")],
            [("PISTORM_GPCLK_SRC", "3")],
        ] {
            let err = BridgeConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(matches!(err, PistormError::InvalidArgument { .. }), "{pairs:?}: {err}");
        }
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("x", "3F000000").unwrap(), 0x3F00_0000);
        assert_eq!(parse_hex("x", "0x20_000_000").unwrap(), 0x2000_0000);
    }

    #[test]
    fn explicit_base_wins() {
        let config = BridgeConfig {
            peri_base: Some(0x2000_0000),
            ..BridgeConfig::default()
        };
        assert_eq!(config.resolved_peri_base(), 0x2000_0000);
    }
}
