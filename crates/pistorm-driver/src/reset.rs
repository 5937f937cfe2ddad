//! Reset controller
//!
//! Drives the adapter state machine and the remote RESET line through the
//! STATUS register.
//!
//! ```text
//! Idle ─► InitAsserted ─► InitCleared ─► Settled        reset_state_machine
//!      ─► ResetAsserted ─► ResetReleased                pulse_reset
//!      ─► Warmup ─► Idle                                reset_and_wait
//! ```
//!
//! `reset_and_wait` retries the full sequence up to `attempts` times and
//! only warms the bus up once the handshake has actually cleared. When
//! every attempt fails it logs and returns [`ResetOutcome::Degraded`]
//! instead of an error: the caller may still get partial service, or an
//! operator may intervene.

use crate::config::ResetConfig;
use crate::control::BusControl;
use crate::engine::TransactionEngine;
use crate::error::Result;
use crate::link::{BusLink, PinLevels};
use pistorm_chip::protocol::status;
use std::time::{Duration, Instant};

/// Reset sequence position, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPhase {
    /// Not resetting.
    Idle,
    /// STATUS = INIT written.
    InitAsserted,
    /// STATUS = 0 written after INIT.
    InitCleared,
    /// Settle time elapsed.
    Settled,
    /// STATUS = 0 written; remote RESET asserted.
    ResetAsserted,
    /// STATUS = RESET written; remote RESET released.
    ResetReleased,
    /// Issuing warmup status reads.
    Warmup,
}

/// Result of [`reset_and_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The handshake cleared on attempt `attempts` and the bus was warmed up.
    Ready {
        /// Attempts used (1-based).
        attempts: u32,
    },
    /// The handshake never cleared; the bus was left as is.
    Degraded {
        /// Attempts made.
        attempts: u32,
    },
}

impl ResetOutcome {
    /// Whether the bus answered.
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

fn hold(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

/// Put the adapter state machine through INIT.
pub fn reset_state_machine<L: BusLink>(engine: &mut TransactionEngine<L>, config: &ResetConfig) {
    tracing::debug!("reset: {:?}", ResetPhase::InitAsserted);
    engine.write_status(status::INIT);
    hold(config.init_hold);

    tracing::debug!("reset: {:?}", ResetPhase::InitCleared);
    engine.write_status(0);
    hold(config.init_settle);
    tracing::debug!("reset: {:?}", ResetPhase::Settled);
}

/// Assert the remote RESET line for `config.pulse`, then release it.
pub fn pulse_reset<L: BusLink>(engine: &mut TransactionEngine<L>, config: &ResetConfig) {
    tracing::debug!("reset: {:?}", ResetPhase::ResetAsserted);
    engine.write_status(0);
    hold(config.pulse);
    engine.write_status(status::RESET);
    tracing::debug!("reset: {:?}", ResetPhase::ResetReleased);
}

/// Steps `reset_and_wait` is built from.
trait ResetTarget {
    fn reset_state_machine(&mut self, config: &ResetConfig) -> Result<()>;
    fn pulse_reset(&mut self, config: &ResetConfig) -> Result<()>;
    fn levels(&mut self) -> Result<PinLevels>;
    fn read_status(&mut self) -> Result<u16>;
}

/// Each step is a separate command on the control surface.
struct Commands<'a, C: ?Sized>(&'a C);

impl<C: BusControl + ?Sized> ResetTarget for Commands<'_, C> {
    fn reset_state_machine(&mut self, _config: &ResetConfig) -> Result<()> {
        self.0.reset_state_machine()
    }

    fn pulse_reset(&mut self, _config: &ResetConfig) -> Result<()> {
        self.0.pulse_reset()
    }

    fn levels(&mut self) -> Result<PinLevels> {
        self.0.pins()
    }

    fn read_status(&mut self) -> Result<u16> {
        self.0.read_status()
    }
}

impl<L: BusLink> ResetTarget for TransactionEngine<L> {
    fn reset_state_machine(&mut self, config: &ResetConfig) -> Result<()> {
        reset_state_machine(self, config);
        Ok(())
    }

    fn pulse_reset(&mut self, config: &ResetConfig) -> Result<()> {
        pulse_reset(self, config);
        Ok(())
    }

    fn levels(&mut self) -> Result<PinLevels> {
        Ok(self.sample_levels())
    }

    fn read_status(&mut self) -> Result<u16> {
        TransactionEngine::read_status(self)
    }
}

/// Reset the adapter and the remote system, then wait for the bus to answer.
///
/// `tag` names the caller in logs. Each step is issued as its own command,
/// so other callers of `control` may run between steps; use
/// [`reset_engine_and_wait`] under exclusive ownership when that matters.
///
/// # Errors
///
/// Only errors from the control surface itself (e.g. `DeviceUnavailable`)
/// are returned; a bus that never answers yields `Ok(Degraded)`.
pub fn reset_and_wait<C: BusControl + ?Sized>(
    control: &C,
    tag: &str,
    config: &ResetConfig,
) -> Result<ResetOutcome> {
    run(&mut Commands(control), tag, config)
}

/// [`reset_and_wait`] on an engine the caller owns exclusively; nothing
/// else can reach the bus until the sequence finishes.
///
/// # Errors
///
/// Never fails today; the `Result` matches [`reset_and_wait`].
pub fn reset_engine_and_wait<L: BusLink>(
    engine: &mut TransactionEngine<L>,
    tag: &str,
    config: &ResetConfig,
) -> Result<ResetOutcome> {
    run(engine, tag, config)
}

fn run<T: ResetTarget>(target: &mut T, tag: &str, config: &ResetConfig) -> Result<ResetOutcome> {
    let attempts = config.attempts.max(1);

    for attempt in 1..=attempts {
        target.reset_state_machine(config)?;
        target.pulse_reset(config)?;
        hold(config.post_pulse);

        if wait_handshake_clear(target, config)? {
            warmup(target, config);
            tracing::info!("[{tag}] bus ready after {attempt} reset attempt(s)");
            return Ok(ResetOutcome::Ready { attempts: attempt });
        }

        tracing::debug!("[{tag}] handshake still asserted after attempt {attempt}");
        hold(config.retry_backoff);
    }

    tracing::warn!("[{tag}] handshake still asserted after {attempts} reset attempts; continuing");
    Ok(ResetOutcome::Degraded { attempts })
}

fn wait_handshake_clear<T: ResetTarget>(target: &mut T, config: &ResetConfig) -> Result<bool> {
    let start = Instant::now();
    loop {
        if !target.levels()?.handshake_pending() {
            return Ok(true);
        }
        if start.elapsed() >= config.handshake_wait {
            return Ok(false);
        }
        hold(config.handshake_poll);
    }
}

/// Issue `warmup_reads` status reads so the adapter settles.
fn warmup<T: ResetTarget>(target: &mut T, config: &ResetConfig) {
    tracing::debug!("reset: {:?}", ResetPhase::Warmup);
    let every = config.warmup_sleep_every.max(1);
    for i in 0..config.warmup_reads {
        if let Err(e) = target.read_status() {
            tracing::warn!("warmup status read {i} failed: {e}");
            return;
        }
        if i % every == 0 {
            hold(config.warmup_sleep);
        }
    }
}
