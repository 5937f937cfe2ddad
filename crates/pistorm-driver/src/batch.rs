//! Batched execution
//!
//! A batch is 1..=1024 ops run strictly in order under one ownership of the
//! engine, so the per-call crossing cost is paid once per batch rather than
//! once per op.
//!
//! Write-back rule: ops run on a private copy. When op `k` fails, ops
//! `[0, k)` are copied back with their results, ops `[k, N)` are left
//! exactly as submitted, and the error is `BatchFailed { completed: k }`.

use crate::engine::TransactionEngine;
use crate::error::{PistormError, Result};
use crate::link::BusLink;
use crate::op::BusOp;

/// Largest batch accepted.
pub const MAX_BATCH_OPS: usize = 1024;

/// Reject empty and oversized batches.
///
/// # Errors
///
/// Returns `InvalidArgument` unless `1 <= count <= MAX_BATCH_OPS`.
pub fn validate_count(count: usize) -> Result<()> {
    if count == 0 || count > MAX_BATCH_OPS {
        return Err(PistormError::invalid_argument(format!(
            "batch of {count} ops (expected 1..={MAX_BATCH_OPS})"
        )));
    }
    Ok(())
}

/// Run `ops` in order on `engine`.
///
/// # Errors
///
/// Returns `InvalidArgument` for a bad count (nothing is executed), or
/// `BatchFailed` wrapping the first op failure.
pub fn run_batch<L: BusLink>(engine: &mut TransactionEngine<L>, ops: &mut [BusOp]) -> Result<()> {
    validate_count(ops.len())?;

    let mut work = ops.to_vec();
    for (i, op) in work.iter_mut().enumerate() {
        if let Err(e) = engine.execute(op) {
            engine.record_batch(i);
            ops[..i].copy_from_slice(&work[..i]);
            tracing::debug!("batch stopped at op {i}/{}: {e}", ops.len());
            return Err(PistormError::batch_failed(i, e));
        }
    }

    engine.record_batch(work.len());
    ops.copy_from_slice(&work);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedLink;
    use crate::config::TimingPolicy;
    use crate::op::Width;

    fn engine() -> TransactionEngine<SimulatedLink> {
        TransactionEngine::new(SimulatedLink::new(), TimingPolicy::default())
    }

    #[test]
    fn count_bounds() {
        assert!(validate_count(0).is_err());
        assert!(validate_count(1).is_ok());
        assert!(validate_count(MAX_BATCH_OPS).is_ok());
        assert!(validate_count(MAX_BATCH_OPS + 1).is_err());
    }

    #[test]
    fn oversized_batch_touches_nothing() {
        let mut e = engine();
        let mut ops = vec![BusOp::write(0, 1, Width::Word); MAX_BATCH_OPS + 1];
        let err = run_batch(&mut e, &mut ops).unwrap_err();
        assert!(matches!(err, PistormError::InvalidArgument { .. }));
        assert!(e.link().handle().strobes().is_empty());
    }

    #[test]
    fn results_written_back() {
        let mut e = engine();
        let mut ops = [
            BusOp::write(0x10, 0x11, Width::Byte),
            BusOp::read(0x10, Width::Byte),
        ];
        run_batch(&mut e, &mut ops).unwrap();
        assert_eq!(ops[1].value, 0x11);
        assert_eq!(e.stats().batches, 1);
        assert_eq!(e.stats().batch_ops, 2);
    }
}
