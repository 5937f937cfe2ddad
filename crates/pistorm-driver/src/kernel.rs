//! Client of the bridge kernel driver
//!
//! The driver exposes the command surface as ioctls on a character device
//! (`/dev/pistorm0` by default). The driver serializes commands itself, so
//! this client holds no lock of its own.
//!
//! Drivers that do not advertise `BATCH` still work: batches are issued as
//! sequential BUSOPs with the same write-back rule.

use crate::abi::{
    RawBatch, RawBusOp, RawPins, RawQuery, PISTORM_IOC_BATCH, PISTORM_IOC_BUSOP,
    PISTORM_IOC_GET_PINS, PISTORM_IOC_PULSE_RESET, PISTORM_IOC_QUERY, PISTORM_IOC_RESET_SM,
    PISTORM_IOC_SETUP,
};
use crate::batch;
use crate::capabilities::{Capabilities, CapabilityQuery, ABI_VERSION};
use crate::config::BridgeConfig;
use crate::control::{self, BusControl};
use crate::error::{PistormError, Result};
use crate::io;
use crate::link::{BackendType, PinLevels};
use crate::op::BusOp;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};

/// Open handle on the bridge kernel driver.
#[derive(Debug)]
pub struct KernelClient {
    path: PathBuf,
    file: File,
    caps: CapabilityQuery,
}

impl KernelClient {
    /// Open `config.kernel_device` and query its capabilities.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the node is missing or does not answer QUERY.
    pub fn open(config: &BridgeConfig) -> Result<Self> {
        Self::open_path(&config.kernel_device)
    }

    /// Open the driver node at `path`.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the node is missing or does not answer QUERY.
    pub fn open_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PistormError::device_unavailable(format!(
                "{} does not exist (is the driver loaded?)",
                path.display()
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| PistormError::device_unavailable(format!("{}: {e}", path.display())))?;

        let mut raw = RawQuery::default();
        io::ioctl(file.as_fd(), libc::c_ulong::from(PISTORM_IOC_QUERY), &mut raw).map_err(|e| {
            PistormError::device_unavailable(format!("{}: QUERY failed: {e}", path.display()))
        })?;
        let caps = CapabilityQuery::from(raw);

        if caps.abi_version != ABI_VERSION {
            tracing::warn!(
                "{} speaks ABI v{}, this client speaks v{ABI_VERSION}",
                path.display(),
                caps.abi_version
            );
        }
        tracing::info!("Opened {}: {caps}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file,
            caps,
        })
    }

    /// Driver node path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capabilities reported when the node was opened.
    pub const fn capabilities(&self) -> CapabilityQuery {
        self.caps
    }

    fn command(&self, operation: &'static str, request: u32) -> Result<()> {
        io::ioctl_none(self.file.as_fd(), libc::c_ulong::from(request))
            .map(|_| ())
            .map_err(|e| map_errno(operation, e))
    }

    fn command_with<T>(&self, operation: &'static str, request: u32, arg: &mut T) -> Result<()> {
        io::ioctl(self.file.as_fd(), libc::c_ulong::from(request), arg)
            .map(|_| ())
            .map_err(|e| map_errno(operation, e))
    }
}

/// Translate a driver errno into the error taxonomy.
fn map_errno(operation: &'static str, err: std::io::Error) -> PistormError {
    match err.raw_os_error() {
        Some(libc::ETIMEDOUT) => PistormError::Timeout {
            operation,
            duration_ms: 0,
        },
        Some(libc::EINVAL) => PistormError::invalid_argument(format!("{operation}: rejected by driver")),
        Some(libc::ENODEV | libc::ENXIO) => {
            PistormError::device_unavailable(format!("{operation}: {err}"))
        }
        _ => PistormError::Io { source: err },
    }
}

impl BusControl for KernelClient {
    fn backend_type(&self) -> BackendType {
        BackendType::Kernel
    }

    fn setup(&self) -> Result<()> {
        self.command("setup", PISTORM_IOC_SETUP)
    }

    fn reset_state_machine(&self) -> Result<()> {
        self.command("reset_sm", PISTORM_IOC_RESET_SM)
    }

    fn pulse_reset(&self) -> Result<()> {
        self.command("pulse_reset", PISTORM_IOC_PULSE_RESET)
    }

    fn pins(&self) -> Result<PinLevels> {
        let mut raw = RawPins::default();
        self.command_with("get_pins", PISTORM_IOC_GET_PINS, &mut raw)?;
        Ok(raw.into())
    }

    fn query(&self) -> Result<CapabilityQuery> {
        let mut raw = RawQuery::default();
        self.command_with("query", PISTORM_IOC_QUERY, &mut raw)?;
        Ok(raw.into())
    }

    fn bus_op(&self, op: &mut BusOp) -> Result<()> {
        let mut raw = RawBusOp::from(*op);
        self.command_with("busop", PISTORM_IOC_BUSOP, &mut raw)?;
        op.value = raw.value;
        Ok(())
    }

    fn batch(&self, ops: &mut [BusOp]) -> Result<()> {
        batch::validate_count(ops.len())?;
        if !self.caps.supports(Capabilities::BATCH) {
            return control::run_sequential(self, ops);
        }

        let mut raw: Vec<RawBusOp> = ops.iter().map(|&op| RawBusOp::from(op)).collect();
        let mut arg = RawBatch {
            ops_ptr: raw.as_mut_ptr() as usize as u64,
            ops_count: u32::try_from(raw.len())
                .map_err(|_| PistormError::invalid_argument("batch count overflows u32"))?,
            reserved: 0,
        };
        // The driver does not report how far a failed batch got.
        self.command_with("batch", PISTORM_IOC_BATCH, &mut arg)
            .map_err(|e| PistormError::batch_failed(0, e))?;

        for (op, r) in ops.iter_mut().zip(&raw) {
            op.value = r.value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_node_is_unavailable() {
        let err = KernelClient::open_path(Path::new("/nonexistent/pistorm9")).unwrap_err();
        assert!(matches!(err, PistormError::DeviceUnavailable { .. }));
    }

    #[test]
    fn errno_mapping() {
        let e = |n| std::io::Error::from_raw_os_error(n);
        assert!(map_errno("busop", e(libc::ETIMEDOUT)).is_timeout());
        assert!(matches!(
            map_errno("busop", e(libc::EINVAL)),
            PistormError::InvalidArgument { .. }
        ));
        assert!(matches!(
            map_errno("setup", e(libc::ENODEV)),
            PistormError::DeviceUnavailable { .. }
        ));
        assert!(matches!(map_errno("setup", e(libc::EPERM)), PistormError::Io { .. }));
    }

    #[test]
    #[ignore] // Requires the kernel driver
    fn query_loaded_driver() {
        let client = KernelClient::open(&BridgeConfig::default()).unwrap();
        let caps = client.query().unwrap();
        assert!(caps.supports(Capabilities::BUSOP));
    }
}
