//! Typed register access to the GPIO and GPCLK blocks
//!
//! The only code in the crate that dereferences mapped memory. Callers name
//! registers through [`GpioReg`] and [`ClockReg`]; there is no API taking a
//! raw offset, so an out-of-block access cannot be written.
//!
//! Mapping uses rustix for mmap/munmap.

// Peripheral registers are 32-bit and naturally aligned.
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::cast_possible_truncation)]

use crate::error::{PistormError, Result};
use pistorm_chip::{clock, regs};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::File;
use std::os::unix::io::AsFd;
use std::ptr::NonNull;

/// One page of device memory mapped shared, read/write.
#[derive(Debug)]
pub(crate) struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
    phys: u64,
}

// SAFETY: Send - the region owns its mapping exclusively; a mapping is
// process-wide, so moving the owner to another thread leaves it valid.
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    /// Map `len` bytes of `file` at byte offset `phys`.
    fn map(file: &File, phys: u64, len: usize) -> Result<Self> {
        // SAFETY: mmap of device memory.
        // Invariants: (1) file is an open /dev/mem or /dev/gpiomem descriptor;
        // (2) len is non-zero and page-sized; (3) phys is page-aligned;
        // (4) the result is checked and unmapped exactly once in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                phys,
            )
        }
        .map_err(|e| PistormError::device_unavailable(format!("mmap of {phys:#x} failed: {e}")))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| PistormError::device_unavailable("mmap returned a null mapping"))?;

        tracing::debug!("Mapped {len:#x} bytes at phys {phys:#x} -> {ptr:p}");
        Ok(Self { ptr, len, phys })
    }

    fn read32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.len);
        // SAFETY: volatile read of a device register.
        // Invariants: (1) ptr valid for len bytes from map(); (2) offset comes
        // from a register enum and offset + 4 <= len (checked by the block
        // constructors); (3) u32 aligned.
        unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.len);
        // SAFETY: volatile write to a device register; same invariants as read32.
        unsafe {
            self.ptr
                .as_ptr()
                .add(offset)
                .cast::<u32>()
                .write_volatile(value);
        }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len are exactly what map() returned; Drop runs once and
        // no references into the mapping outlive self.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.len) } {
            tracing::warn!("munmap of phys {:#x} failed: {e}", self.phys);
        }
    }
}

// ── GPIO block ───────────────────────────────────────────────────────────────

/// Registers of the GPIO block the bridge uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioReg {
    /// Function select, GPIO 0-9.
    Fsel0,
    /// Function select, GPIO 10-19.
    Fsel1,
    /// Function select, GPIO 20-29.
    Fsel2,
    /// Output set.
    Set0,
    /// Output clear.
    Clr0,
    /// Levels, GPIO 0-31.
    Lev0,
    /// Levels, GPIO 32-53.
    Lev1,
}

impl GpioReg {
    /// Function-select registers in order.
    pub const FSEL: [Self; 3] = [Self::Fsel0, Self::Fsel1, Self::Fsel2];

    /// Byte offset inside the block.
    pub const fn offset(self) -> usize {
        match self {
            Self::Fsel0 => regs::GPFSEL0,
            Self::Fsel1 => regs::GPFSEL1,
            Self::Fsel2 => regs::GPFSEL2,
            Self::Set0 => regs::GPSET0,
            Self::Clr0 => regs::GPCLR0,
            Self::Lev0 => regs::GPLEV0,
            Self::Lev1 => regs::GPLEV1,
        }
    }
}

/// Mapped GPIO block.
#[derive(Debug)]
pub struct GpioBlock {
    region: MmapRegion,
}

impl GpioBlock {
    /// Map the GPIO block of `/dev/mem` at `peri_base`.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the mapping fails.
    pub fn map_mem(mem: &File, peri_base: u32) -> Result<Self> {
        let phys = u64::from(peri_base) + u64::from(regs::GPIO_BLOCK_OFFSET);
        Ok(Self {
            region: MmapRegion::map(mem, phys, regs::GPIO_BLOCK_LEN)?,
        })
    }

    /// Map `/dev/gpiomem`, which exposes only the GPIO block at offset zero.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the mapping fails.
    pub fn map_gpiomem(gpiomem: &File) -> Result<Self> {
        Ok(Self {
            region: MmapRegion::map(gpiomem, 0, regs::GPIO_BLOCK_LEN)?,
        })
    }

    /// Read a register.
    pub fn read(&self, reg: GpioReg) -> u32 {
        self.region.read32(reg.offset())
    }

    /// Write a register.
    pub fn write(&mut self, reg: GpioReg, value: u32) {
        self.region.write32(reg.offset(), value);
    }

    /// Write GPFSEL0..2 as a unit.
    pub fn write_fsel(&mut self, words: [u32; 3]) {
        for (reg, word) in GpioReg::FSEL.into_iter().zip(words) {
            self.write(reg, word);
        }
    }
}

// ── Clock manager block ──────────────────────────────────────────────────────

/// Registers of the clock-manager block the bridge uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockReg {
    /// GPCLK0 control.
    Gp0Ctl,
    /// GPCLK0 divider.
    Gp0Div,
}

impl ClockReg {
    /// Byte offset inside the block.
    pub const fn offset(self) -> usize {
        match self {
            Self::Gp0Ctl => clock::CM_GP0CTL,
            Self::Gp0Div => clock::CM_GP0DIV,
        }
    }
}

/// Mapped clock-manager block.
#[derive(Debug)]
pub struct ClockBlock {
    region: MmapRegion,
}

impl ClockBlock {
    /// Map the clock-manager block of `/dev/mem` at `peri_base`.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the mapping fails.
    pub fn map_mem(mem: &File, peri_base: u32) -> Result<Self> {
        let phys = u64::from(peri_base) + u64::from(clock::GPCLK_BLOCK_OFFSET);
        Ok(Self {
            region: MmapRegion::map(mem, phys, clock::GPCLK_BLOCK_LEN)?,
        })
    }

    /// Read a register.
    pub fn read(&self, reg: ClockReg) -> u32 {
        self.region.read32(reg.offset())
    }

    /// Write a register.
    pub fn write(&mut self, reg: ClockReg, value: u32) {
        self.region.write32(reg.offset(), value);
    }
}

#[cfg(test)]
#[allow(clippy::assertions_on_constants)]
mod tests {
    use super::*;

    #[test]
    fn every_register_fits_its_block() {
        for reg in [
            GpioReg::Fsel0,
            GpioReg::Fsel1,
            GpioReg::Fsel2,
            GpioReg::Set0,
            GpioReg::Clr0,
            GpioReg::Lev0,
            GpioReg::Lev1,
        ] {
            assert!(reg.offset() + 4 <= regs::GPIO_BLOCK_LEN, "{reg:?}");
            assert_eq!(reg.offset() % 4, 0);
        }
        for reg in [ClockReg::Gp0Ctl, ClockReg::Gp0Div] {
            assert!(reg.offset() + 4 <= clock::GPCLK_BLOCK_LEN, "{reg:?}");
        }
    }

    #[test]
    #[ignore] // Requires /dev/gpiomem
    fn gpiomem_levels_readable() {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/gpiomem")
            .unwrap();
        let block = GpioBlock::map_gpiomem(&file).unwrap();
        println!("GPLEV0 = {:#010x}", block.read(GpioReg::Lev0));
    }
}
