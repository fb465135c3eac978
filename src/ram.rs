//! In-memory NOR flash for host tests and simulation.

use crate::config::ERASE_VALUE;
use crate::region::FlashRegion;
use crate::traits::RowFlashDevice;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RamError {
    #[error("access at {addr:#x} is outside the emulated flash")]
    OutOfBounds { addr: u32 },
    #[error("row program at {addr:#x} is not row aligned")]
    Misaligned { addr: u32 },
    #[error("{addr:#x} is write protected")]
    WriteProtected { addr: u32 },
    #[error("flash used before init")]
    NotInitialized,
}

/// Operation counters, handy for asserting what an update touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OpStats {
    pub inits: u32,
    pub erases: u32,
    pub programs: u32,
    pub reads: u32,
}

/// `SIZE` bytes of NOR flash mapped at `base`, programmed in `ROW` byte rows.
///
/// Erase sets a whole sector to FFh and programming can only clear bits,
/// like the real part. Every operation fails until [`init`](RowFlashDevice::init)
/// has run.
pub struct RamFlash<const SIZE: usize, const ROW: usize> {
    base: u32,
    sector_size: u32,
    data: [u8; SIZE],
    initialized: bool,
    protected: Option<FlashRegion>,
    stats: OpStats,
}

impl<const SIZE: usize, const ROW: usize> RamFlash<SIZE, ROW> {
    /// A fully erased device.
    pub const fn new(base: u32, sector_size: u32) -> Self {
        Self {
            base,
            sector_size,
            data: [ERASE_VALUE; SIZE],
            initialized: false,
            protected: None,
            stats: OpStats {
                inits: 0,
                erases: 0,
                programs: 0,
                reads: 0,
            },
        }
    }

    /// A device whose first bytes hold `initial`.
    pub fn with_data(base: u32, sector_size: u32, initial: &[u8]) -> Self {
        let mut flash = Self::new(base, sector_size);
        let len = core::cmp::min(initial.len(), SIZE);
        flash.data[..len].copy_from_slice(&initial[..len]);
        flash
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Contents of `region`, or `None` if it is not fully mapped.
    pub fn region(&self, region: &FlashRegion) -> Option<&[u8]> {
        let start = region.base().checked_sub(self.base)? as usize;
        self.data.get(start..start + region.size() as usize)
    }

    /// Makes erase and program fail inside `region`.
    pub fn protect(&mut self, region: Option<FlashRegion>) {
        self.protected = region;
    }

    pub fn stats(&self) -> OpStats {
        self.stats
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize, RamError> {
        let start = addr
            .checked_sub(self.base)
            .ok_or(RamError::OutOfBounds { addr })? as usize;
        match start.checked_add(len) {
            Some(end) if end <= SIZE => Ok(start),
            _ => Err(RamError::OutOfBounds { addr }),
        }
    }

    fn check_writable(&self, addr: u32) -> Result<(), RamError> {
        if !self.initialized {
            return Err(RamError::NotInitialized);
        }
        match self.protected {
            Some(region) if region.contains(addr) => Err(RamError::WriteProtected { addr }),
            _ => Ok(()),
        }
    }
}

impl<const SIZE: usize, const ROW: usize> RowFlashDevice<ROW> for RamFlash<SIZE, ROW> {
    type Error = RamError;

    fn init(&mut self) -> Result<(), RamError> {
        self.initialized = true;
        self.stats.inits += 1;
        Ok(())
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), RamError> {
        if !self.initialized {
            return Err(RamError::NotInitialized);
        }
        let start = self.offset(addr, buf.len())?;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        self.stats.reads += 1;
        Ok(())
    }

    fn sector_erase(&mut self, addr: u32) -> Result<(), RamError> {
        let rel = addr
            .checked_sub(self.base)
            .ok_or(RamError::OutOfBounds { addr })?;
        let sector_start = addr - rel % self.sector_size;
        self.check_writable(sector_start)?;
        let start = self.offset(sector_start, self.sector_size as usize)?;
        self.data[start..start + self.sector_size as usize].fill(ERASE_VALUE);
        self.stats.erases += 1;
        Ok(())
    }

    fn program_row(&mut self, addr: u32, row: &[u8; ROW]) -> Result<(), RamError> {
        self.check_writable(addr)?;
        let start = self.offset(addr, ROW)?;
        if start % ROW != 0 {
            return Err(RamError::Misaligned { addr });
        }
        for (cell, &byte) in self.data[start..start + ROW].iter_mut().zip(row.iter()) {
            *cell &= byte;
        }
        self.stats.programs += 1;
        Ok(())
    }
}
