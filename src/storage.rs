//! Adapter for any `embedded-storage` NOR flash, e.g. a HAL's on-chip flash.

use crate::error::StorageError;
use crate::traits::RowFlashDevice;
use embedded_storage::nor_flash::NorFlash;

/// Exposes a [`NorFlash`] mapped at `base` as a row/sector device.
///
/// `NorFlash` works in offsets from the start of the flash; the updater works
/// in absolute addresses, so every address has `base` subtracted.
pub struct NorFlashDevice<F> {
    flash: F,
    base: u32,
}

impl<F: NorFlash> NorFlashDevice<F> {
    pub fn new(flash: F, base: u32) -> Self {
        Self { flash, base }
    }

    pub fn release(self) -> F {
        self.flash
    }

    fn offset(&self, addr: u32, len: usize) -> Result<u32, StorageError<F::Error>> {
        let offset = addr
            .checked_sub(self.base)
            .ok_or(StorageError::OutOfRange { addr })?;
        match (offset as usize).checked_add(len) {
            Some(end) if end <= self.flash.capacity() => Ok(offset),
            _ => Err(StorageError::OutOfRange { addr }),
        }
    }
}

impl<F: NorFlash, const ROW: usize> RowFlashDevice<ROW> for NorFlashDevice<F> {
    type Error = StorageError<F::Error>;

    /// The flash was brought up by its HAL; only the geometry is checked.
    fn init(&mut self) -> Result<(), Self::Error> {
        if ROW % F::WRITE_SIZE != 0 || F::ERASE_SIZE % ROW != 0 {
            return Err(StorageError::Geometry);
        }
        debug!(
            "NOR flash at {:#x}: {} bytes, erase {} write {}",
            self.base,
            self.flash.capacity(),
            F::ERASE_SIZE,
            F::WRITE_SIZE
        );
        Ok(())
    }

    fn sector_size(&self) -> u32 {
        F::ERASE_SIZE as u32
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let offset = self.offset(addr, buf.len())?;
        self.flash.read(offset, buf).map_err(StorageError::Flash)
    }

    fn sector_erase(&mut self, addr: u32) -> Result<(), Self::Error> {
        let erase_size = F::ERASE_SIZE as u32;
        let offset = self.offset(addr, 0)?;
        let from = offset - offset % erase_size;
        self.offset(self.base + from, F::ERASE_SIZE)?;
        self.flash
            .erase(from, from + erase_size)
            .map_err(StorageError::Flash)
    }

    fn program_row(&mut self, addr: u32, row: &[u8; ROW]) -> Result<(), Self::Error> {
        let offset = self.offset(addr, ROW)?;
        if offset as usize % ROW != 0 {
            return Err(StorageError::Misaligned { addr });
        }
        self.flash.write(offset, row).map_err(StorageError::Flash)
    }
}
