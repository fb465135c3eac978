use thiserror::Error;

/// Reasons a [`Layout`](crate::region::Layout) cannot be used for an update.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayoutError {
    #[error("region or sector size is zero")]
    ZeroSize,
    #[error("row size does not divide the sector size")]
    RowNotDivisor,
    #[error("address {addr:#x} is not sector aligned")]
    Unaligned { addr: u32 },
    #[error("region at {addr:#x} runs past the end of the address space")]
    Overflow { addr: u32 },
    #[error("target and scratch regions differ in size")]
    SizeMismatch,
    #[error("target and scratch regions overlap")]
    Overlap,
    #[error("device erases {device} byte sectors, layout assumes {layout}")]
    SectorSizeMismatch { device: u32, layout: u32 },
    #[error("row {index} is outside the region")]
    RowOutOfRange { index: usize },
}

/// The error type returned by a sector update.
///
/// `E` is the error type of the underlying flash device. Every variant is
/// terminal for the update that produced it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// The flash device rejected or failed an erase, program or read.
    #[error("flash driver error: {0:?}")]
    Driver(E),
    /// A byte read back after an erase was not the erase value.
    #[error("erase verify failed at {addr:#x}: found {found:#x}")]
    EraseVerifyFailed { addr: u32, found: u8 },
    /// A byte read back after programming differs from what was written.
    #[error("program verify failed at {addr:#x}: expected {expected:#x}, found {found:#x}")]
    ProgramVerifyFailed { addr: u32, expected: u8, found: u8 },
    #[error("invalid layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("{len} bytes of new data do not fit in one row")]
    DataTooLong { len: usize },
    #[error("patch offset {offset} is outside the row")]
    PatchOutOfRange { offset: usize },
}

#[cfg(feature = "defmt")]
impl<E> defmt::Format for Error<E> {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::Driver(_) => defmt::write!(fmt, "Error::Driver"),
            Error::EraseVerifyFailed { addr, found } => defmt::write!(
                fmt,
                "Error::EraseVerifyFailed {{ addr: {=u32:#x}, found: {=u8:#x} }}",
                addr,
                found
            ),
            Error::ProgramVerifyFailed {
                addr,
                expected,
                found,
            } => defmt::write!(
                fmt,
                "Error::ProgramVerifyFailed {{ addr: {=u32:#x}, expected: {=u8:#x}, found: {=u8:#x} }}",
                addr,
                expected,
                found
            ),
            Error::Layout(err) => defmt::write!(fmt, "Error::Layout({})", err),
            Error::DataTooLong { len } => defmt::write!(fmt, "Error::DataTooLong({=usize})", len),
            Error::PatchOutOfRange { offset } => {
                defmt::write!(fmt, "Error::PatchOutOfRange({=usize})", offset)
            }
        }
    }
}

/// Errors raised by the SPI NOR backend.
///
/// This can encapsulate an SPI error, and adds its own addressing errors
/// on top of that.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError<E> {
    /// An SPI transfer failed.
    #[error("SPI transfer failed: {0:?}")]
    Spi(E),
    /// Page programs must start on a page boundary.
    #[error("address {addr:#x} is not page aligned")]
    Misaligned { addr: u32 },
    /// Only 24 address bits are sent to the device.
    #[error("access at {addr:#x} exceeds the 24-bit address space")]
    OutOfRange { addr: u32 },
    /// The JEDEC id read at init is not a Winbond part.
    #[error("unexpected JEDEC manufacturer id {manufacturer:#x}")]
    UnexpectedId { manufacturer: u8 },
}

#[cfg(feature = "defmt")]
impl<E> defmt::Format for BusError<E> {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            BusError::Spi(_spi) => defmt::write!(fmt, "BusError::Spi"),
            BusError::Misaligned { addr } => {
                defmt::write!(fmt, "BusError::Misaligned({=u32:#x})", addr)
            }
            BusError::OutOfRange { addr } => {
                defmt::write!(fmt, "BusError::OutOfRange({=u32:#x})", addr)
            }
            BusError::UnexpectedId { manufacturer } => {
                defmt::write!(fmt, "BusError::UnexpectedId({=u8:#x})", manufacturer)
            }
        }
    }
}

/// Errors raised by the [`NorFlashDevice`](crate::storage::NorFlashDevice) adapter.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError<E> {
    /// The wrapped flash returned an error.
    #[error("NOR flash error: {0:?}")]
    Flash(E),
    /// The address lies below the adapter's base or past the flash capacity.
    #[error("address {addr:#x} is outside the flash")]
    OutOfRange { addr: u32 },
    #[error("address {addr:#x} is not row aligned")]
    Misaligned { addr: u32 },
    /// The flash's write or erase granularity cannot host the row size.
    #[error("row size is incompatible with the flash write/erase sizes")]
    Geometry,
}

#[cfg(feature = "defmt")]
impl<E> defmt::Format for StorageError<E> {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            StorageError::Flash(_) => defmt::write!(fmt, "StorageError::Flash"),
            StorageError::OutOfRange { addr } => {
                defmt::write!(fmt, "StorageError::OutOfRange({=u32:#x})", addr)
            }
            StorageError::Misaligned { addr } => {
                defmt::write!(fmt, "StorageError::Misaligned({=u32:#x})", addr)
            }
            StorageError::Geometry => defmt::write!(fmt, "StorageError::Geometry"),
        }
    }
}

impl<E> Error<E> {
    /// Whether the failure came from a read-back check rather than the driver.
    pub fn is_verify_failure(&self) -> bool {
        matches!(
            self,
            Error::EraseVerifyFailed { .. } | Error::ProgramVerifyFailed { .. }
        )
    }
}
