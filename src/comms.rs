//! Winbond W25-series SPI NOR backend.
//!
//! Refer to datasheet:
//! https://datasheet.lcsc.com/lcsc/1912111437_Winbond-Elec-W25Q128JVSIQ_C113767.pdf
use crate::error::BusError;
use crate::traits::RowFlashDevice;
use core::fmt::Debug;
use embedded_hal::spi::{Operation, SpiDevice};

/// Page Program writes at most one 256 byte page.
pub const PAGE_SIZE: usize = 256;
/// Smallest erasable unit (Sector Erase, 20h).
pub const SECTOR_SIZE: u32 = 4096;
/// Only 24 bits of address are shifted out.
const ADDRESS_SPACE: u32 = 1 << 24;
/// JEDEC manufacturer id of Winbond.
pub const WINBOND_ID: u8 = 0xEF;

pub struct FlashSpi<SPI> {
    spi: SPI,
}

impl<SPI> Debug for FlashSpi<SPI> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FlashSPI")
    }
}

enum Opcode {
    /// Read 16-bit manufacturer ID and 8-bit device ID.
    ReadJedecId = 0x9F,
    /// Set the write enable latch.
    WriteEnable = 0x06,
    /// Read the 8-bit status register.
    ReadStatus = 0x05,
    Read = 0x03,
    PageProg = 0x02,
    SectorErase = 0x20,
    EnableReset = 0x66,
    Reset = 0x99,
}

bitflags::bitflags! {
    /// Status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Erase or write in progress.
        const BUSY = 1 << 0;
        /// Status of the **W**rite **E**nable **L**atch.
        const WEL = 1 << 1;
        /// The 3 protection region bits.
        const PROT = 0b00011100;
        /// **S**tatus **R**egister **W**rite **D**isable bit.
        const SRWD = 1 << 7;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Status {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Status({=u8:#x})", self.bits())
    }
}

impl<SPI> RowFlashDevice<PAGE_SIZE> for FlashSpi<SPI>
where
    SPI: SpiDevice,
{
    type Error = BusError<SPI::Error>;

    /// Software reset (see datasheet 6.4) followed by a JEDEC id read.
    /// Enable Reset (66h) and Reset (99h) return the device to its power-on
    /// state, clearing any write enable latch left over from a previous boot.
    ///
    /// The device ignores commands for tRST (30us) after the reset and no
    /// delay is inserted here. On a bus that reads back FFh the status poll
    /// waits it out as BUSY. Otherwise the id read can land inside tRST, which
    /// fails the manufacturer check with [`BusError::UnexpectedId`]; retry
    /// `init` after a delay in that case.
    fn init(&mut self) -> Result<(), Self::Error> {
        let status = loop {
            let status = self.read_status()?;
            if !status.contains(Status::BUSY) {
                break status;
            }
            warn!("Flash is not ready: {:#x}", status.bits());
        };
        debug!("Initial status: {:#x}", status.bits());
        if status.intersects(Status::PROT) {
            warn!("Block protect bits set: {:#x}", status.bits());
        }

        self.command(&[Opcode::EnableReset as u8])?;
        self.command(&[Opcode::Reset as u8])?;
        self.wait_done()?;

        let [manufacturer, memory_type, capacity] = self.read_jedec_id()?;
        debug!(
            "JEDEC id: {:#x} {:#x} {:#x}",
            manufacturer, memory_type, capacity
        );
        if manufacturer != WINBOND_ID {
            return Err(BusError::UnexpectedId { manufacturer });
        }
        Ok(())
    }

    fn sector_size(&self) -> u32 {
        SECTOR_SIZE
    }

    /// From datasheet section 8.2.6 (Read Data (03h))
    /// Reads flash contents into `buf`, starting at `addr`.
    ///
    /// Flash chips only decode the address bits they need, so reads past the
    /// end of a smaller part wrap around; reads past 16 MiB are refused.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        check_range(addr, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        self.wait_done()?;
        let header = address_command(Opcode::Read, addr);
        self.spi
            .transaction(&mut [Operation::Write(&header), Operation::Read(buf)])
            .map_err(BusError::Spi)
    }

    /// Sector erase (see datasheet 8.2.15)
    /// Sets all memory within the 4K-byte sector containing `addr` to the
    /// erased state of all 1s (FFh). Requires a Write Enable first; the call
    /// returns once BUSY has cleared.
    fn sector_erase(&mut self, addr: u32) -> Result<(), Self::Error> {
        let sector = addr & !(SECTOR_SIZE - 1);
        check_range(sector, SECTOR_SIZE as usize)?;
        self.wait_done()?;
        self.write_enable()?;
        self.command(&address_command(Opcode::SectorErase, sector))?;
        self.wait_done()
    }

    /// From datasheet section 8.2.13
    /// Page Program writes one page at previously erased (FFh) locations.
    /// Requires a Write Enable first. A program that starts mid-page wraps
    /// inside the page on the device, so only page-aligned rows are accepted.
    fn program_row(&mut self, addr: u32, row: &[u8; PAGE_SIZE]) -> Result<(), Self::Error> {
        if addr % PAGE_SIZE as u32 != 0 {
            return Err(BusError::Misaligned { addr });
        }
        check_range(addr, PAGE_SIZE)?;
        self.wait_done()?;
        self.write_enable()?;
        if !self.is_wel()? {
            warn!("WEL should be set: {:#x}", self.read_status()?.bits());
        }

        let header = address_command(Opcode::PageProg, addr);
        self.spi
            .transaction(&mut [Operation::Write(&header), Operation::Write(row)])
            .map_err(BusError::Spi)?;
        self.wait_done()
    }
}

impl<SPI> FlashSpi<SPI>
where
    SPI: SpiDevice,
{
    /// Wraps the bus. Call [`RowFlashDevice::init`] (or hand the device to a
    /// [`SectorUpdater`](crate::SectorUpdater), which does) before use.
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn release(self) -> SPI {
        self.spi
    }

    pub fn is_busy(&mut self) -> Result<bool, BusError<SPI::Error>> {
        let status = self.read_status()?;
        Ok(status.contains(Status::BUSY))
    }

    pub fn is_wel(&mut self) -> Result<bool, BusError<SPI::Error>> {
        let status = self.read_status()?;
        Ok(status.contains(Status::WEL))
    }

    /// Reads the status register.
    pub fn read_status(&mut self) -> Result<Status, BusError<SPI::Error>> {
        let mut response = [0u8; 1];
        self.command_with_response(&[Opcode::ReadStatus as u8], &mut response)?;
        Ok(Status::from_bits_truncate(response[0]))
    }

    /// Reads the JEDEC manufacturer, memory type and capacity bytes.
    pub fn read_jedec_id(&mut self) -> Result<[u8; 3], BusError<SPI::Error>> {
        let mut response = [0u8; 3];
        self.command_with_response(&[Opcode::ReadJedecId as u8], &mut response)?;
        Ok(response)
    }

    /// Writes a command to the SPI bus
    fn command(&mut self, bytes: &[u8]) -> Result<(), BusError<SPI::Error>> {
        self.spi
            .transaction(&mut [Operation::Write(bytes)])
            .map_err(BusError::Spi)
    }

    /// Writes a command to the SPI bus and reads the response that follows it
    fn command_with_response(
        &mut self,
        instruction: &[u8],
        response: &mut [u8],
    ) -> Result<(), BusError<SPI::Error>> {
        self.spi
            .transaction(&mut [Operation::Write(instruction), Operation::Read(response)])
            .map_err(BusError::Spi)
    }

    /// Block until the status of the device is not busy
    fn wait_done(&mut self) -> Result<(), BusError<SPI::Error>> {
        while self.read_status()?.contains(Status::BUSY) {}
        Ok(())
    }

    /// From datasheet section 8.2.1
    /// The Write Enable instruction sets the Write Enable Latch (WEL) bit
    /// in the Status Register to a 1. The WEL bit must be set prior to every Page Program,
    /// Sector Erase and Chip Erase instruction.
    fn write_enable(&mut self) -> Result<(), BusError<SPI::Error>> {
        self.command(&[Opcode::WriteEnable as u8])
    }
}

fn address_command(opcode: Opcode, addr: u32) -> [u8; 4] {
    [opcode as u8, (addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
}

fn check_range<E>(addr: u32, len: usize) -> Result<(), BusError<E>> {
    match (addr as u64).checked_add(len as u64) {
        Some(end) if end <= ADDRESS_SPACE as u64 => Ok(()),
        _ => Err(BusError::OutOfRange { addr }),
    }
}
