/// The flash primitives a [`SectorUpdater`](crate::SectorUpdater) is built on.
///
/// `ROW` is the program granularity in bytes. Implementations are trusted to
/// do what they are asked; the updater verifies every erase and program by
/// reading the affected range back.
pub trait RowFlashDevice<const ROW: usize> {
    type Error;

    /// One-shot controller bring-up, invoked before any other operation.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Size in bytes of the unit [`sector_erase`](Self::sector_erase) clears.
    fn sector_size(&self) -> u32;

    /// Reads flash contents into `buf`, starting at `addr`.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Sets every byte of the sector containing `addr` to the erased state
    /// of all 1s (FFh).
    fn sector_erase(&mut self, addr: u32) -> Result<(), Self::Error>;

    /// Programs exactly one row at the row-aligned `addr`. Programming can
    /// only clear bits, so the row should have been erased beforehand.
    fn program_row(&mut self, addr: u32, row: &[u8; ROW]) -> Result<(), Self::Error>;
}

impl<T, const ROW: usize> RowFlashDevice<ROW> for &mut T
where
    T: RowFlashDevice<ROW> + ?Sized,
{
    type Error = T::Error;

    fn init(&mut self) -> Result<(), Self::Error> {
        T::init(self)
    }

    fn sector_size(&self) -> u32 {
        T::sector_size(self)
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        T::read(self, addr, buf)
    }

    fn sector_erase(&mut self, addr: u32) -> Result<(), Self::Error> {
        T::sector_erase(self, addr)
    }

    fn program_row(&mut self, addr: u32, row: &[u8; ROW]) -> Result<(), Self::Error> {
        T::program_row(self, addr, row)
    }
}
