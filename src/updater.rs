//! Read-preserve-modify-erase-program-verify over a target and a scratch region.
//!
//! An update runs four phases, each step checked by reading flash back before
//! the next one starts:
//!
//! 1. prepare a row buffer from the new data,
//! 2. erase the target and program the buffer into its first row,
//! 3. erase the scratch and copy the target into it row by row,
//! 4. erase the target and program every scratch row back through a
//!    [`RowTransform`].
//!
//! The first failed check aborts the update and is returned to the caller.

use crate::config::ERASE_VALUE;
use crate::error::{Error, LayoutError};
use crate::patch::RowTransform;
use crate::region::{FlashRegion, Layout};
use crate::traits::RowFlashDevice;

/// Where the updater is in the erase/program cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateState {
    Idle,
    Erasing,
    ErasedVerified,
    Programming,
    ProgramVerified,
    /// The last operation failed; the next update starts over from `Idle`.
    Failed,
}

/// The post-state a verified transition must leave behind.
#[derive(Clone, Copy)]
enum Expect<'a, const ROW: usize> {
    Erased,
    Programmed(&'a [u8; ROW]),
}

impl<const ROW: usize> Expect<'_, ROW> {
    fn byte(&self, offset: usize) -> u8 {
        match self {
            Expect::Erased => ERASE_VALUE,
            Expect::Programmed(row) => row[offset],
        }
    }

    fn in_progress(&self) -> UpdateState {
        match self {
            Expect::Erased => UpdateState::Erasing,
            Expect::Programmed(_) => UpdateState::Programming,
        }
    }

    fn verified(&self) -> UpdateState {
        match self {
            Expect::Erased => UpdateState::ErasedVerified,
            Expect::Programmed(_) => UpdateState::ProgramVerified,
        }
    }

    fn mismatch<E>(&self, addr: u32, expected: u8, found: u8) -> Error<E> {
        match self {
            Expect::Erased => Error::EraseVerifyFailed { addr, found },
            Expect::Programmed(_) => Error::ProgramVerifyFailed {
                addr,
                expected,
                found,
            },
        }
    }
}

/// Updates a record living in `layout.target`, using `layout.scratch` to
/// carry the rest of the sector across the erase.
///
/// The updater owns the flash device, so every access goes through one
/// `&mut self` at a time.
pub struct SectorUpdater<F, const ROW: usize> {
    flash: F,
    layout: Layout,
    state: UpdateState,
}

impl<F, const ROW: usize> core::fmt::Debug for SectorUpdater<F, ROW> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SectorUpdater")
            .field("layout", &self.layout)
            .field("state", &self.state)
            .finish()
    }
}

impl<F, const ROW: usize> SectorUpdater<F, ROW>
where
    F: RowFlashDevice<ROW>,
{
    /// Validates `layout` against the device and brings the device up.
    pub fn init(mut flash: F, layout: Layout) -> Result<Self, Error<F::Error>> {
        layout.validate::<ROW>()?;
        let device_sector = flash.sector_size();
        if device_sector != layout.sector_size {
            return Err(LayoutError::SectorSizeMismatch {
                device: device_sector,
                layout: layout.sector_size,
            }
            .into());
        }
        flash.init().map_err(Error::Driver)?;
        info!(
            "[1] flash init done: target {:#x}, scratch {:#x}, {} rows of {} bytes",
            layout.target.base(),
            layout.scratch.base(),
            layout.rows::<ROW>(),
            ROW
        );
        Ok(Self {
            flash,
            layout,
            state: UpdateState::Idle,
        })
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Direct device access. Anything done through it bypasses verification.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Hands the device back.
    pub fn release(self) -> F {
        self.flash
    }

    /// Runs all four phases: `new_data` lands in the target's first row, the
    /// target is preserved in the scratch, and the scratch is written back
    /// into the target through `transform`.
    ///
    /// Arguments are checked before any flash is touched.
    pub fn update_sector_data<T>(
        &mut self,
        new_data: &[u8],
        transform: &T,
    ) -> Result<(), Error<F::Error>>
    where
        T: RowTransform + ?Sized,
    {
        transform
            .validate(ROW)
            .map_err(|offset| Error::PatchOutOfRange { offset })?;
        let row = Self::prepare_row(new_data)?;
        self.state = UpdateState::Idle;
        debug!("[1] row buffer prepared from {} bytes", new_data.len());

        self.commit(&row)?;
        self.preserve()?;
        self.recommit(transform)
    }

    /// Phase 1: `new_data` at the front of a row, erase value after it.
    pub fn prepare_row(new_data: &[u8]) -> Result<[u8; ROW], Error<F::Error>> {
        if new_data.len() > ROW {
            return Err(Error::DataTooLong {
                len: new_data.len(),
            });
        }
        let mut row = [ERASE_VALUE; ROW];
        row[..new_data.len()].copy_from_slice(new_data);
        Ok(row)
    }

    /// Phase 2: erase the target and program `row` into its first row.
    pub fn commit(&mut self, row: &[u8; ROW]) -> Result<(), Error<F::Error>> {
        let target = self.layout.target;
        info!("[2] program source data into target {:#x}", target.base());
        self.erase_region(target)?;
        self.program_row_verified(target.base(), row)?;
        self.state = UpdateState::Idle;
        Ok(())
    }

    /// Phase 3: erase the scratch and copy the whole target into it.
    pub fn preserve(&mut self) -> Result<(), Error<F::Error>> {
        let Layout {
            target, scratch, ..
        } = self.layout;
        info!(
            "[3] copy target {:#x} into scratch {:#x}",
            target.base(),
            scratch.base()
        );
        self.erase_region(scratch)?;
        let mut row = [0u8; ROW];
        for index in 0..target.rows(ROW) {
            self.read_row(target, index, &mut row)?;
            let addr = scratch
                .row_addr(index, ROW)
                .ok_or(LayoutError::RowOutOfRange { index })?;
            self.program_row_verified(addr, &row)?;
        }
        self.state = UpdateState::Idle;
        Ok(())
    }

    /// Phase 4: erase the target and program every scratch row back into
    /// it after passing it through `transform`.
    pub fn recommit<T>(&mut self, transform: &T) -> Result<(), Error<F::Error>>
    where
        T: RowTransform + ?Sized,
    {
        transform
            .validate(ROW)
            .map_err(|offset| Error::PatchOutOfRange { offset })?;
        let Layout {
            target, scratch, ..
        } = self.layout;
        info!(
            "[4] patch scratch {:#x} back into target {:#x}",
            scratch.base(),
            target.base()
        );
        self.erase_region(target)?;
        let mut row = [0u8; ROW];
        for index in 0..target.rows(ROW) {
            self.read_row(scratch, index, &mut row)?;
            transform.apply(index, &mut row);
            let addr = target
                .row_addr(index, ROW)
                .ok_or(LayoutError::RowOutOfRange { index })?;
            self.program_row_verified(addr, &row)?;
        }
        self.state = UpdateState::Idle;
        info!("update of {:#x} finished", target.base());
        Ok(())
    }

    /// Reads row `index` of `region` into `buf`.
    ///
    /// An index past the end of `region` is refused without touching the flash.
    pub fn read_row(
        &mut self,
        region: FlashRegion,
        index: usize,
        buf: &mut [u8; ROW],
    ) -> Result<(), Error<F::Error>> {
        buf.fill(0);
        let addr = region
            .row_addr(index, ROW)
            .ok_or(LayoutError::RowOutOfRange { index })?;
        trace!("read row {:#x}", addr);
        self.flash
            .read(addr, buf)
            .map_err(|err| self.fail(Error::Driver(err)))
    }

    /// Erases `region` sector by sector, checking each sector reads back erased.
    fn erase_region(&mut self, region: FlashRegion) -> Result<(), Error<F::Error>> {
        let sector_size = self.layout.sector_size;
        for sector in region.sectors(sector_size) {
            debug!("erase sector {:#x}", sector);
            self.apply_and_verify(
                sector,
                sector_size,
                |flash| flash.sector_erase(sector),
                Expect::Erased,
            )?;
        }
        Ok(())
    }

    fn program_row_verified(
        &mut self,
        addr: u32,
        row: &[u8; ROW],
    ) -> Result<(), Error<F::Error>> {
        debug!("program row {:#x}", addr);
        self.apply_and_verify(
            addr,
            ROW as u32,
            |flash| flash.program_row(addr, row),
            Expect::Programmed(row),
        )
    }

    /// Runs `operation`, then reads `[addr, addr + len)` back row by row and
    /// requires every byte to match `expected`. `len` is a multiple of `ROW`.
    fn apply_and_verify<O>(
        &mut self,
        addr: u32,
        len: u32,
        operation: O,
        expected: Expect<'_, ROW>,
    ) -> Result<(), Error<F::Error>>
    where
        O: FnOnce(&mut F) -> Result<(), F::Error>,
    {
        self.state = expected.in_progress();
        operation(&mut self.flash).map_err(|err| self.fail(Error::Driver(err)))?;

        let mut buf = [0u8; ROW];
        let mut offset = 0;
        while offset < len as usize {
            let row_addr = addr + offset as u32;
            buf.fill(0);
            self.flash
                .read(row_addr, &mut buf)
                .map_err(|err| self.fail(Error::Driver(err)))?;
            for (i, &found) in buf.iter().enumerate() {
                let want = expected.byte(i);
                if found != want {
                    let at = row_addr + i as u32;
                    error!(
                        "verify failed at {:#x}: expected {:#x}, found {:#x}",
                        at, want, found
                    );
                    return Err(self.fail(expected.mismatch(at, want, found)));
                }
            }
            offset += ROW;
        }

        self.state = expected.verified();
        Ok(())
    }

    fn fail(&mut self, err: Error<F::Error>) -> Error<F::Error> {
        warn!("update aborted in state {:?}", self.state);
        self.state = UpdateState::Failed;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EXAMPLE_PATCH;
    use crate::patch::{test_pattern, PatchSet};
    use crate::ram::{RamError, RamFlash};

    const ROW: usize = 64;
    const SECTOR: u32 = 256;
    const BASE: u32 = 0x8000;
    type Flash = RamFlash<{ 2 * SECTOR as usize }, ROW>;

    fn layout() -> Layout {
        Layout::new(BASE + SECTOR, BASE, SECTOR)
    }

    fn updater() -> SectorUpdater<Flash, ROW> {
        SectorUpdater::init(Flash::new(BASE, SECTOR), layout()).unwrap()
    }

    /// Reports every erase as done without touching the flash.
    struct LazyErase(Flash);

    impl RowFlashDevice<ROW> for LazyErase {
        type Error = RamError;

        fn init(&mut self) -> Result<(), RamError> {
            self.0.init()
        }

        fn sector_size(&self) -> u32 {
            SECTOR
        }

        fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), RamError> {
            self.0.read(addr, buf)
        }

        fn sector_erase(&mut self, _addr: u32) -> Result<(), RamError> {
            Ok(())
        }

        fn program_row(&mut self, addr: u32, row: &[u8; ROW]) -> Result<(), RamError> {
            self.0.program_row(addr, row)
        }
    }

    /// Clears `!mask` bits at `addr` whenever the row holding it is programmed.
    struct StuckBits {
        flash: Flash,
        addr: u32,
        mask: u8,
    }

    impl RowFlashDevice<ROW> for StuckBits {
        type Error = RamError;

        fn init(&mut self) -> Result<(), RamError> {
            self.flash.init()
        }

        fn sector_size(&self) -> u32 {
            SECTOR
        }

        fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), RamError> {
            self.flash.read(addr, buf)
        }

        fn sector_erase(&mut self, addr: u32) -> Result<(), RamError> {
            self.flash.sector_erase(addr)
        }

        fn program_row(&mut self, addr: u32, row: &[u8; ROW]) -> Result<(), RamError> {
            self.flash.program_row(addr, row)?;
            if (addr..addr + ROW as u32).contains(&self.addr) {
                self.flash.data_mut()[(self.addr - BASE) as usize] &= self.mask;
            }
            Ok(())
        }
    }

    #[test]
    fn init_runs_device_bring_up_once() {
        let updater = updater();
        assert_eq!(updater.state(), UpdateState::Idle);
        assert_eq!(updater.flash().stats().inits, 1);
        assert_eq!(updater.layout().rows::<ROW>(), 4);
    }

    #[test]
    fn init_rejects_sector_size_the_device_does_not_have() {
        let err = SectorUpdater::<_, ROW>::init(
            Flash::new(BASE, SECTOR),
            Layout::new(BASE + 2 * SECTOR, BASE, 2 * SECTOR),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::Layout(LayoutError::SectorSizeMismatch {
                device: SECTOR,
                layout: 2 * SECTOR,
            })
        );
    }

    #[test]
    fn prepare_row_pads_with_erase_value() {
        let row = SectorUpdater::<Flash, ROW>::prepare_row(&[1, 2, 3]).unwrap();
        assert_eq!(&row[..3], &[1, 2, 3]);
        assert!(row[3..].iter().all(|&b| b == ERASE_VALUE));
    }

    #[test]
    fn bad_arguments_leave_flash_untouched() {
        let mut updater = updater();
        assert_eq!(
            updater.update_sector_data(&[0u8; ROW + 1], &PatchSet::empty()),
            Err(Error::DataTooLong { len: ROW + 1 })
        );
        assert_eq!(
            updater.update_sector_data(&[0u8; 4], &PatchSet::new(&[(ROW, 0)])),
            Err(Error::PatchOutOfRange { offset: ROW })
        );
        let stats = updater.flash().stats();
        assert_eq!((stats.erases, stats.programs), (0, 0));
        assert_eq!(updater.state(), UpdateState::Idle);
    }

    #[test]
    fn update_merges_new_row_and_patches_every_row() {
        let mut updater = updater();
        let pattern = test_pattern::<ROW>();
        updater
            .update_sector_data(&pattern, &PatchSet::new(&EXAMPLE_PATCH))
            .unwrap();
        assert_eq!(updater.state(), UpdateState::Idle);

        let target = updater.layout().target;
        let mut row = [0u8; ROW];
        updater.read_row(target, 0, &mut row).unwrap();
        let mut expected = pattern;
        expected[0] = 0x55;
        expected[10] = 0xAA;
        assert_eq!(row, expected);

        // Rows after the first were erased when committed, so only the patch shows.
        updater.read_row(target, 3, &mut row).unwrap();
        let mut erased = [ERASE_VALUE; ROW];
        erased[0] = 0x55;
        erased[10] = 0xAA;
        assert_eq!(row, erased);
    }

    #[test]
    fn read_row_stays_inside_the_region() {
        let mut updater = updater();
        updater
            .update_sector_data(&test_pattern::<ROW>(), &PatchSet::empty())
            .unwrap();
        let Layout {
            target, scratch, ..
        } = *updater.layout();
        let reads = updater.flash().stats().reads;

        let mut row = [0xEEu8; ROW];
        for (region, index) in [(scratch, 4), (target, 1 << 23), (target, 0x7F_FFF0)] {
            assert_eq!(
                updater.read_row(region, index, &mut row),
                Err(Error::Layout(LayoutError::RowOutOfRange { index }))
            );
        }
        assert!(updater.read_row(target, usize::MAX, &mut row).is_err());
        assert_eq!(row, [0u8; ROW]);
        assert_eq!(updater.flash().stats().reads, reads);
        assert_eq!(updater.state(), UpdateState::Idle);

        updater.read_row(scratch, 3, &mut row).unwrap();
        assert_eq!(updater.flash().stats().reads, reads + 1);
    }

    #[test]
    fn erase_that_leaves_data_behind_is_caught() {
        let mut flash = LazyErase(Flash::new(BASE, SECTOR));
        flash.0.data_mut()[(SECTOR + 5) as usize] = 0x00;
        let mut updater = SectorUpdater::<_, ROW>::init(flash, layout()).unwrap();

        let err = updater
            .update_sector_data(&[0xA5; 8], &PatchSet::empty())
            .unwrap_err();
        assert_eq!(
            err,
            Error::EraseVerifyFailed {
                addr: BASE + SECTOR + 5,
                found: 0x00,
            }
        );
        assert!(err.is_verify_failure());
        assert_eq!(updater.state(), UpdateState::Failed);
        // Nothing was programmed after the failed erase.
        assert_eq!(updater.flash().0.stats().programs, 0);
    }

    #[test]
    fn program_with_stuck_bits_is_caught() {
        let flash = StuckBits {
            flash: Flash::new(BASE, SECTOR),
            addr: BASE + 1,
            mask: 0xF0,
        };
        let mut updater = SectorUpdater::<_, ROW>::init(flash, layout()).unwrap();

        let err = updater
            .update_sector_data(&test_pattern::<ROW>(), &PatchSet::new(&EXAMPLE_PATCH))
            .unwrap_err();
        assert_eq!(
            err,
            Error::ProgramVerifyFailed {
                addr: BASE + 1,
                expected: 0x01,
                found: 0x00,
            }
        );
        assert_eq!(updater.state(), UpdateState::Failed);

        // The copy into scratch failed, so the target was never erased again.
        let flash = updater.release().flash;
        assert_eq!(flash.stats().erases, 2);
        let target = &flash.data()[SECTOR as usize..SECTOR as usize + ROW];
        assert_eq!(target, &test_pattern::<ROW>()[..]);
    }

    #[test]
    fn driver_failure_stops_the_update() {
        let mut updater = updater();
        updater
            .flash_mut()
            .protect(Some(FlashRegion::new(BASE, SECTOR)));

        let err = updater
            .update_sector_data(&test_pattern::<ROW>(), &PatchSet::empty())
            .unwrap_err();
        assert_eq!(err, Error::Driver(RamError::WriteProtected { addr: BASE }));
        assert_eq!(updater.state(), UpdateState::Failed);

        // Phase 2 completed, phase 4 never re-erased the target.
        let stats = updater.flash().stats();
        assert_eq!(stats.erases, 1);
        assert_eq!(stats.programs, 1);

        updater.flash_mut().protect(None);
        updater
            .update_sector_data(&test_pattern::<ROW>(), &PatchSet::empty())
            .unwrap();
        assert_eq!(updater.state(), UpdateState::Idle);
    }
}
