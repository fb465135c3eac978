use flash_sector_updater_rs::config::{
    ERASE_VALUE, EXAMPLE_PATCH, ROWS_PER_SECTOR, ROW_SIZE, SECTOR_SIZE,
};
use flash_sector_updater_rs::ram::{RamError, RamFlash};
use flash_sector_updater_rs::{
    test_pattern, Error, FlashRegion, Layout, PatchSet, SectorUpdater, UpdateState,
};

const BANK_END: u32 = 0x1010_0000;
const BANK: usize = 2 * SECTOR_SIZE as usize;

type Flash = RamFlash<BANK, ROW_SIZE>;

fn updater_over(flash: Flash) -> SectorUpdater<Flash, ROW_SIZE> {
    SectorUpdater::init(flash, Layout::top_of_bank(BANK_END, SECTOR_SIZE)).unwrap()
}

fn erased_bank() -> Flash {
    Flash::new(BANK_END - BANK as u32, SECTOR_SIZE)
}

fn contents(updater: &SectorUpdater<Flash, ROW_SIZE>, region: FlashRegion) -> Vec<u8> {
    updater.flash().region(&region).unwrap().to_vec()
}

fn patched(row: &[u8]) -> Vec<u8> {
    let mut row = row.to_vec();
    row[0] = 0x55;
    row[10] = 0xAA;
    row
}

#[test]
fn phases_commit_preserve_and_patch_the_sector() {
    let mut updater = updater_over(erased_bank());
    let Layout {
        target, scratch, ..
    } = *updater.layout();
    assert_eq!(updater.layout().rows::<ROW_SIZE>(), ROWS_PER_SECTOR);

    let pattern = test_pattern::<ROW_SIZE>();
    updater.commit(&pattern).unwrap();
    let after_commit = contents(&updater, target);
    assert_eq!(&after_commit[..ROW_SIZE], &pattern[..]);
    assert!(after_commit[ROW_SIZE..].iter().all(|&b| b == ERASE_VALUE));

    updater.preserve().unwrap();
    let backup = contents(&updater, scratch);
    assert_eq!(backup, contents(&updater, target));

    updater.recommit(&PatchSet::new(&EXAMPLE_PATCH)).unwrap();
    let after_patch = contents(&updater, target);
    for (index, (row, source)) in after_patch
        .chunks(ROW_SIZE)
        .zip(backup.chunks(ROW_SIZE))
        .enumerate()
    {
        assert_eq!(row, &patched(source)[..], "row {}", index);
    }
    // The scratch still holds the unpatched copy.
    assert_eq!(contents(&updater, scratch), backup);
    assert_eq!(updater.state(), UpdateState::Idle);
}

#[test]
fn full_update_touches_each_sector_the_expected_number_of_times() {
    let mut updater = updater_over(erased_bank());
    updater
        .update_sector_data(&test_pattern::<ROW_SIZE>(), &PatchSet::new(&EXAMPLE_PATCH))
        .unwrap();

    let stats = updater.flash().stats();
    assert_eq!(stats.inits, 1);
    assert_eq!(stats.erases, 3);
    assert_eq!(stats.programs as usize, 1 + 2 * ROWS_PER_SECTOR);

    let target = updater.layout().target;
    let row0 = &contents(&updater, target)[..ROW_SIZE];
    assert_eq!(row0, &patched(&test_pattern::<ROW_SIZE>())[..]);
}

#[test]
fn existing_sector_content_survives_a_patch() {
    let mut image = vec![0u8; BANK];
    for (i, byte) in image.iter_mut().enumerate() {
        *byte = (i * 7 % 251) as u8;
    }
    let mut updater = updater_over(Flash::with_data(
        BANK_END - BANK as u32,
        SECTOR_SIZE,
        &image,
    ));
    let target = updater.layout().target;
    let original = contents(&updater, target);

    updater.preserve().unwrap();
    updater.recommit(&PatchSet::new(&EXAMPLE_PATCH)).unwrap();

    let updated = contents(&updater, target);
    for (row, source) in updated.chunks(ROW_SIZE).zip(original.chunks(ROW_SIZE)) {
        assert_eq!(row, &patched(source)[..]);
    }
}

#[test]
fn closures_can_merge_per_row() {
    let mut updater = updater_over(erased_bank());
    let stamp = |index: usize, row: &mut [u8]| row[1] = index as u8;
    updater.update_sector_data(&[0xAB; 4], &stamp).unwrap();

    let target = updater.layout().target;
    let image = contents(&updater, target);
    assert_eq!(&image[..4], &[0xAB, 0x00, 0xAB, 0xAB]);
    for (index, row) in image.chunks(ROW_SIZE).enumerate().skip(1) {
        assert_eq!(row[0], ERASE_VALUE);
        assert_eq!(row[1], index as u8);
    }
}

#[test]
fn failed_recommit_keeps_the_backup_for_a_retry() {
    let mut updater = updater_over(erased_bank());
    let Layout {
        target, scratch, ..
    } = *updater.layout();

    updater.commit(&test_pattern::<ROW_SIZE>()).unwrap();
    updater.preserve().unwrap();
    let backup = contents(&updater, scratch);

    updater.flash_mut().protect(Some(target));
    let err = updater
        .recommit(&PatchSet::new(&EXAMPLE_PATCH))
        .unwrap_err();
    assert_eq!(
        err,
        Error::Driver(RamError::WriteProtected {
            addr: target.base()
        })
    );
    assert!(!err.is_verify_failure());
    assert_eq!(updater.state(), UpdateState::Failed);
    assert_eq!(contents(&updater, scratch), backup);

    updater.flash_mut().protect(None);
    updater.recommit(&PatchSet::new(&EXAMPLE_PATCH)).unwrap();
    assert_eq!(
        &contents(&updater, target)[..ROW_SIZE],
        &patched(&backup[..ROW_SIZE])[..]
    );
}

#[test]
fn out_of_range_patch_is_refused_before_erasing() {
    let mut updater = updater_over(erased_bank());
    let err = updater
        .update_sector_data(&[1, 2, 3], &PatchSet::new(&[(0, 1), (ROW_SIZE, 2)]))
        .unwrap_err();
    assert_eq!(err, Error::PatchOutOfRange { offset: ROW_SIZE });
    assert_eq!(updater.flash().stats().erases, 0);
}

#[test]
fn recommit_writes_back_whatever_the_backup_holds() {
    let mut updater = updater_over(erased_bank());
    let scratch = updater.layout().scratch;
    updater.commit(&test_pattern::<ROW_SIZE>()).unwrap();
    updater.preserve().unwrap();

    // The recommit copies the backup as it is now, not as it was verified.
    let offset = (scratch.base() - (BANK_END - BANK as u32)) as usize + 20;
    updater.flash_mut().data_mut()[offset] &= 0x0F;
    updater.recommit(&PatchSet::empty()).unwrap();
    let target = updater.layout().target;
    assert_eq!(contents(&updater, target)[20], 20 & 0x0F);
}
