//! Verified in-place updates of data stored in sector-erased NOR flash.
//!
//! Changing even one byte of a sector means erasing all of it. A
//! [`SectorUpdater`] carries the rest of the sector across the erase in a
//! second, scratch sector, merges the new data in, and reads every erase and
//! every programmed row back before trusting it.
//!
//! The flash itself is reached through [`RowFlashDevice`]. Backends are
//! included for Winbond W25 SPI NOR ([`comms::FlashSpi`]), any
//! `embedded-storage` NOR flash ([`storage::NorFlashDevice`]) and an
//! in-memory emulator ([`ram::RamFlash`]).
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod comms;
pub mod config;
pub mod error;
pub mod patch;
pub mod ram;
pub mod region;
pub mod storage;
pub mod traits;
pub mod updater;

pub use error::{BusError, Error, LayoutError, StorageError};
pub use patch::{test_pattern, PatchSet, RowTransform};
pub use region::{FlashRegion, Layout};
pub use traits::RowFlashDevice;
pub use updater::{SectorUpdater, UpdateState};
