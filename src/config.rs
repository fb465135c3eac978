//! Compile-time geometry of the code flash the updater targets.
//!
//! The defaults describe a code flash with 512 byte rows and 8 KiB small
//! sectors. Boards with other geometries pass their own constants to
//! [`Layout`](crate::region::Layout) and pick their own `ROW`.

/// Flash row size.
/// This is the smallest unit that can be programmed at once.
pub const ROW_SIZE: usize = 512;

/// Number of rows in one erase sector.
pub const ROWS_PER_SECTOR: usize = 16;

/// Flash erase size.
/// This is the size of a flash sector that must be erased at once.
pub const SECTOR_SIZE: u32 = (ROW_SIZE * ROWS_PER_SECTOR) as u32;

/// Value every byte reads back as after an erase.
pub const ERASE_VALUE: u8 = 0xFF;

/// Patch applied by the bring-up example: byte 0 and byte 10 of every row.
pub const EXAMPLE_PATCH: [(usize, u8); 2] = [(0, 0x55), (10, 0xAA)];
