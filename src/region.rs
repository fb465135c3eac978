use crate::error::LayoutError;

/// A sector-aligned address range `[base, base + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashRegion {
    base: u32,
    size: u32,
}

impl FlashRegion {
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    pub const fn base(&self) -> u32 {
        self.base
    }

    pub const fn size(&self) -> u32 {
        self.size
    }

    /// One past the last address, or `None` if the region wraps the address space.
    pub const fn end(&self) -> Option<u32> {
        self.base.checked_add(self.size)
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && (addr - self.base) < self.size
    }

    pub fn overlaps(&self, other: &FlashRegion) -> bool {
        let (a, b) = (self.base as u64, other.base as u64);
        a < b + other.size as u64 && b < a + self.size as u64
    }

    /// Number of `row_size` rows in the region.
    pub fn rows(&self, row_size: usize) -> usize {
        self.size as usize / row_size
    }

    /// Address of row `index`, or `None` if the row is not inside the region.
    pub fn row_addr(&self, index: usize, row_size: usize) -> Option<u32> {
        if index >= self.rows(row_size) {
            return None;
        }
        let offset = u32::try_from(index.checked_mul(row_size)?).ok()?;
        self.base.checked_add(offset)
    }

    /// Start address of every `sector_size` sector in the region.
    pub fn sectors(&self, sector_size: u32) -> impl Iterator<Item = u32> {
        let base = self.base;
        (0..self.size / sector_size).map(move |i| base + i * sector_size)
    }
}

/// The pair of regions an update works over, plus the erase granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    /// Holds the live record.
    pub target: FlashRegion,
    /// Holds a full copy of the target while the target is erased.
    pub scratch: FlashRegion,
    pub sector_size: u32,
}

impl Layout {
    /// One sector each for target and scratch.
    pub const fn new(target_base: u32, scratch_base: u32, sector_size: u32) -> Self {
        Self {
            target: FlashRegion::new(target_base, sector_size),
            scratch: FlashRegion::new(scratch_base, sector_size),
            sector_size,
        }
    }

    /// Places the target in the last sector below `bank_end` and the
    /// scratch in the sector just below it.
    ///
    /// A bank too small for two sectors wraps around, which
    /// [`validate`](Self::validate) then rejects.
    pub const fn top_of_bank(bank_end: u32, sector_size: u32) -> Self {
        Self::new(
            bank_end.wrapping_sub(sector_size),
            bank_end.wrapping_sub(sector_size.wrapping_mul(2)),
            sector_size,
        )
    }

    /// Rows in each region for a `ROW` byte row.
    pub fn rows<const ROW: usize>(&self) -> usize {
        self.target.rows(ROW)
    }

    pub fn rows_per_sector<const ROW: usize>(&self) -> usize {
        self.sector_size as usize / ROW
    }

    /// Checks the regions are non-empty, sector aligned, equally sized and
    /// disjoint, and that `ROW` divides the sector size.
    pub fn validate<const ROW: usize>(&self) -> Result<(), LayoutError> {
        if ROW == 0 || self.sector_size == 0 {
            return Err(LayoutError::ZeroSize);
        }
        if self.sector_size as usize % ROW != 0 {
            return Err(LayoutError::RowNotDivisor);
        }
        for region in [&self.target, &self.scratch] {
            if region.size == 0 {
                return Err(LayoutError::ZeroSize);
            }
            if region.base % self.sector_size != 0 {
                return Err(LayoutError::Unaligned { addr: region.base });
            }
            if region.size % self.sector_size != 0 {
                return Err(LayoutError::Unaligned {
                    addr: region.base.wrapping_add(region.size),
                });
            }
            if region.end().is_none() {
                return Err(LayoutError::Overflow { addr: region.base });
            }
        }
        if self.target.size != self.scratch.size {
            return Err(LayoutError::SizeMismatch);
        }
        if self.target.overlaps(&self.scratch) {
            return Err(LayoutError::Overlap);
        }
        Ok(())
    }
}
