//! The merge step applied to each row on its way back into the target.

/// Rewrites a preserved row before it is programmed back into the target.
///
/// Implemented by [`PatchSet`] and by any `Fn(usize, &mut [u8])`, which
/// receives the row index and the row contents.
pub trait RowTransform {
    fn apply(&self, row_index: usize, row: &mut [u8]);

    /// Rejects transforms that cannot be applied to `row_size` byte rows,
    /// returning the first offending offset.
    fn validate(&self, _row_size: usize) -> Result<(), usize> {
        Ok(())
    }
}

impl<F> RowTransform for F
where
    F: Fn(usize, &mut [u8]),
{
    fn apply(&self, row_index: usize, row: &mut [u8]) {
        self(row_index, row)
    }
}

/// Byte replacements at fixed offsets, applied identically to every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PatchSet<'a> {
    entries: &'a [(usize, u8)],
}

impl<'a> PatchSet<'a> {
    /// Later entries win when an offset appears twice.
    pub const fn new(entries: &'a [(usize, u8)]) -> Self {
        Self { entries }
    }

    /// Leaves rows untouched, turning the recommit into a plain restore.
    pub const fn empty() -> Self {
        Self { entries: &[] }
    }

    pub fn entries(&self) -> &'a [(usize, u8)] {
        self.entries
    }
}

impl RowTransform for PatchSet<'_> {
    fn apply(&self, _row_index: usize, row: &mut [u8]) {
        for &(offset, value) in self.entries {
            if let Some(byte) = row.get_mut(offset) {
                *byte = value;
            }
        }
    }

    fn validate(&self, row_size: usize) -> Result<(), usize> {
        match self.entries.iter().find(|(offset, _)| *offset >= row_size) {
            Some(&(offset, _)) => Err(offset),
            None => Ok(()),
        }
    }
}

/// The bring-up payload: byte `i` holds `i mod 256`.
pub fn test_pattern<const ROW: usize>() -> [u8; ROW] {
    core::array::from_fn(|i| i as u8)
}
