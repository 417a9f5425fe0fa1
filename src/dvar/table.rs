use crate::dvar::{
    error::DvarError,
    types::{DistVarType, RamOffset},
};

/// RAM mirror words with a dirty bit per word.
///
/// A dirty word holds a shadowed-EEPROM value that has not reached the
/// device yet.
pub(crate) struct RamTable<const RW: usize>
where
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    words: [DistVarType; RW],
    dirty: bitmaps::Bitmap<RW>,
}

impl<const RW: usize> RamTable<RW>
where
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    pub(crate) fn new() -> Self {
        Self {
            words: [0; RW],
            dirty: bitmaps::Bitmap::new(),
        }
    }

    /// Checks that `len` words starting at `offset` fit the table.
    pub(crate) fn check_range(&self, offset: RamOffset, len: u16) -> Result<(), DvarError> {
        let end = usize::from(offset) + usize::from(len);
        if len == 0 || end > RW {
            return Err(DvarError::InvalidLocalAddress);
        }
        Ok(())
    }

    pub(crate) fn read(&self, offset: usize) -> Result<DistVarType, DvarError> {
        self.words
            .get(offset)
            .copied()
            .ok_or(DvarError::InvalidLocalAddress)
    }

    pub(crate) fn write(&mut self, offset: usize, value: DistVarType) -> Result<(), DvarError> {
        let word = self
            .words
            .get_mut(offset)
            .ok_or(DvarError::InvalidLocalAddress)?;
        *word = value;
        Ok(())
    }

    pub(crate) fn is_dirty(&self, offset: usize) -> bool {
        offset < RW && self.dirty.get(offset)
    }

    pub(crate) fn any_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub(crate) fn mark_dirty(&mut self, offset: usize) -> Result<(), DvarError> {
        if offset >= RW {
            return Err(DvarError::InvalidLocalAddress);
        }
        self.dirty.set(offset, true);
        Ok(())
    }

    pub(crate) fn mark_clean(&mut self, offset: usize) {
        if offset < RW {
            self.dirty.set(offset, false);
        }
    }
}
