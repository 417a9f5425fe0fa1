use crate::dvar::{
    DvarError,
    helpers::eeprom_word_offset,
    persist::{EepromDevice, EepromError, PersistMode},
    table::RamTable,
    types::{DistVarType, EEPROM_WORD, EepromOffset, Flavor, RamOffset},
};

/// Validated storage placement of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location {
    pub(crate) flavor: Flavor,
    pub(crate) ram: RamOffset,
    pub(crate) ee: EepromOffset,
}

/// Per-variable read/write across RAM, EEPROM and shadowed EEPROM.
///
/// RAM access never fails once a location is validated. EEPROM accesses
/// are retried while the device reports busy, up to the configured budget.
pub(crate) struct Storage<E, const RW: usize>
where
    E: EepromDevice,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    pub(crate) ram: RamTable<RW>,
    pub(crate) eeprom: E,
    retries: u8,
    persist_mode: PersistMode,
}

impl<E, const RW: usize> Storage<E, RW>
where
    E: EepromDevice,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    pub(crate) fn new(eeprom: E, retries: u8, persist_mode: PersistMode) -> Self {
        Self {
            ram: RamTable::new(),
            eeprom,
            retries,
            persist_mode,
        }
    }

    /// Validates the media a segment of `len` variables needs for `flavor`.
    pub(crate) fn check_location(
        &self,
        flavor: Flavor,
        ram: Option<RamOffset>,
        ee: Option<EepromOffset>,
        len: u16,
    ) -> Result<Location, DvarError> {
        let ram = if flavor.uses_ram() {
            let offset = ram.ok_or(DvarError::InvalidLocalAddress)?;
            self.ram.check_range(offset, len)?;
            offset
        } else {
            0
        };

        let ee = if flavor.uses_eeprom() {
            let offset = ee.ok_or(DvarError::InvalidEepromOffset)?;
            let end = usize::from(offset) + usize::from(len) * EEPROM_WORD;
            if end > self.eeprom.capacity() {
                return Err(DvarError::InvalidEepromOffset);
            }
            offset
        } else {
            0
        };

        Ok(Location { flavor, ram, ee })
    }

    pub(crate) fn read(&mut self, loc: &Location, index: u32) -> Result<DistVarType, DvarError> {
        match loc.flavor {
            Flavor::Ram | Flavor::ShadowedEeprom => self.ram.read(ram_index(loc, index)),
            Flavor::Eeprom => self.ee_read(ee_index(loc, index)?),
        }
    }

    pub(crate) fn write(
        &mut self,
        loc: &Location,
        index: u32,
        value: DistVarType,
    ) -> Result<(), DvarError> {
        match loc.flavor {
            Flavor::Ram => self.ram.write(ram_index(loc, index), value),
            Flavor::ShadowedEeprom => {
                let word = ram_index(loc, index);
                self.ram.write(word, value)?;
                match self.persist_mode {
                    PersistMode::WriteThrough => self.ee_write(ee_index(loc, index)?, value),
                    PersistMode::Deferred => self.ram.mark_dirty(word),
                }
            }
            Flavor::Eeprom => self.ee_write(ee_index(loc, index)?, value),
        }
    }

    /// Fills the RAM mirror of a shadowed segment from EEPROM.
    pub(crate) fn load_shadow(&mut self, loc: &Location, len: u16) -> Result<(), DvarError> {
        for index in 0..u32::from(len) {
            let value = self.ee_read(ee_index(loc, index)?)?;
            self.ram.write(ram_index(loc, index), value)?;
        }
        Ok(())
    }

    /// Writes one deferred shadow word to EEPROM if it is dirty.
    ///
    /// Returns true if a device write was issued.
    pub(crate) fn persist_word(&mut self, loc: &Location, index: u32) -> Result<bool, DvarError> {
        let word = ram_index(loc, index);
        if !self.ram.is_dirty(word) {
            return Ok(false);
        }
        let value = self.ram.read(word)?;
        self.ee_write(ee_index(loc, index)?, value)?;
        self.ram.mark_clean(word);
        Ok(true)
    }

    pub(crate) fn any_pending(&self) -> bool {
        self.ram.any_dirty()
    }

    fn ee_read(&mut self, offset: EepromOffset) -> Result<DistVarType, DvarError> {
        let mut busy = 0u8;
        loop {
            match self.eeprom.read_word(offset) {
                Ok(value) => return Ok(value),
                Err(err) => self.on_device_error(err, offset, &mut busy)?,
            }
        }
    }

    fn ee_write(&mut self, offset: EepromOffset, value: DistVarType) -> Result<(), DvarError> {
        let mut busy = 0u8;
        loop {
            match self.eeprom.write_word(offset, value) {
                Ok(()) => return Ok(()),
                Err(err) => self.on_device_error(err, offset, &mut busy)?,
            }
        }
    }

    fn on_device_error(
        &self,
        err: EepromError,
        offset: EepromOffset,
        busy: &mut u8,
    ) -> Result<(), DvarError> {
        match err {
            EepromError::Busy if *busy < self.retries => {
                *busy += 1;
                Ok(())
            }
            EepromError::Busy => {
                log::warn!("eeprom busy at {offset:#06x} after {} retries", self.retries);
                Err(DvarError::NotEnoughResources)
            }
            EepromError::OutOfRange | EepromError::Device => {
                log::warn!("eeprom access failed at {offset:#06x}: {err:?}");
                Err(DvarError::InvalidEepromOffset)
            }
        }
    }
}

#[inline]
fn ram_index(loc: &Location, index: u32) -> usize {
    usize::from(loc.ram) + index as usize
}

#[inline]
fn ee_index(loc: &Location, index: u32) -> Result<EepromOffset, DvarError> {
    eeprom_word_offset(loc.ee, index).ok_or(DvarError::InvalidEepromOffset)
}
