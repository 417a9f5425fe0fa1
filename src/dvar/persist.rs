use crate::dvar::types::{DistVarType, EepromOffset};

/// Error reported by an EEPROM device for a single access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError {
    /// Device is busy; the access may succeed if retried.
    Busy,
    /// Offset is outside the device.
    OutOfRange,
    /// Any other device failure.
    Device,
}

/// Blocking word-level access to the persistent storage device.
pub trait EepromDevice {
    /// Device size in bytes.
    fn capacity(&self) -> usize;
    /// Reads the 32-bit word at `offset`.
    fn read_word(&mut self, offset: EepromOffset) -> Result<DistVarType, EepromError>;
    /// Writes the 32-bit word at `offset`.
    fn write_word(&mut self, offset: EepromOffset, value: DistVarType) -> Result<(), EepromError>;
}

/// Device stand-in for nodes without EEPROM.
///
/// Has zero capacity, so registering any EEPROM-backed segment fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEeprom;

impl EepromDevice for NoEeprom {
    fn capacity(&self) -> usize {
        0
    }

    fn read_word(&mut self, _offset: EepromOffset) -> Result<DistVarType, EepromError> {
        Err(EepromError::OutOfRange)
    }

    fn write_word(&mut self, _offset: EepromOffset, _value: DistVarType) -> Result<(), EepromError> {
        Err(EepromError::OutOfRange)
    }
}

/// When shadowed-EEPROM writes reach the device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PersistMode {
    /// Write the device as part of every value change.
    #[default]
    WriteThrough,
    /// Mark the word dirty and write it on the next persist pass.
    Deferred,
}
