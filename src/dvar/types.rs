use crate::dvar::DvarError;

/// Identifier of a distributed variable in the bus-wide address space.
pub type DistVarId = u32;

/// Value of a distributed variable.
///
/// Every record shape and message in this crate assumes a 32-bit value.
pub type DistVarType = u32;

/// Byte offset into the EEPROM device.
pub type EepromOffset = u16;

/// Word offset into the node's RAM mirror table.
pub type RamOffset = u16;

/// Size in bytes of one variable in EEPROM.
pub const EEPROM_WORD: usize = core::mem::size_of::<DistVarType>();

/// Where the authoritative copy of a segment lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flavor {
    /// RAM only.
    Ram = 0,
    /// EEPROM, mirrored in RAM for reads.
    ShadowedEeprom = 1,
    /// EEPROM only.
    Eeprom = 2,
}

impl Flavor {
    /// Returns true if values are mirrored in RAM.
    #[inline]
    pub fn uses_ram(self) -> bool {
        matches!(self, Flavor::Ram | Flavor::ShadowedEeprom)
    }

    /// Returns true if values are persisted in EEPROM.
    #[inline]
    pub fn uses_eeprom(self) -> bool {
        matches!(self, Flavor::ShadowedEeprom | Flavor::Eeprom)
    }
}

impl TryFrom<u8> for Flavor {
    type Error = DvarError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Flavor::Ram),
            1 => Ok(Flavor::ShadowedEeprom),
            2 => Ok(Flavor::Eeprom),
            _ => Err(DvarError::InvalidFlavor),
        }
    }
}

/// Snapshot of one variable produced by the search API.
///
/// This is a copy, not a live reference; advancing it re-reads storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SearchContext {
    pub id: DistVarId,
    pub value: DistVarType,
    pub flavor: Flavor,
    pub owned: bool,
}

/// Logical DVAR messages exchanged over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DvarMessage {
    /// Ask the owner of `id` to change its value.
    SetPointRequest { id: DistVarId, value: DistVarType },
    /// Announce the current value of `id`.
    Broadcast { id: DistVarId, value: DistVarType },
    /// Ask the owner of `id` to broadcast it without changing it.
    RequestBroadcast { id: DistVarId },
}

impl DvarMessage {
    /// Variable the message refers to.
    pub fn id(&self) -> DistVarId {
        match *self {
            DvarMessage::SetPointRequest { id, .. }
            | DvarMessage::Broadcast { id, .. }
            | DvarMessage::RequestBroadcast { id } => id,
        }
    }
}

/// Hook invoked for every variable update observed from the bus.
///
/// Runs under the registry lock; it must not block and must not re-enter
/// the node.
pub type UpdateHook = fn(DistVarId, DistVarType);
