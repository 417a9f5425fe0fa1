use crate::dvar::{persist::PersistMode, types::DistVarId};

/// Run-time settings of a [`DvarNode`](crate::dvar::DvarNode).
///
/// Pool capacities are const generics on the node itself; this struct
/// carries everything that does not change the memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DvarConfig {
    /// Period at which the application calls `broadcast_tick`.
    pub tick_period_ms: u16,
    /// Largest legal variable ID.
    pub max_id: DistVarId,
    /// Extra attempts made while the EEPROM reports busy.
    pub eeprom_retries: u8,
    /// When shadowed-EEPROM writes reach the device.
    pub persist_mode: PersistMode,
}

impl Default for DvarConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 10,
            max_id: DistVarId::MAX,
            eeprom_retries: 3,
            persist_mode: PersistMode::WriteThrough,
        }
    }
}
