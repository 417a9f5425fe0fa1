/// Errors returned by distributed variable operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DvarError {
    /// ID range outside the variable space, overlapping, or not tracked.
    InvalidAddressRange,
    /// Storage flavor code is not a known [`Flavor`](crate::dvar::Flavor).
    InvalidFlavor,
    /// RAM mirror location missing or outside the RAM table.
    InvalidLocalAddress,
    /// EEPROM offset missing, out of range, or the device failed.
    InvalidEepromOffset,
    /// A fixed pool, the ACK table, or the bus queue is full.
    NotEnoughResources,
    /// No set-point callback was supplied.
    MissingCallback,
    /// Auto-broadcast requested on an EEPROM-only segment.
    InvalidBroadcastPeriod,
    /// Variable not found in the local registry.
    VariableNotFound,
    /// Variable is not owned by this node.
    UnownedVariable,
    /// Blocking call made before the scheduler started.
    RtosNotStarted,
    /// No broadcast observed before the deadline.
    Timeout,
    /// Outgoing requests are currently suppressed.
    TrafficSuppressed,
}

impl core::fmt::Display for DvarError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DvarError::InvalidAddressRange => write!(f, "invalid distributed variable range"),
            DvarError::InvalidFlavor => write!(f, "invalid storage flavor"),
            DvarError::InvalidLocalAddress => write!(f, "invalid local RAM location"),
            DvarError::InvalidEepromOffset => write!(f, "invalid or inaccessible EEPROM offset"),
            DvarError::NotEnoughResources => write!(f, "not enough resources"),
            DvarError::MissingCallback => write!(f, "set-point callback not provided"),
            DvarError::InvalidBroadcastPeriod => write!(f, "invalid broadcast period"),
            DvarError::VariableNotFound => write!(f, "variable not found"),
            DvarError::UnownedVariable => write!(f, "variable is not locally owned"),
            DvarError::RtosNotStarted => write!(f, "operating system not started"),
            DvarError::Timeout => write!(f, "timed out waiting for broadcast"),
            DvarError::TrafficSuppressed => write!(f, "bus traffic suppressed"),
        }
    }
}
