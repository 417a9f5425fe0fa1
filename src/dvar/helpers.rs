//! Utility functions for ID range and scheduling calculations.
//!
//! These helpers are useful when laying out segment maps or reasoning about
//! broadcast timing outside the node itself.

use crate::dvar::{
    DvarError,
    types::{DistVarId, EEPROM_WORD, EepromOffset},
};

/// Calculates the inclusive ID span covered by `length` variables at `base`.
///
/// Returns `(smallest, biggest)`, or an error if the range is empty, wraps
/// the ID space, or extends past `max_id`.
///
/// # Errors
/// * [`DvarError::InvalidAddressRange`] - if `length` is 0 or the range is out of bounds
///
/// # Example
/// ```
/// use embedded_dvar::dvar::helpers::id_span;
///
/// assert_eq!(id_span(1000, 10, u32::MAX), Ok((1000, 1009)));
/// assert!(id_span(u32::MAX, 2, u32::MAX).is_err());
/// ```
pub fn id_span(
    base: DistVarId,
    length: u16,
    max_id: DistVarId,
) -> Result<(DistVarId, DistVarId), DvarError> {
    if length == 0 {
        return Err(DvarError::InvalidAddressRange);
    }

    let biggest = base
        .checked_add(u32::from(length) - 1)
        .ok_or(DvarError::InvalidAddressRange)?;

    if biggest > max_id {
        return Err(DvarError::InvalidAddressRange);
    }

    Ok((base, biggest))
}

/// Returns true if two inclusive spans share at least one ID.
#[inline]
pub fn spans_overlap(a: (DistVarId, DistVarId), b: (DistVarId, DistVarId)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

/// Returns true if `inner` lies entirely within `outer`.
#[inline]
pub fn span_contains(outer: (DistVarId, DistVarId), inner: (DistVarId, DistVarId)) -> bool {
    outer.0 <= inner.0 && inner.1 <= outer.1
}

/// Number of scheduler ticks between automatic broadcasts.
///
/// The period is rounded up to whole ticks, never below one tick.
///
/// # Example
/// ```
/// use embedded_dvar::dvar::helpers::polls_per_broadcast;
///
/// assert_eq!(polls_per_broadcast(100, 10), 10);
/// assert_eq!(polls_per_broadcast(25, 10), 3);
/// assert_eq!(polls_per_broadcast(1, 10), 1);
/// ```
pub fn polls_per_broadcast(period_ms: u16, tick_period_ms: u16) -> u16 {
    let tick = tick_period_ms.max(1);
    period_ms.div_ceil(tick).max(1)
}

/// EEPROM byte offset of the variable `index` words into a segment.
///
/// Returns `None` if the offset does not fit the EEPROM offset type.
pub fn eeprom_word_offset(base: EepromOffset, index: u32) -> Option<EepromOffset> {
    let bytes = usize::try_from(index).ok()?.checked_mul(EEPROM_WORD)?;
    let offset = usize::from(base).checked_add(bytes)?;
    EepromOffset::try_from(offset).ok()
}

#[test]
fn id_span_edge_cases() {
    // Zero length
    assert_eq!(id_span(0, 0, u32::MAX), Err(DvarError::InvalidAddressRange));

    // Single variable
    assert_eq!(id_span(5, 1, u32::MAX), Ok((5, 5)));

    // Last ID of the space
    assert_eq!(id_span(u32::MAX, 1, u32::MAX), Ok((u32::MAX, u32::MAX)));

    // Past a restricted space
    assert_eq!(id_span(990, 20, 1000), Err(DvarError::InvalidAddressRange));
    assert_eq!(id_span(990, 11, 1000), Ok((990, 1000)));
}

#[test]
fn overlap_and_containment() {
    assert!(spans_overlap((0, 9), (9, 12)));
    assert!(!spans_overlap((0, 9), (10, 12)));
    assert!(spans_overlap((5, 6), (0, 100)));

    assert!(span_contains((0, 9), (0, 9)));
    assert!(span_contains((0, 9), (3, 4)));
    assert!(!span_contains((0, 9), (5, 10)));
}

#[test]
fn eeprom_offsets() {
    assert_eq!(eeprom_word_offset(0, 0), Some(0));
    assert_eq!(eeprom_word_offset(16, 3), Some(28));
    assert_eq!(eeprom_word_offset(u16::MAX - 3, 1), None);
}
