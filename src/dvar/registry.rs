use heapless::Vec;

use crate::dvar::{
    DvarError,
    callback::SetPointCallback,
    helpers::{span_contains, spans_overlap},
    storage::Location,
    types::{DistVarId, Flavor},
};

/// Handle of a segment record in the segment pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SegmentIdx(u16);

/// Handle of an ownership record in the ownership pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OwnerIdx(u16);

/// Inclusive ID span.
pub(crate) type Span = (DistVarId, DistVarId);

pub(crate) struct SegmentRecord {
    pub(crate) span: Span,
    pub(crate) location: Location,
    first_owner: Option<OwnerIdx>,
}

pub(crate) struct OwnerRecord {
    pub(crate) span: Span,
    pub(crate) callback: SetPointCallback,
    /// Ticks between broadcasts; 0 disables auto-broadcast.
    pub(crate) polls_per_broadcast: u16,
    pub(crate) broadcast_countdown: u16,
    next_in_segment: Option<OwnerIdx>,
    next_in_broadcast: Option<OwnerIdx>,
}

/// Where a tracked variable lives in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Located {
    pub(crate) segment: SegmentIdx,
    pub(crate) owner: Option<OwnerIdx>,
    /// Position of the variable inside its segment.
    pub(crate) index: u32,
}

/// Append-only segment and ownership pools.
///
/// Records are never released, so handles stay valid for the lifetime of
/// the registry. Ownership records are threaded through two index lists:
/// the owner list of their segment and the global broadcast list.
pub(crate) struct Registry<const SC: usize, const OC: usize> {
    segments: Vec<SegmentRecord, SC>,
    owners: Vec<OwnerRecord, OC>,
    broadcast_head: Option<OwnerIdx>,
}

impl<const SC: usize, const OC: usize> Registry<SC, OC> {
    pub(crate) const fn new() -> Self {
        Self {
            segments: Vec::new(),
            owners: Vec::new(),
            broadcast_head: None,
        }
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub(crate) fn segment(&self, idx: SegmentIdx) -> &SegmentRecord {
        &self.segments[usize::from(idx.0)]
    }

    pub(crate) fn owner(&self, idx: OwnerIdx) -> &OwnerRecord {
        &self.owners[usize::from(idx.0)]
    }

    pub(crate) fn owner_mut(&mut self, idx: OwnerIdx) -> &mut OwnerRecord {
        &mut self.owners[usize::from(idx.0)]
    }

    /// Returns true if `span` shares an ID with any registered segment.
    pub(crate) fn overlaps_segment(&self, span: Span) -> bool {
        self.segments.iter().any(|s| spans_overlap(s.span, span))
    }

    /// Runs every check [`Self::add_segment`] performs, without adding.
    pub(crate) fn check_segment(
        &self,
        span: Span,
        location: &Location,
        len: u16,
    ) -> Result<(), DvarError> {
        if self.overlaps_segment(span) {
            return Err(DvarError::InvalidAddressRange);
        }

        if location.flavor.uses_ram() {
            let ram = ram_span(location, len);
            let clash = self
                .segments
                .iter()
                .filter(|s| s.location.flavor.uses_ram())
                .any(|s| spans_overlap(ram_span(&s.location, span_len(s.span)), ram));
            if clash {
                return Err(DvarError::InvalidLocalAddress);
            }
        }

        if self.segments.is_full() {
            return Err(DvarError::NotEnoughResources);
        }
        Ok(())
    }

    /// Adds a segment after checking it against every existing one.
    pub(crate) fn add_segment(
        &mut self,
        span: Span,
        location: Location,
        len: u16,
    ) -> Result<SegmentIdx, DvarError> {
        self.check_segment(span, &location, len)?;

        let idx = SegmentIdx(pool_index(self.segments.len())?);
        self.segments
            .push(SegmentRecord {
                span,
                location,
                first_owner: None,
            })
            .map_err(|_| DvarError::NotEnoughResources)?;
        Ok(idx)
    }

    /// Adds an ownership record inside exactly one existing segment.
    ///
    /// `polls_per_broadcast` of 0 keeps the record off the broadcast list.
    pub(crate) fn add_owner(
        &mut self,
        span: Span,
        callback: SetPointCallback,
        polls_per_broadcast: u16,
    ) -> Result<OwnerIdx, DvarError> {
        let seg_pos = self
            .segments
            .iter()
            .position(|s| span_contains(s.span, span))
            .ok_or(DvarError::InvalidAddressRange)?;

        if self.owners.iter().any(|o| spans_overlap(o.span, span)) {
            return Err(DvarError::InvalidAddressRange);
        }

        if polls_per_broadcast != 0 && self.segments[seg_pos].location.flavor == Flavor::Eeprom {
            return Err(DvarError::InvalidBroadcastPeriod);
        }

        let idx = OwnerIdx(pool_index(self.owners.len())?);
        let segment = &mut self.segments[seg_pos];
        self.owners
            .push(OwnerRecord {
                span,
                callback,
                polls_per_broadcast,
                broadcast_countdown: polls_per_broadcast,
                next_in_segment: segment.first_owner,
                next_in_broadcast: None,
            })
            .map_err(|_| DvarError::NotEnoughResources)?;
        segment.first_owner = Some(idx);

        if polls_per_broadcast != 0 {
            self.append_broadcast(idx);
        }

        Ok(idx)
    }

    fn append_broadcast(&mut self, idx: OwnerIdx) {
        let mut tail = match self.broadcast_head {
            None => {
                self.broadcast_head = Some(idx);
                return;
            }
            Some(head) => head,
        };
        while let Some(next) = self.owner(tail).next_in_broadcast {
            tail = next;
        }
        self.owner_mut(tail).next_in_broadcast = Some(idx);
    }

    /// First record of the broadcast round-robin list.
    pub(crate) fn broadcast_head(&self) -> Option<OwnerIdx> {
        self.broadcast_head
    }

    pub(crate) fn next_in_broadcast(&self, idx: OwnerIdx) -> Option<OwnerIdx> {
        self.owner(idx).next_in_broadcast
    }

    /// Finds the segment and owner (if any) of `id`.
    pub(crate) fn locate(&self, id: DistVarId) -> Option<Located> {
        let pos = self
            .segments
            .iter()
            .position(|s| s.span.0 <= id && id <= s.span.1)?;
        let segment = &self.segments[pos];

        let mut owner = segment.first_owner;
        while let Some(o) = owner {
            let rec = self.owner(o);
            if rec.span.0 <= id && id <= rec.span.1 {
                break;
            }
            owner = rec.next_in_segment;
        }

        Some(Located {
            segment: SegmentIdx(pos as u16),
            owner,
            index: id - segment.span.0,
        })
    }

    /// Smallest registered ID.
    pub(crate) fn first_id(&self) -> Option<DistVarId> {
        self.segments.iter().map(|s| s.span.0).min()
    }

    /// Smallest registered ID strictly greater than `id`.
    pub(crate) fn next_id_after(&self, id: DistVarId) -> Option<DistVarId> {
        let next = id.checked_add(1)?;
        if self.locate(next).is_some() {
            return Some(next);
        }
        self.segments
            .iter()
            .map(|s| s.span.0)
            .filter(|&smallest| smallest > id)
            .min()
    }

    /// Iterates all segments in registration order.
    pub(crate) fn segments(&self) -> impl Iterator<Item = &SegmentRecord> {
        self.segments.iter()
    }
}

fn pool_index(len: usize) -> Result<u16, DvarError> {
    u16::try_from(len).map_err(|_| DvarError::NotEnoughResources)
}

fn span_len(span: Span) -> u16 {
    (span.1 - span.0 + 1) as u16
}

fn ram_span(location: &Location, len: u16) -> Span {
    let start = u32::from(location.ram);
    (start, start + u32::from(len) - 1)
}
