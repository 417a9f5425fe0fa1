#![allow(unsafe_code)]

use core::cell::UnsafeCell;

use crate::dvar::{
    DvarError,
    callback::SetPointCallback,
    config::DvarConfig,
    helpers::{id_span, polls_per_broadcast},
    persist::EepromDevice,
    registry::{Located, OwnerIdx, Registry},
    rtos::Rtos,
    storage::Storage,
    transport::Transport,
    types::{
        DistVarId, DistVarType, DvarMessage, EepromOffset, Flavor, RamOffset, SearchContext,
        UpdateHook,
    },
};

/// Maximum number of tasks blocked on acknowledged requests at once.
pub const ACK_WAITERS: usize = 4;

// Released slots are collected in a `u8` mask
const _: () = assert!(ACK_WAITERS <= u8::BITS as usize);

/// Slot of one pending acknowledged request in the waiter table.
///
/// The slot also selects the RTOS event the waiting task blocks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AckTicket(usize);

impl AckTicket {
    pub(crate) fn slot(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy)]
struct AckWaiter {
    id: DistVarId,
    value: Option<DistVarType>,
}

/// Outcome of starting an acknowledged request.
pub(crate) enum AckStart {
    /// Handled locally; the value is final.
    Done(DistVarType),
    /// Sent on the bus; wait on the ticket.
    Wait(AckTicket),
}

/// Request kinds that can be acknowledged.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AckRequest {
    SetPoint(DistVarType),
    Broadcast,
}

/// Everything guarded by the registry lock.
pub(crate) struct NodeState<T, E, const SC: usize, const OC: usize, const RW: usize>
where
    T: Transport,
    E: EepromDevice,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    pub(crate) config: DvarConfig,
    pub(crate) registry: Registry<SC, OC>,
    pub(crate) storage: Storage<E, RW>,
    pub(crate) transport: T,
    waiters: [Option<AckWaiter>; ACK_WAITERS],
    suppressed: bool,
    update_hook: Option<UpdateHook>,
    /// One bit per waiter slot released since the lock was taken.
    signal_pending: u8,
}

/// One node's view of the distributed variable space.
///
/// # Const Generics
/// - `SC`: Capacity of the segment pool
/// - `OC`: Capacity of the ownership pool
/// - `RW`: Number of 32-bit words in the RAM mirror table
///
/// # Type Parameters
/// - `T`: Bus transmitter
/// - `E`: EEPROM device
/// - `R`: RTOS services for the acknowledged request paths
///
/// Every operation takes the registry lock (a critical section) for the
/// duration of its traversal or mutation. Only the `*_ack` operations
/// block, and they release the lock while waiting.
pub struct DvarNode<T, E, R, const SC: usize, const OC: usize, const RW: usize>
where
    T: Transport,
    E: EepromDevice,
    R: Rtos,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    state: UnsafeCell<NodeState<T, E, SC, OC, RW>>,
    pub(crate) rtos: R,
}

// All access to `state` goes through `critical_section::with`.
unsafe impl<T, E, R, const SC: usize, const OC: usize, const RW: usize> Sync
    for DvarNode<T, E, R, SC, OC, RW>
where
    T: Transport + Send,
    E: EepromDevice + Send,
    R: Rtos + Sync,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
}

impl<T, E, R, const SC: usize, const OC: usize, const RW: usize> core::fmt::Debug
    for DvarNode<T, E, R, SC, OC, RW>
where
    T: Transport,
    E: EepromDevice,
    R: Rtos,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DvarNode").finish_non_exhaustive()
    }
}

impl<T, E, R, const SC: usize, const OC: usize, const RW: usize> DvarNode<T, E, R, SC, OC, RW>
where
    T: Transport,
    E: EepromDevice,
    R: Rtos,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    pub fn new(config: DvarConfig, transport: T, eeprom: E, rtos: R) -> Self {
        Self {
            state: UnsafeCell::new(NodeState {
                config,
                registry: Registry::new(),
                storage: Storage::new(eeprom, config.eeprom_retries, config.persist_mode),
                transport,
                waiters: [None; ACK_WAITERS],
                suppressed: false,
                update_hook: None,
                signal_pending: 0,
            }),
            rtos,
        }
    }

    /// Runs `f` under the registry lock, then signals the event of every
    /// ACK waiter `f` released.
    ///
    /// `f` must not call back into the node.
    pub(crate) fn locked<Ret>(
        &self,
        f: impl FnOnce(&mut NodeState<T, E, SC, OC, RW>) -> Ret,
    ) -> Ret {
        let (ret, signal) = critical_section::with(|_| {
            let state = unsafe { &mut *self.state.get() };
            let ret = f(state);
            (ret, core::mem::take(&mut state.signal_pending))
        });
        for slot in 0..ACK_WAITERS {
            if signal & (1 << slot) != 0 {
                self.rtos.signal_event(slot);
            }
        }
        ret
    }

    /// Registers a segment of `length` variables starting at `base`.
    ///
    /// `ram_location` is a word offset into the RAM mirror and is required
    /// for [`Flavor::Ram`] and [`Flavor::ShadowedEeprom`]. `ee_offset` is a
    /// byte offset into EEPROM and is required for [`Flavor::Eeprom`] and
    /// [`Flavor::ShadowedEeprom`]. A shadowed segment is loaded from EEPROM
    /// into its mirror before this returns.
    ///
    /// Call during start-up, before the scheduler runs. Registration is
    /// permanent.
    ///
    /// # Errors
    /// * [`DvarError::InvalidAddressRange`] - range empty, out of the ID space, or overlapping
    /// * [`DvarError::InvalidLocalAddress`] - RAM location missing, out of range, or overlapping
    /// * [`DvarError::InvalidEepromOffset`] - EEPROM offset missing, out of range, or unreadable
    /// * [`DvarError::NotEnoughResources`] - segment pool full
    ///
    /// `flavor` is already typed here. Raw flavor codes are converted with
    /// [`Flavor::try_from`], which is where [`DvarError::InvalidFlavor`]
    /// comes from.
    pub fn register_segment(
        &self,
        base: DistVarId,
        length: u16,
        flavor: Flavor,
        ram_location: Option<RamOffset>,
        ee_offset: Option<EepromOffset>,
    ) -> Result<(), DvarError> {
        self.locked(|s| s.register_segment(base, length, flavor, ram_location, ee_offset))
    }

    /// Claims ownership of `length` variables starting at `base`.
    ///
    /// The range must sit entirely inside one registered segment and must
    /// not overlap another ownership. `broadcast_period_ms` of 0 disables
    /// auto-broadcast; a non-zero period needs a RAM mirror.
    ///
    /// # Errors
    /// * [`DvarError::MissingCallback`] - `callback` is `None`
    /// * [`DvarError::InvalidAddressRange`] - not inside one segment, or overlapping
    /// * [`DvarError::InvalidBroadcastPeriod`] - auto-broadcast on an EEPROM-only segment
    /// * [`DvarError::NotEnoughResources`] - ownership pool full
    pub fn register_ownership(
        &self,
        base: DistVarId,
        length: u16,
        callback: Option<SetPointCallback>,
        broadcast_period_ms: u16,
    ) -> Result<(), DvarError> {
        self.locked(|s| s.register_ownership(base, length, callback, broadcast_period_ms))
    }

    /// Writes an owned variable, bypassing its callback.
    ///
    /// Does nothing if the value is unchanged; otherwise the new value is
    /// stored and then broadcast.
    pub fn set_point_local(&self, id: DistVarId, value: DistVarType) -> Result<(), DvarError> {
        self.locked(|s| {
            let (loc, _) = s.owned(id)?;
            s.commit(&loc, id, value)
        })
    }

    /// Writes an owned variable through its set-point callback.
    ///
    /// The callback's result is the value stored; nothing happens if it
    /// equals the current value.
    pub fn set_point_local_with_callback(
        &self,
        id: DistVarId,
        value: DistVarType,
    ) -> Result<(), DvarError> {
        self.locked(|s| {
            let (loc, owner) = s.owned(id)?;
            let old = s.read(&loc)?;
            let new = s.registry.owner(owner).callback.apply(id, old, value);
            s.commit_from(&loc, id, old, new)
        })
    }

    /// Sets the bits of `mask` in an owned variable.
    pub fn set_flags_local(&self, id: DistVarId, mask: DistVarType) -> Result<(), DvarError> {
        self.locked(|s| {
            let (loc, _) = s.owned(id)?;
            let old = s.read(&loc)?;
            s.commit_from(&loc, id, old, old | mask)
        })
    }

    /// Clears the bits of `mask` in an owned variable.
    pub fn clear_flags_local(&self, id: DistVarId, mask: DistVarType) -> Result<(), DvarError> {
        self.locked(|s| {
            let (loc, _) = s.owned(id)?;
            let old = s.read(&loc)?;
            s.commit_from(&loc, id, old, old & !mask)
        })
    }

    /// Broadcasts the stored value of any tracked variable once.
    ///
    /// Broadcasting a variable owned elsewhere races with its owner and is
    /// discouraged.
    pub fn broadcast_once(&self, id: DistVarId) -> Result<(), DvarError> {
        self.locked(|s| {
            s.check_id(id)?;
            let loc = s
                .registry
                .locate(id)
                .ok_or(DvarError::InvalidAddressRange)?;
            let value = s.read(&loc)?;
            s.emit_broadcast(id, value)
        })
    }

    /// Advances the auto-broadcast schedule by one tick.
    ///
    /// Call every `tick_period_ms`. Each broadcast-enabled ownership counts
    /// down and broadcasts its whole range when it reaches zero. Deferred
    /// shadowed-EEPROM writes are persisted on the same pass. Every record
    /// is serviced even if one fails; the first error is returned.
    pub fn broadcast_tick(&self) -> Result<(), DvarError> {
        self.locked(|s| {
            let mut result = s.broadcast_tick();
            if let Err(err) = s.persist_pending() {
                result = result.and(Err(err));
            }
            result
        })
    }

    /// Writes every deferred shadowed-EEPROM word to the device.
    ///
    /// Returns the number of words written.
    pub fn persist_pending(&self) -> Result<usize, DvarError> {
        self.locked(|s| s.persist_pending())
    }

    /// Handles one message received from the bus.
    pub fn receive(&self, msg: DvarMessage) -> Result<(), DvarError> {
        self.locked(|s| s.receive(msg))
    }

    /// Reads the local copy of a tracked variable.
    pub fn value(&self, id: DistVarId) -> Result<DistVarType, DvarError> {
        self.locked(|s| {
            let loc = s
                .registry
                .locate(id)
                .ok_or(DvarError::VariableNotFound)?;
            s.read(&loc)
        })
    }

    /// Replaces the hook called for every update observed from the bus.
    ///
    /// Returns the previous hook. Hooks are not chained. The hook runs
    /// under the registry lock and must not block.
    pub fn register_logging_function(&self, hook: Option<UpdateHook>) -> Option<UpdateHook> {
        self.locked(|s| core::mem::replace(&mut s.update_hook, hook))
    }

    /// Blocks or allows outgoing set-point and broadcast requests.
    pub fn set_traffic_suppressed(&self, suppressed: bool) {
        self.locked(|s| s.suppressed = suppressed)
    }

    /// Number of segment records in use.
    pub fn used_segments(&self) -> usize {
        self.locked(|s| s.registry.segment_count())
    }

    /// Number of ownership records in use.
    pub fn used_owners(&self) -> usize {
        self.locked(|s| s.registry.owner_count())
    }
}

impl<T, E, const SC: usize, const OC: usize, const RW: usize> NodeState<T, E, SC, OC, RW>
where
    T: Transport,
    E: EepromDevice,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    fn register_segment(
        &mut self,
        base: DistVarId,
        length: u16,
        flavor: Flavor,
        ram_location: Option<RamOffset>,
        ee_offset: Option<EepromOffset>,
    ) -> Result<(), DvarError> {
        let span = id_span(base, length, self.config.max_id)?;
        if self.registry.overlaps_segment(span) {
            return Err(DvarError::InvalidAddressRange);
        }

        let location = self
            .storage
            .check_location(flavor, ram_location, ee_offset, length)?;
        self.registry.check_segment(span, &location, length)?;

        if flavor == Flavor::ShadowedEeprom {
            self.storage.load_shadow(&location, length)?;
        }

        self.registry.add_segment(span, location, length)?;
        log::debug!(
            "registered segment [{}, {}] as {:?}",
            span.0,
            span.1,
            flavor
        );
        Ok(())
    }

    fn register_ownership(
        &mut self,
        base: DistVarId,
        length: u16,
        callback: Option<SetPointCallback>,
        broadcast_period_ms: u16,
    ) -> Result<(), DvarError> {
        let callback = callback.ok_or(DvarError::MissingCallback)?;
        let span = id_span(base, length, self.config.max_id)?;

        let polls = if broadcast_period_ms == 0 {
            0
        } else {
            polls_per_broadcast(broadcast_period_ms, self.config.tick_period_ms)
        };

        self.registry.add_owner(span, callback, polls)?;
        log::debug!(
            "registered ownership [{}, {}], {} polls per broadcast",
            span.0,
            span.1,
            polls
        );
        Ok(())
    }

    pub(crate) fn check_id(&self, id: DistVarId) -> Result<(), DvarError> {
        if id > self.config.max_id {
            return Err(DvarError::InvalidAddressRange);
        }
        Ok(())
    }

    /// Resolves `id` to an owned variable.
    pub(crate) fn owned(&self, id: DistVarId) -> Result<(Located, OwnerIdx), DvarError> {
        self.check_id(id)?;
        let loc = self
            .registry
            .locate(id)
            .ok_or(DvarError::UnownedVariable)?;
        let owner = loc.owner.ok_or(DvarError::UnownedVariable)?;
        Ok((loc, owner))
    }

    pub(crate) fn is_owned(&self, id: DistVarId) -> bool {
        self.registry
            .locate(id)
            .is_some_and(|loc| loc.owner.is_some())
    }

    pub(crate) fn read(&mut self, loc: &Located) -> Result<DistVarType, DvarError> {
        let location = self.registry.segment(loc.segment).location;
        self.storage.read(&location, loc.index)
    }

    fn write(&mut self, loc: &Located, value: DistVarType) -> Result<(), DvarError> {
        let location = self.registry.segment(loc.segment).location;
        self.storage.write(&location, loc.index, value)
    }

    fn commit(&mut self, loc: &Located, id: DistVarId, new: DistVarType) -> Result<(), DvarError> {
        let old = self.read(loc)?;
        self.commit_from(loc, id, old, new)
    }

    /// Stores `new` and broadcasts it, unless it equals `old`.
    fn commit_from(
        &mut self,
        loc: &Located,
        id: DistVarId,
        old: DistVarType,
        new: DistVarType,
    ) -> Result<(), DvarError> {
        if old == new {
            return Ok(());
        }
        self.write(loc, new)?;
        self.emit_broadcast(id, new)
    }

    /// Sends a broadcast and releases local waiters on `id`.
    pub(crate) fn emit_broadcast(
        &mut self,
        id: DistVarId,
        value: DistVarType,
    ) -> Result<(), DvarError> {
        self.transport
            .send(DvarMessage::Broadcast { id, value })
            .map_err(|err| {
                log::warn!("broadcast of {id} dropped: {err:?}");
                DvarError::NotEnoughResources
            })?;
        log::trace!("broadcast {id} = {value:#010x}");
        self.release_waiters(id, value);
        Ok(())
    }

    /// Sends a request message unless traffic is suppressed.
    pub(crate) fn send_request(&mut self, msg: DvarMessage) -> Result<(), DvarError> {
        if self.suppressed {
            return Err(DvarError::TrafficSuppressed);
        }
        self.transport.send(msg).map_err(|err| {
            log::warn!("request for {} dropped: {err:?}", msg.id());
            DvarError::NotEnoughResources
        })?;
        log::trace!("sent {msg:?}");
        Ok(())
    }

    /// Applies a set-point request to an owned variable and answers with a
    /// broadcast of the resulting value, changed or not.
    pub(crate) fn process_set_point_request(
        &mut self,
        id: DistVarId,
        proposed: DistVarType,
    ) -> Result<DistVarType, DvarError> {
        let (loc, owner) = self.owned(id)?;
        let old = self.read(&loc)?;
        let new = self.registry.owner(owner).callback.apply(id, old, proposed);
        if new != old {
            self.write(&loc, new)?;
        }
        self.emit_broadcast(id, new)?;
        Ok(new)
    }

    /// Answers a broadcast request for an owned variable.
    pub(crate) fn process_broadcast_request(
        &mut self,
        id: DistVarId,
    ) -> Result<DistVarType, DvarError> {
        let (loc, _) = self.owned(id)?;
        let value = self.read(&loc)?;
        self.emit_broadcast(id, value)?;
        Ok(value)
    }

    fn receive(&mut self, msg: DvarMessage) -> Result<(), DvarError> {
        log::trace!("received {msg:?}");
        match msg {
            DvarMessage::SetPointRequest { id, value } if self.is_owned(id) => {
                self.process_set_point_request(id, value).map(|_| ())
            }
            DvarMessage::RequestBroadcast { id } if self.is_owned(id) => {
                self.process_broadcast_request(id).map(|_| ())
            }
            DvarMessage::SetPointRequest { .. } | DvarMessage::RequestBroadcast { .. } => Ok(()),
            DvarMessage::Broadcast { id, value } => {
                let stored = self.store_broadcast(id, value);
                if let Some(hook) = self.update_hook {
                    hook(id, value);
                }
                self.release_waiters(id, value);
                stored
            }
        }
    }

    /// Updates the shadow of a tracked, unowned variable.
    ///
    /// Broadcasts of owned variables are ignored; this node is their only
    /// source of truth.
    fn store_broadcast(&mut self, id: DistVarId, value: DistVarType) -> Result<(), DvarError> {
        let Some(loc) = self.registry.locate(id) else {
            return Ok(());
        };
        if loc.owner.is_some() {
            log::warn!("ignoring foreign broadcast of owned variable {id}");
            return Ok(());
        }
        if self.read(&loc)? != value {
            self.write(&loc, value)?;
        }
        Ok(())
    }

    fn broadcast_tick(&mut self) -> Result<(), DvarError> {
        let mut result = Ok(());
        let mut cursor = self.registry.broadcast_head();

        while let Some(idx) = cursor {
            cursor = self.registry.next_in_broadcast(idx);

            let owner = self.registry.owner_mut(idx);
            owner.broadcast_countdown = owner.broadcast_countdown.saturating_sub(1);
            if owner.broadcast_countdown != 0 {
                continue;
            }
            owner.broadcast_countdown = owner.polls_per_broadcast;
            let span = owner.span;

            for id in span.0..=span.1 {
                let sent = match self.registry.locate(id) {
                    Some(loc) => self.read(&loc).and_then(|v| self.emit_broadcast(id, v)),
                    None => Err(DvarError::VariableNotFound),
                };
                if let Err(err) = sent {
                    result = result.and(Err(err));
                }
            }
        }

        result
    }

    fn persist_pending(&mut self) -> Result<usize, DvarError> {
        if !self.storage.any_pending() {
            return Ok(0);
        }

        let mut written = 0;
        for segment in self.registry.segments() {
            if segment.location.flavor != Flavor::ShadowedEeprom {
                continue;
            }
            let len = segment.span.1 - segment.span.0 + 1;
            for index in 0..len {
                if self.storage.persist_word(&segment.location, index)? {
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    /// Registers a waiter for the next broadcast of `id`.
    fn add_waiter(&mut self, id: DistVarId) -> Result<AckTicket, DvarError> {
        let slot = self
            .waiters
            .iter()
            .position(Option::is_none)
            .ok_or(DvarError::NotEnoughResources)?;
        self.waiters[slot] = Some(AckWaiter { id, value: None });
        Ok(AckTicket(slot))
    }

    /// Releases every waiter on `id`, each through its own event.
    fn release_waiters(&mut self, id: DistVarId, value: DistVarType) {
        for (slot, waiter) in self.waiters.iter_mut().enumerate() {
            let Some(waiter) = waiter else { continue };
            if waiter.id == id && waiter.value.is_none() {
                waiter.value = Some(value);
                self.signal_pending |= 1 << slot;
            }
        }
    }

    /// Starts an acknowledged request.
    ///
    /// Requests for owned variables are handled in place; everything else
    /// is sent on the bus with a waiter registered first.
    pub(crate) fn start_ack(
        &mut self,
        id: DistVarId,
        request: AckRequest,
    ) -> Result<AckStart, DvarError> {
        self.check_id(id)?;

        if self.is_owned(id) {
            let value = match request {
                AckRequest::SetPoint(value) => self.process_set_point_request(id, value)?,
                AckRequest::Broadcast => self.process_broadcast_request(id)?,
            };
            return Ok(AckStart::Done(value));
        }

        if self.suppressed {
            return Err(DvarError::TrafficSuppressed);
        }

        let ticket = self.add_waiter(id)?;
        let msg = match request {
            AckRequest::SetPoint(value) => DvarMessage::SetPointRequest { id, value },
            AckRequest::Broadcast => DvarMessage::RequestBroadcast { id },
        };
        if let Err(err) = self.send_request(msg) {
            self.cancel_waiter(ticket);
            return Err(err);
        }
        Ok(AckStart::Wait(ticket))
    }

    /// Removes the waiter if it has been released and returns its value.
    pub(crate) fn take_ack(&mut self, ticket: AckTicket) -> Option<DistVarType> {
        let waiter = self.waiters.get_mut(ticket.0)?;
        let value = waiter.as_ref()?.value?;
        *waiter = None;
        Some(value)
    }

    /// Removes the waiter whether or not it has been released.
    pub(crate) fn cancel_waiter(&mut self, ticket: AckTicket) -> Option<DistVarType> {
        self.waiters.get_mut(ticket.0)?.take()?.value
    }

    pub(crate) fn pending_waiters(&self) -> usize {
        self.waiters.iter().flatten().count()
    }

    /// Snapshot of a tracked variable for the search API.
    pub(crate) fn snapshot(&mut self, id: DistVarId) -> Result<SearchContext, DvarError> {
        let loc = self
            .registry
            .locate(id)
            .ok_or(DvarError::VariableNotFound)?;
        let flavor = self.registry.segment(loc.segment).location.flavor;
        let value = self.read(&loc)?;
        Ok(SearchContext {
            id,
            value,
            flavor,
            owned: loc.owner.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvar::test_support::{TestNode, sent, test_node, test_node_with};
    use crate::dvar::{PersistMode, types::DvarMessage::*};

    fn owned_ram_node() -> TestNode {
        let node = test_node();
        node.register_segment(1000, 10, Flavor::Ram, Some(0), None)
            .unwrap();
        node.register_ownership(1000, 5, Some(SetPointCallback::AcceptAny), 0)
            .unwrap();
        node
    }

    fn clamp_to_100(_id: DistVarId, _old: DistVarType, new: DistVarType) -> DistVarType {
        new.min(100)
    }

    #[test]
    fn set_point_local_writes_and_broadcasts() {
        let node = owned_ram_node();

        node.set_point_local(1002, 7).unwrap();

        assert_eq!(node.value(1002), Ok(7));
        assert_eq!(sent(&node), [Broadcast { id: 1002, value: 7 }]);
    }

    #[test]
    fn set_point_local_same_value_is_noop() {
        let node = owned_ram_node();

        for _ in 0..3 {
            node.set_point_local(1002, 7).unwrap();
        }

        assert_eq!(sent(&node).len(), 1);
    }

    #[test]
    fn set_point_local_unowned_rejected_without_write() {
        let node = owned_ram_node();

        assert_eq!(
            node.set_point_local(1006, 7),
            Err(DvarError::UnownedVariable)
        );
        assert_eq!(
            node.set_point_local(5000, 7),
            Err(DvarError::UnownedVariable)
        );
        assert_eq!(node.value(1006), Ok(0));
        assert!(sent(&node).is_empty());
    }

    #[test]
    fn set_point_local_bypasses_callback() {
        let node = test_node();
        node.register_segment(0, 4, Flavor::Ram, Some(0), None)
            .unwrap();
        node.register_ownership(0, 4, Some(SetPointCallback::AcceptNone), 0)
            .unwrap();

        node.set_point_local(1, 55).unwrap();
        assert_eq!(node.value(1), Ok(55));
    }

    #[test]
    fn callback_decides_final_value() {
        let node = test_node();
        node.register_segment(0, 12, Flavor::Ram, Some(0), None)
            .unwrap();
        node.register_ownership(0, 4, Some(SetPointCallback::AcceptAny), 0)
            .unwrap();
        node.register_ownership(4, 4, Some(SetPointCallback::AcceptNone), 0)
            .unwrap();
        node.register_ownership(8, 4, Some(SetPointCallback::Custom(clamp_to_100)), 0)
            .unwrap();

        node.set_point_local_with_callback(0, 0xFFFF_FFFF).unwrap();
        assert_eq!(node.value(0), Ok(0xFFFF_FFFF));

        node.set_point_local_with_callback(4, 9).unwrap();
        assert_eq!(node.value(4), Ok(0));

        node.set_point_local_with_callback(8, 500).unwrap();
        assert_eq!(node.value(8), Ok(100));

        // Rejected change does not broadcast
        assert_eq!(
            sent(&node),
            [
                Broadcast {
                    id: 0,
                    value: 0xFFFF_FFFF
                },
                Broadcast { id: 8, value: 100 },
            ]
        );
    }

    #[test]
    fn flag_helpers_read_modify_write() {
        let node = owned_ram_node();
        node.set_point_local(1000, 0b1000).unwrap();

        node.set_flags_local(1000, 0b0011).unwrap();
        assert_eq!(node.value(1000), Ok(0b1011));

        node.clear_flags_local(1000, 0b1001).unwrap();
        assert_eq!(node.value(1000), Ok(0b0010));

        // No change, no broadcast
        node.set_flags_local(1000, 0b0010).unwrap();
        assert_eq!(sent(&node).len(), 3);

        assert_eq!(
            node.set_flags_local(1007, 1),
            Err(DvarError::UnownedVariable)
        );
    }

    #[test]
    fn broadcast_once_needs_tracking_only() {
        let node = owned_ram_node();

        node.broadcast_once(1008).unwrap();
        assert_eq!(sent(&node), [Broadcast { id: 1008, value: 0 }]);

        assert_eq!(
            node.broadcast_once(2000),
            Err(DvarError::InvalidAddressRange)
        );
    }

    #[test]
    fn bus_full_reports_resources_after_write() {
        let node = owned_ram_node();
        node.locked(|s| s.transport.full = true);

        assert_eq!(
            node.set_point_local(1001, 3),
            Err(DvarError::NotEnoughResources)
        );
        // Written locally even though nobody heard about it
        assert_eq!(node.value(1001), Ok(3));
    }

    #[test]
    fn missing_callback_rejected() {
        let node = test_node();
        node.register_segment(0, 4, Flavor::Ram, Some(0), None)
            .unwrap();
        assert_eq!(
            node.register_ownership(0, 4, None, 0),
            Err(DvarError::MissingCallback)
        );
        assert_eq!(node.used_owners(), 0);
    }

    #[test]
    fn broadcast_tick_counts_down_per_record() {
        // 10 ms ticks
        let node = test_node();
        node.register_segment(0, 4, Flavor::Ram, Some(0), None)
            .unwrap();
        node.register_ownership(0, 2, Some(SetPointCallback::AcceptAny), 20)
            .unwrap();
        node.register_ownership(2, 1, Some(SetPointCallback::AcceptAny), 30)
            .unwrap();

        let mut per_tick = std::vec::Vec::new();
        for _ in 0..6 {
            let before = sent(&node).len();
            node.broadcast_tick().unwrap();
            per_tick.push(sent(&node).len() - before);
        }

        // Record A (2 ids) fires on ticks 2, 4, 6; record B (1 id) on ticks 3, 6
        assert_eq!(per_tick, [0, 2, 1, 2, 0, 3]);
        assert!(!sent(&node).iter().any(|m| m.id() == 3));
    }

    #[test]
    fn received_broadcast_updates_unowned_shadow() {
        let node = owned_ram_node();
        node.receive(Broadcast { id: 1007, value: 99 }).unwrap();
        assert_eq!(node.value(1007), Ok(99));
    }

    #[test]
    fn received_broadcast_of_owned_variable_ignored() {
        let node = owned_ram_node();
        node.set_point_local(1001, 5).unwrap();
        node.receive(Broadcast { id: 1001, value: 99 }).unwrap();
        assert_eq!(node.value(1001), Ok(5));
    }

    #[test]
    fn received_set_point_request_goes_through_callback() {
        let node = test_node();
        node.register_segment(0, 2, Flavor::Ram, Some(0), None)
            .unwrap();
        node.register_ownership(0, 1, Some(SetPointCallback::Custom(clamp_to_100)), 0)
            .unwrap();

        node.receive(SetPointRequest { id: 0, value: 250 }).unwrap();
        assert_eq!(node.value(0), Ok(100));

        // Unchanged results are still answered
        node.receive(SetPointRequest { id: 0, value: 100 }).unwrap();
        assert_eq!(
            sent(&node),
            [
                Broadcast { id: 0, value: 100 },
                Broadcast { id: 0, value: 100 }
            ]
        );

        // Requests for variables owned elsewhere are not ours to answer
        node.receive(SetPointRequest { id: 1, value: 1 }).unwrap();
        node.receive(RequestBroadcast { id: 1 }).unwrap();
        assert_eq!(node.value(1), Ok(0));
        assert_eq!(sent(&node).len(), 2);
    }

    #[test]
    fn received_broadcast_request_answered_by_owner() {
        let node = owned_ram_node();
        node.set_point_local(1003, 12).unwrap();
        node.receive(RequestBroadcast { id: 1003 }).unwrap();
        assert_eq!(sent(&node)[1], Broadcast { id: 1003, value: 12 });
    }

    #[test]
    fn logging_hook_replaces_previous() {
        use core::sync::atomic::{AtomicU32, Ordering};

        static FIRST: AtomicU32 = AtomicU32::new(0);
        static SECOND: AtomicU32 = AtomicU32::new(0);

        fn first(_id: DistVarId, value: DistVarType) {
            FIRST.store(value, Ordering::SeqCst);
        }
        fn second(_id: DistVarId, value: DistVarType) {
            SECOND.store(value, Ordering::SeqCst);
        }

        let node = test_node();
        assert!(node.register_logging_function(Some(first)).is_none());
        node.receive(Broadcast { id: 77, value: 1 }).unwrap();

        assert_eq!(FIRST.load(Ordering::SeqCst), 1);

        let previous = node.register_logging_function(Some(second)).unwrap();
        node.receive(Broadcast { id: 77, value: 2 }).unwrap();
        assert_eq!(SECOND.load(Ordering::SeqCst), 2);
        assert_eq!(FIRST.load(Ordering::SeqCst), 1);

        // The returned hook is the one that was replaced
        previous(77, 3);
        assert_eq!(FIRST.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn broadcast_signals_only_matching_waiter_slots() {
        let node = test_node();
        let (a, b, c) = node.locked(|s| {
            (
                s.add_waiter(5).unwrap(),
                s.add_waiter(6).unwrap(),
                s.add_waiter(6).unwrap(),
            )
        });
        node.rtos.take_signals();

        node.receive(Broadcast { id: 6, value: 9 }).unwrap();

        assert_eq!(
            node.rtos.take_signals(),
            (1 << b.slot()) | (1 << c.slot())
        );
        node.locked(|s| {
            assert_eq!(s.take_ack(a), None);
            assert_eq!(s.take_ack(b), Some(9));
            assert_eq!(s.take_ack(c), Some(9));
            assert_eq!(s.pending_waiters(), 1);
        });

        // Freed slots are reused
        let d = node.locked(|s| s.add_waiter(7).unwrap());
        assert_ne!(d, a);
        assert_eq!(node.locked(|s| s.cancel_waiter(a)), None);
        assert_eq!(node.locked(|s| s.pending_waiters()), 1);
    }

    #[test]
    fn shadowed_segment_loads_from_eeprom() {
        let node = test_node();
        node.locked(|s| s.storage.eeprom.set_word(8, 0xABCD));

        node.register_segment(10, 4, Flavor::ShadowedEeprom, Some(0), Some(0))
            .unwrap();
        assert_eq!(node.value(12), Ok(0xABCD));
    }

    #[test]
    fn failed_shadow_load_leaves_nothing_registered() {
        let node = test_node();
        node.locked(|s| s.storage.eeprom.fail_next());

        assert_eq!(
            node.register_segment(10, 4, Flavor::ShadowedEeprom, Some(0), Some(0)),
            Err(DvarError::InvalidEepromOffset)
        );
        assert_eq!(node.used_segments(), 0);
    }

    #[test]
    fn shadowed_broadcast_reads_ram_mirror() {
        let node = test_node();
        node.locked(|s| s.storage.eeprom.set_word(4, 21));
        node.register_segment(40, 2, Flavor::ShadowedEeprom, Some(0), Some(0))
            .unwrap();
        node.register_ownership(40, 2, Some(SetPointCallback::AcceptAny), 10)
            .unwrap();
        node.set_point_local(40, 8).unwrap();

        let device_ops = || node.locked(|s| (s.storage.eeprom.reads, s.storage.eeprom.writes));
        let before = device_ops();

        node.broadcast_tick().unwrap();

        assert_eq!(device_ops(), before);
        assert_eq!(
            sent(&node)[1..],
            [Broadcast { id: 40, value: 8 }, Broadcast { id: 41, value: 21 }]
        );
    }

    #[test]
    fn deferred_persistence_flushed_by_tick() {
        let node = test_node_with(DvarConfig {
            persist_mode: PersistMode::Deferred,
            ..DvarConfig::default()
        });
        node.register_segment(0, 4, Flavor::ShadowedEeprom, Some(0), Some(16))
            .unwrap();
        node.register_ownership(0, 4, Some(SetPointCallback::AcceptAny), 0)
            .unwrap();

        node.set_point_local(2, 31).unwrap();
        assert_eq!(node.locked(|s| s.storage.eeprom.word(24)), 0);

        node.broadcast_tick().unwrap();
        assert_eq!(node.locked(|s| s.storage.eeprom.word(24)), 31);
        assert_eq!(node.persist_pending(), Ok(0));
    }

    #[test]
    fn raw_flavor_codes_checked_before_registration() {
        let node = test_node();
        let register = |code: u8| {
            Flavor::try_from(code)
                .and_then(|flavor| node.register_segment(0, 4, flavor, Some(0), Some(0)))
        };

        assert_eq!(register(7), Err(DvarError::InvalidFlavor));
        assert_eq!(node.used_segments(), 0);
        assert_eq!(register(1), Ok(()));
        assert_eq!(node.seek_local_variable(0).unwrap().flavor, Flavor::ShadowedEeprom);
    }

    #[test]
    fn restricted_id_space() {
        let node = test_node_with(DvarConfig {
            max_id: 0x0FFF,
            ..DvarConfig::default()
        });
        assert_eq!(
            node.register_segment(0x0FF0, 0x20, Flavor::Ram, Some(0), None),
            Err(DvarError::InvalidAddressRange)
        );
        assert_eq!(
            node.set_point_local(0x1000, 1),
            Err(DvarError::InvalidAddressRange)
        );
    }
}
