use crate::dvar::{
    DvarError, DvarNode,
    node::{AckRequest, AckStart, AckTicket},
    persist::EepromDevice,
    rtos::Rtos,
    transport::Transport,
    types::{DistVarId, DistVarType, DvarMessage},
};

impl<T, E, R, const SC: usize, const OC: usize, const RW: usize> DvarNode<T, E, R, SC, OC, RW>
where
    T: Transport,
    E: EepromDevice,
    R: Rtos,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    /// Asks the owner of `id` to change its value. Does not wait.
    ///
    /// The local shadow is not touched; it changes when the owner's
    /// broadcast arrives. A request for a locally owned variable is handled
    /// in place, exactly as if it had come from the bus.
    pub fn set_point_remote(&self, id: DistVarId, value: DistVarType) -> Result<(), DvarError> {
        self.locked(|s| {
            s.check_id(id)?;
            if s.is_owned(id) {
                return s.process_set_point_request(id, value).map(|_| ());
            }
            s.send_request(DvarMessage::SetPointRequest { id, value })
        })
    }

    /// Asks the owner of `id` to change its value and waits for a broadcast
    /// of `id`.
    ///
    /// Any broadcast of `id` acknowledges the request, whatever value it
    /// carries and whether or not `id` is registered locally. This confirms
    /// that the owner is alive and answered, not that the value was
    /// accepted; read the variable afterwards to see what it became.
    ///
    /// # Errors
    /// * [`DvarError::RtosNotStarted`] - called before the scheduler runs
    /// * [`DvarError::Timeout`] - no broadcast of `id` within `timeout_ms`
    /// * [`DvarError::NotEnoughResources`] - ACK table or bus queue full
    /// * [`DvarError::TrafficSuppressed`] - requests are suppressed
    pub fn set_point_remote_ack(
        &self,
        id: DistVarId,
        value: DistVarType,
        timeout_ms: u16,
    ) -> Result<(), DvarError> {
        self.request_with_ack(id, AckRequest::SetPoint(value), timeout_ms)
            .map(|_| ())
    }

    /// Like [`Self::set_point_remote_ack`], re-sending the request up to
    /// `max_attempts` times, waiting `retry_period_ms` for each.
    ///
    /// Only timeouts are retried; any other error is returned at once.
    pub fn set_point_remote_ack_retry(
        &self,
        id: DistVarId,
        value: DistVarType,
        retry_period_ms: u16,
        max_attempts: u8,
    ) -> Result<(), DvarError> {
        for attempt in 1..=max_attempts {
            match self.set_point_remote_ack(id, value, retry_period_ms) {
                Err(DvarError::Timeout) => {
                    log::debug!("set-point of {id} unanswered, attempt {attempt}/{max_attempts}");
                }
                other => return other,
            }
        }
        Err(DvarError::Timeout)
    }

    /// Asks the owner of `id` to broadcast it and returns the broadcast value.
    ///
    /// A locally owned variable is broadcast and returned without waiting.
    pub fn request_broadcast_ack(
        &self,
        id: DistVarId,
        timeout_ms: u16,
    ) -> Result<DistVarType, DvarError> {
        self.request_with_ack(id, AckRequest::Broadcast, timeout_ms)
    }

    fn request_with_ack(
        &self,
        id: DistVarId,
        request: AckRequest,
        timeout_ms: u16,
    ) -> Result<DistVarType, DvarError> {
        if !self.rtos.is_running() {
            return Err(DvarError::RtosNotStarted);
        }

        match self.locked(|s| s.start_ack(id, request))? {
            AckStart::Done(value) => Ok(value),
            AckStart::Wait(ticket) => self.await_ack(id, ticket, u32::from(timeout_ms)),
        }
    }

    /// Blocks until the waiter is released or the timeout expires.
    ///
    /// The registry lock is only held while checking the waiter, never
    /// while blocked.
    fn await_ack(
        &self,
        id: DistVarId,
        ticket: AckTicket,
        timeout_ms: u32,
    ) -> Result<DistVarType, DvarError> {
        let start = self.rtos.now_ms();
        loop {
            if let Some(value) = self.locked(|s| s.take_ack(ticket)) {
                return Ok(value);
            }

            let elapsed = self.rtos.now_ms().wrapping_sub(start);
            if elapsed >= timeout_ms {
                // A release may have landed after the last check
                return match self.locked(|s| s.cancel_waiter(ticket)) {
                    Some(value) => Ok(value),
                    None => {
                        log::debug!("no broadcast of {id} within {timeout_ms} ms");
                        Err(DvarError::Timeout)
                    }
                };
            }

            self.rtos.wait_event(ticket.slot(), timeout_ms - elapsed);
        }
    }
}
