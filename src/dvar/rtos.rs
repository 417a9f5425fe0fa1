/// Scheduler services used by the acknowledged request paths.
///
/// The node uses [`ACK_WAITERS`](crate::dvar::ACK_WAITERS) independent
/// events, one per waiter slot; a task waiting for an acknowledgement only
/// ever blocks on the event of its own slot. Each event is a latching
/// binary signal, such as a binary semaphore or a task notification: a
/// `signal_event` that happens before `wait_event` must make the next wait
/// on that slot return immediately.
pub trait Rtos {
    /// Returns true once the scheduler runs and tasks may block.
    fn is_running(&self) -> bool;
    /// Monotonic millisecond clock; wrapping is allowed.
    fn now_ms(&self) -> u32;
    /// Blocks the calling task until the event of `slot` is signalled or
    /// `timeout_ms` elapses. Returning early is allowed; callers re-check
    /// their condition.
    fn wait_event(&self, slot: usize, timeout_ms: u32);
    /// Signals the event of `slot`.
    fn signal_event(&self, slot: usize);
}
