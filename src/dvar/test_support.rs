//! Test support utilities - only compiled in test builds.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::{
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
    vec::Vec,
};

use crate::dvar::{
    ACK_WAITERS, DvarNode,
    config::DvarConfig,
    persist::{EepromDevice, EepromError},
    rtos::Rtos,
    transport::{BusError, Transport},
    types::{DistVarType, DvarMessage, EepromOffset},
};

/// Standard test node: 4 segments, 4 ownerships, 32 words of RAM
pub type TestNode = DvarNode<MockTransport, MockEeprom, SimRtos, 4, 4, 32>;

/// Transmitter that records every message it accepts
#[derive(Debug, Default)]
pub struct MockTransport {
    pub sent: Vec<DvarMessage>,
    /// Reject every send with `BusError::Full`
    pub full: bool,
}

impl Transport for MockTransport {
    fn send(&mut self, msg: DvarMessage) -> Result<(), BusError> {
        if self.full {
            return Err(BusError::Full);
        }
        self.sent.push(msg);
        Ok(())
    }
}

/// 256-byte little-endian EEPROM with injectable faults
pub struct MockEeprom {
    bytes: [u8; 256],
    busy: u32,
    fail: bool,
    pub reads: usize,
    pub writes: usize,
}

impl MockEeprom {
    pub fn new() -> Self {
        Self {
            bytes: [0; 256],
            busy: 0,
            fail: false,
            reads: 0,
            writes: 0,
        }
    }

    pub fn word(&self, offset: EepromOffset) -> DistVarType {
        let at = usize::from(offset);
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes[at..at + 4]);
        u32::from_le_bytes(buf)
    }

    pub fn set_word(&mut self, offset: EepromOffset, value: DistVarType) {
        let at = usize::from(offset);
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Report busy for the next `accesses` accesses
    pub fn busy_for(&mut self, accesses: u32) {
        self.busy = accesses;
    }

    /// Fail the next access with a device error
    pub fn fail_next(&mut self) {
        self.fail = true;
    }

    fn fault(&mut self, offset: EepromOffset) -> Result<(), EepromError> {
        if self.fail {
            self.fail = false;
            return Err(EepromError::Device);
        }
        if self.busy > 0 {
            self.busy -= 1;
            return Err(EepromError::Busy);
        }
        if usize::from(offset) + 4 > self.bytes.len() {
            return Err(EepromError::OutOfRange);
        }
        Ok(())
    }
}

impl EepromDevice for MockEeprom {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read_word(&mut self, offset: EepromOffset) -> Result<DistVarType, EepromError> {
        self.fault(offset)?;
        self.reads += 1;
        Ok(self.word(offset))
    }

    fn write_word(&mut self, offset: EepromOffset, value: DistVarType) -> Result<(), EepromError> {
        self.fault(offset)?;
        self.set_word(offset, value);
        self.writes += 1;
        Ok(())
    }
}

/// Single-threaded RTOS with a simulated clock.
///
/// Waiting never blocks; it advances the clock by the full timeout.
pub struct SimRtos {
    running: AtomicBool,
    clock: AtomicU32,
    /// One bit per slot signalled since the last `take_signals`
    signals: AtomicU32,
}

impl SimRtos {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            clock: AtomicU32::new(1_000),
            signals: AtomicU32::new(0),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn now(&self) -> u32 {
        self.clock.load(Ordering::SeqCst)
    }

    pub fn take_signals(&self) -> u32 {
        self.signals.swap(0, Ordering::SeqCst)
    }
}

impl Rtos for SimRtos {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn now_ms(&self) -> u32 {
        self.now()
    }

    fn wait_event(&self, _slot: usize, timeout_ms: u32) {
        self.clock.fetch_add(timeout_ms, Ordering::SeqCst);
    }

    fn signal_event(&self, slot: usize) {
        self.signals.fetch_or(1 << slot, Ordering::SeqCst);
    }
}

/// RTOS backed by std threads, for tests with a real second task.
///
/// Every slot is a binary semaphore: a wait blocks for the full timeout
/// unless that slot is signalled, and consumes the signal.
pub struct StdRtos {
    start: Instant,
    events: [(Mutex<bool>, Condvar); ACK_WAITERS],
}

impl StdRtos {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            events: core::array::from_fn(|_| (Mutex::new(false), Condvar::new())),
        }
    }
}

impl Rtos for StdRtos {
    fn is_running(&self) -> bool {
        true
    }

    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }

    fn wait_event(&self, slot: usize, timeout_ms: u32) {
        let (signalled, event) = &self.events[slot];
        let timeout = Duration::from_millis(u64::from(timeout_ms));
        let guard = signalled.lock().unwrap();
        let (mut guard, _) = event
            .wait_timeout_while(guard, timeout, |signalled| !*signalled)
            .unwrap();
        *guard = false;
    }

    fn signal_event(&self, slot: usize) {
        let (signalled, event) = &self.events[slot];
        *signalled.lock().unwrap() = true;
        event.notify_one();
    }
}

/// Helper to create a test node with default settings
pub fn test_node() -> TestNode {
    test_node_with(DvarConfig::default())
}

pub fn test_node_with(config: DvarConfig) -> TestNode {
    DvarNode::new(config, MockTransport::default(), MockEeprom::new(), SimRtos::new())
}

/// Messages the node has put on the bus so far
pub fn sent(node: &TestNode) -> Vec<DvarMessage> {
    node.locked(|s| s.transport.sent.clone())
}
