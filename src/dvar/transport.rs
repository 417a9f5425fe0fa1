use crate::dvar::types::DvarMessage;

/// Error reported by the bus transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// No frame buffer or queue slot available.
    Full,
    /// Bus is off or otherwise unable to transmit.
    Offline,
}

/// Outgoing side of the bus.
///
/// Framing, priority and queueing belong to the implementation; the node
/// only hands over logical messages. `send` must not block.
pub trait Transport {
    /// Queues `msg` for transmission.
    ///
    /// Runs under the registry lock and must not re-enter the node. A
    /// loopback transport queues the message and delivers it to
    /// [`DvarNode::receive`](crate::dvar::DvarNode::receive) later, outside
    /// `send`.
    fn send(&mut self, msg: DvarMessage) -> Result<(), BusError>;
}
