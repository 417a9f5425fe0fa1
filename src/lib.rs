//! A `no_std`, no-alloc distributed variable (DVAR) engine for embedded nodes
//! sharing a broadcast bus.
//!
//! Every node on the bus sees the same flat space of 32-bit variable IDs, each
//! holding a 32-bit value. A variable has at most one owning node, which is the
//! only writer of its true value; every other node that cares about it keeps a
//! read-only shadow that is refreshed by the owner's broadcasts.
//!
//! # Features
//!
//! - **Zero heap allocation** - Segment and ownership pools are fixed-capacity
//! - **Tiered storage** - RAM, EEPROM, or RAM-shadowed EEPROM per segment
//! - **Owner callbacks** - Validate or coerce incoming set-point requests
//! - **Periodic broadcast** - Round-robin auto-broadcast of owned variables
//! - **Acknowledged requests** - Block a task until the owner answers, with retry
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────┐  set-point request   ┌───────────────────┐
//! │   Node A          │─────────────────────▶│   Node B (owner)  │
//! │   (shadow copy)   │                      │                   │
//! │                   │◀─────────────────────│  callback(old,new)│
//! │  receive()        │      broadcast       │  broadcast_tick() │
//! └───────────────────┘                      └───────────────────┘
//! ```
//!
//! - **Registration** happens once at start-up, before the scheduler runs
//! - **Local set-points** write an owned variable and broadcast on change
//! - **Remote set-points** ask the owner to change a value; the local shadow
//!   only changes once the owner's broadcast comes back
//! - **The bus daemon** feeds every received message to [`DvarNode::receive`]
//!
//! # Example
//!
//! ```rust,ignore
//! use embedded_dvar::prelude::*;
//!
//! let node: DvarNode<_, _, _, 8, 8, 64> = DvarNodeBuilder::new()
//!     .tick_period_ms(10)
//!     .transport(can_tx)
//!     .no_eeprom()
//!     .rtos(rtos)
//!     .build();
//!
//! node.register_segment(1000, 10, Flavor::Ram, Some(0), None)?;
//! node.register_ownership(1000, 5, Some(SetPointCallback::AcceptAny), 100)?;
//!
//! node.set_point_local(1002, 7)?;
//! ```

#![deny(unsafe_code)]
#![no_std]

#[cfg(test)]
extern crate std;

pub mod dvar;

pub use dvar::DvarNode;

pub mod prelude {
    pub use crate::dvar::prelude::*;
}
