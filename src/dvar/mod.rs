pub mod builder;
pub mod callback;
pub mod config;
pub mod error;
pub mod helpers;
pub mod node;
pub mod persist;
pub(crate) mod registry;
mod remote;
pub mod rtos;
pub mod search;
pub(crate) mod storage;
pub(crate) mod table;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use builder::DvarNodeBuilder;
pub use callback::SetPointCallback;
pub use config::DvarConfig;
pub use error::DvarError;
pub use node::{ACK_WAITERS, DvarNode};
pub use persist::{EepromDevice, EepromError, NoEeprom, PersistMode};
pub use rtos::Rtos;
pub use search::Variables;
pub use transport::{BusError, Transport};
pub use types::{
    DistVarId, DistVarType, DvarMessage, EepromOffset, Flavor, RamOffset, SearchContext,
    UpdateHook,
};

pub mod prelude {
    pub use super::{
        BusError, DistVarId, DistVarType, DvarConfig, DvarError, DvarMessage, DvarNode,
        DvarNodeBuilder, EepromDevice, EepromError, EepromOffset, Flavor, NoEeprom, PersistMode,
        RamOffset, Rtos, SearchContext, SetPointCallback, Transport, UpdateHook,
    };
}
