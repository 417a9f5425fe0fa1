use core::marker::PhantomData;

use bitmaps::{Bits, BitsImpl};

use crate::dvar::{
    DvarNode,
    config::DvarConfig,
    persist::{EepromDevice, NoEeprom, PersistMode},
    rtos::Rtos,
    transport::Transport,
    types::DistVarId,
};

// Builder states
pub struct NeedTransport;
pub struct NeedEeprom;
pub struct NeedRtos;
pub struct Ready;

/// Step-by-step construction of a [`DvarNode`].
///
/// Collaborators are supplied in a fixed order (transport, EEPROM, RTOS);
/// run-time settings can be changed at any step. Pool capacities are
/// chosen at [`build`](DvarNodeBuilder::build).
pub struct DvarNodeBuilder<T, E, R, State> {
    config: DvarConfig,
    transport: T,
    eeprom: E,
    rtos: R,
    _state: PhantomData<State>,
}

// Start the builder
impl DvarNodeBuilder<(), (), (), NeedTransport> {
    pub fn new() -> Self {
        DvarNodeBuilder {
            config: DvarConfig::default(),
            transport: (),
            eeprom: (),
            rtos: (),
            _state: PhantomData,
        }
    }
}

impl Default for DvarNodeBuilder<(), (), (), NeedTransport> {
    fn default() -> Self {
        Self::new()
    }
}

// Settings, available in every state
impl<T, E, R, State> DvarNodeBuilder<T, E, R, State> {
    /// Replace all run-time settings at once
    pub fn config(mut self, config: DvarConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tick_period_ms(mut self, tick_period_ms: u16) -> Self {
        self.config.tick_period_ms = tick_period_ms;
        self
    }

    pub fn max_id(mut self, max_id: DistVarId) -> Self {
        self.config.max_id = max_id;
        self
    }

    pub fn eeprom_retries(mut self, retries: u8) -> Self {
        self.config.eeprom_retries = retries;
        self
    }

    pub fn persist_mode(mut self, mode: PersistMode) -> Self {
        self.config.persist_mode = mode;
        self
    }
}

// Set transport
impl DvarNodeBuilder<(), (), (), NeedTransport> {
    pub fn transport<T: Transport>(self, transport: T) -> DvarNodeBuilder<T, (), (), NeedEeprom> {
        DvarNodeBuilder {
            config: self.config,
            transport,
            eeprom: (),
            rtos: (),
            _state: PhantomData,
        }
    }
}

// Set EEPROM
impl<T: Transport> DvarNodeBuilder<T, (), (), NeedEeprom> {
    pub fn eeprom<E: EepromDevice>(self, eeprom: E) -> DvarNodeBuilder<T, E, (), NeedRtos> {
        DvarNodeBuilder {
            config: self.config,
            transport: self.transport,
            eeprom,
            rtos: (),
            _state: PhantomData,
        }
    }

    /// Node without persistent storage; EEPROM-backed segments are rejected
    pub fn no_eeprom(self) -> DvarNodeBuilder<T, NoEeprom, (), NeedRtos> {
        self.eeprom(NoEeprom)
    }
}

// Set RTOS
impl<T: Transport, E: EepromDevice> DvarNodeBuilder<T, E, (), NeedRtos> {
    pub fn rtos<R: Rtos>(self, rtos: R) -> DvarNodeBuilder<T, E, R, Ready> {
        DvarNodeBuilder {
            config: self.config,
            transport: self.transport,
            eeprom: self.eeprom,
            rtos,
            _state: PhantomData,
        }
    }
}

// Build the final node
impl<T, E, R> DvarNodeBuilder<T, E, R, Ready>
where
    T: Transport,
    E: EepromDevice,
    R: Rtos,
{
    /// Build the node with `SC` segment records, `OC` ownership records and
    /// `RW` words of RAM mirror.
    pub fn build<const SC: usize, const OC: usize, const RW: usize>(
        self,
    ) -> DvarNode<T, E, R, SC, OC, RW>
    where
        BitsImpl<RW>: Bits,
    {
        DvarNode::new(self.config, self.transport, self.eeprom, self.rtos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvar::{
        DvarError, Flavor,
        test_support::{MockEeprom, MockTransport, SimRtos},
    };

    #[test]
    fn test_simple_builder() {
        let node: DvarNode<_, _, _, 2, 2, 8> = DvarNodeBuilder::new()
            .transport(MockTransport::default())
            .no_eeprom()
            .rtos(SimRtos::new())
            .build();

        assert!(node.register_segment(0, 8, Flavor::Ram, Some(0), None).is_ok());
        assert_eq!(
            node.register_segment(8, 1, Flavor::Eeprom, None, Some(0)),
            Err(DvarError::InvalidEepromOffset)
        );
    }

    #[test]
    fn test_builder_settings_any_order() {
        let node = DvarNodeBuilder::new()
            .max_id(0xFF)
            .transport(MockTransport::default())
            .eeprom_retries(0)
            .eeprom(MockEeprom::new())
            .tick_period_ms(25)
            .persist_mode(PersistMode::Deferred)
            .rtos(SimRtos::new())
            .build::<2, 2, 8>();

        let config = node.locked(|s| s.config);
        assert_eq!(
            config,
            DvarConfig {
                tick_period_ms: 25,
                max_id: 0xFF,
                eeprom_retries: 0,
                persist_mode: PersistMode::Deferred,
            }
        );
    }

    #[test]
    fn test_builder_config_replaces_settings() {
        let node = DvarNodeBuilder::new()
            .tick_period_ms(1)
            .config(DvarConfig::default())
            .transport(MockTransport::default())
            .no_eeprom()
            .rtos(SimRtos::new())
            .build::<1, 1, 1>();

        assert_eq!(node.locked(|s| s.config.tick_period_ms), 10);
    }
}
