//! The set of physical buses a muxnet runs on
//!
//! A [`Fabric`] owns one [`Wire`] per bus index, the [`Clock`] used for
//! bounded polling, and the bus/timing configuration. Each wire is lazily
//! initialized (`Wire::begin`) the first time it is used.

use std::time::Duration;
use tracing::{debug, warn};

use muxnet_core::{BusConfig, Clock, MuxnetConfig, SystemClock, TimingConfig, Wire};

struct WireSlot {
    wire: Box<dyn Wire>,
    initialized: bool,
}

/// Owner of every wire and the shared clock
pub struct Fabric {
    wires: Vec<WireSlot>,
    clock: Box<dyn Clock>,
    bus: BusConfig,
    timing: TimingConfig,
}

impl Fabric {
    /// Create an empty fabric with an explicit clock
    pub fn new(config: &MuxnetConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            wires: Vec::new(),
            clock,
            bus: config.bus.clone(),
            timing: config.timing.clone(),
        }
    }

    /// Create an empty fabric driven by the host clock
    pub fn with_system_clock(config: &MuxnetConfig) -> Self {
        Self::new(config, Box::new(SystemClock::new()))
    }

    /// Attach the wire for the next bus index, returning that index
    pub fn attach(&mut self, wire: Box<dyn Wire>) -> u8 {
        let index = self.wires.len() as u8;
        debug!(bus = index, wire = wire.name(), "Attaching wire");
        self.wires.push(WireSlot {
            wire,
            initialized: false,
        });
        index
    }

    /// Builder-style [`Fabric::attach`]
    pub fn with_wire(mut self, wire: Box<dyn Wire>) -> Self {
        self.attach(wire);
        self
    }

    /// Number of attached wires
    pub fn wire_count(&self) -> u8 {
        self.wires.len() as u8
    }

    /// Whether the wire for `bus` has been initialized
    pub fn is_initialized(&self, bus: u8) -> bool {
        self.wires
            .get(bus as usize)
            .is_some_and(|slot| slot.initialized)
    }

    /// Borrow the wire for `bus`, running its one-time `begin` first
    pub fn wire(&mut self, bus: u8) -> Option<&mut (dyn Wire + 'static)> {
        let Some(slot) = self.wires.get_mut(bus as usize) else {
            warn!(bus, "No wire attached for bus");
            return None;
        };
        if !slot.initialized {
            debug!(bus, wire = slot.wire.name(), "Initializing wire");
            slot.wire.begin();
            slot.initialized = true;
        }
        Some(slot.wire.as_mut())
    }

    /// Largest single transfer on `bus`
    ///
    /// The smaller of the wire's own buffer and the configured size.
    pub fn buffer_size(&self, bus: u8) -> usize {
        self.wires
            .get(bus as usize)
            .map(|slot| slot.wire.buffer_size().min(self.bus.buffer_size))
            .unwrap_or(self.bus.buffer_size)
    }

    /// Address of the multiplexer serving a module slot
    pub fn mux_address(&self, module: u8) -> u8 {
        self.bus.mux_address(module)
    }

    /// Bus configuration
    pub fn bus_config(&self) -> &BusConfig {
        &self.bus
    }

    /// Timing configuration
    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Current time from the fabric clock
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Block on the fabric clock
    pub fn delay(&mut self, duration: Duration) {
        self.clock.delay(duration);
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("wires", &self.wires.len())
            .field("bus", &self.bus)
            .field("timing", &self.timing)
            .finish()
    }
}
