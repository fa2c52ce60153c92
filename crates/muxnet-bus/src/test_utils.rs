//! Simulated hardware for testing without a physical bus
//!
//! [`SimulatedWire`] implements [`Wire`] over an in-memory model of one
//! physical bus: multiplexers in module slots, register-addressed devices
//! behind them, and "foreign" devices wired straight to the bus. Tests keep
//! a [`SimHandle`] to the same state to arrange faults and inspect traffic
//! after the wire has been moved into a [`Fabric`].
//!
//! # Example
//!
//! ```rust
//! use muxnet_bus::test_utils::{SimDevice, TestFixture};
//! use muxnet_bus::{ping, ErrorLevel};
//! use muxnet_core::Fqa;
//!
//! let mut fixture = TestFixture::new();
//! let sensor = Fqa::encode(0, 1, 3, 0x40);
//! fixture.sim.add_mux(1);
//! fixture.sim.add_device(sensor, SimDevice::with_memory(16));
//!
//! assert_eq!(ping(&mut fixture.fabric, sensor, true), ErrorLevel::None);
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use muxnet_core::{
    Clock, Fqa, MuxnetConfig, Wire, DEFAULT_BUFFER_SIZE, DEFAULT_MUX_BASE_ADDRESS,
};

use crate::fabric::Fabric;

/// Where a simulated device sits on its bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimAddress {
    /// Module slot, or `None` for a device wired straight to the bus
    pub module: Option<u8>,
    /// Sub-bus on the module (ignored for foreign devices)
    pub subbus: u8,
    /// 7-bit device address
    pub address: u8,
}

impl SimAddress {
    /// A device behind a multiplexer
    pub fn behind(module: u8, subbus: u8, address: u8) -> Self {
        Self {
            module: Some(module),
            subbus,
            address,
        }
    }

    /// A device outside every module
    pub fn foreign(address: u8) -> Self {
        Self {
            module: None,
            subbus: 0,
            address,
        }
    }
}

impl From<Fqa> for SimAddress {
    fn from(fqa: Fqa) -> Self {
        SimAddress::behind(fqa.module(), fqa.subbus(), fqa.address())
    }
}

/// A register-addressed memory device
#[derive(Debug, Clone)]
pub struct SimDevice {
    memory: Vec<u8>,
    register_width: usize,
    pointer: usize,
    busy: u32,
    write_cycle: u32,
    short_read: Option<usize>,
    data_writes: u32,
}

impl SimDevice {
    /// Device with 8-bit register addressing
    pub fn with_memory(size: usize) -> Self {
        Self {
            memory: vec![0; size],
            register_width: 1,
            pointer: 0,
            busy: 0,
            write_cycle: 0,
            short_read: None,
            data_writes: 0,
        }
    }

    /// Device with 16-bit register addressing
    pub fn with_memory_u16(size: usize) -> Self {
        Self {
            register_width: 2,
            ..Self::with_memory(size)
        }
    }

    /// Blank EEPROM: 16-bit addressing, erased to `0xFF`, busy after writes
    pub fn eeprom(capacity: usize, write_cycle: u32) -> Self {
        Self {
            memory: vec![0xFF; capacity],
            write_cycle,
            ..Self::with_memory_u16(capacity)
        }
    }

    /// Copy bytes into memory at `offset`
    pub fn load(&mut self, offset: usize, bytes: &[u8]) {
        for (index, byte) in bytes.iter().enumerate() {
            if let Some(cell) = self.memory.get_mut(offset + index) {
                *cell = *byte;
            }
        }
    }

    /// Builder-style [`SimDevice::load`]
    pub fn loaded(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.load(offset, bytes);
        self
    }

    fn end_transmission(&mut self, bytes: &[u8]) -> bool {
        if self.busy > 0 {
            self.busy -= 1;
            return false;
        }
        let width = self.register_width.min(bytes.len());
        if width > 0 {
            self.pointer = bytes[..width]
                .iter()
                .fold(0usize, |acc, byte| (acc << 8) | *byte as usize);
        }
        let data = &bytes[width..];
        if !data.is_empty() && !self.memory.is_empty() {
            for byte in data {
                let index = self.pointer % self.memory.len();
                self.memory[index] = *byte;
                self.pointer = index + 1;
            }
            self.data_writes += 1;
            self.busy = self.write_cycle;
        }
        true
    }

    fn request(&mut self, count: usize, rx: &mut VecDeque<u8>) -> usize {
        if self.busy > 0 {
            self.busy -= 1;
            return 0;
        }
        if self.memory.is_empty() {
            return 0;
        }
        let count = self.short_read.map_or(count, |limit| count.min(limit));
        for _ in 0..count {
            let index = self.pointer % self.memory.len();
            rx.push_back(self.memory[index]);
            self.pointer = index + 1;
        }
        count
    }
}

/// One observable step of bus traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A write transaction was opened
    Begin(u8),
    /// A write transaction was closed
    End {
        /// Target address
        address: u8,
        /// Bytes accepted during the transaction
        bytes: Vec<u8>,
        /// Whether the target acknowledged
        ack: bool,
    },
    /// A read was requested
    Request {
        /// Target address
        address: u8,
        /// Bytes requested
        count: usize,
        /// Bytes delivered
        received: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct SimMux {
    present: bool,
    selection: u8,
}

#[derive(Debug)]
struct SimState {
    mux_base_address: u8,
    buffer_size: usize,
    muxes: BTreeMap<u8, SimMux>,
    devices: HashMap<SimAddress, SimDevice>,
    pending: Option<(u8, Vec<u8>)>,
    rx: VecDeque<u8>,
    events: Vec<SimEvent>,
    begin_count: usize,
    short_write: bool,
}

enum Target {
    Mux(u8),
    Device(SimAddress),
    Nobody,
}

impl SimState {
    fn new(buffer_size: usize, mux_base_address: u8) -> Self {
        Self {
            mux_base_address,
            buffer_size,
            muxes: BTreeMap::new(),
            devices: HashMap::new(),
            pending: None,
            rx: VecDeque::new(),
            events: Vec::new(),
            begin_count: 0,
            short_write: false,
        }
    }

    /// Resolve an address the way the electrical bus would
    fn resolve(&self, address: u8) -> Target {
        if let Some(module) = address.checked_sub(self.mux_base_address) {
            if self.muxes.get(&module).is_some_and(|mux| mux.present) {
                return Target::Mux(module);
            }
        }
        let foreign = SimAddress::foreign(address);
        if self.devices.contains_key(&foreign) {
            return Target::Device(foreign);
        }
        for (module, mux) in &self.muxes {
            if !mux.present {
                continue;
            }
            for subbus in 0..8u8 {
                if mux.selection & (1 << subbus) == 0 {
                    continue;
                }
                let key = SimAddress::behind(*module, subbus, address);
                if self.devices.contains_key(&key) {
                    return Target::Device(key);
                }
            }
        }
        Target::Nobody
    }
}

/// Shared handle onto a [`SimulatedWire`]'s state
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Place a multiplexer in a module slot
    pub fn add_mux(&self, module: u8) {
        self.state.lock().muxes.insert(
            module,
            SimMux {
                present: true,
                selection: 0,
            },
        );
    }

    /// Connect or disconnect a multiplexer (and everything behind it)
    pub fn set_mux_present(&self, module: u8, present: bool) {
        if let Some(mux) = self.state.lock().muxes.get_mut(&module) {
            mux.present = present;
        }
    }

    /// Current select register of a multiplexer
    pub fn mux_selection(&self, module: u8) -> Option<u8> {
        self.state.lock().muxes.get(&module).map(|mux| mux.selection)
    }

    /// Attach a device
    pub fn add_device(&self, at: impl Into<SimAddress>, device: SimDevice) {
        self.state.lock().devices.insert(at.into(), device);
    }

    /// Detach a device, returning it
    pub fn remove_device(&self, at: impl Into<SimAddress>) -> Option<SimDevice> {
        self.state.lock().devices.remove(&at.into())
    }

    /// Make a device NACK its next `transactions` transactions
    pub fn set_busy(&self, at: impl Into<SimAddress>, transactions: u32) {
        if let Some(device) = self.state.lock().devices.get_mut(&at.into()) {
            device.busy = transactions;
        }
    }

    /// Cap the bytes a device delivers per read request
    pub fn set_short_read(&self, at: impl Into<SimAddress>, limit: Option<usize>) {
        if let Some(device) = self.state.lock().devices.get_mut(&at.into()) {
            device.short_read = limit;
        }
    }

    /// Make the wire accept no bytes on `write`
    pub fn set_short_write(&self, enabled: bool) {
        self.state.lock().short_write = enabled;
    }

    /// Overwrite part of a device's memory
    pub fn load_memory(&self, at: impl Into<SimAddress>, offset: usize, bytes: &[u8]) {
        if let Some(device) = self.state.lock().devices.get_mut(&at.into()) {
            device.load(offset, bytes);
        }
    }

    /// Snapshot of a device's memory
    pub fn memory(&self, at: impl Into<SimAddress>) -> Option<Vec<u8>> {
        self.state
            .lock()
            .devices
            .get(&at.into())
            .map(|device| device.memory.clone())
    }

    /// Number of data-carrying write transactions a device has accepted
    pub fn data_writes(&self, at: impl Into<SimAddress>) -> u32 {
        self.state
            .lock()
            .devices
            .get(&at.into())
            .map_or(0, |device| device.data_writes)
    }

    /// How many times `Wire::begin` ran
    pub fn begin_count(&self) -> usize {
        self.state.lock().begin_count
    }

    /// Recorded traffic
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    /// Forget recorded traffic
    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Whether any transaction reached an address
    pub fn touched(&self, address: u8) -> bool {
        self.state.lock().events.iter().any(|event| match event {
            SimEvent::Begin(target) => *target == address,
            SimEvent::End { address: target, .. } => *target == address,
            SimEvent::Request { address: target, .. } => *target == address,
        })
    }
}

/// In-memory [`Wire`] implementation
#[derive(Debug)]
pub struct SimulatedWire {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedWire {
    /// Empty bus with default sizing
    pub fn new() -> Self {
        Self::with_layout(DEFAULT_BUFFER_SIZE, DEFAULT_MUX_BASE_ADDRESS)
    }

    /// Empty bus with a specific transport buffer
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self::with_layout(buffer_size, DEFAULT_MUX_BASE_ADDRESS)
    }

    /// Empty bus with explicit buffer size and multiplexer base address
    pub fn with_layout(buffer_size: usize, mux_base_address: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(buffer_size, mux_base_address))),
        }
    }

    /// Handle for arranging and inspecting this bus
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimulatedWire {
    fn default() -> Self {
        Self::new()
    }
}

impl Wire for SimulatedWire {
    fn begin(&mut self) {
        self.state.lock().begin_count += 1;
    }

    fn begin_transmission(&mut self, address: u8) {
        let mut state = self.state.lock();
        state.events.push(SimEvent::Begin(address));
        state.pending = Some((address, Vec::new()));
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let mut state = self.state.lock();
        if state.short_write {
            return 0;
        }
        let room = state.buffer_size;
        match state.pending.as_mut() {
            Some((_, queued)) => {
                let accepted = bytes.len().min(room.saturating_sub(queued.len()));
                queued.extend_from_slice(&bytes[..accepted]);
                accepted
            }
            None => 0,
        }
    }

    fn end_transmission(&mut self, _stop: bool) -> bool {
        let mut state = self.state.lock();
        let Some((address, bytes)) = state.pending.take() else {
            return false;
        };
        let ack = match state.resolve(address) {
            Target::Mux(module) => {
                if let (Some(selection), Some(mux)) = (bytes.last(), state.muxes.get_mut(&module)) {
                    mux.selection = *selection;
                }
                true
            }
            Target::Device(key) => state
                .devices
                .get_mut(&key)
                .is_some_and(|device| device.end_transmission(&bytes)),
            Target::Nobody => false,
        };
        state.events.push(SimEvent::End {
            address,
            bytes,
            ack,
        });
        ack
    }

    fn request_from(&mut self, address: u8, count: usize, _stop: bool) -> usize {
        let mut state = self.state.lock();
        let count = count.min(state.buffer_size);
        let mut rx = VecDeque::new();
        let received = match state.resolve(address) {
            Target::Mux(module) => match state.muxes.get(&module) {
                Some(mux) if count > 0 => {
                    rx.push_back(mux.selection);
                    1
                }
                _ => 0,
            },
            Target::Device(key) => state
                .devices
                .get_mut(&key)
                .map_or(0, |device| device.request(count, &mut rx)),
            Target::Nobody => 0,
        };
        state.rx = rx;
        state.events.push(SimEvent::Request {
            address,
            count,
            received,
        });
        received
    }

    fn read(&mut self) -> Option<u8> {
        self.state.lock().rx.pop_front()
    }

    fn buffer_size(&self) -> usize {
        self.state.lock().buffer_size
    }

    fn name(&self) -> &str {
        "SimulatedWire"
    }
}

/// Manually advanced [`Clock`]; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Arc<Mutex<Duration>>,
}

impl SimClock {
    /// Clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without a delay call
    pub fn advance(&self, duration: Duration) {
        *self.now.lock() += duration;
    }

    /// Current simulated time
    pub fn now(&self) -> Duration {
        *self.now.lock()
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        SimClock::now(self)
    }

    fn delay(&mut self, duration: Duration) {
        self.advance(duration);
    }
}

// ============================================================================
// Topology descriptions
// ============================================================================

/// Serializable description of simulated hardware, one entry per wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimTopology {
    /// Buses in index order
    #[serde(default)]
    pub wires: Vec<SimBusSpec>,
}

/// One simulated bus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimBusSpec {
    /// Populated module slots
    #[serde(default)]
    pub modules: Vec<SimModuleSpec>,
    /// Devices wired straight to the bus
    #[serde(default)]
    pub foreign: Vec<SimDeviceSpec>,
}

/// One populated module slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimModuleSpec {
    /// Module slot index
    pub slot: u8,
    /// Device-list record stored in the module EEPROM; `None` leaves it blank
    #[serde(default)]
    pub record: Option<String>,
    /// Whether the module carries a configuration EEPROM at all
    #[serde(default = "default_true")]
    pub eeprom: bool,
    /// Other devices behind the multiplexer
    #[serde(default)]
    pub devices: Vec<SimDeviceSpec>,
}

/// One simulated device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimDeviceSpec {
    /// Sub-bus (ignored for foreign devices)
    #[serde(default)]
    pub subbus: u8,
    /// 7-bit address
    pub address: u8,
    /// Memory size in bytes
    #[serde(default = "default_memory")]
    pub memory: usize,
    /// Initial memory contents from offset 0
    #[serde(default)]
    pub contents: Vec<u8>,
}

fn default_true() -> bool {
    true
}

fn default_memory() -> usize {
    16
}

impl SimDeviceSpec {
    fn build(&self) -> SimDevice {
        SimDevice::with_memory(self.memory).loaded(0, &self.contents)
    }
}

impl SimTopology {
    /// Build one wire per bus, populated per the description
    pub fn build(&self, config: &MuxnetConfig) -> Vec<(SimulatedWire, SimHandle)> {
        self.wires
            .iter()
            .map(|bus| {
                let wire =
                    SimulatedWire::with_layout(config.bus.buffer_size, config.bus.mux_base_address);
                let sim = wire.handle();
                for module in &bus.modules {
                    sim.add_mux(module.slot);
                    if module.eeprom {
                        add_eeprom(&sim, config, module.slot, module.record.as_deref());
                    }
                    for device in &module.devices {
                        sim.add_device(
                            SimAddress::behind(module.slot, device.subbus, device.address),
                            device.build(),
                        );
                    }
                }
                for device in &bus.foreign {
                    sim.add_device(SimAddress::foreign(device.address), device.build());
                }
                (wire, sim)
            })
            .collect()
    }
}

/// Attach a module EEPROM holding `record` (null-terminated), or blank
fn add_eeprom(sim: &SimHandle, config: &MuxnetConfig, module: u8, record: Option<&str>) -> Fqa {
    let fqa = config.eeprom_fqa(0, module);
    let mut device = SimDevice::eeprom(config.eeprom.capacity, 2);
    if let Some(record) = record {
        device.load(0, record.as_bytes());
        device.load(record.len(), &[0]);
    }
    sim.add_device(fqa, device);
    fqa
}

// ============================================================================
// Fixture
// ============================================================================

/// Test fixture: a one-wire fabric over a simulated bus
pub struct TestFixture {
    /// Fabric under test (bus 0 is the simulated wire)
    pub fabric: Fabric,
    /// Handle onto the simulated bus
    pub sim: SimHandle,
    /// Shared simulated clock
    pub clock: SimClock,
    /// Configuration the fabric was built from
    pub config: MuxnetConfig,
}

impl TestFixture {
    /// Fixture with the default configuration
    pub fn new() -> Self {
        Self::with_config(MuxnetConfig::default())
    }

    /// Fixture with a smaller transport buffer
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let mut config = MuxnetConfig::default();
        config.bus.buffer_size = buffer_size;
        Self::with_config(config)
    }

    /// Fixture with an explicit configuration
    pub fn with_config(config: MuxnetConfig) -> Self {
        let wire = SimulatedWire::with_layout(config.bus.buffer_size, config.bus.mux_base_address);
        let sim = wire.handle();
        let clock = SimClock::new();
        let fabric = Fabric::new(&config, Box::new(clock.clone())).with_wire(Box::new(wire));
        Self {
            fabric,
            sim,
            clock,
            config,
        }
    }

    /// Populate a module slot with a multiplexer and its configuration EEPROM
    ///
    /// Returns the EEPROM's address.
    pub fn add_module(&mut self, module: u8, record: Option<&str>) -> Fqa {
        self.sim.add_mux(module);
        add_eeprom(&self.sim, &self.config, module, record)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
