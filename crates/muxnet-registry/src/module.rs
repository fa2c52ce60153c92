//! Modules: one multiplexer's worth of devices
//!
//! A [`Module`] owns every device behind one multiplexer, indexed by
//! address and grouped by identifier, and runs the self-check state
//! machine:
//!
//! ```text
//!   EepromUnregistered ──discovery ok──▶ Ready ◀──mux back──┐
//!           ▲  │                          │                 │
//!           └──┘ discovery failed         └──mux lost──▶ Unready
//! ```
//!
//! Discovery reads the device-list [`Record`] from the module EEPROM. A
//! read or parse failure on the first attempt overwrites the EEPROM with
//! the failsafe record and tries exactly once more.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use muxnet_bus::{mux, primitives, Fabric, Switch};
use muxnet_core::{ErrorLevel, Fqa, MuxnetConfig, MuxnetError, Result};

use crate::catalog::Catalog;
use crate::device::Device;
use crate::group::DeviceGroup;
use crate::index::{HashIndex, OrderedIndex};
use crate::record::Record;

/// Self-check state of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Discovery has not succeeded yet
    EepromUnregistered,
    /// Discovered and reachable
    Ready,
    /// Discovered, but the multiplexer stopped answering
    Unready,
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleState::EepromUnregistered => write!(f, "eeprom-unregistered"),
            ModuleState::Ready => write!(f, "ready"),
            ModuleState::Unready => write!(f, "unready"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Failsafe,
}

/// One multiplexer and the devices behind it
pub struct Module {
    bus: u8,
    index: u8,
    config: MuxnetConfig,
    catalog: Catalog,
    eeprom: Fqa,
    eeprom_added: bool,
    state: ModuleState,
    devices: OrderedIndex<Device>,
    groups: HashIndex<DeviceGroup>,
    foreign: BTreeSet<Fqa>,
}

impl Module {
    /// Module in slot `index` of `bus`
    pub fn new(bus: u8, index: u8, config: &MuxnetConfig, catalog: Catalog) -> Result<Self> {
        let eeprom = Fqa::try_new(bus, index, config.eeprom.subbus, config.eeprom.address)?;
        Ok(Self {
            bus,
            index,
            config: config.clone(),
            catalog,
            eeprom,
            eeprom_added: false,
            state: ModuleState::EepromUnregistered,
            devices: OrderedIndex::new(),
            groups: HashIndex::new(),
            foreign: BTreeSet::new(),
        })
    }

    /// Physical bus index
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// Module slot on the bus
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Current self-check state
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Address of the configuration EEPROM
    pub fn eeprom_fqa(&self) -> Fqa {
        self.eeprom
    }

    /// Whether the EEPROM has been registered as a device
    pub fn is_eeprom_registered(&self) -> bool {
        self.eeprom_added
    }

    /// Driver catalog used for new devices
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ===== Queries =====

    /// Device at an address
    pub fn device(&self, fqa: Fqa) -> Option<&Device> {
        self.devices.get(fqa)
    }

    /// Mutable device at an address
    pub fn device_mut(&mut self, fqa: Fqa) -> Option<&mut Device> {
        self.devices.get_mut(fqa)
    }

    /// Every device, in address order
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().map(|(_, device)| device)
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the module holds no devices
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Group for an identifier, created empty on first reference
    pub fn group(&mut self, identifier: &str) -> &mut DeviceGroup {
        let factory = self.catalog.factory(identifier);
        self.groups
            .get_or_insert_with(identifier, || DeviceGroup::new(identifier, factory))
            .0
    }

    /// Existing group for an identifier
    pub fn find_group(&self, identifier: &str) -> Option<&DeviceGroup> {
        self.groups.get(identifier)
    }

    /// Every group, in arbitrary order
    pub fn groups(&self) -> impl Iterator<Item = &DeviceGroup> {
        self.groups.iter().map(|(_, group)| group)
    }

    /// Device of a given kind at an address, created on a miss
    ///
    /// A new device is built by the group's factory and added through
    /// [`Module::add_device`]; if that fails nothing is kept.
    pub fn device_or_create(&mut self, identifier: &str, fqa: Fqa) -> Result<&mut Device> {
        if !self.devices.contains(fqa) {
            let factory = self.group(identifier).factory();
            let device = factory(identifier, fqa, &self.config);
            self.add_device(device)?;
        }
        let device = self
            .devices
            .get_mut(fqa)
            .ok_or(MuxnetError::NotFound(fqa))?;
        if device.identifier() != identifier {
            return Err(MuxnetError::IdentifierMismatch {
                fqa,
                expected: identifier.to_string(),
                found: device.identifier().to_string(),
            });
        }
        Ok(device)
    }

    // ===== Membership =====

    /// Permit a device outside this module's multiplexer
    pub fn allow_foreign(&mut self, fqa: Fqa) {
        self.foreign.insert(fqa);
    }

    /// Whether an address is a permitted foreign device
    pub fn is_foreign(&self, fqa: Fqa) -> bool {
        self.foreign.contains(&fqa)
    }

    fn owns(&self, fqa: Fqa) -> bool {
        (fqa.bus() == self.bus && fqa.module() == self.index) || self.foreign.contains(&fqa)
    }

    /// Add a device to the ordered index and its group
    ///
    /// Re-adding an address already held under the same identifier is a
    /// no-op. Every other failure (foreign address, identifier conflict,
    /// full group) leaves both indices exactly as they were.
    pub fn add_device(&mut self, device: Device) -> Result<()> {
        let fqa = device.fqa();
        if !self.owns(fqa) {
            return Err(MuxnetError::ForeignAddress {
                fqa,
                bus: self.bus,
                module: self.index,
            });
        }
        if let Some(existing) = self.devices.get(fqa) {
            if existing.identifier() == device.identifier() {
                return Ok(());
            }
            return Err(MuxnetError::IdentifierMismatch {
                fqa,
                expected: existing.identifier().to_string(),
                found: device.identifier().to_string(),
            });
        }

        let identifier = device.identifier().to_string();
        let factory = self.catalog.factory(&identifier);
        let created = self
            .groups
            .get_or_insert_with(&identifier, || DeviceGroup::new(identifier.as_str(), factory))
            .1;

        if let Err(e) = self.devices.insert(fqa, device) {
            self.drop_group_if_new(&identifier, created);
            return Err(e);
        }
        let joined = match self.groups.get_mut(&identifier) {
            Some(group) => group.insert(fqa),
            None => Err(MuxnetError::NotFound(fqa)),
        };
        if let Err(e) = joined {
            self.devices.remove(fqa);
            self.drop_group_if_new(&identifier, created);
            return Err(e);
        }

        if fqa == self.eeprom && identifier == self.config.eeprom.identifier {
            self.eeprom_added = true;
        }
        debug!(fqa = %fqa, identifier = %identifier, "Device added");
        Ok(())
    }

    fn drop_group_if_new(&mut self, identifier: &str, created: bool) {
        if created {
            self.groups.remove(identifier);
        }
    }

    /// Remove a device from both indices
    ///
    /// With `delete` the device is dropped; otherwise it is handed back.
    /// Removing the EEPROM returns the module to
    /// [`ModuleState::EepromUnregistered`].
    pub fn remove_device(&mut self, fqa: Fqa, delete: bool) -> Result<Option<Device>> {
        let device = self.devices.remove(fqa).ok_or(MuxnetError::NotFound(fqa))?;
        if let Some(group) = self.groups.get_mut(device.identifier()) {
            group.remove(fqa);
        }
        if fqa == self.eeprom && device.identifier() == self.config.eeprom.identifier {
            self.eeprom_added = false;
            self.state = ModuleState::EepromUnregistered;
        }
        debug!(fqa = %fqa, delete, "Device removed");
        Ok(if delete { None } else { Some(device) })
    }

    /// Verify that the ordered index and the groups agree
    ///
    /// Every device must be a member of its identifier's group, every
    /// group member must be a device with that identifier, and every
    /// address must belong to this module or be a permitted foreign one.
    pub fn check_consistency(&self) -> Result<()> {
        for (fqa, device) in self.devices.iter() {
            if !self.owns(fqa) {
                return Err(MuxnetError::ForeignAddress {
                    fqa,
                    bus: self.bus,
                    module: self.index,
                });
            }
            let member = self
                .groups
                .get(device.identifier())
                .is_some_and(|group| group.contains(fqa));
            if !member {
                return Err(MuxnetError::NotFound(fqa));
            }
        }
        for (identifier, group) in self.groups.iter() {
            for fqa in group.members() {
                let device = self.devices.get(*fqa).ok_or(MuxnetError::NotFound(*fqa))?;
                if device.identifier() != identifier {
                    return Err(MuxnetError::IdentifierMismatch {
                        fqa: *fqa,
                        expected: identifier.to_string(),
                        found: device.identifier().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    // ===== Self-check =====

    /// Run one step of the self-check state machine
    ///
    /// - **EepromUnregistered**: run discovery
    /// - **Ready**: ping the multiplexer, then timed-ping the EEPROM
    /// - **Unready**: retry the multiplexer, recovering to Ready if it answers
    pub fn check(&mut self, fabric: &mut Fabric) -> ErrorLevel {
        match self.state {
            ModuleState::EepromUnregistered => self.discover(fabric),
            ModuleState::Ready | ModuleState::Unready => self.probe(fabric),
        }
    }

    /// Multiplexer then EEPROM liveness, driving Ready ↔ Unready
    fn probe(&mut self, fabric: &mut Fabric) -> ErrorLevel {
        if !mux::ping(fabric, self.eeprom) {
            if self.state == ModuleState::Ready {
                warn!(bus = self.bus, module = self.index, "Module lost");
            }
            self.mark_unready();
            return ErrorLevel::Hard;
        }
        if self.state == ModuleState::Unready {
            info!(bus = self.bus, module = self.index, "Module recovered");
            self.mark_ready();
        }

        let level = primitives::ping_with_timeout(
            fabric,
            self.eeprom,
            Switch::BRACKETED,
            self.config.timing.ping_timeout,
        );
        if level == ErrorLevel::Hard && self.state != ModuleState::EepromUnregistered {
            self.mark_unready();
        }
        level
    }

    fn mark_unready(&mut self) {
        if self.state == ModuleState::Ready {
            self.state = ModuleState::Unready;
        }
        for (_, device) in self.devices.iter_mut() {
            device.set_ready(false);
        }
    }

    fn mark_ready(&mut self) {
        self.state = ModuleState::Ready;
        for (_, device) in self.devices.iter_mut() {
            device.set_ready(true);
        }
    }

    /// Check (and optionally update) one device
    ///
    /// Fails Hard without bus traffic unless the module is Ready, and Soft
    /// for an unknown address. Without `update` this is a timed ping; with
    /// it the sub-bus is switched once, then the device's output is written
    /// before its input is read. Foreign devices sit on the upstream bus,
    /// so no multiplexer is switched for them.
    ///
    /// The device stays ready only if it answered; a device still busy
    /// past the timeout is not ready until a later check succeeds.
    pub fn check_device(&mut self, fabric: &mut Fabric, fqa: Fqa, update: bool) -> ErrorLevel {
        if self.state != ModuleState::Ready {
            return ErrorLevel::Hard;
        }
        let timeout = self.config.timing.ping_timeout;
        let routed = self.foreign.contains(&fqa);
        let Some(device) = self.devices.get_mut(fqa) else {
            return ErrorLevel::Soft;
        };

        let level = if update {
            Self::update_device(fabric, device, timeout, routed)
        } else if routed {
            device.ping_with_timeout(fabric, Switch::ROUTED, timeout)
        } else {
            device.ping_with_timeout(fabric, Switch::BRACKETED, timeout)
        };
        device.set_ready(level.is_ok());

        if level == ErrorLevel::Hard && !mux::ping(fabric, self.eeprom) {
            warn!(bus = self.bus, module = self.index, fqa = %fqa, "Module lost during device check");
            self.mark_unready();
        }
        level
    }

    fn update_device(
        fabric: &mut Fabric,
        device: &mut Device,
        timeout: std::time::Duration,
        routed: bool,
    ) -> ErrorLevel {
        let fqa = device.fqa();
        if !routed {
            let level = mux::set_bus(fabric, fqa);
            if level.is_err() {
                return level;
            }
        }

        let mut level = ErrorLevel::None;
        if let Some(value) = device.pending_value() {
            level = device.set(fabric, &value, None, Switch::ROUTED);
        }
        if level.is_ok() && device.has_input() {
            level = device.get(fabric, None, Switch::ROUTED);
        }
        if level.is_ok() && !device.has_input() && !device.has_output() {
            level = device.ping_with_timeout(fabric, Switch::ROUTED, timeout);
        }

        if routed {
            return level;
        }
        let reset = mux::reset_bus(fabric, fqa);
        if level.is_ok() {
            reset
        } else {
            level
        }
    }

    // ===== Discovery =====

    /// Register the EEPROM, read its record and populate the indices
    ///
    /// The first read or parse failure overwrites the EEPROM with the
    /// failsafe record and retries once; a second failure is returned and
    /// the module stays [`ModuleState::EepromUnregistered`]. Record entries
    /// that can't be added are skipped and reported as Soft; the module
    /// still becomes Ready.
    pub fn discover(&mut self, fabric: &mut Fabric) -> ErrorLevel {
        for attempt in [Attempt::First, Attempt::Failsafe] {
            if let Err(e) = self.register_eeprom() {
                warn!(bus = self.bus, module = self.index, error = %e, "EEPROM registration failed");
                return ErrorLevel::Soft;
            }

            let level = self.probe(fabric);
            if level.is_err() {
                debug!(bus = self.bus, module = self.index, level = %level, "Module not reachable");
                return level;
            }

            let failure = match self.read_record(fabric) {
                Ok(record) => {
                    let level = self.populate(&record);
                    self.mark_ready();
                    info!(
                        bus = self.bus,
                        module = self.index,
                        devices = self.devices.len(),
                        level = %level,
                        "Module discovered"
                    );
                    return level;
                }
                Err(failure) => failure,
            };

            if attempt == Attempt::Failsafe {
                warn!(
                    bus = self.bus,
                    module = self.index,
                    level = %failure,
                    "Discovery failed after failsafe rewrite"
                );
                return failure;
            }

            warn!(
                bus = self.bus,
                module = self.index,
                level = %failure,
                "Unreadable EEPROM record, writing failsafe"
            );
            let written = self.write_failsafe(fabric);
            if written.is_err() {
                return written;
            }
        }
        ErrorLevel::Soft
    }

    fn register_eeprom(&mut self) -> Result<()> {
        if self.eeprom_added {
            return Ok(());
        }
        let identifier = self.config.eeprom.identifier.clone();
        let device = self.catalog.create(&identifier, self.eeprom, &self.config);
        self.add_device(device)
    }

    fn read_record(&mut self, fabric: &mut Fabric) -> std::result::Result<Record, ErrorLevel> {
        let eeprom = self
            .devices
            .get_mut(self.eeprom)
            .ok_or(ErrorLevel::Soft)?;
        eeprom.reset_cache();
        eeprom.get(fabric, None, Switch::BRACKETED).into_result()?;

        let text = eeprom
            .value()
            .and_then(|value| value.as_str())
            .ok_or(ErrorLevel::Soft)?;
        Record::parse(text).map_err(|e| {
            debug!(fqa = %self.eeprom, error = %e, "Record rejected");
            e.level()
        })
    }

    fn write_failsafe(&mut self, fabric: &mut Fabric) -> ErrorLevel {
        match self.devices.get_mut(self.eeprom) {
            Some(eeprom) => eeprom.reset(fabric, Switch::BRACKETED),
            None => ErrorLevel::Soft,
        }
    }

    fn populate(&mut self, record: &Record) -> ErrorLevel {
        let mut level = ErrorLevel::None;
        for entry in record.entries() {
            let fqa = entry.fqa(self.bus, self.index);
            if let Some(existing) = self.devices.get(fqa) {
                if existing.identifier() != entry.identifier {
                    warn!(
                        fqa = %fqa,
                        indexed = existing.identifier(),
                        record = %entry.identifier,
                        "Record entry conflicts with an indexed device, skipping"
                    );
                    level = level.worst(ErrorLevel::Soft);
                }
                continue;
            }
            let device = self.catalog.create(&entry.identifier, fqa, &self.config);
            if let Err(e) = self.add_device(device) {
                warn!(fqa = %fqa, identifier = %entry.identifier, error = %e, "Skipping record entry");
                level = level.worst(e.level());
            }
        }
        level
    }

    /// Store a new record in the EEPROM
    ///
    /// The record takes effect the next time the module is discovered.
    pub fn write_record(&mut self, fabric: &mut Fabric, record: &Record) -> ErrorLevel {
        if record.stored_len() > self.config.eeprom.capacity {
            warn!(
                size = record.stored_len(),
                capacity = self.config.eeprom.capacity,
                "Record does not fit the EEPROM"
            );
            return ErrorLevel::Soft;
        }
        if let Err(e) = self.register_eeprom() {
            return e.level();
        }
        let value = serde_json::Value::String(record.to_json());
        match self.devices.get_mut(self.eeprom) {
            Some(eeprom) => eeprom.set(fabric, &value, None, Switch::BRACKETED),
            None => ErrorLevel::Soft,
        }
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("bus", &self.bus)
            .field("index", &self.index)
            .field("state", &self.state)
            .field("devices", &self.devices.len())
            .field("groups", &self.groups.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::register_device;
    use crate::group::GROUP_CAPACITY;
    use muxnet_bus::test_utils::{SimAddress, SimDevice, SimEvent, TestFixture};

    fn module(fixture: &TestFixture, slot: u8) -> Module {
        Module::new(0, slot, &fixture.config, Catalog::new(&fixture.config)).unwrap()
    }

    #[test]
    fn test_discovery_populates_groups() {
        let mut fixture = TestFixture::new();
        fixture.add_module(1, Some(r#"[{"eeprom":[80]},{"sensor":[64,65]}]"#));
        let mut module = module(&fixture, 1);

        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::None);
        assert_eq!(module.state(), ModuleState::Ready);
        assert_eq!(module.len(), 3);
        assert_eq!(module.find_group("sensor").unwrap().len(), 2);
        assert!(module.device(Fqa::encode(0, 1, 1, 64)).is_some());
        module.check_consistency().unwrap();
    }

    #[test]
    fn test_discovery_registers_eeprom_once() {
        let mut fixture = TestFixture::new();
        fixture.add_module(0, Some(r#"[{"eeprom":[80]}]"#));
        let mut module = module(&fixture, 0);

        assert_eq!(module.discover(&mut fixture.fabric), ErrorLevel::None);
        assert_eq!(module.discover(&mut fixture.fabric), ErrorLevel::None);
        assert_eq!(module.len(), 1);
        assert_eq!(module.find_group("eeprom").unwrap().members(), &[module.eeprom_fqa()]);
        assert!(module.is_eeprom_registered());
    }

    #[test]
    fn test_corrupt_record_rewritten_once() {
        let mut fixture = TestFixture::new();
        let eeprom = fixture.add_module(0, Some("not a record"));
        let mut module = module(&fixture, 0);

        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::None);
        assert_eq!(module.state(), ModuleState::Ready);
        assert_eq!(fixture.sim.data_writes(eeprom), 1);
        assert_eq!(module.len(), 1);
    }

    #[test]
    fn test_second_failure_propagates() {
        let mut fixture = TestFixture::new();
        let eeprom = fixture.add_module(0, Some("not a record"));
        // Every read returns a single byte, so no record ever parses
        fixture.sim.set_short_read(eeprom, Some(1));
        let mut module = module(&fixture, 0);

        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::Soft);
        assert_eq!(module.state(), ModuleState::EepromUnregistered);
        assert_eq!(fixture.sim.data_writes(eeprom), 1);
    }

    #[test]
    fn test_dead_mux_is_hard_without_writes() {
        let mut fixture = TestFixture::new();
        let mut module = module(&fixture, 3);

        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::Hard);
        fixture.sim.clear_events();

        let device = Fqa::encode(0, 3, 1, 0x40);
        assert_eq!(module.check_device(&mut fixture.fabric, device, true), ErrorLevel::Hard);
        assert_eq!(
            module.check_device(&mut fixture.fabric, module.eeprom_fqa(), false),
            ErrorLevel::Hard
        );
        assert!(fixture.sim.events().is_empty());
    }

    #[test]
    fn test_lost_module_marks_devices_unready_and_recovers() {
        let mut fixture = TestFixture::new();
        fixture.add_module(2, Some(r#"[{"eeprom":[80]},{"sensor":[64]}]"#));
        fixture
            .sim
            .add_device(Fqa::encode(0, 2, 1, 64), SimDevice::with_memory(4));
        let mut module = module(&fixture, 2);
        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::None);

        fixture.sim.set_mux_present(2, false);
        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::Hard);
        assert_eq!(module.state(), ModuleState::Unready);
        assert!(module.devices().all(|device| !device.is_ready()));
        assert_eq!(module.len(), 2);

        fixture.sim.set_mux_present(2, true);
        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::None);
        assert_eq!(module.state(), ModuleState::Ready);
        assert!(module.devices().all(Device::is_ready));
    }

    #[test]
    fn test_check_device_unknown_is_soft() {
        let mut fixture = TestFixture::new();
        fixture.add_module(0, Some(r#"[{"eeprom":[80]}]"#));
        let mut module = module(&fixture, 0);
        module.check(&mut fixture.fabric);

        assert_eq!(
            module.check_device(&mut fixture.fabric, Fqa::encode(0, 0, 5, 5), false),
            ErrorLevel::Soft
        );
    }

    #[test]
    fn test_update_switches_bus_once_and_writes_before_reading() {
        let mut fixture = TestFixture::new();
        fixture.add_module(0, Some(r#"[{"eeprom":[80]},{"sensor":[64]}]"#));
        let sensor = Fqa::encode(0, 0, 1, 64);
        fixture.sim.add_device(sensor, SimDevice::with_memory(4));
        let catalog = Catalog::new(&fixture.config).with("sensor", register_device);
        let mut module = Module::new(0, 0, &fixture.config, catalog).unwrap();
        module.check(&mut fixture.fabric);

        module
            .device_mut(sensor)
            .unwrap()
            .stage(serde_json::json!(7));
        fixture.sim.clear_events();
        assert_eq!(module.check_device(&mut fixture.fabric, sensor, true), ErrorLevel::None);
        assert_eq!(module.device(sensor).unwrap().value(), Some(&serde_json::json!(7)));

        let mux_address = fixture.fabric.mux_address(0);
        let events = fixture.sim.events();
        let mux_writes: Vec<Vec<u8>> = events
            .iter()
            .filter_map(|event| match event {
                SimEvent::End { address, bytes, .. } if *address == mux_address => {
                    Some(bytes.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(mux_writes, vec![vec![0b10u8], vec![0u8]]);

        let first_write = events
            .iter()
            .position(|e| matches!(e, SimEvent::End { address: 64, bytes, .. } if bytes.len() == 2));
        let first_read = events
            .iter()
            .position(|e| matches!(e, SimEvent::Request { address: 64, .. }));
        assert!(first_write.unwrap() < first_read.unwrap());
    }

    #[test]
    fn test_group_capacity_rolls_back() {
        let fixture = TestFixture::new();
        let mut module = module(&fixture, 0);
        for address in 0..GROUP_CAPACITY as u8 {
            module
                .add_device(Device::new(Fqa::encode(0, 0, 1, 0x10 + address), "led"))
                .unwrap();
        }

        let extra = Fqa::encode(0, 0, 2, 0x10);
        let result = module.add_device(Device::new(extra, "led"));
        assert!(matches!(result, Err(MuxnetError::GroupFull { .. })));
        assert!(module.device(extra).is_none());
        assert_eq!(module.find_group("led").unwrap().len(), GROUP_CAPACITY);
        module.check_consistency().unwrap();
    }

    #[test]
    fn test_foreign_devices() {
        let fixture = TestFixture::new();
        let mut module = module(&fixture, 0);
        let elsewhere = Fqa::encode(1, 4, 0, 0x20);

        assert!(matches!(
            module.add_device(Device::new(elsewhere, "clock")),
            Err(MuxnetError::ForeignAddress { .. })
        ));
        module.allow_foreign(elsewhere);
        module.add_device(Device::new(elsewhere, "clock")).unwrap();
        assert!(module.is_foreign(elsewhere));
        module.check_consistency().unwrap();
    }

    #[test]
    fn test_foreign_device_checked_without_multiplexer() {
        let mut fixture = TestFixture::new();
        fixture.add_module(0, Some(r#"[{"eeprom":[80]}]"#));
        fixture
            .sim
            .add_device(SimAddress::foreign(0x68), SimDevice::with_memory(2));
        let catalog = Catalog::new(&fixture.config).with("rtc", register_device);
        let mut module = Module::new(0, 0, &fixture.config, catalog).unwrap();
        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::None);

        let rtc = Fqa::encode(0, 5, 0, 0x68);
        module.allow_foreign(rtc);
        let device = module.catalog().create("rtc", rtc, &fixture.config);
        module.add_device(device).unwrap();
        fixture.sim.clear_events();

        assert_eq!(module.check_device(&mut fixture.fabric, rtc, false), ErrorLevel::None);
        module.device_mut(rtc).unwrap().stage(serde_json::json!(3));
        assert_eq!(module.check_device(&mut fixture.fabric, rtc, true), ErrorLevel::None);
        assert_eq!(module.device(rtc).unwrap().value(), Some(&serde_json::json!(3)));
        assert!(module.device(rtc).unwrap().is_ready());

        // No multiplexer is ever addressed for a device on the upstream bus
        assert!(!fixture.sim.touched(fixture.fabric.mux_address(0)));
        assert!(!fixture.sim.touched(fixture.fabric.mux_address(5)));
    }

    #[test]
    fn test_unready_module_checks_devices_without_traffic() {
        let mut fixture = TestFixture::new();
        fixture.add_module(1, Some(r#"[{"eeprom":[80]},{"sensor":[64]}]"#));
        let sensor = Fqa::encode(0, 1, 1, 64);
        fixture.sim.add_device(sensor, SimDevice::with_memory(4));
        let mut module = module(&fixture, 1);
        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::None);

        fixture.sim.set_mux_present(1, false);
        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::Hard);
        assert_eq!(module.state(), ModuleState::Unready);
        fixture.sim.clear_events();

        assert_eq!(module.check_device(&mut fixture.fabric, sensor, false), ErrorLevel::Hard);
        assert_eq!(module.check_device(&mut fixture.fabric, sensor, true), ErrorLevel::Hard);
        assert!(fixture.sim.events().is_empty());
    }

    #[test]
    fn test_busy_device_is_not_ready() {
        let mut fixture = TestFixture::new();
        fixture.add_module(0, Some(r#"[{"eeprom":[80]},{"sensor":[64]}]"#));
        let sensor = Fqa::encode(0, 0, 1, 64);
        fixture.sim.add_device(sensor, SimDevice::with_memory(4));
        let mut module = module(&fixture, 0);
        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::None);

        fixture.sim.set_busy(sensor, 1000);
        assert_eq!(module.check_device(&mut fixture.fabric, sensor, false), ErrorLevel::Soft);
        assert!(!module.device(sensor).unwrap().is_ready());
        assert_eq!(module.state(), ModuleState::Ready);

        fixture.sim.set_busy(sensor, 0);
        assert_eq!(module.check_device(&mut fixture.fabric, sensor, false), ErrorLevel::None);
        assert!(module.device(sensor).unwrap().is_ready());
    }

    #[test]
    fn test_identifier_conflict_rejected() {
        let fixture = TestFixture::new();
        let mut module = module(&fixture, 0);
        let fqa = Fqa::encode(0, 0, 1, 0x10);
        module.add_device(Device::new(fqa, "led")).unwrap();
        module.add_device(Device::new(fqa, "led")).unwrap();
        assert!(matches!(
            module.add_device(Device::new(fqa, "button")),
            Err(MuxnetError::IdentifierMismatch { .. })
        ));
        assert!(module.find_group("button").is_none());
        assert_eq!(module.len(), 1);
    }

    #[test]
    fn test_conflicting_record_entry_is_soft() {
        let mut fixture = TestFixture::new();
        fixture.add_module(0, Some(r#"[{"eeprom":[80]},{"led":[16]}]"#));
        let mut module = module(&fixture, 0);
        module
            .add_device(Device::new(Fqa::encode(0, 0, 1, 16), "button"))
            .unwrap();

        assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::Soft);
        assert_eq!(module.state(), ModuleState::Ready);
        assert_eq!(module.device(Fqa::encode(0, 0, 1, 16)).unwrap().identifier(), "button");
    }

    #[test]
    fn test_remove_device() {
        let fixture = TestFixture::new();
        let mut module = module(&fixture, 0);
        let fqa = Fqa::encode(0, 0, 1, 0x10);
        module.add_device(Device::new(fqa, "led")).unwrap();

        let removed = module.remove_device(fqa, false).unwrap();
        assert_eq!(removed.unwrap().fqa(), fqa);
        assert!(module.find_group("led").unwrap().is_empty());
        assert!(matches!(
            module.remove_device(fqa, true),
            Err(MuxnetError::NotFound(_))
        ));
        module.check_consistency().unwrap();
    }

    #[test]
    fn test_device_or_create() {
        let fixture = TestFixture::new();
        let mut module = module(&fixture, 0);
        let fqa = Fqa::encode(0, 0, 3, 0x30);

        module.device_or_create("led", fqa).unwrap();
        module.device_or_create("led", fqa).unwrap();
        assert_eq!(module.len(), 1);
        assert!(module.device_or_create("button", fqa).is_err());
        assert!(module
            .device_or_create("led", Fqa::encode(0, 5, 0, 1))
            .is_err());
        assert_eq!(module.find_group("led").unwrap().len(), 1);
    }

    #[test]
    fn test_write_record_then_rediscover() {
        let mut fixture = TestFixture::new();
        fixture.add_module(0, Some(r#"[{"eeprom":[80]}]"#));
        let mut module = module(&fixture, 0);
        module.check(&mut fixture.fabric);

        let mut record = Record::failsafe(&fixture.config.eeprom);
        record.insert(4, "display", 0x3C);
        assert_eq!(module.write_record(&mut fixture.fabric, &record), ErrorLevel::None);

        let mut fresh = Module::new(0, 0, &fixture.config, Catalog::new(&fixture.config)).unwrap();
        assert_eq!(fresh.check(&mut fixture.fabric), ErrorLevel::None);
        assert!(fresh.device(Fqa::encode(0, 0, 4, 0x3C)).is_some());
        assert_eq!(fresh.find_group("display").unwrap().len(), 1);
    }
}
