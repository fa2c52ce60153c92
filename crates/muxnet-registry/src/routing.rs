//! Network-wide routing table
//!
//! The [`RoutingTable`] maps every reachable device to its identifier and
//! back. It is built by [`RoutingTable::scan`], which walks every module
//! slot of every bus, reads each module's EEPROM record and keeps the
//! listed devices that answer a ping.
//!
//! Module slots are assumed contiguous from slot 0: the first slot whose
//! multiplexer doesn't answer ends the scan of that bus.

use serde::Serialize;
use tracing::{debug, info, warn};

use muxnet_bus::{mux, primitives, Fabric, RegisterAddress, Switch};
use muxnet_core::{Fqa, MuxnetConfig, MuxnetError, Result, MODULE_SLOTS};

use crate::index::{HashIndex, OrderedIndex};
use crate::record::Record;

/// What a scan found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// `(bus, module)` pairs whose record was read
    pub modules_found: Vec<(u8, u8)>,
    /// `(bus, module)` pairs present but skipped (EEPROM unreachable or record unusable)
    pub modules_skipped: Vec<(u8, u8)>,
    /// Devices added to the table
    pub devices_added: usize,
    /// Listed devices that did not answer
    pub devices_dropped: Vec<Fqa>,
}

/// Global address ↔ identifier index
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    by_address: OrderedIndex<String>,
    by_identifier: HashIndex<Vec<Fqa>>,
}

impl RoutingTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry to both indices
    pub fn add(&mut self, fqa: Fqa, identifier: &str) -> Result<()> {
        self.by_address.insert(fqa, identifier.to_string())?;
        self.by_identifier
            .get_or_insert_with(identifier, Vec::new)
            .0
            .push(fqa);
        Ok(())
    }

    /// Remove an entry from both indices, returning its identifier
    pub fn remove(&mut self, fqa: Fqa) -> Result<String> {
        let identifier = self
            .by_address
            .remove(fqa)
            .ok_or(MuxnetError::NotFound(fqa))?;
        let now_empty = match self.by_identifier.get_mut(&identifier) {
            Some(members) => {
                members.retain(|member| *member != fqa);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_identifier.remove(&identifier);
        }
        Ok(identifier)
    }

    /// Identifier of the device at an address
    pub fn identifier(&self, fqa: Fqa) -> Option<&str> {
        self.by_address.get(fqa).map(String::as_str)
    }

    /// Addresses of every device with an identifier, in insertion order
    pub fn members(&self, identifier: &str) -> &[Fqa] {
        self.by_identifier
            .get(identifier)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Entries in address order
    pub fn iter(&self) -> impl Iterator<Item = (Fqa, &str)> {
        self.by_address
            .iter()
            .map(|(fqa, identifier)| (fqa, identifier.as_str()))
    }

    /// Known identifiers, in arbitrary order
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.by_identifier.keys()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.by_address.clear();
        self.by_identifier.clear();
    }

    /// Verify that both indices describe the same set of entries
    pub fn check_consistency(&self) -> Result<()> {
        for (fqa, identifier) in self.by_address.iter() {
            if !self.members(identifier).contains(&fqa) {
                return Err(MuxnetError::NotFound(fqa));
            }
        }
        let mut members = 0;
        for (identifier, fqas) in self.by_identifier.iter() {
            if fqas.is_empty() {
                return Err(MuxnetError::InvalidRecord(format!(
                    "identifier {identifier} has no members"
                )));
            }
            for fqa in fqas {
                match self.by_address.get(*fqa) {
                    Some(indexed) if indexed == identifier => {}
                    Some(indexed) => {
                        return Err(MuxnetError::IdentifierMismatch {
                            fqa: *fqa,
                            expected: identifier.to_string(),
                            found: indexed.clone(),
                        })
                    }
                    None => return Err(MuxnetError::NotFound(*fqa)),
                }
            }
            members += fqas.len();
        }
        if members != self.by_address.len() {
            return Err(MuxnetError::InvalidRecord(format!(
                "{} addresses but {} group members",
                self.by_address.len(),
                members
            )));
        }
        Ok(())
    }

    // ===== Scan =====

    /// Rebuild the table from the hardware
    pub fn scan(&mut self, fabric: &mut Fabric, config: &MuxnetConfig) -> ScanReport {
        self.clear();
        let mut report = ScanReport::default();

        for bus in 0..fabric.wire_count() {
            for module in 0..MODULE_SLOTS as u8 {
                let eeprom = config.eeprom_fqa(bus, module);
                if !mux::ping(fabric, eeprom) {
                    debug!(bus, module, "No multiplexer, ending bus scan");
                    break;
                }
                if primitives::ping(fabric, eeprom, true).is_err() {
                    warn!(bus, module, "Module EEPROM not answering, skipping");
                    report.modules_skipped.push((bus, module));
                    continue;
                }
                let record = match read_record(fabric, eeprom, config.eeprom.capacity) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(bus, module, error = %e, "Unusable module record, skipping");
                        report.modules_skipped.push((bus, module));
                        continue;
                    }
                };
                report.modules_found.push((bus, module));

                for entry in record.entries() {
                    let fqa = entry.fqa(bus, module);
                    if primitives::ping(fabric, fqa, true).is_err() {
                        debug!(fqa = %fqa, identifier = %entry.identifier, "Listed device absent");
                        report.devices_dropped.push(fqa);
                        continue;
                    }
                    match self.add(fqa, &entry.identifier) {
                        Ok(()) => report.devices_added += 1,
                        Err(e) => warn!(fqa = %fqa, error = %e, "Duplicate routing entry"),
                    }
                }
            }
        }

        info!(
            modules = report.modules_found.len(),
            skipped = report.modules_skipped.len(),
            devices = report.devices_added,
            dropped = report.devices_dropped.len(),
            "Routing table scan complete"
        );
        report
    }
}

/// Read a null-terminated record one register at a time
fn read_record(fabric: &mut Fabric, eeprom: Fqa, capacity: usize) -> Result<Record> {
    let transfer_failed = |level| MuxnetError::Transfer { fqa: eeprom, level };

    mux::set_bus(fabric, eeprom)
        .into_result()
        .map_err(transfer_failed)?;
    let mut bytes = Vec::new();
    let mut outcome = Ok(());
    for offset in 0..capacity {
        match primitives::read_register_u8(
            fabric,
            eeprom,
            RegisterAddress::U16(offset as u16),
            Switch::ROUTED,
        ) {
            Ok(0) => break,
            Ok(byte) => bytes.push(byte),
            Err(level) => {
                outcome = Err(transfer_failed(level));
                break;
            }
        }
    }
    let reset = mux::reset_bus(fabric, eeprom).into_result();
    outcome?;
    reset.map_err(transfer_failed)?;

    let text = String::from_utf8(bytes)
        .map_err(|e| MuxnetError::RecordParse(e.to_string()))?;
    Record::parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxnet_bus::test_utils::{SimDevice, TestFixture};

    #[test]
    fn test_add_and_remove_keep_indices_consistent() {
        let mut table = RoutingTable::new();
        let a = Fqa::encode(0, 0, 1, 0x40);
        let b = Fqa::encode(0, 1, 1, 0x40);
        let c = Fqa::encode(0, 0, 2, 0x41);

        table.add(a, "sensor").unwrap();
        table.add(b, "sensor").unwrap();
        table.add(c, "led").unwrap();
        assert!(matches!(
            table.add(a, "led"),
            Err(MuxnetError::DuplicateAddress(_))
        ));
        table.check_consistency().unwrap();
        assert_eq!(table.members("sensor"), &[a, b]);

        assert_eq!(table.remove(a).unwrap(), "sensor");
        table.check_consistency().unwrap();
        assert_eq!(table.members("sensor"), &[b]);

        table.remove(c).unwrap();
        assert!(table.members("led").is_empty());
        assert_eq!(table.identifiers().count(), 1);
        table.check_consistency().unwrap();
        assert!(matches!(table.remove(c), Err(MuxnetError::NotFound(_))));
    }

    #[test]
    fn test_iteration_is_address_ordered() {
        let mut table = RoutingTable::new();
        table.add(Fqa::encode(1, 0, 0, 1), "z").unwrap();
        table.add(Fqa::encode(0, 3, 0, 1), "y").unwrap();
        table.add(Fqa::encode(0, 0, 4, 1), "x").unwrap();
        let identifiers: Vec<&str> = table.iter().map(|(_, id)| id).collect();
        assert_eq!(identifiers, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_scan_single_module() {
        let mut fixture = TestFixture::new();
        fixture.add_module(0, Some(r#"[{"eeprom":[80]},{"sensor":[64,65]}]"#));
        let present = Fqa::encode(0, 0, 1, 64);
        fixture.sim.add_device(present, SimDevice::with_memory(4));

        let mut table = RoutingTable::new();
        let report = table.scan(&mut fixture.fabric, &fixture.config);

        assert_eq!(report.modules_found, vec![(0, 0)]);
        assert_eq!(report.devices_added, 2);
        assert_eq!(report.devices_dropped, vec![Fqa::encode(0, 0, 1, 65)]);
        assert_eq!(table.identifier(present), Some("sensor"));
        assert_eq!(table.members("eeprom"), &[fixture.config.eeprom_fqa(0, 0)]);
        table.check_consistency().unwrap();
    }

    #[test]
    fn test_scan_skips_bad_record() {
        let mut fixture = TestFixture::new();
        fixture.add_module(0, Some("{broken"));
        fixture.add_module(1, Some(r#"[{"eeprom":[80]}]"#));

        let mut table = RoutingTable::new();
        let report = table.scan(&mut fixture.fabric, &fixture.config);

        assert_eq!(report.modules_skipped, vec![(0, 0)]);
        assert_eq!(report.modules_found, vec![(0, 1)]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_scan_skips_missing_eeprom() {
        let mut fixture = TestFixture::new();
        fixture.sim.add_mux(0);
        fixture.add_module(1, Some(r#"[{"eeprom":[80]}]"#));

        let mut table = RoutingTable::new();
        let report = table.scan(&mut fixture.fabric, &fixture.config);
        assert_eq!(report.modules_skipped, vec![(0, 0)]);
        assert_eq!(report.modules_found, vec![(0, 1)]);
    }

    #[test]
    fn test_rescan_replaces_contents() {
        let mut fixture = TestFixture::new();
        fixture.add_module(0, Some(r#"[{"eeprom":[80]}]"#));
        let mut table = RoutingTable::new();
        table.add(Fqa::encode(3, 3, 3, 3), "stale").unwrap();

        table.scan(&mut fixture.fabric, &fixture.config);
        assert_eq!(table.len(), 1);
        assert!(table.members("stale").is_empty());
    }
}
