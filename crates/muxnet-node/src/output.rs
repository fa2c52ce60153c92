//! JSON documents printed by the CLI

use serde::Serialize;
use std::collections::BTreeMap;

use muxnet_core::{ErrorLevel, Fqa};
use muxnet_registry::{Module, ModuleState, RoutingTable, ScanReport};

/// Results written to stdout, one document per command
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    /// A routing-table scan
    Scan {
        report: ScanReport,
        routes: Vec<RouteEntry>,
    },

    /// Module discovery and self-check results
    Discover { modules: Vec<ModuleSummary> },
}

/// One row of the routing table
#[derive(Debug, Clone, Serialize)]
pub struct RouteEntry {
    pub fqa: Fqa,
    pub location: String,
    pub identifier: String,
}

impl RouteEntry {
    pub fn from_table(table: &RoutingTable) -> Vec<Self> {
        table
            .iter()
            .map(|(fqa, identifier)| Self {
                fqa,
                location: fqa.to_string(),
                identifier: identifier.to_string(),
            })
            .collect()
    }
}

/// State of one module after its self-check rounds
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub bus: u8,
    pub module: u8,
    pub state: ModuleState,
    /// Outcome of each check round, in order
    pub checks: Vec<ErrorLevel>,
    pub groups: BTreeMap<String, Vec<Fqa>>,
}

impl ModuleSummary {
    pub fn new(module: &Module, checks: Vec<ErrorLevel>) -> Self {
        let groups = module
            .groups()
            .filter(|group| !group.is_empty())
            .map(|group| (group.identifier().to_string(), group.members().to_vec()))
            .collect();
        Self {
            bus: module.bus(),
            module: module.index(),
            state: module.state(),
            checks,
            groups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_tagged() {
        let output = Output::Scan {
            report: ScanReport::default(),
            routes: Vec::new(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["type"], "scan");
        assert!(json["routes"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_route_entries_follow_table_order() {
        let mut table = RoutingTable::new();
        table.add(Fqa::encode(0, 1, 0, 0x50), "eeprom").unwrap();
        table.add(Fqa::encode(0, 0, 2, 0x20), "led").unwrap();

        let routes = RouteEntry::from_table(&table);
        let identifiers: Vec<&str> = routes.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(identifiers, vec!["led", "eeprom"]);
    }
}
