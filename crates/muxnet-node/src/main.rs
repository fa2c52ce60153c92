//! Muxnet Node - command-line front end for a muxnet
//!
//! Loads a configuration and a hardware topology, then:
//! - scans every bus into a routing table
//! - runs module discovery and self-check rounds
//! - stores a new device-list record on a module EEPROM
//!
//! Results are printed to stdout as JSON; logs go to stderr.

mod output;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use muxnet_bus::test_utils::{SimClock, SimTopology};
use muxnet_bus::{mux, Fabric};
use muxnet_core::{MuxnetConfig, MODULE_SLOTS};
use muxnet_registry::{Catalog, Module, Record, RoutingTable};
use output::{ModuleSummary, Output, RouteEntry};

#[derive(Parser)]
#[command(name = "muxnet-node")]
#[command(about = "Discover and route devices on a multiplexed I2C network")]
struct Args {
    /// Hardware topology (JSON)
    #[arg(long, short)]
    topology: PathBuf,

    /// Configuration file (JSON); built-in defaults when omitted
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan every bus and print the routing table
    Scan,

    /// Discover modules and run their self-check
    Discover {
        /// Only this bus
        #[arg(long)]
        bus: Option<u8>,

        /// Only this module slot (checked even if its multiplexer is silent)
        #[arg(long)]
        module: Option<u8>,

        /// Self-check rounds per module
        #[arg(long, default_value_t = 1)]
        rounds: u32,
    },

    /// Store a device-list record on a module EEPROM, then rediscover the module
    WriteRecord {
        /// Bus index
        #[arg(long, default_value_t = 0)]
        bus: u8,

        /// Module slot
        #[arg(long)]
        module: u8,

        /// Record JSON, e.g. '[{"eeprom":[80]},{"led":[32]}]'
        record: String,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => MuxnetConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MuxnetConfig::default(),
    };
    let topology = load_topology(&args.topology)?;
    config.bus.wires = u8::try_from(topology.wires.len()).context("Too many wires")?;
    config.validate().context("Topology does not fit the configuration")?;

    let mut fabric = build_fabric(&config, &topology);
    info!(wires = fabric.wire_count(), "Fabric ready");

    let output = match args.command {
        Command::Scan => scan(&mut fabric, &config),
        Command::Discover {
            bus,
            module,
            rounds,
        } => discover(&mut fabric, &config, bus, module, rounds),
        Command::WriteRecord {
            bus,
            module,
            record,
        } => write_record(&mut fabric, &config, bus, module, &record)?,
    };

    let json = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{json}");
    Ok(())
}

fn load_topology(path: &Path) -> anyhow::Result<SimTopology> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read topology {}", path.display()))?;
    let topology: SimTopology = serde_json::from_str(&text)
        .with_context(|| format!("Invalid topology {}", path.display()))?;
    if topology.wires.is_empty() {
        bail!("Topology {} describes no wires", path.display());
    }
    Ok(topology)
}

fn build_fabric(config: &MuxnetConfig, topology: &SimTopology) -> Fabric {
    let mut fabric = Fabric::new(config, Box::new(SimClock::new()));
    for (wire, _) in topology.build(config) {
        fabric.attach(Box::new(wire));
    }
    fabric
}

fn scan(fabric: &mut Fabric, config: &MuxnetConfig) -> Output {
    let mut table = RoutingTable::new();
    let report = table.scan(fabric, config);
    Output::Scan {
        routes: RouteEntry::from_table(&table),
        report,
    }
}

fn discover(
    fabric: &mut Fabric,
    config: &MuxnetConfig,
    bus: Option<u8>,
    module: Option<u8>,
    rounds: u32,
) -> Output {
    let mut modules = Vec::new();
    let buses: Vec<u8> = match bus {
        Some(bus) => vec![bus],
        None => (0..fabric.wire_count()).collect(),
    };

    for bus in buses {
        let slots: Vec<u8> = match module {
            Some(slot) => vec![slot],
            None => (0..MODULE_SLOTS as u8)
                .filter(|slot| mux::ping(fabric, config.eeprom_fqa(bus, *slot)))
                .collect(),
        };
        for slot in slots {
            let mut module = match Module::new(bus, slot, config, Catalog::new(config)) {
                Ok(module) => module,
                Err(e) => {
                    warn!(bus, module = slot, error = %e, "Skipping module");
                    continue;
                }
            };
            let checks = (0..rounds).map(|_| module.check(fabric)).collect();
            debug!(bus, module = slot, state = %module.state(), "Module checked");
            modules.push(ModuleSummary::new(&module, checks));
        }
    }

    Output::Discover { modules }
}

fn write_record(
    fabric: &mut Fabric,
    config: &MuxnetConfig,
    bus: u8,
    slot: u8,
    text: &str,
) -> anyhow::Result<Output> {
    let record = Record::parse(text).context("Invalid record")?;
    let mut module = Module::new(bus, slot, config, Catalog::new(config))?;

    let level = module.write_record(fabric, &record);
    if level.is_err() {
        bail!("Writing the record to module {bus}.{slot} failed ({level})");
    }
    info!(bus, module = slot, bytes = record.stored_len(), "Record stored");

    let mut module = Module::new(bus, slot, config, Catalog::new(config))?;
    let checks = vec![module.check(fabric)];
    Ok(Output::Discover {
        modules: vec![ModuleSummary::new(&module, checks)],
    })
}
