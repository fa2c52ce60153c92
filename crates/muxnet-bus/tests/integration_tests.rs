//! Integration tests for the bus layer
//!
//! These tests drive the public primitives against the simulated bus:
//! - Sub-bus isolation between devices that share an address
//! - Timed pings against an EEPROM write cycle
//! - Multi-wire fabrics

use std::time::Duration;

use muxnet_bus::test_utils::{SimAddress, SimDevice, SimEvent, SimulatedWire, TestFixture};
use muxnet_bus::{
    mux, ping, ping_with_timeout, read_register, write_register, ErrorLevel, Fabric,
    RegisterAddress, Switch,
};
use muxnet_core::{Fqa, MuxnetConfig};

#[test]
fn test_same_address_on_different_subbuses() {
    let mut fixture = TestFixture::new();
    fixture.sim.add_mux(0);
    let left = Fqa::encode(0, 0, 1, 0x40);
    let right = Fqa::encode(0, 0, 2, 0x40);
    fixture
        .sim
        .add_device(left, SimDevice::with_memory(4).loaded(0, &[0xAA]));
    fixture
        .sim
        .add_device(right, SimDevice::with_memory(4).loaded(0, &[0xBB]));

    let mut buf = [0u8; 1];
    read_register(
        &mut fixture.fabric,
        left,
        RegisterAddress::U8(0),
        &mut buf,
        false,
        Switch::BRACKETED,
    )
    .unwrap();
    assert_eq!(buf[0], 0xAA);

    read_register(
        &mut fixture.fabric,
        right,
        RegisterAddress::U8(0),
        &mut buf,
        false,
        Switch::BRACKETED,
    )
    .unwrap();
    assert_eq!(buf[0], 0xBB);
}

#[test]
fn test_eeprom_page_write_then_poll() {
    let mut fixture = TestFixture::new();
    let eeprom = fixture.add_module(3, None);

    assert_eq!(
        write_register(
            &mut fixture.fabric,
            eeprom,
            RegisterAddress::U16(0),
            b"abc",
            Switch::OPEN,
        ),
        ErrorLevel::None
    );
    // The write cycle NACKs twice before the device answers again
    let level = ping_with_timeout(
        &mut fixture.fabric,
        eeprom,
        Switch {
            set_bus: false,
            reset_bus: true,
        },
        Duration::from_millis(10),
    );
    assert_eq!(level, ErrorLevel::None);
    assert_eq!(fixture.clock.now(), Duration::from_millis(2));
    assert_eq!(fixture.sim.mux_selection(3), Some(0));
    assert_eq!(&fixture.sim.memory(eeprom).unwrap()[..3], b"abc");
}

#[test]
fn test_every_transaction_is_bracketed() {
    let mut fixture = TestFixture::new();
    let device = Fqa::encode(0, 5, 7, 0x11);
    fixture.sim.add_mux(5);
    fixture.sim.add_device(device, SimDevice::with_memory(4));

    assert_eq!(ping(&mut fixture.fabric, device, true), ErrorLevel::None);

    let mux_address = fixture.fabric.mux_address(5);
    let mux_writes: Vec<Vec<u8>> = fixture
        .sim
        .events()
        .into_iter()
        .filter_map(|event| match event {
            SimEvent::End { address, bytes, .. } if address == mux_address => Some(bytes),
            _ => None,
        })
        .collect();
    assert_eq!(mux_writes, vec![vec![0b1000_0000], vec![mux::DISABLE_ALL]]);
}

#[test]
fn test_multi_wire_fabric() {
    let config = MuxnetConfig::default();
    let first = SimulatedWire::new();
    let second = SimulatedWire::new();
    let sim0 = first.handle();
    let sim1 = second.handle();
    let mut fabric = Fabric::with_system_clock(&config)
        .with_wire(Box::new(first))
        .with_wire(Box::new(second));

    sim1.add_mux(0);
    sim1.add_device(SimAddress::behind(0, 0, 0x22), SimDevice::with_memory(2));

    assert_eq!(
        ping(&mut fabric, Fqa::encode(1, 0, 0, 0x22), true),
        ErrorLevel::None
    );
    assert_eq!(
        ping(&mut fabric, Fqa::encode(0, 0, 0, 0x22), true),
        ErrorLevel::Hard
    );
    assert_eq!(sim0.begin_count(), 1);
    assert_eq!(sim1.begin_count(), 1);
}
