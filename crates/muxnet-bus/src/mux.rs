//! Multiplexer driver
//!
//! Each module is a TCA9548A-style multiplexer at `mux_base_address +
//! module`. Writing a one-hot byte to it routes the upstream bus to that
//! sub-bus; writing zero disconnects every sub-bus.
//!
//! Every device transaction is bracketed by [`set_bus`] and [`reset_bus`]
//! so that devices behind the same multiplexer never see stale routing.

use tracing::trace;

use muxnet_core::{ErrorLevel, Fqa};

use crate::fabric::Fabric;

/// Instruction that disconnects every sub-bus
pub const DISABLE_ALL: u8 = 0x00;

/// One-hot select instruction for a sub-bus
pub const fn select_instruction(subbus: u8) -> u8 {
    1 << subbus
}

/// Check whether the multiplexer for `fqa`'s module acknowledges
pub fn ping(fabric: &mut Fabric, fqa: Fqa) -> bool {
    let address = fabric.mux_address(fqa.module());
    let Some(wire) = fabric.wire(fqa.bus()) else {
        return false;
    };
    wire.begin_transmission(address);
    let ack = wire.end_transmission(true);
    trace!(fqa = %fqa, mux = format!("0x{:02X}", address), ack, "Multiplexer ping");
    ack
}

/// Route the upstream bus to `fqa`'s sub-bus
pub fn set_bus(fabric: &mut Fabric, fqa: Fqa) -> ErrorLevel {
    instruct(fabric, fqa, select_instruction(fqa.subbus()))
}

/// Disconnect every sub-bus of `fqa`'s multiplexer
pub fn reset_bus(fabric: &mut Fabric, fqa: Fqa) -> ErrorLevel {
    instruct(fabric, fqa, DISABLE_ALL)
}

fn instruct(fabric: &mut Fabric, fqa: Fqa, instruction: u8) -> ErrorLevel {
    let address = fabric.mux_address(fqa.module());
    let Some(wire) = fabric.wire(fqa.bus()) else {
        return ErrorLevel::Hard;
    };
    wire.begin_transmission(address);
    let written = wire.write(&[instruction]);
    let ack = wire.end_transmission(true);

    let level = if !ack {
        ErrorLevel::Hard
    } else if written != 1 {
        ErrorLevel::Soft
    } else {
        ErrorLevel::None
    };
    trace!(
        fqa = %fqa,
        instruction = format!("0b{:08b}", instruction),
        level = %level,
        "Multiplexer instruction"
    );
    level
}
