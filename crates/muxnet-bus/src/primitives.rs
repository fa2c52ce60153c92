//! Device primitives
//!
//! Every device driver is built from these free functions. Each one routes
//! the multiplexer to the device's sub-bus, runs one or more transport
//! transactions, and (optionally) disconnects the sub-bus again. Transfers
//! larger than the transport buffer are split into chunks.
//!
//! Writes report an [`ErrorLevel`]. Reads return the number of bytes
//! stored, or the failing level (`Soft` for a short transfer, `Hard` when
//! the device or multiplexer stopped acknowledging). The `Err` side never
//! carries [`ErrorLevel::None`].

use std::time::Duration;
use tracing::{debug, trace};

use muxnet_core::{ErrorLevel, Fqa, Wire};

use crate::fabric::Fabric;
use crate::mux;

// ============================================================================
// Bus switching policy
// ============================================================================

/// Whether a primitive switches the multiplexer before and after itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    /// Route the multiplexer to the device's sub-bus first
    pub set_bus: bool,
    /// Disconnect every sub-bus afterwards
    pub reset_bus: bool,
}

impl Switch {
    /// Route before, disconnect after (the normal case)
    pub const BRACKETED: Switch = Switch {
        set_bus: true,
        reset_bus: true,
    };

    /// Route before, leave routed afterwards
    pub const OPEN: Switch = Switch {
        set_bus: true,
        reset_bus: false,
    };

    /// The caller already routed the bus and will disconnect it
    pub const ROUTED: Switch = Switch {
        set_bus: false,
        reset_bus: false,
    };
}

impl Default for Switch {
    fn default() -> Self {
        Switch::BRACKETED
    }
}

// ============================================================================
// Register addresses
// ============================================================================

/// Register address prefix sent before register reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAddress {
    /// Single-byte register address
    U8(u8),
    /// Two-byte, big-endian register address (EEPROMs)
    U16(u16),
}

impl RegisterAddress {
    /// Number of bytes the address occupies on the wire
    pub fn width(self) -> usize {
        match self {
            RegisterAddress::U8(_) => 1,
            RegisterAddress::U16(_) => 2,
        }
    }

    /// The address `offset` bytes further on, wrapping at the width
    pub fn offset(self, offset: usize) -> RegisterAddress {
        match self {
            RegisterAddress::U8(reg) => RegisterAddress::U8(reg.wrapping_add(offset as u8)),
            RegisterAddress::U16(reg) => RegisterAddress::U16(reg.wrapping_add(offset as u16)),
        }
    }

    fn write_to(self, wire: &mut dyn Wire) -> usize {
        match self {
            RegisterAddress::U8(reg) => wire.write(&[reg]),
            RegisterAddress::U16(reg) => wire.write(&reg.to_be_bytes()),
        }
    }
}

impl From<u8> for RegisterAddress {
    fn from(reg: u8) -> Self {
        RegisterAddress::U8(reg)
    }
}

impl From<u16> for RegisterAddress {
    fn from(reg: u16) -> Self {
        RegisterAddress::U16(reg)
    }
}

// ============================================================================
// Bracketing helpers
// ============================================================================

fn bracketed<T>(
    fabric: &mut Fabric,
    fqa: Fqa,
    switch: Switch,
    op: impl FnOnce(&mut Fabric) -> Result<T, ErrorLevel>,
) -> Result<T, ErrorLevel> {
    if switch.set_bus {
        mux::set_bus(fabric, fqa).into_result()?;
    }
    let result = op(fabric);
    if switch.reset_bus {
        let reset = mux::reset_bus(fabric, fqa);
        if result.is_ok() {
            reset.into_result()?;
        }
    }
    result
}

/// Address-only transaction: does the device acknowledge?
fn probe(fabric: &mut Fabric, fqa: Fqa) -> Result<(), ErrorLevel> {
    let wire = fabric.wire(fqa.bus()).ok_or(ErrorLevel::Hard)?;
    wire.begin_transmission(fqa.address());
    if wire.end_transmission(true) {
        Ok(())
    } else {
        Err(ErrorLevel::Hard)
    }
}

/// One write transaction with an optional register prefix
fn transmit(
    fabric: &mut Fabric,
    fqa: Fqa,
    register: Option<RegisterAddress>,
    data: &[u8],
    stop: bool,
) -> Result<(), ErrorLevel> {
    let wire = fabric.wire(fqa.bus()).ok_or(ErrorLevel::Hard)?;
    wire.begin_transmission(fqa.address());
    let expected = register.map_or(0, RegisterAddress::width) + data.len();
    let mut written = match register {
        Some(reg) => reg.write_to(wire),
        None => 0,
    };
    if !data.is_empty() {
        written += wire.write(data);
    }
    if !wire.end_transmission(stop) {
        return Err(ErrorLevel::Hard);
    }
    if written < expected {
        trace!(fqa = %fqa, written, expected, "Short write");
        return Err(ErrorLevel::Soft);
    }
    Ok(())
}

/// Request `buf.len()` bytes in one transaction, honouring the null terminator
///
/// Returns `(stored, terminated)`.
fn receive(
    fabric: &mut Fabric,
    fqa: Fqa,
    buf: &mut [u8],
    null_terminated: bool,
) -> Result<(usize, bool), ErrorLevel> {
    let wire = fabric.wire(fqa.bus()).ok_or(ErrorLevel::Hard)?;
    let received = wire.request_from(fqa.address(), buf.len(), true);
    let mut stored = 0;
    for _ in 0..received.min(buf.len()) {
        let Some(byte) = wire.read() else {
            break;
        };
        if null_terminated && byte == 0 {
            return Ok((stored, true));
        }
        buf[stored] = byte;
        stored += 1;
    }
    if stored < buf.len() {
        trace!(fqa = %fqa, stored, requested = buf.len(), "Short read");
        return Err(ErrorLevel::Soft);
    }
    Ok((stored, false))
}

// ============================================================================
// Liveness
// ============================================================================

/// Check whether a device acknowledges its address
///
/// Routes the multiplexer first; `reset_bus` controls whether the sub-bus
/// is disconnected afterwards.
pub fn ping(fabric: &mut Fabric, fqa: Fqa, reset_bus: bool) -> ErrorLevel {
    let switch = Switch {
        set_bus: true,
        reset_bus,
    };
    bracketed(fabric, fqa, switch, |fabric| probe(fabric, fqa)).into()
}

/// Ping a device repeatedly until it acknowledges or `timeout` elapses
///
/// Polls at the fabric's configured interval. On timeout the multiplexer
/// itself is pinged: if it is still present the device is merely busy
/// (`Soft`); if it is gone too, the whole module is lost (`Hard`).
pub fn ping_with_timeout(
    fabric: &mut Fabric,
    fqa: Fqa,
    switch: Switch,
    timeout: Duration,
) -> ErrorLevel {
    if switch.set_bus {
        let level = mux::set_bus(fabric, fqa);
        if level.is_err() {
            return level;
        }
    }

    let interval = fabric.timing().poll_interval;
    let start = fabric.now();
    let acked = loop {
        if probe(fabric, fqa).is_ok() {
            break true;
        }
        if fabric.now().saturating_sub(start) >= timeout {
            break false;
        }
        fabric.delay(interval);
    };

    let level = if acked {
        ErrorLevel::None
    } else if mux::ping(fabric, fqa) {
        debug!(fqa = %fqa, timeout = ?timeout, "Device busy past timeout");
        ErrorLevel::Soft
    } else {
        debug!(fqa = %fqa, "Multiplexer lost during timed ping");
        return ErrorLevel::Hard;
    };

    if switch.reset_bus {
        level.worst(mux::reset_bus(fabric, fqa))
    } else {
        level
    }
}

// ============================================================================
// Writes
// ============================================================================

/// Write raw bytes, chunked to the transport buffer
///
/// An empty slice degenerates to an address-only transaction.
pub fn write(fabric: &mut Fabric, fqa: Fqa, bytes: &[u8], switch: Switch) -> ErrorLevel {
    let chunk = fabric.buffer_size(fqa.bus()).max(1);
    bracketed(fabric, fqa, switch, |fabric| {
        if bytes.is_empty() {
            return transmit(fabric, fqa, None, &[], true);
        }
        for piece in bytes.chunks(chunk) {
            transmit(fabric, fqa, None, piece, true)?;
        }
        Ok(())
    })
    .into()
}

/// Write bytes starting at a register, chunked to the transport buffer
///
/// Each chunk carries its own register prefix, advanced by the number of
/// bytes already sent.
pub fn write_register(
    fabric: &mut Fabric,
    fqa: Fqa,
    register: RegisterAddress,
    bytes: &[u8],
    switch: Switch,
) -> ErrorLevel {
    let chunk = fabric
        .buffer_size(fqa.bus())
        .saturating_sub(register.width())
        .max(1);
    bracketed(fabric, fqa, switch, |fabric| {
        if bytes.is_empty() {
            return transmit(fabric, fqa, Some(register), &[], true);
        }
        for (index, piece) in bytes.chunks(chunk).enumerate() {
            transmit(
                fabric,
                fqa,
                Some(register.offset(index * chunk)),
                piece,
                true,
            )?;
        }
        Ok(())
    })
    .into()
}

/// Write a single byte
pub fn write_byte(fabric: &mut Fabric, fqa: Fqa, value: u8, switch: Switch) -> ErrorLevel {
    write(fabric, fqa, &[value], switch)
}

/// Write a single byte to a register
pub fn write_register_u8(
    fabric: &mut Fabric,
    fqa: Fqa,
    register: RegisterAddress,
    value: u8,
    switch: Switch,
) -> ErrorLevel {
    write_register(fabric, fqa, register, &[value], switch)
}

/// Write a big-endian word to a register
pub fn write_register_u16(
    fabric: &mut Fabric,
    fqa: Fqa,
    register: RegisterAddress,
    value: u16,
    switch: Switch,
) -> ErrorLevel {
    write_register(fabric, fqa, register, &value.to_be_bytes(), switch)
}

// ============================================================================
// Reads
// ============================================================================

/// Read into `buf`, chunked to the transport buffer
///
/// Pings the device first. With `null_terminated`, reading stops at the
/// first zero byte, which is not stored; the returned count is the length
/// before the terminator.
pub fn read(
    fabric: &mut Fabric,
    fqa: Fqa,
    buf: &mut [u8],
    null_terminated: bool,
    switch: Switch,
) -> Result<usize, ErrorLevel> {
    let chunk = fabric.buffer_size(fqa.bus()).max(1);
    bracketed(fabric, fqa, switch, |fabric| {
        probe(fabric, fqa)?;
        let mut filled = 0;
        while filled < buf.len() {
            let end = (filled + chunk).min(buf.len());
            let (stored, terminated) = receive(fabric, fqa, &mut buf[filled..end], null_terminated)?;
            filled += stored;
            if terminated {
                break;
            }
        }
        Ok(filled)
    })
}

/// Read into `buf` starting at a register, chunked to the transport buffer
///
/// Each chunk re-sends the (advanced) register address with a repeated
/// start before requesting data. See [`read`] for `null_terminated`.
pub fn read_register(
    fabric: &mut Fabric,
    fqa: Fqa,
    register: RegisterAddress,
    buf: &mut [u8],
    null_terminated: bool,
    switch: Switch,
) -> Result<usize, ErrorLevel> {
    let chunk = fabric.buffer_size(fqa.bus()).max(1);
    bracketed(fabric, fqa, switch, |fabric| {
        probe(fabric, fqa)?;
        let mut filled = 0;
        while filled < buf.len() {
            let end = (filled + chunk).min(buf.len());
            transmit(fabric, fqa, Some(register.offset(filled)), &[], false)?;
            let (stored, terminated) = receive(fabric, fqa, &mut buf[filled..end], null_terminated)?;
            filled += stored;
            if terminated {
                break;
            }
        }
        Ok(filled)
    })
}

/// Read a single byte
pub fn read_byte(fabric: &mut Fabric, fqa: Fqa, switch: Switch) -> Result<u8, ErrorLevel> {
    let mut buf = [0u8; 1];
    read(fabric, fqa, &mut buf, false, switch)?;
    Ok(buf[0])
}

/// Read a single byte from a register
pub fn read_register_u8(
    fabric: &mut Fabric,
    fqa: Fqa,
    register: RegisterAddress,
    switch: Switch,
) -> Result<u8, ErrorLevel> {
    let mut buf = [0u8; 1];
    read_register(fabric, fqa, register, &mut buf, false, switch)?;
    Ok(buf[0])
}

/// Read a big-endian word from a register
pub fn read_register_u16(
    fabric: &mut Fabric,
    fqa: Fqa,
    register: RegisterAddress,
    switch: Switch,
) -> Result<u16, ErrorLevel> {
    let mut buf = [0u8; 2];
    read_register(fabric, fqa, register, &mut buf, false, switch)?;
    Ok(u16::from_be_bytes(buf))
}
