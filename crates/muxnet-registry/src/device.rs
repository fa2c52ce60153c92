//! Devices and their capabilities
//!
//! A [`Device`] is one addressable peripheral. What it can *do* is carried
//! by two independent, optional capability slots:
//!
//! - [`Input`] - reads from the device into a cached [`Value`]
//! - [`Output`] - writes a [`Value`] to the device
//!
//! Drivers implement one or both traits. Values and arguments are JSON
//! values so a module can run update cycles over every device without
//! knowing concrete driver types; typed access goes through
//! [`Device::input_as`] / [`Device::output_as`].

use serde_json::Value;
use std::any::Any;
use std::time::Duration;

use muxnet_bus::{primitives, Fabric, RegisterAddress, Switch};
use muxnet_core::{ErrorLevel, Fqa};

/// Where a capability call lands on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Device address
    pub fqa: Fqa,
    /// Whether the call switches the multiplexer itself
    pub switch: Switch,
}

impl Endpoint {
    /// Endpoint that brackets its own transactions
    pub fn bracketed(fqa: Fqa) -> Self {
        Self {
            fqa,
            switch: Switch::BRACKETED,
        }
    }

    /// Endpoint on an already-routed sub-bus
    pub fn routed(fqa: Fqa) -> Self {
        Self {
            fqa,
            switch: Switch::ROUTED,
        }
    }
}

/// Read capability
pub trait Input: Send {
    /// Read from the device, refreshing the cached value
    fn get(&mut self, fabric: &mut Fabric, endpoint: Endpoint, args: &Value) -> ErrorLevel;

    /// Value cached by the last successful [`Input::get`]
    fn value(&self) -> &Value;

    /// Arguments used when the caller supplies none
    fn default_args(&self) -> Value {
        Value::Null
    }

    /// Forget the cached value
    fn reset_cache(&mut self);

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcasting support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Write capability
pub trait Output: Send {
    /// Write a value to the device
    fn set(
        &mut self,
        fabric: &mut Fabric,
        endpoint: Endpoint,
        value: &Value,
        args: &Value,
    ) -> ErrorLevel;

    /// Value that puts the device into a safe state
    fn failsafe_value(&self) -> Value;

    /// Arguments used when the caller supplies none
    fn default_args(&self) -> Value {
        Value::Null
    }

    /// Write the failsafe value with default arguments
    fn reset(&mut self, fabric: &mut Fabric, endpoint: Endpoint) -> ErrorLevel {
        let value = self.failsafe_value();
        let args = self.default_args();
        self.set(fabric, endpoint, &value, &args)
    }

    /// Downcasting support
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcasting support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// One addressable peripheral
pub struct Device {
    fqa: Fqa,
    identifier: String,
    input: Option<Box<dyn Input>>,
    output: Option<Box<dyn Output>>,
    staged: Option<Value>,
    ready: bool,
}

impl Device {
    /// Bare device with no capabilities
    pub fn new(fqa: Fqa, identifier: impl Into<String>) -> Self {
        Self {
            fqa,
            identifier: identifier.into(),
            input: None,
            output: None,
            staged: None,
            ready: true,
        }
    }

    /// Builder-style [`Device::set_input`]
    pub fn with_input(mut self, input: impl Input + 'static) -> Self {
        self.set_input(Box::new(input));
        self
    }

    /// Builder-style [`Device::set_output`]
    pub fn with_output(mut self, output: impl Output + 'static) -> Self {
        self.set_output(Box::new(output));
        self
    }

    /// Device address
    pub fn fqa(&self) -> Fqa {
        self.fqa
    }

    /// Logical identifier shared by devices of the same kind
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether the last check found the device reachable
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub(crate) fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    // ===== Capability slots =====

    /// Install an input capability, dropping any previous one
    pub fn set_input(&mut self, input: Box<dyn Input>) -> Option<Box<dyn Input>> {
        self.input.replace(input)
    }

    /// Install an output capability, dropping any previous one
    pub fn set_output(&mut self, output: Box<dyn Output>) -> Option<Box<dyn Output>> {
        self.output.replace(output)
    }

    /// Remove the input capability
    pub fn take_input(&mut self) -> Option<Box<dyn Input>> {
        self.input.take()
    }

    /// Remove the output capability
    pub fn take_output(&mut self) -> Option<Box<dyn Output>> {
        self.output.take()
    }

    /// Whether an input capability is installed
    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    /// Whether an output capability is installed
    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// The input capability as its concrete driver type
    pub fn input_as<T: Input + 'static>(&self) -> Option<&T> {
        self.input.as_ref()?.as_any().downcast_ref::<T>()
    }

    /// Mutable [`Device::input_as`]
    pub fn input_as_mut<T: Input + 'static>(&mut self) -> Option<&mut T> {
        self.input.as_mut()?.as_any_mut().downcast_mut::<T>()
    }

    /// The output capability as its concrete driver type
    pub fn output_as<T: Output + 'static>(&self) -> Option<&T> {
        self.output.as_ref()?.as_any().downcast_ref::<T>()
    }

    /// Mutable [`Device::output_as`]
    pub fn output_as_mut<T: Output + 'static>(&mut self) -> Option<&mut T> {
        self.output.as_mut()?.as_any_mut().downcast_mut::<T>()
    }

    // ===== Capability dispatch =====

    /// Read through the input capability (Soft if there is none)
    ///
    /// `None` arguments fall back to the driver's defaults.
    pub fn get(&mut self, fabric: &mut Fabric, args: Option<&Value>, switch: Switch) -> ErrorLevel {
        let endpoint = Endpoint {
            fqa: self.fqa,
            switch,
        };
        let Some(input) = self.input.as_mut() else {
            return ErrorLevel::Soft;
        };
        match args {
            Some(args) => input.get(fabric, endpoint, args),
            None => {
                let args = input.default_args();
                input.get(fabric, endpoint, &args)
            }
        }
    }

    /// Write through the output capability (Soft if there is none)
    pub fn set(
        &mut self,
        fabric: &mut Fabric,
        value: &Value,
        args: Option<&Value>,
        switch: Switch,
    ) -> ErrorLevel {
        let endpoint = Endpoint {
            fqa: self.fqa,
            switch,
        };
        let Some(output) = self.output.as_mut() else {
            return ErrorLevel::Soft;
        };
        match args {
            Some(args) => output.set(fabric, endpoint, value, args),
            None => {
                let args = output.default_args();
                output.set(fabric, endpoint, value, &args)
            }
        }
    }

    /// Put the output into its failsafe state (Soft if there is no output)
    pub fn reset(&mut self, fabric: &mut Fabric, switch: Switch) -> ErrorLevel {
        let endpoint = Endpoint {
            fqa: self.fqa,
            switch,
        };
        match self.output.as_mut() {
            Some(output) => output.reset(fabric, endpoint),
            None => ErrorLevel::Soft,
        }
    }

    /// Cached input value, if there is an input
    pub fn value(&self) -> Option<&Value> {
        self.input.as_ref().map(|input| input.value())
    }

    /// Forget the input's cached value
    pub fn reset_cache(&mut self) {
        if let Some(input) = self.input.as_mut() {
            input.reset_cache();
        }
    }

    /// Queue a value for the next update cycle's write
    pub fn stage(&mut self, value: Value) {
        self.staged = Some(value);
    }

    /// Value the next update cycle will write
    ///
    /// The staged value, else the output's failsafe value.
    pub fn pending_value(&self) -> Option<Value> {
        let output = self.output.as_ref()?;
        Some(
            self.staged
                .clone()
                .unwrap_or_else(|| output.failsafe_value()),
        )
    }

    // ===== Bus wrappers =====

    /// [`primitives::ping`] at this device's address
    pub fn ping(&self, fabric: &mut Fabric, reset_bus: bool) -> ErrorLevel {
        primitives::ping(fabric, self.fqa, reset_bus)
    }

    /// [`primitives::ping_with_timeout`] at this device's address
    pub fn ping_with_timeout(
        &self,
        fabric: &mut Fabric,
        switch: Switch,
        timeout: Duration,
    ) -> ErrorLevel {
        primitives::ping_with_timeout(fabric, self.fqa, switch, timeout)
    }

    /// [`primitives::write_register`] at this device's address
    pub fn write_register(
        &self,
        fabric: &mut Fabric,
        register: RegisterAddress,
        bytes: &[u8],
        switch: Switch,
    ) -> ErrorLevel {
        primitives::write_register(fabric, self.fqa, register, bytes, switch)
    }

    /// [`primitives::read_register`] at this device's address
    pub fn read_register(
        &self,
        fabric: &mut Fabric,
        register: RegisterAddress,
        buf: &mut [u8],
        null_terminated: bool,
        switch: Switch,
    ) -> Result<usize, ErrorLevel> {
        primitives::read_register(fabric, self.fqa, register, buf, null_terminated, switch)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("fqa", &self.fqa)
            .field("identifier", &self.identifier)
            .field("input", &self.input.is_some())
            .field("output", &self.output.is_some())
            .field("ready", &self.ready)
            .finish()
    }
}
