//! GPIO outputs.
//!
//! `GpioOutput` names a pin number from the configuration but has no
//! driver behind it: set-up always fails, so a configuration using it is
//! rejected before the loop runs.  Real pins plug in through
//! [`PinOutput`], which wraps any `embedded_hal` output pin.

use embedded_hal::digital::{OutputPin, PinState};
use log::{error, warn};

use super::Output;
use crate::error::OutputError;

// ---------------------------------------------------------------------------
// Configured pin stub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GpioOutput {
    name: String,
    pin: u32,
}

impl GpioOutput {
    pub fn new(name: impl Into<String>, pin: u32) -> Self {
        Self {
            name: name.into(),
            pin,
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

impl Output for GpioOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_up(&mut self) -> Result<(), OutputError> {
        warn!("Output {}: no GPIO driver for pin {}", self.name, self.pin);
        Err(OutputError::Unsupported("GPIO pin output"))
    }

    fn tear_down(&mut self) {}

    fn value(&self) -> bool {
        false
    }

    fn set_value(&mut self, _value: bool) {}
}

// ---------------------------------------------------------------------------
// embedded-hal adapter
// ---------------------------------------------------------------------------

/// Output backed by an `embedded_hal::digital::OutputPin`.
///
/// The commanded level is cached: `value()` takes `&self`, while reading a
/// pin back through embedded-hal needs `&mut`.
pub struct PinOutput<P> {
    name: String,
    pin: P,
    level: bool,
}

impl<P: OutputPin> PinOutput<P> {
    pub fn new(name: impl Into<String>, pin: P) -> Self {
        Self {
            name: name.into(),
            pin,
            level: false,
        }
    }

    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> Output for PinOutput<P> {
    fn name(&self) -> &str {
        &self.name
    }

    /// Drive the pin low so it starts from the same state as `level`.
    fn set_up(&mut self) -> Result<(), OutputError> {
        self.pin.set_low().map_err(|e| {
            error!("Output {}: pin set-up failed: {e:?}", self.name);
            OutputError::Unsupported("pin refused initial level")
        })?;
        self.level = false;
        Ok(())
    }

    fn tear_down(&mut self) {
        self.set_value(false);
    }

    fn value(&self) -> bool {
        self.level
    }

    fn set_value(&mut self, value: bool) {
        match self.pin.set_state(PinState::from(value)) {
            Ok(()) => self.level = value,
            Err(e) => error!("Output {}: pin write failed: {e:?}", self.name),
        }
    }
}
