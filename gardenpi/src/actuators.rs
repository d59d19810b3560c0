use gardenpi_gpio::pins::{PinHandle, PinManager};
use gardenpi_gpio::{GpioActiveLevel, GpioResult};
use log::debug;

/// An on/off output with its wiring polarity.
#[derive(Debug)]
pub struct Actuator {
    handle: PinHandle,
    active_level: GpioActiveLevel,
}

impl Actuator {
    pub fn new(handle: PinHandle, active_level: GpioActiveLevel) -> Self {
        Actuator {
            handle,
            active_level,
        }
    }

    /// The LED lights when its line is high.
    pub fn led(handle: PinHandle) -> Self {
        Self::new(handle, GpioActiveLevel::High)
    }

    /// Relay boards of the appliance switch on a low input.
    pub fn relay(handle: PinHandle) -> Self {
        Self::new(handle, GpioActiveLevel::Low)
    }

    pub fn set(&self, pins: &PinManager, on: bool) -> GpioResult<()> {
        debug!("{} on pin {} -> {}", self.handle.label(), self.handle.index(), on);
        pins.set(&self.handle, self.active_level.get_state(on))
    }

    pub fn handle_mut(&mut self) -> &mut PinHandle {
        &mut self.handle
    }
}
