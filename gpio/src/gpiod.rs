//! GpiodDriver implementation for managing GPIO lines through the Linux GPIO character device.
//!
//! Every configured line is a separate line request held by the driver. The kernel lists them
//! with this crate's name as the consumer, which is what makes them visible to user-space tools
//! like `gpioinfo`, so [GpioChip::export] has nothing left to do.
use crate::{GpioBias, GpioChip, GpioError, GpioResult};
use log::trace;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

enum GpiodLine {
    Input(gpiod::Lines<gpiod::Input>),
    /// The last written value is cached, as output requests are never read back.
    Output(gpiod::Lines<gpiod::Output>, bool),
}

/// GpiodDriver is a GPIO driver that uses the gpiod library to manage GPIO lines.
pub struct GpiodDriver {
    chip: gpiod::Chip,
    lines: Mutex<HashMap<usize, GpiodLine>>,
}

impl GpiodDriver {
    pub fn new(chip: gpiod::Chip) -> Self {
        Self {
            chip,
            lines: Mutex::new(HashMap::new()),
        }
    }

    fn lines(&self) -> MutexGuard<'_, HashMap<usize, GpiodLine>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, index: usize) -> GpioResult<()> {
        if index >= self.count() {
            return Err(GpioError::InvalidPin(index));
        }
        Ok(())
    }
}

impl Debug for GpiodDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})", self.chip.name())
    }
}

impl From<GpioBias> for gpiod::Bias {
    fn from(bias: GpioBias) -> Self {
        match bias {
            GpioBias::None => gpiod::Bias::Disable,
            GpioBias::PullUp => gpiod::Bias::PullUp,
            GpioBias::PullDown => gpiod::Bias::PullDown,
        }
    }
}

impl GpioChip for GpiodDriver {
    fn count(&self) -> usize {
        self.chip.num_lines() as usize
    }

    fn configure_input(&self, index: usize, bias: GpioBias) -> GpioResult<()> {
        self.check(index)?;
        let mut lines = self.lines();
        // The previous request has to go first, or the kernel reports the line as busy
        lines.remove(&index);

        let line = self.chip.request_lines(
            gpiod::Options::input([index as u32])
                .consumer(env!("CARGO_PKG_NAME"))
                .bias(bias.into()),
        )?;
        lines.insert(index, GpiodLine::Input(line));
        trace!("{:?}[{}] requested as input", self, index);
        Ok(())
    }

    fn configure_output(&self, index: usize, initial: bool) -> GpioResult<()> {
        self.check(index)?;
        let mut lines = self.lines();
        lines.remove(&index);

        let line = self.chip.request_lines(
            gpiod::Options::output([index as u32])
                .values([initial])
                .consumer(env!("CARGO_PKG_NAME")),
        )?;
        lines.insert(index, GpiodLine::Output(line, initial));
        trace!("{:?}[{}] requested as output", self, index);
        Ok(())
    }

    fn write(&self, index: usize, value: bool) -> GpioResult<()> {
        match self.lines().get_mut(&index) {
            Some(GpiodLine::Output(line, last)) => {
                line.set_values([value])?;
                *last = value;
                Ok(())
            }
            Some(GpiodLine::Input(_)) => Err(GpioError::Direction(index)),
            None => Err(GpioError::InvalidArgument),
        }
    }

    fn read(&self, index: usize) -> GpioResult<bool> {
        match self.lines().get(&index) {
            Some(GpiodLine::Input(line)) => {
                let values = line.get_values([false])?;
                Ok(values[0])
            }
            Some(GpiodLine::Output(_, last)) => Ok(*last),
            None => Err(GpioError::InvalidArgument),
        }
    }

    fn reset(&self, index: usize) -> GpioResult<()> {
        // Dropping the request hands the line back to the kernel
        self.lines().remove(&index);
        Ok(())
    }
}
