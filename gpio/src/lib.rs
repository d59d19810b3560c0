pub mod debounce;
pub mod delay;
pub mod gpiod;
pub mod lcd;
pub mod mock;
pub mod pins;
pub mod raw;
pub mod sysfs;

use std::fmt::Debug;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("pin {0} is already owned")]
    AlreadyOwned(usize),
    #[error("pin {0} is outside the valid range")]
    InvalidPin(usize),
    #[error("pin {0} has already been released")]
    Released(usize),
    #[error("exporting pin {0} failed")]
    Export(usize),
    #[error("setting the direction of pin {0} failed")]
    Direction(usize),
    #[error("invalid argument")]
    InvalidArgument,
    #[error("the feature is not supported on this backend")]
    NotSupported,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
    #[error("error: {0}")]
    Other(String),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

/// Direction a line is fixed to when it gets acquired.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GpioDirection {
    Input,
    Output,
}

/// Specifies the active level of a GPIO line.
///
/// By default, the active level is high.
///
/// Always software-implemented, the chips only ever see the physical level.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioActiveLevel {
    #[default] High,
    Low,
}

impl GpioActiveLevel {
    /// Gets the real state that will be outputted on the GPIO pin based on the active level and the value.
    ///
    /// The mapping is its own inverse, so it also turns a physical level back into a logical one.
    pub fn get_state(&self, value: bool) -> bool {
        match self {
            GpioActiveLevel::High => value,
            GpioActiveLevel::Low => !value,
        }
    }
}

/// Specifies the bias of the GPIO pin.
///
/// You can use this to enable pull-up or pull-down resistors on input lines.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioBias {
    #[default] None,
    PullUp,
    PullDown,
}

/// Low-level access to a bank of GPIO lines.
///
/// Implementations do not track ownership, that is the job of the [pins::PinManager] sitting on
/// top of them. Every method addresses a line by its index on the chip.
pub trait GpioChip: Debug + Send + Sync {
    /// Gets the amount of GPIO lines available.
    fn count(&self) -> usize;

    /// Sets the line function to input with the given bias.
    fn configure_input(&self, index: usize, bias: GpioBias) -> GpioResult<()>;

    /// Sets the line function to output, driving it to `initial` right away.
    fn configure_output(&self, index: usize, initial: bool) -> GpioResult<()>;

    /// Drives an output line.
    fn write(&self, index: usize, value: bool) -> GpioResult<()>;

    /// Reads the physical level of a line.
    fn read(&self, index: usize) -> GpioResult<bool>;

    /// Puts the line back into its idle state (input, no bias).
    fn reset(&self, index: usize) -> GpioResult<()>;

    /// Makes the line visible to user space.
    fn export(&self, _index: usize) -> GpioResult<()> {
        Ok(())
    }

    /// Undoes [GpioChip::export].
    fn unexport(&self, _index: usize) -> GpioResult<()> {
        Ok(())
    }
}

/// Selects one of the available [GpioChip] implementations.
///
/// Parsed from strings like `raw`, `mem`, `gpiod`, `gpiod:/dev/gpiochip4` or `mock:32`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioBackend {
    /// Register access through `/dev/gpiomem`.
    #[default]
    Raw,
    /// Register access through `/dev/mem`, needs root.
    RawMem,
    /// The GPIO character device at the given path.
    Gpiod(PathBuf),
    /// In-memory lines, nothing is touched.
    Mock(usize),
}

impl GpioBackend {
    const DEFAULT_CHIP: &'static str = "/dev/gpiochip0";
    const DEFAULT_MOCK_LINES: usize = 58;

    /// Opens the backend.
    ///
    /// `sysfs_export` enables exporting through `/sys/class/gpio` on the raw backends;
    /// the other backends ignore it.
    pub fn open(&self, sysfs_export: bool) -> GpioResult<Box<dyn GpioChip>> {
        let chip: Box<dyn GpioChip> = match self {
            GpioBackend::Raw | GpioBackend::RawMem => {
                let driver = match self {
                    GpioBackend::RawMem => raw::RawGpioDriver::new_mem()?,
                    _ => raw::RawGpioDriver::new_gpiomem()?,
                };
                if sysfs_export {
                    Box::new(driver.with_exporter(sysfs::SysfsExporter::new()))
                } else {
                    Box::new(driver)
                }
            }
            GpioBackend::Gpiod(path) => {
                Box::new(gpiod::GpiodDriver::new(::gpiod::Chip::new(path)?))
            }
            GpioBackend::Mock(count) => Box::new(mock::MockChip::new(*count)),
        };
        Ok(chip)
    }
}

impl FromStr for GpioBackend {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = match s.trim().split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s.trim(), None),
        };

        match (kind, arg) {
            ("raw", None) => Ok(GpioBackend::Raw),
            ("mem", None) => Ok(GpioBackend::RawMem),
            ("gpiod", path) => Ok(GpioBackend::Gpiod(PathBuf::from(
                path.unwrap_or(Self::DEFAULT_CHIP),
            ))),
            ("mock", None) => Ok(GpioBackend::Mock(Self::DEFAULT_MOCK_LINES)),
            ("mock", Some(count)) => count
                .parse()
                .map(GpioBackend::Mock)
                .map_err(|_| GpioError::Other(format!("invalid mock line count: {count}"))),
            _ => Err(GpioError::Other(format!("unknown GPIO backend: {s}"))),
        }
    }
}
