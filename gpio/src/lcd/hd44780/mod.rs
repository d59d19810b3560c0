//! HD44780 character LCD over GPIO.
//!
//! The stack, from the bottom up:
//! - [PinAssignment] maps the bus [Signal]s to GPIO lines.
//! - [negotiate] checks the assignment and picks the [TransferMode].
//! - [driver::GpioHD44780Driver] acquires the lines through the [PinManager](crate::pins::PinManager)
//!   and runs the protocol: initialization state machine, nibble and byte transfers.
//! - [DisplayWriter] lays text out on the two rows of the panel.
//! - [LcdDevice] lets one user at a time write to the display and read back what was written.
//!
//! The panel is assumed to be 2x16. Nothing is ever read back from it, RW is only held low.

pub mod driver;
mod assignment;
mod device;
mod negotiate;
mod writer;

use crate::GpioError;
pub use assignment::*;
pub use device::*;
use driver::ProtocolState;
pub use negotiate::negotiate;
use thiserror::Error;
pub use writer::*;

/// Bus width.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferMode {
    /// DB4..DB7, every byte in two halves.
    FourBit,
    /// DB0..DB7.
    EightBit,
}

/// Problems with the pin assignment. Nothing is retried, the configuration has to be fixed.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ConfigError {
    #[error("mandatory signal {0} is not assigned")]
    MissingMandatoryPin(Signal),
    #[error("data lines must be DB0..DB7 or DB4..DB7")]
    UnsupportedPinCount,
    #[error("invalid pin number {1} for {0}")]
    InvalidPinNumber(Signal, i64),
    #[error("cannot parse pin number {1:?} for {0}")]
    Unparsable(Signal, String),
}

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum LcdError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),
    #[error("display is not ready ({0})")]
    NotReady(ProtocolState),
    #[error("display is faulted and has to be reinitialized")]
    Faulted,
}

pub type LcdResult<T> = Result<T, LcdError>;
