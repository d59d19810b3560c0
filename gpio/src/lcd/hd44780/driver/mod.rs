//! HD44780 instruction set and bus primitives.
//!
//! [HD44780Driver] has two halves. The required methods move bits over the bus and are provided by
//! the implementation ([GpioHD44780Driver] for a parallel bus on GPIO lines). Everything above
//! that, from clearing the display to selecting a row, is expressed once in terms of
//! [HD44780Driver::send_command] and [HD44780Driver::wait] as default methods.
//!
//! The controller's busy flag is never polled. Every instruction is followed by a fixed wait that
//! covers its worst-case execution time, see the constants in [timing].
//!
//! # Sources
//!
//! - Hitachi, [“HD44780U (LCD-II) Dot Matrix Liquid Crystal Display Controller/Driver,”](https://www.sparkfun.com/datasheets/LCD/HD44780.pdf)
//!   Table 6 (instructions) and Figures 23/24 (initialization by instruction).

mod gpio;

use crate::lcd::hd44780::{LcdResult, TransferMode};
use crate::GpioError;
pub use gpio::*;
use std::fmt::{Debug, Display, Formatter};
use std::ops::BitOr;
use std::time::Duration;

/// Fixed waits of the protocol.
pub mod timing {
    use std::time::Duration;

    /// RS and data lines stable before EN rises.
    pub const ENABLE_SETUP: Duration = Duration::from_micros(10);
    /// EN high time.
    pub const ENABLE_PULSE: Duration = Duration::from_micros(10);
    /// Between the two halves of a byte in 4-bit mode.
    pub const INTER_NIBBLE: Duration = Duration::from_millis(2);
    /// After every byte, covers the 37 µs of the common instructions.
    pub const BYTE_SETTLE: Duration = Duration::from_micros(50);
    /// Supply rise to first instruction.
    pub const POWER_ON: Duration = Duration::from_millis(50);
    /// After each of the three reset nibbles.
    pub const RESET: [Duration; 3] = [
        Duration::from_millis(5),
        Duration::from_micros(150),
        Duration::from_micros(150),
    ];
    pub const FUNCTION_LOCK: Duration = Duration::from_micros(50);
    pub const DISPLAY_OFF: Duration = Duration::from_micros(50);
    /// Clear display and return home take up to 1.52 ms.
    pub const CLEAR: Duration = Duration::from_millis(2);
    pub const FLAG_SETTLE: Duration = Duration::from_micros(100);
}

/// Level of the RS line for a transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegisterSelect {
    /// Instruction register, RS low.
    Command,
    /// Data register, RS high.
    Data,
}

impl RegisterSelect {
    pub fn level(self) -> bool {
        self == RegisterSelect::Data
    }
}

/// Where the engine is in its initialization sequence.
///
/// Only [ProtocolState::Ready] accepts transfers from the outside.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ProtocolState {
    #[default]
    Uninitialized,
    NegotiatingMode,
    Resetting,
    FunctionLocking,
    DisplayConfiguring,
    Cleared,
    Ready,
    Faulted,
}

impl Display for ProtocolState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Display on/off control bits. Always sent together.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DisplayFlags(u8);

impl DisplayFlags {
    pub const DISPLAY_OFF: DisplayFlags = DisplayFlags(0);
    pub const BLINK_ON: DisplayFlags = DisplayFlags(0b001);
    pub const CURSOR_ON: DisplayFlags = DisplayFlags(0b010);
    pub const DISPLAY_ON: DisplayFlags = DisplayFlags(0b100);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: DisplayFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Adds `other` if `enabled`.
    pub fn with(self, other: DisplayFlags, enabled: bool) -> DisplayFlags {
        if enabled { self | other } else { self }
    }
}

impl BitOr for DisplayFlags {
    type Output = DisplayFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        DisplayFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    /// Moves the cursor to the left after writing data.
    Left,
    /// Moves the cursor to the right after writing data.
    Right,
}

pub trait HD44780Driver: Debug {
    /// Runs the whole initialization sequence. Does nothing if the display is already ready.
    fn init(&mut self) -> LcdResult<()>;

    /// Releases the bus. The driver can be initialized again afterward.
    fn shutdown(&mut self);

    fn state(&self) -> ProtocolState;

    /// Bus width, known once the pin assignment has been negotiated.
    fn mode(&self) -> Option<TransferMode>;

    /// Puts the low four bits of `nibble` on DB4..DB7 and strobes EN.
    ///
    /// In 8-bit mode DB0..DB3 are held low.
    fn send_nibble(&mut self, nibble: u8, rs: RegisterSelect) -> LcdResult<()>;

    /// Transfers a whole byte: two nibbles high first in 4-bit mode, one strobe in 8-bit mode.
    fn send_byte(&mut self, byte: u8, rs: RegisterSelect) -> LcdResult<()>;

    /// Blocks for the given time.
    fn wait(&mut self, duration: Duration);

    fn send_command(&mut self, command: u8) -> LcdResult<()> {
        self.send_byte(command, RegisterSelect::Command)
    }

    fn send_char(&mut self, data: u8) -> LcdResult<()> {
        self.send_byte(data, RegisterSelect::Data)
    }

    /// Clears the display and sets the cursor to the home position.
    ///
    /// Command: `00000001`. Returns only after the clear is guaranteed to be done.
    fn clear(&mut self) -> LcdResult<()> {
        self.send_command(0b00000001)?;
        self.wait(timing::CLEAR);
        Ok(())
    }

    /// Command: `0000001?`.
    fn return_home(&mut self) -> LcdResult<()> {
        self.send_command(0b00000010)?;
        self.wait(timing::CLEAR);
        Ok(())
    }

    /// Command: `000001IS`.
    /// `I` is `1` when the cursor moves right, `S` shifts the whole display instead.
    fn set_entry_mode(&mut self, cursor_direction: CursorDirection, shift: bool) -> LcdResult<()> {
        let mut command = 0b00000100;
        if cursor_direction == CursorDirection::Right {
            command |= 0b00000010;
        }
        if shift {
            command |= 0b00000001;
        }
        self.send_command(command)
    }

    /// Display on/off control, command `00001DCB`, followed by a short settle.
    fn set_flags(&mut self, flags: DisplayFlags) -> LcdResult<()> {
        self.send_command(0b00001000 | flags.bits())?;
        self.wait(timing::FLAG_SETTLE);
        Ok(())
    }

    /// Command: `0001SR??`.
    fn cursor_shift(&mut self, display_shift: bool, direction: CursorDirection) -> LcdResult<()> {
        let mut command = 0b00010000;
        if display_shift {
            command |= 0b00001000;
        }
        if direction == CursorDirection::Right {
            command |= 0b00000100;
        }
        self.send_command(command)
    }

    /// Command: `001DNF??`. `D` selects the 8-bit bus, `N` two lines, `F` the 5x10 font.
    fn function_set(&mut self, eight_bit: bool, two_lines: bool, font: bool) -> LcdResult<()> {
        let mut command = 0b00100000;
        if eight_bit {
            command |= 0b00010000;
        }
        if two_lines {
            command |= 0b00001000;
        }
        if font {
            command |= 0b00000100;
        }
        self.send_command(command)
    }

    /// Command: `01AAAAAA`.
    fn set_cgram_address(&mut self, address: u8) -> LcdResult<()> {
        if address > 0b00111111 {
            return Err(GpioError::InvalidArgument.into());
        }
        self.send_command(0b01000000 | address)
    }

    /// Command: `1AAAAAAA`.
    fn set_ddram_address(&mut self, address: u8) -> LcdResult<()> {
        if address > 0b01111111 {
            return Err(GpioError::InvalidArgument.into());
        }
        self.send_command(0b10000000 | address)
    }

    /// Moves the cursor to the start of row 1 or 2. Other rows are ignored.
    fn select_row(&mut self, row: usize) -> LcdResult<()> {
        match row {
            1 => self.set_ddram_address(0x00),
            2 => self.set_ddram_address(0x40),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = DisplayFlags::DISPLAY_ON | DisplayFlags::CURSOR_ON;
        assert_eq!(flags.bits(), 0b110);
        assert!(flags.contains(DisplayFlags::DISPLAY_ON));
        assert!(!flags.contains(DisplayFlags::BLINK_ON));
        assert_eq!(
            DisplayFlags::DISPLAY_ON.with(DisplayFlags::BLINK_ON, true).bits(),
            0b101
        );
        assert_eq!(DisplayFlags::DISPLAY_ON.with(DisplayFlags::BLINK_ON, false).bits(), 0b100);
    }

    #[test]
    fn register_select_levels() {
        assert!(!RegisterSelect::Command.level());
        assert!(RegisterSelect::Data.level());
    }
}
