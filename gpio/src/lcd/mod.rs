//! Character LCD support.
//!
//! Only the HD44780 family is implemented, driven over plain GPIO lines. See [hd44780] for the
//! layering of the stack.
pub mod hd44780;
