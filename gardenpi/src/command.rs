//! Text commands of the form `<TARGET> <VALUE>`.
use crate::utils::WithinExt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Longest accepted target token, in bytes.
pub const TARGET_MAX: usize = 16;

pub const RELAY_COUNT: usize = 4;

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown target {0:?}")]
    UnknownTarget(String),
    #[error("missing value for {0}")]
    MissingValue(Target),
    #[error("invalid value {1:?} for {0}")]
    InvalidValue(Target, String),
    #[error("target is longer than 16 bytes")]
    TargetTooLong,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Target {
    Led,
    Button,
    Lcd,
    /// Numbered from 1.
    Relay(usize),
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Led => f.write_str("LED"),
            Target::Button => f.write_str("BUTTON"),
            Target::Lcd => f.write_str("LCD"),
            Target::Relay(n) => write!(f, "RELAY_{}", n),
        }
    }
}

impl FromStr for Target {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > TARGET_MAX {
            return Err(CommandError::TargetTooLong);
        }
        match s {
            "LED" => Ok(Target::Led),
            "BUTTON" => Ok(Target::Button),
            "LCD" => Ok(Target::Lcd),
            _ => s
                .strip_prefix("RELAY_")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| n.within(1..=RELAY_COUNT))
                .map(Target::Relay)
                .ok_or_else(|| CommandError::UnknownTarget(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Text for the display, possibly empty.
    Lcd(String),
    Led(u8),
    Button(u8),
    /// Relay number, from 1, and its value.
    Relay(usize, u8),
}

/// Parses a status value: decimal, or hexadecimal with a `0x` prefix.
fn parse_value(target: Target, value: &str) -> Result<u8, CommandError> {
    let invalid = || CommandError::InvalidValue(target, value.to_string());
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse::<u8>(),
    };
    parsed.map_err(|_| invalid())
}

impl FromStr for Command {
    type Err = CommandError;

    /// The target ends at the first space. For `LCD` everything after that space is the text,
    /// minus one trailing line break; for the other targets it must be a single number.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        if line.trim().is_empty() {
            return Err(CommandError::Empty);
        }

        let (token, rest) = match line.split_once(' ') {
            Some((token, rest)) => (token, Some(rest)),
            None => (line, None),
        };
        let target: Target = token.parse()?;

        let value = || {
            let value = rest
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or(CommandError::MissingValue(target))?;
            parse_value(target, value)
        };

        match target {
            Target::Lcd => Ok(Command::Lcd(rest.unwrap_or_default().to_string())),
            Target::Led => Ok(Command::Led(value()?)),
            Target::Button => Ok(Command::Button(value()?)),
            Target::Relay(n) => Ok(Command::Relay(n, value()?)),
        }
    }
}
