use crate::lcd::hd44780::{ConfigError, TransferMode};
use crate::pins::PinRequest;
use std::fmt::{Display, Formatter};

/// A logical line of the HD44780 parallel bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Signal {
    Rs,
    Rw,
    En,
    Db0,
    Db1,
    Db2,
    Db3,
    Db4,
    Db5,
    Db6,
    Db7,
}

impl Signal {
    pub const ALL: [Signal; 11] = [
        Signal::Rs,
        Signal::Rw,
        Signal::En,
        Signal::Db0,
        Signal::Db1,
        Signal::Db2,
        Signal::Db3,
        Signal::Db4,
        Signal::Db5,
        Signal::Db6,
        Signal::Db7,
    ];

    /// Data lines, DBn at position n.
    pub const DATA: [Signal; 8] = [
        Signal::Db0,
        Signal::Db1,
        Signal::Db2,
        Signal::Db3,
        Signal::Db4,
        Signal::Db5,
        Signal::Db6,
        Signal::Db7,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Signal::Rs => "RS",
            Signal::Rw => "RW",
            Signal::En => "EN",
            Signal::Db0 => "DB0",
            Signal::Db1 => "DB1",
            Signal::Db2 => "DB2",
            Signal::Db3 => "DB3",
            Signal::Db4 => "DB4",
            Signal::Db5 => "DB5",
            Signal::Db6 => "DB6",
            Signal::Db7 => "DB7",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which GPIO line carries which [Signal].
///
/// Built once from configuration and never changed afterward. Whether the combination is usable
/// is decided by [negotiate](super::negotiate), not here.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PinAssignment {
    pins: [Option<usize>; 11],
}

impl PinAssignment {
    /// Parameter value meaning "not connected".
    pub const UNSET: i64 = -1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, signal: Signal, pin: usize) -> Self {
        self.pins[signal.slot()] = Some(pin);
        self
    }

    pub fn without(mut self, signal: Signal) -> Self {
        self.pins[signal.slot()] = None;
        self
    }

    pub fn get(&self, signal: Signal) -> Option<usize> {
        self.pins[signal.slot()]
    }

    pub fn is_assigned(&self, signal: Signal) -> bool {
        self.get(signal).is_some()
    }

    /// RS, EN and DB4..DB7.
    pub fn four_bit(rs: usize, en: usize, data: [usize; 4]) -> Self {
        let assignment = Self::new().with(Signal::Rs, rs).with(Signal::En, en);
        Signal::DATA[4..]
            .iter()
            .zip(data)
            .fold(assignment, |assignment, (signal, pin)| assignment.with(*signal, pin))
    }

    /// RS, EN and DB0..DB7.
    pub fn eight_bit(rs: usize, en: usize, data: [usize; 8]) -> Self {
        let assignment = Self::new().with(Signal::Rs, rs).with(Signal::En, en);
        Signal::DATA
            .iter()
            .zip(data)
            .fold(assignment, |assignment, (signal, pin)| assignment.with(*signal, pin))
    }

    /// Builds an assignment from one integer parameter per signal.
    ///
    /// [Self::UNSET] leaves the signal unassigned, any other negative number is rejected.
    pub fn from_params(params: &[(Signal, i64)]) -> Result<Self, ConfigError> {
        let mut assignment = Self::new();
        for &(signal, value) in params {
            assignment = match value {
                Self::UNSET => assignment.without(signal),
                value if value < 0 => return Err(ConfigError::InvalidPinNumber(signal, value)),
                value => assignment.with(signal, value as usize),
            };
        }
        Ok(assignment)
    }

    /// Builds an assignment from textual parameters, looked up per signal.
    ///
    /// Missing and blank values are unset.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(Signal) -> Option<String>,
    {
        let mut params = Vec::new();
        for signal in Signal::ALL {
            let Some(raw) = lookup(signal) else { continue };
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let value = raw
                .parse::<i64>()
                .map_err(|_| ConfigError::Unparsable(signal, raw.to_string()))?;
            params.push((signal, value));
        }
        Self::from_params(&params)
    }

    /// Lines to acquire for the given mode: RS, RW if present, EN, then the data lines in order.
    pub fn requests(&self, mode: TransferMode) -> Vec<PinRequest> {
        let data = match mode {
            TransferMode::FourBit => &Signal::DATA[4..],
            TransferMode::EightBit => &Signal::DATA[..],
        };
        [Signal::Rs, Signal::Rw, Signal::En]
            .iter()
            .chain(data)
            .filter_map(|&signal| {
                self.get(signal)
                    .map(|pin| PinRequest::output(signal.name(), pin))
            })
            .collect()
    }
}

impl Display for PinAssignment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for signal in Signal::ALL {
            if let Some(pin) = self.get(signal) {
                if !first {
                    f.write_str(" ")?;
                }
                write!(f, "{}={}", signal, pin)?;
                first = false;
            }
        }
        Ok(())
    }
}
