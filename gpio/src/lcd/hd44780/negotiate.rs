use crate::lcd::hd44780::{ConfigError, PinAssignment, Signal, TransferMode};

/// Decides the bus width from the assigned lines.
///
/// RS and EN are mandatory. All eight data lines give [TransferMode::EightBit]; DB4..DB7 alone
/// give [TransferMode::FourBit]. Anything else is rejected. RW is never looked at.
pub fn negotiate(assignment: &PinAssignment) -> Result<TransferMode, ConfigError> {
    for signal in [Signal::Rs, Signal::En] {
        if !assignment.is_assigned(signal) {
            return Err(ConfigError::MissingMandatoryPin(signal));
        }
    }

    let (low, high) = Signal::DATA.split_at(4);
    let assigned = |signals: &[Signal]| {
        signals
            .iter()
            .filter(|signal| assignment.is_assigned(**signal))
            .count()
    };

    match (assigned(low), assigned(high)) {
        (4, 4) => Ok(TransferMode::EightBit),
        (0, 4) => Ok(TransferMode::FourBit),
        _ => Err(ConfigError::UnsupportedPinCount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_data_mask(mask: u8) -> PinAssignment {
        let base = PinAssignment::new().with(Signal::Rs, 20).with(Signal::En, 21);
        Signal::DATA
            .iter()
            .enumerate()
            .filter(|(bit, _)| mask & (1 << bit) != 0)
            .fold(base, |assignment, (bit, signal)| assignment.with(*signal, bit))
    }

    #[test]
    fn truth_table_of_data_lines() {
        for mask in 0..=u8::MAX {
            let result = negotiate(&with_data_mask(mask));
            let expected = match mask {
                0xFF => Ok(TransferMode::EightBit),
                0xF0 => Ok(TransferMode::FourBit),
                _ => Err(ConfigError::UnsupportedPinCount),
            };
            assert_eq!(result, expected, "data mask {:08b}", mask);
        }
    }

    #[test]
    fn rs_and_en_are_mandatory() {
        let four_bit = with_data_mask(0xF0);
        assert_eq!(
            negotiate(&four_bit.without(Signal::Rs)),
            Err(ConfigError::MissingMandatoryPin(Signal::Rs))
        );
        assert_eq!(
            negotiate(&four_bit.without(Signal::En)),
            Err(ConfigError::MissingMandatoryPin(Signal::En))
        );
        // Mandatory lines are checked before the data lines
        assert_eq!(
            negotiate(&PinAssignment::new()),
            Err(ConfigError::MissingMandatoryPin(Signal::Rs))
        );
    }

    #[test]
    fn rw_does_not_change_the_mode() {
        let assignment = with_data_mask(0xF0).with(Signal::Rw, 30);
        assert_eq!(negotiate(&assignment), Ok(TransferMode::FourBit));
    }
}
