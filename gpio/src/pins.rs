//! Ownership of GPIO lines.
//!
//! The [PinManager] hands out [PinHandle]s for lines of a single [GpioChip] and makes sure no line
//! is owned twice. It knows nothing about what the lines are used for.
use crate::{GpioBias, GpioChip, GpioDirection, GpioError, GpioResult};
use bitvec::vec::BitVec;
use log::{debug, warn};
use std::fmt::{Debug, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Describes a line to acquire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinRequest {
    pub label: &'static str,
    pub index: usize,
    pub direction: GpioDirection,
    pub bias: GpioBias,
}

impl PinRequest {
    /// An output line, initialized low.
    pub fn output(label: &'static str, index: usize) -> Self {
        PinRequest {
            label,
            index,
            direction: GpioDirection::Output,
            bias: GpioBias::None,
        }
    }

    pub fn input(label: &'static str, index: usize) -> Self {
        PinRequest {
            label,
            index,
            direction: GpioDirection::Input,
            bias: GpioBias::None,
        }
    }

    pub fn with_bias(mut self, bias: GpioBias) -> Self {
        self.bias = bias;
        self
    }
}

/// Proof of ownership of a single line, returned by [PinManager::acquire].
///
/// Handles are released explicitly through [PinManager::release]; releasing twice does nothing.
#[derive(Debug, Eq, PartialEq)]
pub struct PinHandle {
    label: &'static str,
    index: usize,
    direction: GpioDirection,
    released: bool,
}

impl PinHandle {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn direction(&self) -> GpioDirection {
        self.direction
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

pub struct PinManager {
    chip: Box<dyn GpioChip>,
    owned: Mutex<BitVec>,
}

impl PinManager {
    pub fn new(chip: Box<dyn GpioChip>) -> Self {
        let count = chip.count();
        PinManager {
            chip,
            owned: Mutex::new(BitVec::repeat(false, count)),
        }
    }

    fn owned(&self) -> MutexGuard<'_, BitVec> {
        self.owned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self) -> usize {
        self.chip.count()
    }

    pub fn is_owned(&self, index: usize) -> bool {
        self.owned().get(index).is_some_and(|bit| *bit)
    }

    /// Number of lines currently owned.
    pub fn owned_count(&self) -> usize {
        self.owned().count_ones()
    }

    /// Takes exclusive ownership of a line, exports it and fixes its direction.
    ///
    /// Output lines start low. On failure the line is left unowned.
    ///
    /// # Errors
    /// - `GpioError::InvalidPin` if the index is outside the chip.
    /// - `GpioError::AlreadyOwned` if another handle owns the line.
    /// - `GpioError::Direction` / `GpioError::Export` if the chip refuses the line.
    pub fn acquire(&self, request: PinRequest) -> GpioResult<PinHandle> {
        let index = request.index;
        if index >= self.count() {
            return Err(GpioError::InvalidPin(index));
        }

        {
            let mut owned = self.owned();
            if owned[index] {
                return Err(GpioError::AlreadyOwned(index));
            }
            owned.set(index, true);
        }

        let configured = match request.direction {
            GpioDirection::Input => self.chip.configure_input(index, request.bias),
            GpioDirection::Output => self.chip.configure_output(index, false),
        };
        if let Err(err) = configured {
            warn!("Configuring {} on pin {} failed: {}", request.label, index, err);
            self.disown(index);
            return Err(GpioError::Direction(index));
        }

        if let Err(err) = self.chip.export(index) {
            warn!("Exporting {} on pin {} failed: {}", request.label, index, err);
            if let Err(err) = self.chip.reset(index) {
                warn!("Resetting {} on pin {} failed: {}", request.label, index, err);
            }
            self.disown(index);
            return Err(GpioError::Export(index));
        }

        debug!("Acquired {} on pin {} as {:?}", request.label, index, request.direction);

        Ok(PinHandle {
            label: request.label,
            index,
            direction: request.direction,
            released: false,
        })
    }

    /// Acquires all the requested lines, or none of them.
    ///
    /// If any line fails, the lines acquired so far are released in reverse order before the
    /// error is returned.
    pub fn acquire_group(&self, requests: &[PinRequest]) -> GpioResult<Vec<PinHandle>> {
        let mut handles = Vec::with_capacity(requests.len());
        for &request in requests {
            match self.acquire(request) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    warn!(
                        "Acquiring {} failed, rolling back {} pin(s)",
                        request.label,
                        handles.len()
                    );
                    self.release_group(&mut handles);
                    return Err(err);
                }
            }
        }
        Ok(handles)
    }

    /// Un-exports and frees the line. Does nothing if the handle was already released.
    pub fn release(&self, handle: &mut PinHandle) {
        if handle.released {
            return;
        }

        if let Err(err) = self.chip.unexport(handle.index) {
            warn!("Unexporting {} on pin {} failed: {}", handle.label, handle.index, err);
        }
        if let Err(err) = self.chip.reset(handle.index) {
            warn!("Resetting {} on pin {} failed: {}", handle.label, handle.index, err);
        }
        self.disown(handle.index);
        handle.released = true;

        debug!("Released {} on pin {}", handle.label, handle.index);
    }

    /// Releases the handles in reverse order.
    pub fn release_group(&self, handles: &mut [PinHandle]) {
        for handle in handles.iter_mut().rev() {
            self.release(handle);
        }
    }

    /// Drives an output line. No delay is involved.
    pub fn set(&self, handle: &PinHandle, value: bool) -> GpioResult<()> {
        if handle.released {
            return Err(GpioError::Released(handle.index));
        }
        if handle.direction != GpioDirection::Output {
            return Err(GpioError::Direction(handle.index));
        }
        self.chip.write(handle.index, value)
    }

    /// Reads the physical level of a line.
    pub fn get(&self, handle: &PinHandle) -> GpioResult<bool> {
        if handle.released {
            return Err(GpioError::Released(handle.index));
        }
        self.chip.read(handle.index)
    }

    fn disown(&self, index: usize) {
        self.owned().set(index, false);
    }
}

impl Debug for PinManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PinManager({:?}, {} owned)", self.chip, self.owned_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BusEvent, MockChip};

    fn manager(count: usize) -> (MockChip, PinManager) {
        let chip = MockChip::new(count);
        (chip.clone(), PinManager::new(Box::new(chip)))
    }

    #[test]
    fn acquire_configures_exports_and_owns() {
        let (chip, pins) = manager(8);

        let out = pins.acquire(PinRequest::output("EN", 3)).unwrap();
        let input = pins
            .acquire(PinRequest::input("BUTTON", 5).with_bias(GpioBias::PullUp))
            .unwrap();

        assert_eq!(out.index(), 3);
        assert_eq!(input.direction(), GpioDirection::Input);
        assert!(pins.is_owned(3) && pins.is_owned(5));
        assert!(chip.is_exported(3) && chip.is_exported(5));
        assert!(chip.journal().events().contains(&BusEvent::ConfigureOutput {
            index: 3,
            initial: false
        }));
        assert!(chip.journal().events().contains(&BusEvent::ConfigureInput {
            index: 5,
            bias: GpioBias::PullUp
        }));
    }

    #[test]
    fn rejects_out_of_range_and_owned_pins() {
        let (_, pins) = manager(4);

        assert_eq!(pins.acquire(PinRequest::output("RS", 4)), Err(GpioError::InvalidPin(4)));

        let _rs = pins.acquire(PinRequest::output("RS", 1)).unwrap();
        assert_eq!(pins.acquire(PinRequest::output("EN", 1)), Err(GpioError::AlreadyOwned(1)));
    }

    #[test]
    fn failed_configuration_leaves_pin_unowned() {
        let chip = MockChip::new(4).fail_configure_on(2);
        let pins = PinManager::new(Box::new(chip));

        assert_eq!(pins.acquire(PinRequest::output("DB4", 2)), Err(GpioError::Direction(2)));
        assert!(!pins.is_owned(2));
    }

    #[test]
    fn failed_export_resets_the_line() {
        let chip = MockChip::new(4).fail_export_on(1);
        let pins = PinManager::new(Box::new(chip.clone()));

        assert_eq!(pins.acquire(PinRequest::output("RS", 1)), Err(GpioError::Export(1)));
        assert!(!pins.is_owned(1));
        assert!(chip.journal().events().contains(&BusEvent::Reset { index: 1 }));
    }

    #[test]
    fn release_is_idempotent() {
        let (chip, pins) = manager(4);
        let mut handle = pins.acquire(PinRequest::output("EN", 0)).unwrap();

        pins.release(&mut handle);
        pins.release(&mut handle);

        assert!(handle.is_released());
        assert!(!pins.is_owned(0));
        assert!(!chip.is_exported(0));
        let resets = chip
            .journal()
            .events()
            .iter()
            .filter(|event| **event == BusEvent::Reset { index: 0 })
            .count();
        assert_eq!(resets, 1);
        assert_eq!(pins.set(&handle, true), Err(GpioError::Released(0)));
    }

    #[test]
    fn group_rolls_back_in_reverse_order() {
        let (chip, pins) = manager(8);
        let _taken = pins.acquire(PinRequest::output("OTHER", 6)).unwrap();
        chip.journal().clear();

        let result = pins.acquire_group(&[
            PinRequest::output("RS", 1),
            PinRequest::output("EN", 2),
            PinRequest::output("DB4", 3),
            PinRequest::output("DB5", 6),
        ]);

        assert_eq!(result, Err(GpioError::AlreadyOwned(6)));
        assert_eq!(pins.owned_count(), 1);
        let resets: Vec<usize> = chip
            .journal()
            .events()
            .iter()
            .filter_map(|event| match event {
                BusEvent::Reset { index } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(resets, vec![3, 2, 1]);
    }

    #[test]
    fn set_and_get_go_straight_to_the_chip() {
        let (chip, pins) = manager(4);
        let out = pins.acquire(PinRequest::output("LED", 2)).unwrap();
        let input = pins.acquire(PinRequest::input("BUTTON", 3)).unwrap();

        pins.set(&out, true).unwrap();
        chip.set_input(3, true);

        assert!(chip.level(2));
        assert!(pins.get(&input).unwrap());
        assert_eq!(pins.set(&input, true), Err(GpioError::Direction(3)));
    }
}
