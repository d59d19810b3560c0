use crate::lcd::hd44780::{DisplayWriter, LcdResult, Truncation};
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("the display is already open")]
pub struct BusyError;

/// Single-user access to a [DisplayWriter].
///
/// At most one [LcdHandle] exists at a time; opening a second one fails instead of waiting.
#[derive(Debug)]
pub struct LcdDevice {
    busy: AtomicUsize,
    /// Bumped by every reset, so handles from before it do not close newer ones.
    generation: AtomicUsize,
    writer: Mutex<DisplayWriter>,
}

impl LcdDevice {
    pub fn new(writer: DisplayWriter) -> Self {
        LcdDevice {
            busy: AtomicUsize::new(0),
            generation: AtomicUsize::new(0),
            writer: Mutex::new(writer),
        }
    }

    pub fn open(&self) -> Result<LcdHandle<'_>, BusyError> {
        self.busy
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BusyError)?;
        debug!("LCD opened");
        Ok(LcdHandle {
            device: self,
            generation: self.generation.load(Ordering::Acquire),
        })
    }

    pub fn is_open(&self) -> bool {
        self.busy.load(Ordering::Acquire) != 0
    }

    /// Forgets any open handle. Used at teardown.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.busy.store(0, Ordering::Release);
    }

    /// Gives access to the writer regardless of open handles.
    ///
    /// For the owner of the device (initialization, teardown, status), not for users.
    pub fn writer(&self) -> MutexGuard<'_, DisplayWriter> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn buffer(&self) -> String {
        self.writer().buffer().to_string()
    }
}

/// An open display, closed on drop.
#[derive(Debug)]
pub struct LcdHandle<'a> {
    device: &'a LcdDevice,
    generation: usize,
}

impl LcdHandle<'_> {
    /// Replaces the displayed text. Invalid UTF-8 is replaced, not rejected.
    pub fn write(&self, bytes: &[u8]) -> LcdResult<Truncation> {
        let text = String::from_utf8_lossy(bytes);
        self.device.writer().write(&text)
    }

    /// The displayed text, verbatim.
    pub fn read(&self) -> String {
        self.device.buffer()
    }
}

impl Drop for LcdHandle<'_> {
    fn drop(&mut self) {
        // A reset in between already closed it
        if self.device.generation.load(Ordering::Acquire) == self.generation {
            self.device.busy.store(0, Ordering::Release);
        }
        debug!("LCD closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcd::hd44780::driver::GpioHD44780Driver;
    use crate::lcd::hd44780::PinAssignment;
    use crate::mock::{MockChip, MockDelay};
    use crate::pins::PinManager;
    use std::sync::Arc;

    fn device() -> LcdDevice {
        let pins = Arc::new(PinManager::new(Box::new(MockChip::new(8))));
        let driver = GpioHD44780Driver::new(
            pins,
            PinAssignment::four_bit(0, 1, [2, 3, 4, 5]),
            Box::new(MockDelay::default()),
        );
        let mut writer = DisplayWriter::new(Box::new(driver));
        writer.init().unwrap();
        LcdDevice::new(writer)
    }

    #[test]
    fn second_open_is_busy() {
        let device = device();

        let first = device.open().unwrap();
        assert_eq!(device.open().unwrap_err(), BusyError);

        drop(first);
        let third = device.open();
        assert!(third.is_ok());
    }

    #[test]
    fn reset_closes_everything() {
        let device = device();
        let handle = device.open().unwrap();

        device.reset();
        assert!(!device.is_open());

        let other = device.open().unwrap();
        drop(handle);
        // The stale handle must not close the new one
        assert!(device.is_open());
        drop(other);
        assert!(!device.is_open());
    }

    #[test]
    fn read_returns_what_was_written() {
        let device = device();
        let handle = device.open().unwrap();

        assert_eq!(handle.write(b"Hello\nWorld").unwrap(), Truncation::None);
        assert_eq!(handle.read(), "Hello\nWorld");

        let truncation = handle.write(&[b'x'; 40]).unwrap();
        assert_eq!(truncation, Truncation::Clipped { dropped: 8 });
        assert_eq!(handle.read().len(), 32);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let device = device();
        let handle = device.open().unwrap();

        handle.write(&[b'o', 0xFF, b'k']).unwrap();
        assert_eq!(handle.read(), "o\u{FFFD}k");
    }
}
