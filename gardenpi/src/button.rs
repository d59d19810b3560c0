//! The push button.
//!
//! Handling is split in two. [ButtonIrq::on_edge] is the top half: it runs on every press edge
//! reported by [spawn_poller], must not block, and only decides whether the press is worth
//! handling. Accepted presses go through a bounded channel to the [ButtonWorker], the bottom
//! half, which follows the button until it is released.
use crate::status::StatusMirror;
use gardenpi_gpio::debounce::EdgeDebounce;
use gardenpi_gpio::delay::Delay;
use gardenpi_gpio::pins::{PinHandle, PinManager};
use gardenpi_gpio::{GpioActiveLevel, GpioResult};
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// The button input, shareable between threads.
///
/// The handle stays with the line so whoever releases it (the driver, at teardown) makes every
/// later sample fail instead of reading a line it no longer owns.
#[derive(Clone, Debug)]
pub struct ButtonLine {
    pins: Arc<PinManager>,
    handle: Arc<Mutex<PinHandle>>,
    active_level: GpioActiveLevel,
}

impl ButtonLine {
    /// The button pulls its line to ground when pressed.
    pub fn new(pins: Arc<PinManager>, handle: PinHandle) -> Self {
        ButtonLine {
            pins,
            handle: Arc::new(Mutex::new(handle)),
            active_level: GpioActiveLevel::Low,
        }
    }

    pub fn is_pressed(&self) -> GpioResult<bool> {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.active_level.get_state(self.pins.get(&handle)?))
    }

    pub fn release(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        self.pins.release(&mut handle);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EdgeOutcome {
    /// Handed to the worker.
    Accepted,
    /// Too close to the previous accepted press.
    Debounced,
    /// The worker is still handling a press.
    Busy,
    /// The worker is gone or its queue is full.
    Dropped,
}

/// Top half of the button handling.
#[derive(Debug)]
pub struct ButtonIrq {
    debounce: EdgeDebounce,
    busy: Arc<AtomicBool>,
    queue: SyncSender<Instant>,
}

impl ButtonIrq {
    pub fn new(debounce: EdgeDebounce, busy: Arc<AtomicBool>, queue: SyncSender<Instant>) -> Self {
        ButtonIrq {
            debounce,
            busy,
            queue,
        }
    }

    /// Handles a press edge seen at `at`. Never blocks.
    pub fn on_edge(&self, at: Instant) -> EdgeOutcome {
        if !self.debounce.accept(at) {
            return EdgeOutcome::Debounced;
        }
        if self.busy.swap(true, Ordering::AcqRel) {
            return EdgeOutcome::Busy;
        }

        match self.queue.try_send(at) {
            Ok(()) => EdgeOutcome::Accepted,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.busy.store(false, Ordering::Release);
                EdgeOutcome::Dropped
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PressOutcome {
    /// Released after the given number of samples.
    Released(u32),
    /// Still held after every sample.
    Held,
    Cancelled,
    Failed,
}

/// Bottom half of the button handling.
#[derive(Debug)]
pub struct ButtonWorker {
    line: ButtonLine,
    status: Arc<StatusMirror>,
    busy: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    delay: Box<dyn Delay>,
    pub iterations: u32,
    pub interval: Duration,
}

impl ButtonWorker {
    pub fn new(
        line: ButtonLine,
        status: Arc<StatusMirror>,
        busy: Arc<AtomicBool>,
        running: Arc<AtomicBool>,
        delay: Box<dyn Delay>,
    ) -> Self {
        ButtonWorker {
            line,
            status,
            busy,
            running,
            delay,
            iterations: 100,
            interval: Duration::from_millis(5),
        }
    }

    /// Follows one press: samples the button up to `iterations` times, mirroring its state, and
    /// stops early once it is released or the daemon is stopping.
    pub fn handle_press(&mut self) -> PressOutcome {
        self.status.update(|status| status.button = true);

        for iteration in 0..self.iterations {
            if !self.running.load(Ordering::Acquire) {
                return PressOutcome::Cancelled;
            }
            match self.line.is_pressed() {
                Ok(true) => {}
                Ok(false) => {
                    self.status.update(|status| status.button = false);
                    return PressOutcome::Released(iteration);
                }
                Err(err) => {
                    warn!("Reading the button failed: {}", err);
                    return PressOutcome::Failed;
                }
            }
            self.delay.delay(self.interval);
        }
        PressOutcome::Held
    }

    /// Handles queued presses until the daemon stops or the top half goes away.
    pub fn run(mut self, queue: Receiver<Instant>) {
        while self.running.load(Ordering::Acquire) {
            match queue.recv_timeout(self.interval.max(Duration::from_millis(1))) {
                Ok(pressed_at) => {
                    let outcome = self.handle_press();
                    debug!(
                        "Button press handled in {:?}: {:?}",
                        pressed_at.elapsed(),
                        outcome
                    );
                    self.busy.store(false, Ordering::Release);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Button worker stopped");
    }
}

/// Samples the button every `interval` and feeds press edges to the top half.
///
/// Releases seen while the worker is idle are mirrored here, as nobody else is watching.
pub fn spawn_poller(
    line: ButtonLine,
    irq: ButtonIrq,
    status: Arc<StatusMirror>,
    running: Arc<AtomicBool>,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("button-poller".to_string())
        .spawn(move || {
            let mut was_pressed = false;
            while running.load(Ordering::Acquire) {
                match line.is_pressed() {
                    Ok(pressed) if pressed != was_pressed => {
                        was_pressed = pressed;
                        if pressed {
                            let outcome = irq.on_edge(Instant::now());
                            trace!("Button edge: {:?}", outcome);
                        } else if !irq.is_busy() {
                            status.update(|status| status.button = false);
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("Button poller stopping: {}", err);
                        break;
                    }
                }
                thread::sleep(interval);
            }
        })
}
