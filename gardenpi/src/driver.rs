//! Everything the daemon drives, owned in one place.
use crate::actuators::Actuator;
use crate::button::{spawn_poller, ButtonIrq, ButtonLine, ButtonWorker};
use crate::command::{Command, Target};
use crate::config::{Config, PinConfig};
use crate::status::StatusMirror;
use gardenpi_gpio::debounce::EdgeDebounce;
use gardenpi_gpio::delay::{Delay, ThreadDelay};
use gardenpi_gpio::lcd::hd44780::driver::{DisplayFlags, GpioHD44780Driver};
use gardenpi_gpio::lcd::hd44780::{
    negotiate, DisplayWriter, LcdDevice, LcdError, LcdHandle, Truncation,
};
use gardenpi_gpio::pins::{PinManager, PinRequest};
use gardenpi_gpio::{GpioBias, GpioError};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} is read-only")]
    ReadOnly(Target),
    #[error("{0} is not connected")]
    NotConnected(Target),
    #[error(transparent)]
    Lcd(#[from] LcdError),
    #[error(transparent)]
    Gpio(#[from] GpioError),
}

/// Lines acquired next to the display, in acquisition order.
#[derive(Debug, Default)]
struct Peripherals {
    led: Option<Actuator>,
    relays: Vec<Actuator>,
    button: Option<ButtonLine>,
}

/// The daemon's driver context.
///
/// Built by [Driver::init] and torn down by [Driver::shutdown]; nothing outside of it holds
/// hardware state.
#[derive(Debug)]
pub struct Driver {
    pins: Arc<PinManager>,
    lcd: LcdDevice,
    peripherals: Mutex<Peripherals>,
    status: Arc<StatusMirror>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl Driver {
    /// Validates the wiring, brings the display up, then takes the other lines as one group.
    ///
    /// A failed init leaves no line behind: the display is shut down again if the group cannot
    /// be acquired, and everything is released if a later step fails.
    pub fn init(
        pins: Arc<PinManager>,
        wiring: &PinConfig,
        config: &Config,
        delay: Box<dyn Delay>,
    ) -> eyre::Result<Self> {
        let mode = negotiate(&wiring.lcd)?;
        info!("LCD wiring {} uses {:?}", wiring.lcd, mode);

        let flags = DisplayFlags::DISPLAY_ON
            .with(DisplayFlags::CURSOR_ON, config.cursor)
            .with(DisplayFlags::BLINK_ON, config.blink);
        let engine = GpioHD44780Driver::new(pins.clone(), wiring.lcd, delay).with_flags(flags);
        let mut writer = DisplayWriter::new(Box::new(engine));
        writer.init()?;

        let mut requests = Vec::new();
        if let Some(pin) = wiring.led {
            requests.push(PinRequest::output("LED", pin));
        }
        const RELAY_LABELS: [&str; 4] = ["RELAY_1", "RELAY_2", "RELAY_3", "RELAY_4"];
        for (label, &pin) in RELAY_LABELS.iter().zip(&wiring.relays) {
            requests.push(PinRequest::output(*label, pin));
        }
        if let Some(pin) = wiring.button {
            requests.push(PinRequest::input("BUTTON", pin).with_bias(GpioBias::PullUp));
        }

        let mut handles = match pins.acquire_group(&requests) {
            Ok(handles) => handles.into_iter(),
            Err(err) => {
                error!("Acquiring peripherals failed: {}", err);
                writer.shutdown();
                return Err(err.into());
            }
        };

        let mut peripherals = Peripherals::default();
        if wiring.led.is_some() {
            peripherals.led = handles.next().map(Actuator::led);
        }
        for _ in 0..wiring.relays.len().min(RELAY_LABELS.len()) {
            peripherals.relays.extend(handles.next().map(Actuator::relay));
        }
        if wiring.button.is_some() {
            peripherals.button = handles.next().map(|handle| ButtonLine::new(pins.clone(), handle));
        }

        let driver = Driver {
            pins,
            lcd: LcdDevice::new(writer),
            peripherals: Mutex::new(peripherals),
            status: Arc::new(StatusMirror::new(config.status_path.clone())),
            running: Arc::new(AtomicBool::new(true)),
            threads: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
        };

        // Outputs come up low, which switches active-low relays on
        driver.all_off()?;
        driver.write_lcd_unchecked(&config.greeting)?;

        info!("Driver initialized");
        Ok(driver)
    }

    fn peripherals(&self) -> MutexGuard<'_, Peripherals> {
        self.peripherals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn all_off(&self) -> Result<(), DispatchError> {
        let peripherals = self.peripherals();
        if let Some(led) = &peripherals.led {
            led.set(&self.pins, false)?;
        }
        for relay in &peripherals.relays {
            relay.set(&self.pins, false)?;
        }
        self.status.update(|status| {
            status.led = false;
            status.relays = Default::default();
        });
        Ok(())
    }

    fn write_lcd_unchecked(&self, text: &str) -> Result<Truncation, DispatchError> {
        let truncation = self.lcd.writer().write(text)?;
        let buffer = self.lcd.buffer();
        self.status.update(|status| status.lcd = buffer);
        Ok(truncation)
    }

    /// Starts the button threads. Does nothing without a button.
    pub fn start_button(&self, config: &Config) -> eyre::Result<()> {
        let Some(line) = self.peripherals().button.clone() else {
            debug!("No button connected");
            return Ok(());
        };

        let busy = Arc::new(AtomicBool::new(false));
        let (tx, rx) = sync_channel(1);
        let irq = ButtonIrq::new(
            EdgeDebounce::new().with_window(config.debounce()),
            busy.clone(),
            tx,
        );
        let mut worker = ButtonWorker::new(
            line.clone(),
            self.status.clone(),
            busy,
            self.running.clone(),
            Box::new(ThreadDelay),
        );
        worker.iterations = config.worker_iterations;
        worker.interval = config.worker_interval();

        let worker = std::thread::Builder::new()
            .name("button-worker".to_string())
            .spawn(move || worker.run(rx))?;
        let poller = spawn_poller(
            line,
            irq,
            self.status.clone(),
            self.running.clone(),
            config.button_poll(),
        )?;

        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        threads.push(worker);
        threads.push(poller);
        info!("Button threads started");
        Ok(())
    }

    pub fn lcd(&self) -> &LcdDevice {
        &self.lcd
    }

    pub fn status(&self) -> &StatusMirror {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks every loop of the daemon to finish.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Carries out a parsed command on behalf of the holder of `handle`.
    pub fn dispatch(
        &self,
        handle: &LcdHandle<'_>,
        command: Command,
    ) -> Result<Truncation, DispatchError> {
        match command {
            Command::Lcd(text) => {
                let truncation = handle.write(text.as_bytes())?;
                let buffer = handle.read();
                self.status.update(|status| status.lcd = buffer);
                Ok(truncation)
            }
            Command::Button(_) => Err(DispatchError::ReadOnly(Target::Button)),
            Command::Led(value) => {
                let peripherals = self.peripherals();
                let led = peripherals
                    .led
                    .as_ref()
                    .ok_or(DispatchError::NotConnected(Target::Led))?;
                led.set(&self.pins, value != 0)?;
                self.status.update(|status| status.led = value != 0);
                Ok(Truncation::None)
            }
            Command::Relay(n, value) => {
                let peripherals = self.peripherals();
                let relay = n
                    .checked_sub(1)
                    .and_then(|index| peripherals.relays.get(index))
                    .ok_or(DispatchError::NotConnected(Target::Relay(n)))?;
                relay.set(&self.pins, value != 0)?;
                self.status.update(|status| status.relays[n - 1] = value != 0);
                Ok(Truncation::None)
            }
        }
    }

    /// Stops the threads, releases the peripherals in reverse order, shuts the display down
    /// and closes the display for everyone. Only the first call does anything.
    pub fn shutdown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down");
        self.stop();

        let threads: Vec<_> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for thread in threads {
            if thread.join().is_err() {
                warn!("A button thread panicked");
            }
        }

        let mut peripherals = self.peripherals();
        if let Some(button) = peripherals.button.take() {
            button.release();
        }
        while let Some(mut relay) = peripherals.relays.pop() {
            self.pins.release(relay.handle_mut());
        }
        if let Some(mut led) = peripherals.led.take() {
            self.pins.release(led.handle_mut());
        }
        drop(peripherals);

        self.lcd.writer().shutdown();
        self.lcd.reset();
        info!("Driver shut down");
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gardenpi_gpio::lcd::hd44780::driver::ProtocolState;
    use gardenpi_gpio::lcd::hd44780::{PinAssignment, Signal};
    use gardenpi_gpio::mock::{BusEvent, MockChip, MockDelay, PanelModel};

    fn wiring() -> PinConfig {
        PinConfig {
            backend: gardenpi_gpio::GpioBackend::Mock(32),
            lcd: PinAssignment::four_bit(7, 8, [25, 24, 23, 18]),
            button: Some(17),
            led: Some(27),
            relays: vec![5, 6, 13, 19],
        }
    }

    fn config() -> Config {
        Config {
            status_path: None,
            greeting: "Hello".to_string(),
            ..Config::default()
        }
    }

    fn setup() -> (MockChip, Arc<PinManager>) {
        let chip = MockChip::new(32);
        let pins = Arc::new(PinManager::new(Box::new(chip.clone())));
        (chip, pins)
    }

    fn init(pins: &Arc<PinManager>, wiring: &PinConfig) -> eyre::Result<Driver> {
        Driver::init(pins.clone(), wiring, &config(), Box::new(MockDelay::default()))
    }

    #[test]
    fn init_greets_and_switches_everything_off() {
        let (chip, pins) = setup();
        let driver = init(&pins, &wiring()).unwrap();

        assert_eq!(driver.lcd().buffer(), "Hello");
        assert_eq!(driver.status().snapshot().lcd, "Hello");
        assert!(!chip.level(27));
        for relay in [5, 6, 13, 19] {
            assert!(chip.level(relay), "relay {relay} must be driven high");
        }
        assert_eq!(pins.owned_count(), 6 + 1 + 4 + 1);
        assert_eq!(
            PanelModel::replay(&chip.journal().events(), &wiring().lcd).row(0),
            "Hello"
        );
    }

    #[test]
    fn dispatch_drives_outputs_and_mirrors_them() {
        let (chip, pins) = setup();
        let driver = init(&pins, &wiring()).unwrap();
        let handle = driver.lcd().open().unwrap();

        driver.dispatch(&handle, "LED 1".parse().unwrap()).unwrap();
        driver.dispatch(&handle, "RELAY_2 1".parse().unwrap()).unwrap();
        let truncation = driver
            .dispatch(&handle, "LCD Moisture\n42%".parse().unwrap())
            .unwrap();

        assert_eq!(truncation, Truncation::None);
        assert!(chip.level(27));
        assert!(!chip.level(6));
        let status = driver.status().snapshot();
        assert!(status.led);
        assert_eq!(status.relays, [false, true, false, false]);
        assert_eq!(status.lcd, "Moisture\n42%");
    }

    #[test]
    fn dispatch_rejects_button_and_missing_lines() {
        let (chip, pins) = setup();
        let wiring = PinConfig {
            relays: vec![5],
            led: None,
            ..wiring()
        };
        let driver = init(&pins, &wiring).unwrap();
        let handle = driver.lcd().open().unwrap();
        chip.journal().clear();

        assert!(matches!(
            driver.dispatch(&handle, "BUTTON 1".parse().unwrap()),
            Err(DispatchError::ReadOnly(Target::Button))
        ));
        assert!(matches!(
            driver.dispatch(&handle, "LED 1".parse().unwrap()),
            Err(DispatchError::NotConnected(Target::Led))
        ));
        assert!(matches!(
            driver.dispatch(&handle, "RELAY_2 1".parse().unwrap()),
            Err(DispatchError::NotConnected(Target::Relay(2)))
        ));
        assert!(chip.journal().events().is_empty());
    }

    #[test]
    fn invalid_lcd_wiring_touches_nothing() {
        let (chip, pins) = setup();
        let wiring = PinConfig {
            lcd: wiring().lcd.without(Signal::En),
            ..wiring()
        };

        assert!(init(&pins, &wiring).is_err());
        assert!(chip.journal().events().is_empty());
        assert_eq!(pins.owned_count(), 0);
    }

    #[test]
    fn peripheral_conflict_rolls_the_display_back() {
        let (chip, pins) = setup();
        let wiring = PinConfig {
            // Shared with DB7
            button: Some(18),
            ..wiring()
        };

        assert!(init(&pins, &wiring).is_err());
        assert_eq!(pins.owned_count(), 0);
        assert!(
            chip.journal()
                .events()
                .contains(&BusEvent::Unexport { index: 7 })
        );
    }

    #[test]
    fn failing_output_after_acquisition_releases_everything() {
        let (chip, pins) = setup();
        chip.fail_writes_on(5);

        assert!(init(&pins, &wiring()).is_err());
        assert_eq!(pins.owned_count(), 0);
        for pin in [5, 6, 13, 17, 19, 27, 7, 8] {
            assert!(!chip.is_exported(pin), "pin {pin} still exported");
        }

        let wiring = PinConfig {
            relays: vec![6, 13, 19],
            ..wiring()
        };
        assert!(init(&pins, &wiring).is_ok());
    }

    #[test]
    fn shutdown_is_idempotent_and_runs_on_drop() {
        let (_, pins) = setup();
        let driver = init(&pins, &wiring()).unwrap();
        driver.shutdown();
        driver.shutdown();
        assert_eq!(pins.owned_count(), 0);

        let driver = init(&pins, &wiring()).unwrap();
        assert_eq!(pins.owned_count(), 12);
        drop(driver);
        assert_eq!(pins.owned_count(), 0);
    }

    #[test]
    fn shutdown_releases_everything_and_allows_reinit() {
        let (chip, pins) = setup();
        let driver = init(&pins, &wiring()).unwrap();
        driver.start_button(&config()).unwrap();
        let handle = driver.lcd().open().unwrap();

        driver.shutdown();

        assert_eq!(pins.owned_count(), 0);
        assert!(!driver.lcd().is_open());
        assert_eq!(driver.lcd().writer().state(), ProtocolState::Uninitialized);
        assert!(!chip.is_exported(17));
        drop(handle);
        drop(driver);

        let again = init(&pins, &wiring()).unwrap();
        assert!(again.is_running());
        assert!(again.lcd().open().is_ok());
    }
}
