use crate::command::RELAY_COUNT;
use crate::utils::parse_pin_list;
use dotenv::var;
use gardenpi_gpio::lcd::hd44780::{PinAssignment, Signal};
use gardenpi_gpio::GpioBackend;
use serde::{Deserialize, Serialize};
use std::env::var_os;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings that are not about wiring, stored as JSON.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub socket_path: PathBuf,
    /// Where the status mirror is written. No file when `None`.
    pub status_path: Option<PathBuf>,
    pub debounce_ms: u64,
    pub button_poll_ms: u64,
    /// Samples taken by the button worker per press.
    pub worker_iterations: u32,
    pub worker_interval_ms: u64,
    pub cursor: bool,
    pub blink: bool,
    /// Shown once the display is up.
    pub greeting: String,
    /// Also export lines through `/sys/class/gpio` on the raw backends.
    pub sysfs_export: bool,
}

impl Config {
    const DEFAULT_FILE: &'static str = "gardenpi.json";

    fn path() -> PathBuf {
        let config_str = var_os("CONFIG_FILE");
        let config_str: &OsStr = config_str.as_deref().unwrap_or(OsStr::new(Self::DEFAULT_FILE));
        PathBuf::from(config_str)
    }

    pub fn try_load() -> Option<Self> {
        Self::try_load_from(&Self::path())
    }

    pub fn try_load_from(config_path: &Path) -> Option<Self> {
        if config_path.exists() {
            let file = std::fs::File::open(config_path).ok()?;
            let reader = std::io::BufReader::new(file);
            serde_json::from_reader(reader).ok()
        } else {
            None
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, config_path: &Path) -> std::io::Result<()> {
        let file = std::fs::File::create(config_path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn button_poll(&self) -> Duration {
        Duration::from_millis(self.button_poll_ms)
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            socket_path: PathBuf::from("/run/gardenpi.sock"),
            status_path: Some(PathBuf::from("/run/gardenpi-status.json")),
            debounce_ms: 200,
            button_poll_ms: 1,
            worker_iterations: 100,
            worker_interval_ms: 5,
            cursor: false,
            blink: false,
            greeting: concat!("GardenPi\nv.", env!("CARGO_PKG_VERSION")).to_string(),
            sysfs_export: false,
        }
    }
}

/// Wiring, read from the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct PinConfig {
    pub backend: GpioBackend,
    pub lcd: PinAssignment,
    pub button: Option<usize>,
    pub led: Option<usize>,
    pub relays: Vec<usize>,
}

impl PinConfig {
    const PREFIX: &'static str = "HGD_";

    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|name| var(name).ok())
    }

    /// Builds the wiring from `HGD_*` variables looked up by name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let get = |name: &str| {
            lookup(&format!("{}{}", Self::PREFIX, name)).filter(|value| !value.trim().is_empty())
        };
        let single = |name: &str| -> eyre::Result<Option<usize>> {
            match get(name) {
                Some(value) => match value.trim().parse::<i64>()? {
                    -1 => Ok(None),
                    pin if pin < 0 => Err(eyre::eyre!("Invalid pin number {} for {}", pin, name)),
                    pin => Ok(Some(pin as usize)),
                },
                None => Ok(None),
            }
        };

        let backend = match get("GPIO_BACKEND") {
            Some(backend) => backend.parse()?,
            None => GpioBackend::default(),
        };
        let lcd = PinAssignment::from_lookup(|signal: Signal| get(&format!("LCD_PIN_{}", signal)))?;
        let relays = match get("RELAY_PINS") {
            Some(pins) => parse_pin_list(&pins)?,
            None => Vec::new(),
        };
        if relays.len() > RELAY_COUNT {
            eyre::bail!("At most {} relay pins are supported, got {}", RELAY_COUNT, relays.len());
        }

        Ok(PinConfig {
            backend,
            lcd,
            button: single("BUTTON_PIN")?,
            led: single("LED_PIN")?,
            relays,
        })
    }
}
