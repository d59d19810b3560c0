mod actuators;
mod button;
mod command;
mod config;
mod driver;
mod server;
mod status;
mod utils;

use crate::config::{Config, PinConfig};
use crate::driver::Driver;
use crate::server::ControlServer;
use dotenv::dotenv;
use gardenpi_gpio::delay::ThreadDelay;
use gardenpi_gpio::pins::PinManager;
use log::{debug, info};
use std::sync::Arc;
use sysinfo::System;

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    const UNKNOWN_STR: &str = "???";

    info!("GardenPi v.{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Running on {} {} (kernel {}, {})",
        System::name().as_deref().unwrap_or(UNKNOWN_STR),
        System::os_version().as_deref().unwrap_or(UNKNOWN_STR),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
        System::cpu_arch(),
    );

    let wiring = PinConfig::from_env()?;
    info!("LCD @ {}", wiring.lcd);
    info!(
        "Button @ {:?}, LED @ {:?}, relays @ {:?}",
        wiring.button, wiring.led, wiring.relays
    );

    debug!("Trying to load config...");
    let config = if let Some(config) = Config::try_load() {
        info!("Config loaded.");
        config
    } else {
        info!("Config not found. Using default");
        let config = Config::default();
        config.save()?;
        info!("Default config saved.");
        config
    };

    debug!("Opening {:?} GPIO backend...", wiring.backend);
    let chip = wiring.backend.open(config.sysfs_export)?;
    debug!("{:?} opened.", chip);
    let pins = Arc::new(PinManager::new(chip));

    let driver = Arc::new(Driver::init(
        pins,
        &wiring,
        &config,
        Box::new(ThreadDelay),
    )?);
    if let Err(err) = driver.start_button(&config) {
        driver.shutdown();
        return Err(err);
    }

    let served = ControlServer::bind(&config.socket_path, driver.clone())
        .and_then(|server| server.run());

    driver.shutdown();
    served?;

    info!("GardenPi stopped.");
    Ok(())
}
