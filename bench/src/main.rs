use dotenv::{dotenv, var};
use gardenpi_gpio::delay::ThreadDelay;
use gardenpi_gpio::lcd::hd44780::driver::{DisplayFlags, GpioHD44780Driver};
use gardenpi_gpio::lcd::hd44780::{negotiate, DisplayWriter, PinAssignment, Signal};
use gardenpi_gpio::pins::PinManager;
use gardenpi_gpio::GpioBackend;
use log::{debug, info};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use sysinfo::System;
use time::OffsetDateTime;

fn main() -> eyre::Result<()> {
    dotenv().ok();
    pretty_env_logger::init();

    const UNKNOWN_STR: &str = "???";

    info!(
        "Hello, {}!",
        System::name().as_deref().unwrap_or(UNKNOWN_STR)
    );
    info!(
        "System ver {} kernel ver {}",
        System::long_os_version().as_deref().unwrap_or(UNKNOWN_STR),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
    );
    info!(
        "Hostname {}",
        System::host_name().as_deref().unwrap_or(UNKNOWN_STR)
    );
    info!("Architecture {}", System::cpu_arch());

    let backend: GpioBackend = match var("HGD_GPIO_BACKEND") {
        Ok(backend) => backend.parse()?,
        Err(_) => GpioBackend::default(),
    };
    let assignment =
        PinAssignment::from_lookup(|signal: Signal| var(format!("HGD_LCD_PIN_{}", signal)).ok())?;
    let mode = negotiate(&assignment)?;
    info!("LCD @ {} in {:?}", assignment, mode);

    let chip = backend.open(false)?;
    debug!("{:?} opened.", chip);
    let pins = Arc::new(PinManager::new(chip));

    let mut lcd = DisplayWriter::new(Box::new(GpioHD44780Driver::new(
        pins,
        assignment,
        Box::new(ThreadDelay),
    )));
    lcd.init()?;

    lcd.write(&format!("GardenPi bench\n{:?}", mode))?;
    sleep(Duration::from_secs(2));

    let truncation = lcd.write("The quick brown fox jumps over the lazy dog")?;
    info!("Pangram written: {:?}", truncation);
    sleep(Duration::from_secs(2));

    let flag_steps = [
        ("cursor", DisplayFlags::DISPLAY_ON | DisplayFlags::CURSOR_ON),
        (
            "blink",
            DisplayFlags::DISPLAY_ON | DisplayFlags::CURSOR_ON | DisplayFlags::BLINK_ON,
        ),
        ("off", DisplayFlags::DISPLAY_OFF),
        ("on", DisplayFlags::DISPLAY_ON),
    ];
    for (name, flags) in flag_steps {
        lcd.write(name)?;
        lcd.set_flags(flags)?;
        debug!("Display flags {:#05b}", flags.bits());
        sleep(Duration::from_secs(1));
    }

    let clock_secs: u32 = match var("BENCH_CLOCK_SECS") {
        Ok(secs) => secs.parse()?,
        Err(_) => 10,
    };
    for _ in 0..clock_secs {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        lcd.write(&format!(
            "{}-{:02}-{:02}\n{:02}:{:02}:{:02}",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
        ))?;
        sleep(Duration::from_secs(1));
    }

    lcd.shutdown();
    info!("Bench done.");
    Ok(())
}
