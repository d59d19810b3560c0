//! The control socket.
//!
//! One connection is one open of the display: while a client is connected, every other one is
//! turned away with `ERR busy`. Clients send one command per line and get one line back.
use crate::command::Command;
use crate::driver::Driver;
use crate::utils::unescape;
use gardenpi_gpio::lcd::hd44780::Truncation;
use log::{debug, info, warn};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

/// How a connection ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionEnd {
    /// The client hung up.
    Closed,
    /// The display was already open.
    Busy,
    /// The client asked the daemon to stop.
    Shutdown,
}

/// Runs the line protocol on `stream` until the client hangs up or asks for a shutdown.
pub fn serve(driver: &Driver, stream: UnixStream) -> io::Result<SessionEnd> {
    let mut writer = stream.try_clone()?;
    let handle = match driver.lcd().open() {
        Ok(handle) => handle,
        Err(_) => {
            debug!("Turning a client away, the display is open");
            writeln!(writer, "ERR busy")?;
            return Ok(SessionEnd::Busy);
        }
    };

    for line in BufReader::new(stream).lines() {
        let line = unescape(line?.trim_end_matches('\r'));
        let reply = match line.trim() {
            "READ" => serde_json::to_string(&handle.read()).map_err(io::Error::from)?,
            "STATUS" => driver.status().to_json(),
            "SHUTDOWN" => {
                writeln!(writer, "OK")?;
                driver.stop();
                return Ok(SessionEnd::Shutdown);
            }
            _ => match line.parse::<Command>() {
                Ok(command) => match driver.dispatch(&handle, command) {
                    Ok(Truncation::None) => "OK".to_string(),
                    Ok(Truncation::Clipped { .. }) => "OK truncated".to_string(),
                    Err(err) => format!("ERR {}", err),
                },
                Err(err) => format!("ERR {}", err),
            },
        };
        writeln!(writer, "{}", reply)?;
    }

    Ok(SessionEnd::Closed)
}

#[derive(Debug)]
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    driver: Arc<Driver>,
}

impl ControlServer {
    /// Binds the socket, replacing a stale one left behind by an earlier run.
    pub fn bind(path: &Path, driver: Arc<Driver>) -> io::Result<Self> {
        if path.exists() {
            warn!("Removing stale socket {:?}", path);
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        info!("Listening on {:?}", path);

        Ok(ControlServer {
            listener,
            path: path.to_path_buf(),
            driver,
        })
    }

    /// Serves connections, each on its own thread, until the driver stops running.
    pub fn run(&self) -> io::Result<()> {
        for stream in self.listener.incoming() {
            if !self.driver.is_running() {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    warn!("Accepting a connection failed: {}", err);
                    continue;
                }
            };

            let driver = self.driver.clone();
            let path = self.path.clone();
            thread::Builder::new()
                .name("control-client".to_string())
                .spawn(move || match serve(&driver, stream) {
                    Ok(SessionEnd::Shutdown) => {
                        info!("Shutdown requested");
                        // Wakes the accept loop so it sees the stopped driver
                        let _ = UnixStream::connect(&path);
                    }
                    Ok(end) => debug!("Client left: {:?}", end),
                    Err(err) => warn!("Client connection failed: {}", err),
                })?;
        }
        info!("Control server stopped");
        Ok(())
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!("Could not remove {:?}: {}", self.path, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PinConfig};
    use gardenpi_gpio::lcd::hd44780::PinAssignment;
    use gardenpi_gpio::mock::{MockChip, MockDelay};
    use gardenpi_gpio::pins::PinManager;
    use gardenpi_gpio::GpioBackend;
    use std::io::Read;

    fn driver() -> (MockChip, Arc<Driver>) {
        let chip = MockChip::new(32);
        let pins = Arc::new(PinManager::new(Box::new(chip.clone())));
        let wiring = PinConfig {
            backend: GpioBackend::Mock(32),
            lcd: PinAssignment::four_bit(7, 8, [25, 24, 23, 18]),
            button: None,
            led: Some(27),
            relays: vec![5, 6],
        };
        let config = Config {
            status_path: None,
            greeting: String::new(),
            ..Config::default()
        };
        let driver = Driver::init(pins, &wiring, &config, Box::new(MockDelay::default())).unwrap();
        (chip, Arc::new(driver))
    }

    fn session(driver: &Arc<Driver>, input: &str) -> (SessionEnd, Vec<String>) {
        let (mut client, server) = UnixStream::pair().unwrap();
        let serving = {
            let driver = driver.clone();
            thread::spawn(move || serve(&driver, server).unwrap())
        };

        client.write_all(input.as_bytes()).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();
        let mut output = String::new();
        client.read_to_string(&mut output).unwrap();

        let end = serving.join().unwrap();
        (end, output.lines().map(str::to_string).collect())
    }

    #[test]
    fn answers_every_line() {
        let (chip, driver) = driver();
        let (end, replies) = session(
            &driver,
            "LED 1\nRELAY_2 0x1\nLCD Hi\\nthere\nREAD\nBUTTON 1\nFAN 1\n",
        );

        assert_eq!(end, SessionEnd::Closed);
        assert_eq!(replies[0], "OK");
        assert_eq!(replies[1], "OK");
        assert_eq!(replies[2], "OK");
        assert_eq!(replies[3], r#""Hi\nthere""#);
        assert!(replies[4].starts_with("ERR"), "{}", replies[4]);
        assert!(replies[5].starts_with("ERR"), "{}", replies[5]);
        assert!(chip.level(27));
        assert!(!chip.level(6));
        assert!(!driver.lcd().is_open());
    }

    #[test]
    fn reports_truncation_and_status() {
        let (_, driver) = driver();
        let long = "x".repeat(40);
        let (_, replies) = session(&driver, &format!("LCD {}\nSTATUS\n", long));

        assert_eq!(replies[0], "OK truncated");
        let status: serde_json::Value = serde_json::from_str(&replies[1]).unwrap();
        assert_eq!(status["lcd"].as_str().unwrap().len(), 32);
    }

    #[test]
    fn second_client_is_busy() {
        let (_, driver) = driver();
        let _held = driver.lcd().open().unwrap();

        let (end, replies) = session(&driver, "");
        assert_eq!(end, SessionEnd::Busy);
        assert_eq!(replies, vec!["ERR busy".to_string()]);
    }

    #[test]
    fn shutdown_stops_the_accept_loop() {
        let (_, driver) = driver();
        let path = std::env::temp_dir().join(format!("gardenpi-test-{}.sock", std::process::id()));
        let server = ControlServer::bind(&path, driver.clone()).unwrap();
        let running = thread::spawn(move || server.run());

        let mut client = UnixStream::connect(&path).unwrap();
        client.write_all(b"LED 1\nSHUTDOWN\n").unwrap();
        let mut replies = String::new();
        client.read_to_string(&mut replies).unwrap();

        running.join().unwrap().unwrap();
        assert_eq!(replies, "OK\nOK\n");
        assert!(!driver.is_running());
        assert!(!path.exists());
    }
}
