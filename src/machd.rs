//! Machine daemon: owns the physical connection and serves the machine RPC
//! surface.
//!
//! Startup sequence: construct the configured driver (fatal on failure),
//! consult the version marker to decide whether homing is needed, bind the
//! listener with bounded retry, serve. Shutdown always halts the driver, even
//! when the listener never bound or never served a request.

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::machine::{self, marker, MachineDriver, MachineStatus};
use crate::protocol::{self, MachRequest, Request};
use crate::server::{BindPolicy, StoppableTcpServer, StopHandle};
use std::net::TcpStream;

/// Dispatches machine commands onto the single driver instance
pub struct MachHandler {
    driver: Box<dyn MachineDriver>,
    stop: StopHandle,
    /// Last status successfully read from the driver; answered when a fresh
    /// read fails so the caller still gets a well-formed response
    last_status: MachineStatus,
}

impl MachHandler {
    pub fn new(driver: Box<dyn MachineDriver>, stop: StopHandle) -> Self {
        Self {
            driver,
            stop,
            last_status: MachineStatus {
                pos: (0.0, 0.0),
                ready: false,
            },
        }
    }

    /// Execute one command and report current status.
    ///
    /// Command failures are logged and answered with status; they never
    /// propagate out of the serve loop.
    pub fn handle(&mut self, request: MachRequest) -> MachineStatus {
        if !matches!(request, MachRequest::Status) {
            log::info!("Command: {:?}", request);
        }

        let result = match request {
            MachRequest::Send { ref line } => self.driver.send(line),
            MachRequest::Run {
                ref chains,
                feed,
                units,
                wait,
            } => {
                if wait {
                    log::debug!("wait requested; completion is polled client-side");
                }
                self.driver
                    .flush()
                    .and_then(|_| self.driver.run(chains, units, feed))
            }
            MachRequest::Halt => self.driver.halt(),
            MachRequest::Home => self.driver.home(),
            MachRequest::Restart => {
                self.stop.stop();
                Ok(())
            }
            MachRequest::Status => Ok(()),
        };

        if let Err(e) = result {
            log::error!("Command failed: {}", e);
        }
        self.status()
    }

    /// Current status, falling back to the last good reading
    pub fn status(&mut self) -> MachineStatus {
        match self.driver.status() {
            Ok(status) => {
                self.last_status = status;
                status
            }
            Err(e) => {
                log::error!("Status query failed: {}", e);
                self.last_status
            }
        }
    }

    fn into_driver(self) -> Box<dyn MachineDriver> {
        self.driver
    }
}

/// One request/response exchange on a fresh connection.
///
/// Protocol errors (malformed frame, unknown command, version mismatch) are
/// logged and answered with the current status, unchanged.
pub fn handle_connection(stream: &mut TcpStream, handler: &mut MachHandler) {
    let status = match protocol::read_message::<_, Request<MachRequest>>(stream) {
        Ok(request) => match request.check_version() {
            Ok(()) => handler.handle(request.command),
            Err(e) => {
                log::warn!("{}", e);
                handler.status()
            }
        },
        Err(e) => {
            log::warn!("Bad request: {}", e);
            handler.status()
        }
    };

    if let Err(e) = protocol::write_message(stream, &status) {
        log::warn!("Failed to send response: {}", e);
    }
}

/// Construct the driver and bring the machine to a known state.
///
/// Driver construction failure is fatal and propagates; callers log and exit
/// without retrying. Homing is skipped when the version marker matches the
/// current machine configuration.
pub fn startup_driver(config: &AppConfig) -> Result<Box<dyn MachineDriver>> {
    let mut driver = machine::create_driver(&config.machine)
        .map_err(|e| Error::Driver(format!("driver construction failed: {}", e)))?;

    let marker_path = config.storage.version_marker_path();
    let full_init = marker::check_and_update(&marker_path, &config.machine)?;
    if full_init {
        log::info!("Machine configuration changed, homing");
        driver.home()?;
    } else {
        log::info!("Machine configuration unchanged, skipping homing");
    }
    Ok(driver)
}

/// Serve the machine RPC surface until `restart` or an external stop.
///
/// The driver is halted and shut down on every exit path, including bind
/// exhaustion.
pub fn serve(
    mut driver: Box<dyn MachineDriver>,
    addr: &str,
    policy: BindPolicy,
    stop: StopHandle,
) -> Result<()> {
    log::info!("Trying to listen on {}", addr);
    let serve_result = match StoppableTcpServer::bind(addr, policy, stop.clone()) {
        Ok(server) => {
            let mut handler = MachHandler::new(driver, stop);
            let result = server.serve(|stream| handle_connection(stream, &mut handler));
            driver = handler.into_driver();
            result
        }
        Err(e) => {
            log::error!("Giving up on listener: {}", e);
            Err(e)
        }
    };

    log::info!("Stopping machine");
    if let Err(e) = driver.halt() {
        log::error!("Halt on shutdown failed: {}", e);
    }
    if let Err(e) = driver.shutdown() {
        log::error!("Driver shutdown failed: {}", e);
    }
    log::info!("Machine daemon shut down");
    serve_result
}

/// Full daemon lifecycle: startup, serve, shutdown
pub fn run(config: &AppConfig, policy: BindPolicy, stop: StopHandle) -> Result<()> {
    log::info!("Starting the sandtable machine daemon");
    let driver = startup_driver(config)?;
    serve(driver, &config.network.mach_address, policy, stop)
}
