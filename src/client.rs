//! Machine daemon RPC client.
//!
//! Thin synchronous stub over the machine daemon's wire protocol. Every call
//! opens a fresh socket, performs one request/response exchange, and closes
//! it; sockets are never reused. Connection failures surface as errors with no
//! retry here — retry policy belongs to the caller.

use crate::chains::{self, BoundingBox, Drawing, Point, Units};
use crate::error::Result;
use crate::machine::MachineStatus;
use crate::protocol::{self, MachRequest, Request};
use std::net::TcpStream;
use std::time::Duration;

/// Default status-polling interval for `run(wait = true)`
const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(100);

/// RPC stub for the machine daemon
#[derive(Debug, Clone)]
pub struct MachClient {
    addr: String,
    poll_delay: Duration,
}

impl MachClient {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            poll_delay: DEFAULT_POLL_DELAY,
        }
    }

    /// Override the completion-polling interval
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// One command, one socket, one round trip
    pub fn command(&self, command: MachRequest) -> Result<MachineStatus> {
        let mut stream = TcpStream::connect(&self.addr)?;
        protocol::write_message(&mut stream, &Request::new(command))?;
        protocol::read_message(&mut stream)
    }

    /// Clamp the drawing to `bbox`, convert it from table units to machine
    /// units, and issue `run`. With `wait` set, polls `status` until the
    /// machine reports ready — waiting is always client-side.
    pub fn run(
        &self,
        drawing: &Drawing,
        bbox: &BoundingBox,
        feed: f64,
        table_units: Units,
        mach_units: Units,
        wait: bool,
    ) -> Result<MachineStatus> {
        let bounded = chains::bound(drawing, bbox);
        let converted = chains::convert_units(&bounded, table_units, mach_units);

        let mut status = self.command(MachRequest::Run {
            chains: converted,
            feed,
            units: mach_units,
            wait,
        })?;

        if wait {
            log::info!("Waiting for drawing to finish");
            while !status.ready {
                std::thread::sleep(self.poll_delay);
                status = self.command(MachRequest::Status)?;
            }
        }
        Ok(status)
    }

    pub fn send(&self, line: &str) -> Result<MachineStatus> {
        self.command(MachRequest::Send {
            line: line.to_string(),
        })
    }

    pub fn halt(&self) -> Result<MachineStatus> {
        self.command(MachRequest::Halt)
    }

    pub fn home(&self) -> Result<MachineStatus> {
        self.command(MachRequest::Home)
    }

    pub fn restart(&self) -> Result<MachineStatus> {
        self.command(MachRequest::Restart)
    }

    pub fn get_position(&self) -> Result<Point> {
        Ok(self.command(MachRequest::Status)?.pos)
    }

    pub fn get_state(&self) -> Result<bool> {
        Ok(self.command(MachRequest::Status)?.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::write_message;
    use parking_lot::Mutex;
    use std::net::TcpListener;
    use std::sync::Arc;

    /// One-shot fake daemon: records the requests it saw, answers a canned
    /// status, and exits after `connections` exchanges.
    fn fake_daemon(
        status: MachineStatus,
        connections: usize,
    ) -> (String, Arc<Mutex<Vec<MachRequest>>>, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_thread = Arc::clone(&seen);

        let join = std::thread::spawn(move || {
            for _ in 0..connections {
                let (mut stream, _) = listener.accept().unwrap();
                let request: Request<MachRequest> =
                    protocol::read_message(&mut stream).unwrap();
                seen_thread.lock().push(request.command);
                write_message(&mut stream, &status).unwrap();
            }
        });
        (addr, seen, join)
    }

    #[test]
    fn test_run_clamps_and_converts() {
        let status = MachineStatus {
            pos: (25.4, 0.0),
            ready: true,
        };
        let (addr, seen, join) = fake_daemon(status, 1);

        // Two-point chain partly outside a 2x2 inch box, sent to a mm machine
        let drawing: Drawing = vec![vec![(1.0, 0.0), (5.0, 0.0)]];
        let bbox = BoundingBox::new((0.0, 0.0), (2.0, 2.0));
        let client = MachClient::new(&addr);
        let result = client
            .run(&drawing, &bbox, 2000.0, Units::Inches, Units::Mm, false)
            .unwrap();
        join.join().unwrap();

        assert!(result.ready);
        let requests = seen.lock();
        match &requests[0] {
            MachRequest::Run {
                chains,
                feed,
                units,
                wait,
            } => {
                assert_eq!(chains[0][0], (25.4, 0.0));
                // 5.0in clamps to 2.0in = 50.8mm
                assert_eq!(chains[0][1], (50.8, 0.0));
                assert_eq!(*feed, 2000.0);
                assert_eq!(*units, Units::Mm);
                assert!(!wait);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_wait_polls_until_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let join = std::thread::spawn(move || {
            // run (not ready), status (not ready), status (ready)
            for ready in [false, false, true] {
                let (mut stream, _) = listener.accept().unwrap();
                let _: Request<MachRequest> = protocol::read_message(&mut stream).unwrap();
                write_message(
                    &mut stream,
                    &MachineStatus {
                        pos: (0.0, 0.0),
                        ready,
                    },
                )
                .unwrap();
            }
        });

        let client = MachClient::new(&addr).with_poll_delay(Duration::from_millis(5));
        let drawing: Drawing = vec![vec![(0.0, 0.0), (1.0, 1.0)]];
        let bbox = BoundingBox::new((0.0, 0.0), (10.0, 10.0));
        let status = client
            .run(&drawing, &bbox, 2000.0, Units::Mm, Units::Mm, true)
            .unwrap();
        join.join().unwrap();
        assert!(status.ready);
    }

    #[test]
    fn test_status_projections() {
        let status = MachineStatus {
            pos: (3.0, 4.0),
            ready: false,
        };
        let (addr, seen, join) = fake_daemon(status, 2);

        let client = MachClient::new(&addr);
        assert_eq!(client.get_position().unwrap(), (3.0, 4.0));
        assert!(!client.get_state().unwrap());
        join.join().unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_connect_failure_is_an_error() {
        // Nothing listens here
        let client = MachClient::new("127.0.0.1:1");
        assert!(client.get_state().is_err());
    }
}
