//! Stoppable blocking TCP server.
//!
//! Both daemons serve their RPC surface through this loop: connections are
//! accepted one at a time and handled to completion before the next accept,
//! which serializes every command by construction. The handler performs one
//! request/response exchange; the connection is closed when it returns.
//!
//! Ports are sometimes slow to release across daemon restarts, so binding
//! retries on a bounded schedule before giving up.

use crate::error::{Error, Result};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bounded bind-retry schedule
#[derive(Debug, Clone, Copy)]
pub struct BindPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for BindPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(10),
        }
    }
}

/// Shared stop flag; cloned into RPC handlers so `restart` can end the loop
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking request/response TCP listener with graceful shutdown
pub struct StoppableTcpServer {
    listener: TcpListener,
    stop: StopHandle,
}

impl StoppableTcpServer {
    /// Bind the listener, retrying on the given schedule.
    ///
    /// Logs each failed attempt with the remaining retry count; returns
    /// [`Error::Bind`] once the schedule is exhausted.
    pub fn bind(addr: &str, policy: BindPolicy, stop: StopHandle) -> Result<Self> {
        let mut retries = policy.attempts;
        loop {
            match TcpListener::bind(addr) {
                Ok(listener) => {
                    log::info!("Listening on {}", addr);
                    return Ok(Self { listener, stop });
                }
                Err(e) => {
                    retries = retries.saturating_sub(1);
                    log::error!("{} retries left binding {}: {}", retries, addr, e);
                    if retries == 0 {
                        return Err(Error::Bind {
                            addr: addr.to_string(),
                            attempts: policy.attempts,
                        });
                    }
                    std::thread::sleep(policy.delay);
                }
            }
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Local address the listener actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and handle connections until the stop flag is set.
    ///
    /// The listener polls in non-blocking mode so a `restart` issued from a
    /// handler is observed within one poll interval.
    pub fn serve<H>(&self, mut handler: H) -> Result<()>
    where
        H: FnMut(&mut TcpStream),
    {
        self.listener.set_nonblocking(true)?;

        while !self.stop.is_stopped() {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    log::debug!("Connection from {}", addr);
                    if let Err(e) = stream.set_nonblocking(false) {
                        log::error!("Failed to set socket to blocking mode: {}", e);
                        continue;
                    }
                    // Bound reads so a stalled client cannot wedge the loop
                    if let Err(e) = stream.set_read_timeout(Some(Duration::from_secs(10))) {
                        log::warn!("Failed to set read timeout: {}", e);
                    }
                    handler(&mut stream);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                }
            }
        }

        log::info!("Out of server loop");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::time::Instant;

    #[test]
    fn test_bind_retry_exhaustion() {
        // Occupy a port so every bind attempt fails
        let occupant = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupant.local_addr().unwrap().to_string();

        let policy = BindPolicy {
            attempts: 3,
            delay: Duration::from_millis(20),
        };
        let start = Instant::now();
        let result = StoppableTcpServer::bind(&addr, policy, StopHandle::new());

        match result {
            Err(Error::Bind { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected bind failure, got {:?}", other.map(|_| ())),
        }
        // Two sleeps between three attempts
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_serve_handles_one_exchange_per_connection() {
        let server = StoppableTcpServer::bind(
            "127.0.0.1:0",
            BindPolicy::default(),
            StopHandle::new(),
        )
        .unwrap();
        let addr = server.local_addr().unwrap();
        let stop = server.stop_handle();

        let join = std::thread::spawn(move || {
            let stop_inner = server.stop_handle();
            server
                .serve(move |stream| {
                    let mut buf = [0u8; 4];
                    stream.read_exact(&mut buf).unwrap();
                    stream.write_all(&buf).unwrap();
                    if &buf == b"stop" {
                        stop_inner.stop();
                    }
                })
                .unwrap();
        });

        for payload in [b"ping" as &[u8], b"stop"] {
            let mut client = TcpStream::connect(addr).unwrap();
            client.write_all(payload).unwrap();
            let mut echo = [0u8; 4];
            client.read_exact(&mut echo).unwrap();
            assert_eq!(&echo[..], payload);
        }

        join.join().unwrap();
        assert!(stop.is_stopped());
    }

    #[test]
    fn test_stop_before_any_connection() {
        let stop = StopHandle::new();
        let server =
            StoppableTcpServer::bind("127.0.0.1:0", BindPolicy::default(), stop.clone()).unwrap();
        stop.stop();
        // Returns promptly without ever accepting
        server.serve(|_| panic!("no connection expected")).unwrap();
    }
}
