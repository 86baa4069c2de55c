//! Wire protocol shared by both daemons.
//!
//! # Framing
//!
//! Every message is one length-prefixed JSON frame:
//!
//! ```text
//! ┌──────────────────┬─────────────────────┐
//! │ Length (4 bytes) │ JSON payload        │
//! │ Big-endian u32   │ (variable size)     │
//! └──────────────────┴─────────────────────┘
//! ```
//!
//! Maximum frame size is 16 MiB, large enough for any realistic drawing
//! payload. Exactly one request/response exchange happens per TCP connection;
//! the connection is closed afterwards, there is no session.
//!
//! # Requests
//!
//! Requests carry a protocol version field alongside the tagged command:
//!
//! ```json
//! {"v": 1, "cmd": "run", "chains": [[[0.0, 0.0], [10.0, 0.0]]],
//!  "feed": 2000.0, "units": "mm", "wait": false}
//! ```
//!
//! An unrecognized command name, malformed frame, or version mismatch is a
//! protocol error; daemons log it and answer with their current status.

use crate::chains::{Drawing, Units};
use crate::demo::DemoState;
use crate::error::{Error, Result};
use crate::jobs::{JobAction, ScheduledJob, Trigger};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Current protocol version carried in every request envelope
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame (largest expected drawing payload)
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Request envelope: version field plus the flattened command
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Request<T> {
    /// Protocol version, [`PROTOCOL_VERSION`]
    pub v: u32,
    #[serde(flatten)]
    pub command: T,
}

impl<T> Request<T> {
    pub fn new(command: T) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            command,
        }
    }

    /// Reject requests from a different protocol generation
    pub fn check_version(&self) -> Result<()> {
        if self.v != PROTOCOL_VERSION {
            return Err(Error::Protocol(format!(
                "unsupported protocol version {}",
                self.v
            )));
        }
        Ok(())
    }
}

/// Commands accepted by the machine daemon
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum MachRequest {
    /// Forward one raw line to the driver verbatim
    Send { line: String },
    /// Flush the driver queue and issue a drawing
    Run {
        chains: Drawing,
        feed: f64,
        units: Units,
        /// Clients that set this poll `status` for completion themselves;
        /// the daemon never blocks the response on it.
        wait: bool,
    },
    /// Immediate stop request to the driver
    Halt,
    /// Re-home the machine
    Home,
    /// Graceful shutdown of the daemon's own listener
    Restart,
    /// Report current position and readiness
    Status,
}

/// Commands accepted by the scheduler daemon
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum SchedRequest {
    /// Report the demo state, no side effects
    Status,
    /// Run exactly one autonomous drawing
    DemoOnce,
    /// Keep drawing; `count` bounds the number of drawings, absent = unbounded
    DemoContinuous {
        #[serde(default)]
        count: Option<i64>,
    },
    /// Stop the running demo cycle
    DemoHalt,
    /// Graceful shutdown of the daemon's own listener
    Restart,
    /// Create a persistent scheduled job
    JobAdd {
        trigger: Trigger,
        action: JobAction,
        #[serde(default)]
        params: serde_json::Value,
    },
    /// Delete a persistent job by id
    JobDelete { id: String },
    /// List persistent jobs in stored order
    JobList,
}

/// Scheduler daemon response: always the demo state, plus job fields when the
/// command produced them
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedResponse {
    pub state: DemoState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<ScheduledJob>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SchedResponse {
    pub fn state(state: DemoState) -> Self {
        Self {
            state,
            job_id: None,
            jobs: None,
            error: None,
        }
    }
}

/// Serialize a message and write it as one frame
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!(
            "frame too large: {} bytes",
            payload.len()
        )));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame and deserialize it
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!("frame too large: {} bytes", len)));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    serde_json::from_slice(&payload).map_err(|e| Error::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_round_trip() {
        let request = Request::new(MachRequest::Run {
            chains: vec![vec![(0.0, 0.0), (10.0, 5.0)]],
            feed: 2000.0,
            units: Units::Mm,
            wait: false,
        });

        let mut buf = Vec::new();
        write_message(&mut buf, &request).unwrap();
        assert_eq!(
            u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize,
            buf.len() - 4
        );

        let decoded: Request<MachRequest> = read_message(&mut Cursor::new(&buf)).unwrap();
        decoded.check_version().unwrap();
        match decoded.command {
            MachRequest::Run { chains, feed, .. } => {
                assert_eq!(chains[0][1], (10.0, 5.0));
                assert_eq!(feed, 2000.0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_wire_shape_is_named_and_tagged() {
        let request = Request::new(MachRequest::Send {
            line: "$X".to_string(),
        });
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["v"], 1);
        assert_eq!(json["cmd"], "send");
        assert_eq!(json["line"], "$X");
    }

    #[test]
    fn test_unknown_command_is_protocol_error() {
        let mut buf = Vec::new();
        write_message(&mut buf, &serde_json::json!({"v": 1, "cmd": "reboot"})).unwrap();
        let result: Result<Request<MachRequest>> = read_message(&mut Cursor::new(&buf));
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let request = Request {
            v: 99,
            command: MachRequest::Status,
        };
        assert!(matches!(
            request.check_version(),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_be_bytes());
        buf.extend_from_slice(b"xx");
        let result: Result<Request<MachRequest>> = read_message(&mut Cursor::new(&buf));
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_demo_continuous_count_defaults_to_unbounded() {
        let mut buf = Vec::new();
        write_message(&mut buf, &serde_json::json!({"v": 1, "cmd": "demoContinuous"})).unwrap();
        let decoded: Request<SchedRequest> = read_message(&mut Cursor::new(&buf)).unwrap();
        match decoded.command {
            SchedRequest::DemoContinuous { count } => assert_eq!(count, None),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
