//! Sandtable - machine-control daemons for a kinetic-sand drawing table
//!
//! Two daemons share this library:
//!
//! - **machd** (TCP, default port 5007): owns the physical machine connection
//!   and exposes run/halt/home/status to exactly one request per connection.
//! - **schedulerd** (TCP, default port 5008): hosts the autonomous demo state
//!   machine, the proximity-switch tap reader, and the persistent job
//!   scheduler behind its own RPC surface.
//!
//! Pattern generation, LED rendering, and drawing history are external
//! collaborators behind trait seams; the `sim` driver lets both daemons run
//! and test without hardware.

pub mod chains;
pub mod client;
pub mod config;
pub mod demo;
pub mod error;
pub mod jobs;
pub mod machd;
pub mod machine;
pub mod patterns;
pub mod protocol;
pub mod prox;
pub mod schedulerd;
pub mod server;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
