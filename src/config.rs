//! Configuration for the sandtable daemons
//!
//! Loads configuration from a TOML file shared by `machd` and `schedulerd`.
//! Both daemons read the same file; each uses the sections it needs.

use crate::chains::{BoundingBox, Units};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub machine: MachineConfig,
    pub table: TableConfig,
    pub network: NetworkConfig,
    pub demo: DemoConfig,
    pub prox: ProxConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Machine driver configuration
///
/// This section doubles as the version marker payload: `machd` persists it as
/// JSON and skips homing on startup when it is unchanged (§ `machine::marker`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MachineConfig {
    /// Driver name resolved in the driver registry (e.g. "sim")
    pub driver: String,
    /// Device path handed to the driver (serial drivers)
    pub port: String,
    /// Serial baud rate
    pub baud: u32,
    /// Raw initialization lines sent by the driver during homing
    pub init: Vec<String>,
    /// Units the machine operates in
    pub units: Units,
    /// Feed rate in machine units per minute
    pub feed: f64,
    /// Acceleration in machine units per second squared
    pub accel: f64,
}

/// Table geometry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableConfig {
    /// Drawable width in table units
    pub width: f64,
    /// Drawable length in table units
    pub length: f64,
    /// Units the table geometry is expressed in
    pub units: Units,
    /// Ball diameter in table units
    pub ball_size: f64,
}

impl TableConfig {
    /// Full drawable area as a bounding box in table units
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new((0.0, 0.0), (self.width, self.length))
    }
}

/// TCP bind addresses for the two daemons
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Machine daemon listener, e.g. `0.0.0.0:5007`
    pub mach_address: String,
    /// Scheduler daemon listener, e.g. `0.0.0.0:5008`
    pub scheduler_address: String,
}

/// Autonomous-drawing (demo) tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DemoConfig {
    /// Polling tick used by the demo loop and the proximity thread
    pub polling_delay_ms: u64,
    /// Reject generated drawings estimated faster than this
    pub draw_time_min_secs: f64,
    /// Reject generated drawings estimated slower than this
    pub draw_time_max_secs: f64,
    /// Dwell between consecutive autonomous drawings
    pub pause_secs: f64,
    /// Upper bound on waiting for a drawing to report ready
    pub wait_timeout_secs: u64,
}

impl DemoConfig {
    pub fn polling_delay(&self) -> Duration {
        Duration::from_millis(self.polling_delay_ms)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_secs_f64(self.pause_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

/// Proximity switch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxConfig {
    /// GPIO line the switch is wired to
    pub pin: u32,
    /// Tap aggregation window in seconds
    pub window_secs: f64,
}

impl ProxConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_secs)
    }
}

/// Persistent job scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Master switch consulted by the daily boot trigger
    pub enabled: bool,
    /// Hour (0-23) of the daily autonomous drawing
    pub daily_hour: u32,
    /// Minute (0-59) of the daily autonomous drawing
    pub daily_minute: u32,
    /// Worker threads executing due jobs
    pub workers: usize,
}

/// Durable state locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding the version marker and the job store
    pub data_dir: String,
}

impl StorageConfig {
    /// Version marker file recording the last-applied machine configuration
    pub fn version_marker_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("machine-version.json")
    }

    /// Durable job store file
    pub fn job_store_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("jobs.json")
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log output (stdout, stderr, or file path)
    pub output: String,
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default configuration for a GRBL-style table with the simulated driver
    ///
    /// Suitable for testing and development. Production deployments should use
    /// a proper TOML configuration file.
    pub fn sandtable_defaults() -> Self {
        Self {
            machine: MachineConfig {
                driver: "sim".to_string(),
                port: "/dev/ttyUSB0".to_string(),
                baud: 115_200,
                init: vec!["$G".to_string(), "$X".to_string(), "$H".to_string()],
                units: Units::Mm,
                feed: 2000.0,
                accel: 3000.0,
            },
            table: TableConfig {
                width: 14.0,
                length: 11.2,
                units: Units::Inches,
                ball_size: 0.75,
            },
            network: NetworkConfig {
                mach_address: "0.0.0.0:5007".to_string(),
                scheduler_address: "0.0.0.0:5008".to_string(),
            },
            demo: DemoConfig {
                polling_delay_ms: 100,
                draw_time_min_secs: 18.0,
                draw_time_max_secs: 1500.0,
                pause_secs: 30.0,
                wait_timeout_secs: 3600,
            },
            prox: ProxConfig {
                pin: 18,
                window_secs: 8.0,
            },
            scheduler: SchedulerConfig {
                enabled: true,
                daily_hour: 7,
                daily_minute: 0,
                workers: 4,
            },
            storage: StorageConfig {
                data_dir: "/var/lib/sandtable".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                output: "stdout".to_string(),
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::sandtable_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::sandtable_defaults();
        assert_eq!(config.machine.driver, "sim");
        assert_eq!(config.machine.feed, 2000.0);
        assert_eq!(config.table.width, 14.0);
        assert_eq!(config.table.units, Units::Inches);
        assert_eq!(config.scheduler.daily_hour, 7);
        assert_eq!(config.demo.polling_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_toml_serialization() {
        let config = AppConfig::sandtable_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        // Should contain all sections
        assert!(toml_string.contains("[machine]"));
        assert!(toml_string.contains("[table]"));
        assert!(toml_string.contains("[network]"));
        assert!(toml_string.contains("[demo]"));
        assert!(toml_string.contains("[prox]"));
        assert!(toml_string.contains("[scheduler]"));
        assert!(toml_string.contains("[storage]"));
        assert!(toml_string.contains("[logging]"));

        // Should contain key values
        assert!(toml_string.contains("driver = \"sim\""));
        assert!(toml_string.contains("feed = 2000.0"));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::sandtable_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_string).unwrap();
        assert_eq!(parsed.machine, config.machine);
        assert_eq!(parsed.table.length, config.table.length);
        assert_eq!(parsed.scheduler.workers, config.scheduler.workers);
    }

    #[test]
    fn test_bounding_box_spans_table() {
        let config = AppConfig::sandtable_defaults();
        let bbox = config.table.bounding_box();
        assert_eq!(bbox.min, (0.0, 0.0));
        assert_eq!(bbox.max, (14.0, 11.2));
    }

    #[test]
    fn test_storage_paths() {
        let storage = StorageConfig {
            data_dir: "/tmp/sand".to_string(),
        };
        assert_eq!(
            storage.version_marker_path(),
            PathBuf::from("/tmp/sand/machine-version.json")
        );
        assert_eq!(storage.job_store_path(), PathBuf::from("/tmp/sand/jobs.json"));
    }
}
