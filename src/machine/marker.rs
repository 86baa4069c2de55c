//! Machine version marker.
//!
//! `machd` persists the `[machine]` configuration table as JSON after every
//! full initialization. On the next start the persisted snapshot is compared
//! against the live configuration; when they match, homing (and the rest of
//! full initialization) is skipped and the prior calibration is reused.

use crate::config::MachineConfig;
use crate::error::Result;
use std::fs;
use std::path::Path;

/// Compare the live machine configuration against the persisted marker and
/// rewrite the marker when they differ.
///
/// Returns `true` when full initialization (homing) is required: the marker is
/// missing, unreadable, or records a different configuration. A missing data
/// directory is created on the way.
pub fn check_and_update(path: &Path, config: &MachineConfig) -> Result<bool> {
    let full_init = match read_marker(path) {
        Some(previous) => previous != *config,
        None => true,
    };

    if full_init {
        write_marker(path, config)?;
    }
    Ok(full_init)
}

fn read_marker(path: &Path) -> Option<MachineConfig> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::debug!("No usable version marker at {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Corrupt version marker at {}: {}", path.display(), e);
            None
        }
    }
}

/// Overwrite the marker atomically: write a sibling temp file, then rename.
fn write_marker(path: &Path, config: &MachineConfig) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(config)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
