//! Files bundled with the crate and installed into the storage directory.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{Result, VariantStoreError};

/// Name of the bundled backend schema inside the backend directory.
pub const SCHEMA_FILE: &str = "schema.sql";

const BUNDLED: &[(&str, &str)] = &[(SCHEMA_FILE, include_str!("../resources/schema.sql"))];

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".installing");
    dest.with_file_name(name)
}

/// Install the bundled files into `dest` unless it already exists.
///
/// Files are written to a sibling staging directory that is renamed into
/// place, so `dest` is either absent or complete. Returns whether anything was
/// installed.
pub fn install_bundled(dest: &Path) -> Result<bool> {
    if dest.is_dir() {
        debug!("resources already installed at {}", dest.display());
        return Ok(false);
    }
    let fail = |e: std::io::Error| VariantStoreError::provisioning(dest, e.to_string());

    let staging = staging_path(dest);
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(fail)?;
    }
    fs::create_dir_all(&staging).map_err(fail)?;
    for (name, content) in BUNDLED {
        let target = staging.join(name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(fail)?;
        }
        fs::write(&target, content).map_err(fail)?;
    }
    fs::rename(&staging, dest).map_err(fail)?;
    info!("installed {} resource file(s) into {}", BUNDLED.len(), dest.display());
    Ok(true)
}

/// Remove a provisioned directory and everything in it.
pub fn clear(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| VariantStoreError::provisioning(path, e.to_string()))?;
    }
    Ok(())
}
