use anyhow::{Context, Result};
use dirs::home_dir;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use crate::installation_key::{
    generate_installation_id, generate_installation_key, parse_installation_key, InstallationKey,
};

/// Get the default installation key location (~/.lm-switch/installation_key.json)
pub fn default_installation_key_path() -> Result<PathBuf> {
    let home = home_dir().context("Failed to determine home directory")?;
    Ok(home.join(".lm-switch").join("installation_key.json"))
}

/// Load an installation key file, validating it before handing it out
pub fn load_installation_key(path: &Path) -> Result<InstallationKey> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read installation key: {}", path.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse installation key: {}", path.display()))?;

    parse_installation_key(&raw)
        .with_context(|| format!("Invalid installation key in {}", path.display()))?;
    let key: InstallationKey = serde_json::from_value(raw)
        .with_context(|| format!("Invalid installation key in {}", path.display()))?;

    debug!("Loaded installation key: {}", key.installation_id);
    Ok(key)
}

/// Write an installation key as pretty-printed JSON, creating parent directories
pub fn save_installation_key(path: &Path, key: &InstallationKey) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let content =
        serde_json::to_string_pretty(key).context("Failed to serialize installation key")?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write installation key: {}", path.display()))?;

    debug!("Saved installation key: {}", key.installation_id);
    Ok(())
}

/// Load the installation key at `path`, generating and saving one on first run.
///
/// The flag is `true` when the key was just created, in which case the caller
/// should register it with the cloud.
pub fn load_or_create_installation_key(path: &Path) -> Result<(InstallationKey, bool)> {
    if path.exists() {
        return Ok((load_installation_key(path)?, false));
    }

    let key = generate_installation_key(generate_installation_id());
    save_installation_key(path, &key)?;
    info!(
        "Created installation key {} at {}",
        key.installation_id,
        path.display()
    );
    Ok((key, true))
}
