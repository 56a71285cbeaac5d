use anyhow::Result;
use std::path::PathBuf;

pub const KCMD_DIR_NAME: &str = ".kcmd";
pub const LOGS_SUBDIR: &str = "logs";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub fn kcmd_home() -> Result<PathBuf> {
    if let Ok(override_home) = std::env::var("KCMD_HOME") {
        let trimmed = override_home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("No home directory found"))?
        .join(KCMD_DIR_NAME))
}

pub fn config_file() -> Result<PathBuf> {
    Ok(kcmd_home()?.join(CONFIG_FILE_NAME))
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(kcmd_home()?.join(LOGS_SUBDIR))
}
