use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KageError, KageResult};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "KAGE_CONFIG";

/// Largest scrypt work factor accepted in either direction. Each step
/// doubles memory; at 30 scrypt needs 1 TiB.
pub const MAX_WORK_FACTOR: u8 = 30;

/// Environment variable naming the default identity file.
pub const IDENTITY_FILE_ENV: &str = "KAGE_IDENTITY_FILE";

/// Top-level configuration (loaded from kage.toml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KageConfig {
    pub encrypt: EncryptConfig,
    pub decrypt: DecryptConfig,
    pub identity: IdentityConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptConfig {
    /// Emit ASCII-armored output by default
    pub armor: bool,
    /// scrypt log2(N) for passphrase encryption (default: 18)
    pub scrypt_work_factor: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptConfig {
    /// Largest scrypt log2(N) accepted when decrypting (default: 22)
    pub max_work_factor: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity file used when none is given on the command line
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for EncryptConfig {
    fn default() -> Self {
        Self {
            armor: false,
            scrypt_work_factor: 18,
        }
    }
}

impl Default for DecryptConfig {
    fn default() -> Self {
        Self { max_work_factor: 22 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl KageConfig {
    /// Default config location: `$XDG_CONFIG_HOME/kage/kage.toml`, falling
    /// back to `~/.config/kage/kage.toml`.
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("kage.toml"))
    }

    /// Default identity file: `~/.config/kage/keys.txt`.
    pub fn default_identity_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("keys.txt"))
    }

    /// Load from `path`, or return defaults (with a warning) if it does not exist.
    pub fn load(path: &Path) -> KageResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn to_toml(&self) -> KageResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> KageResult<()> {
        if !(1..=MAX_WORK_FACTOR).contains(&self.encrypt.scrypt_work_factor) {
            return Err(KageError::Config(format!(
                "encrypt.scrypt_work_factor must be in 1..={MAX_WORK_FACTOR}, got {}",
                self.encrypt.scrypt_work_factor
            )));
        }
        if !(1..=MAX_WORK_FACTOR).contains(&self.decrypt.max_work_factor) {
            return Err(KageError::Config(format!(
                "decrypt.max_work_factor must be in 1..={MAX_WORK_FACTOR}, got {}",
                self.decrypt.max_work_factor
            )));
        }
        match self.log.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(KageError::Config(format!(
                "log.format must be \"text\" or \"json\", got {other:?}"
            ))),
        }
    }
}

fn config_dir() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("kage"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("kage"))
}
