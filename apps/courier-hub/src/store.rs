use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{Config, ConfigError, CONFIG_ENV, DEFAULT_CONFIG_PATH};

/// Where the configuration lives.
///
/// Backed by a JSON file in production and an in-memory slot in tests.
pub trait ConfigStore: Send + Sync {
    /// Returns [`ConfigError::NotFound`] when nothing has been saved yet.
    fn load(&self) -> Result<Config, ConfigError>;
    fn save(&self, config: &Config) -> Result<(), ConfigError>;
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$COURIER_CONFIG`, falling back to `courier/config.json`.
    pub fn from_env() -> Self {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ConfigStore for FileStore {
    fn load(&self) -> Result<Config, ConfigError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(self.path.display().to_string()));
            }
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            location: self.path.display().to_string(),
            source,
        })
    }

    fn save(&self, config: &Config) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }

        let mut data = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut data, formatter);
        config.serialize(&mut ser).map_err(|source| ConfigError::Parse {
            location: self.path.display().to_string(),
            source,
        })?;

        std::fs::write(&self.path, data).map_err(|e| self.io_error(e))?;

        // The file carries the shared secret.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o660))
                .map_err(|e| self.io_error(e))?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) use memory::MemoryStore;
