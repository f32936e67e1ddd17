use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "restless.yaml";

/// Which storage adapter a database opens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Json,
    Memory,
}

/// Per-directory settings, read from `restless.yaml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Key the collections map is saved under
    pub storage_key: String,
    pub backend: Backend,
    /// Schema file, relative to the data directory
    pub schema_file: String,
    /// SQLite file, relative to the data directory
    pub database_file: String,
    /// Directory owned by the JSON backend, relative to the data directory
    pub json_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            storage_key: "restless-db".to_string(),
            backend: Backend::Sqlite,
            schema_file: "schema.yaml".to_string(),
            database_file: "restless.db".to_string(),
            json_dir: "store".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Load `<data_dir>/restless.yaml`, or the defaults when it doesn't exist.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(DatabaseConfig::default());
        }
        let content = std::fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(DatabaseConfig::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert_eq!(DatabaseConfig::load(tmp.path()).unwrap(), DatabaseConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "backend: json\nstorage_key: tienda\n").unwrap();

        let config = DatabaseConfig::load(tmp.path()).unwrap();
        assert_eq!(config.backend, Backend::Json);
        assert_eq!(config.storage_key, "tienda");
        assert_eq!(config.schema_file, "schema.yaml");
        assert_eq!(config.json_dir, "store");
    }

    #[test]
    fn test_unknown_backend_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "backend: postgres\n").unwrap();
        assert!(DatabaseConfig::load(tmp.path()).is_err());
    }
}
