use super::StorageAdapter;
use crate::error::{Result, StoreError};
use crate::record::Collections;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Storage as one pretty-printed JSON file per key: `<dir>/<key>.json`.
/// Writes go through a temp file in the same directory and are renamed into
/// place, so a crash never leaves a half-written file behind.
///
/// The adapter owns `dir`: `clear` removes every `*.json` file in it.
pub struct JsonFileAdapter {
    dir: PathBuf,
}

impl JsonFileAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonFileAdapter { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(StoreError::Storage(format!("Invalid storage key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl StorageAdapter for JsonFileAdapter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn save(&self, key: &str, collections: &Collections) -> Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, collections)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&path)
            .map_err(|e| StoreError::Storage(format!("Failed to write {}: {}", path.display(), e.error)))?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Collections>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let collections = serde_json::from_str(&content)
            .map_err(|e| StoreError::Storage(format!("{} is unreadable: {e}", path.display())))?;
        Ok(Some(collections))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let dir = self
            .dir
            .to_str()
            .ok_or_else(|| StoreError::Storage(format!("Non UTF-8 storage path {}", self.dir.display())))?;
        let pattern = format!("{}/*.json", glob::Pattern::escape(dir));

        let entries = glob::glob(&pattern).map_err(|e| StoreError::Storage(e.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::Storage(e.to_string()))?;
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> Collections {
        let mut collections = Collections::new();
        collections.insert(
            "usuarios".into(),
            vec![json!({ "id": 1, "nombre": "Ana" }).as_object().cloned().unwrap()],
        );
        collections
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let adapter = JsonFileAdapter::new(tmp.path().join("data"));

        assert!(!adapter.has("main").unwrap());
        assert!(adapter.load("main").unwrap().is_none());

        adapter.save("main", &sample()).unwrap();
        assert!(tmp.path().join("data/main.json").exists());
        assert_eq!(adapter.load("main").unwrap().unwrap(), sample());
    }

    #[test]
    fn test_field_order_survives() {
        let tmp = tempfile::TempDir::new().unwrap();
        let adapter = JsonFileAdapter::new(tmp.path());

        let mut collections = Collections::new();
        collections.insert(
            "c".into(),
            vec![json!({ "zeta": 1, "alpha": 2, "id": 3 }).as_object().cloned().unwrap()],
        );
        adapter.save("main", &collections).unwrap();

        let loaded = adapter.load("main").unwrap().unwrap();
        let keys: Vec<&String> = loaded["c"][0].keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "id"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let tmp = tempfile::TempDir::new().unwrap();
        let adapter = JsonFileAdapter::new(tmp.path());
        adapter.save("a", &sample()).unwrap();
        adapter.save("b", &sample()).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "keep me").unwrap();

        adapter.remove("a").unwrap();
        adapter.remove("a").unwrap();
        assert!(!adapter.has("a").unwrap());

        adapter.clear().unwrap();
        assert!(!adapter.has("b").unwrap());
        assert!(tmp.path().join("notes.txt").exists());
    }

    #[test]
    fn test_clear_stays_inside_its_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let adapter = JsonFileAdapter::new(tmp.path().join("store"));
        adapter.save("main", &sample()).unwrap();
        std::fs::write(tmp.path().join("export.json"), "{}").unwrap();

        adapter.clear().unwrap();
        assert!(!adapter.has("main").unwrap());
        assert!(tmp.path().join("export.json").exists());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let tmp = tempfile::TempDir::new().unwrap();
        let adapter = JsonFileAdapter::new(tmp.path());
        assert!(matches!(adapter.save("../x", &sample()), Err(StoreError::Storage(_))));
        assert!(adapter.has("").is_err());
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("main.json"), "{ not json").unwrap();
        let adapter = JsonFileAdapter::new(tmp.path());
        assert!(matches!(adapter.load("main"), Err(StoreError::Storage(_))));
    }
}
