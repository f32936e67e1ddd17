use super::StorageAdapter;
use crate::error::Result;
use crate::record::Collections;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Volatile storage. Saved maps live as long as the adapter.
#[derive(Default)]
pub struct MemoryAdapter {
    entries: RwLock<HashMap<String, Collections>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        MemoryAdapter::default()
    }
}

impl StorageAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn save(&self, key: &str, collections: &Collections) -> Result<()> {
        self.entries.write().insert(key.to_string(), collections.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Collections>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_clear() {
        let adapter = MemoryAdapter::new();
        let mut collections = Collections::new();
        collections.insert("a".into(), Vec::new());

        adapter.save("k", &collections).unwrap();
        assert_eq!(adapter.load("k").unwrap(), Some(collections));
        assert!(adapter.has("k").unwrap());

        adapter.clear().unwrap();
        assert!(!adapter.has("k").unwrap());
        assert_eq!(adapter.load("k").unwrap(), None);
    }
}
