pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::JsonFileAdapter;
pub use memory::MemoryAdapter;
pub use sqlite::SqliteAdapter;

use crate::error::Result;
use crate::record::Collections;

/// Durable home of a store's collections map.
///
/// Every call either completes or fails; the store reports any failure to
/// the caller of the mutation that triggered it.
pub trait StorageAdapter: Send + Sync {
    /// Short backend name used in log lines.
    fn name(&self) -> &'static str;

    /// Replace whatever is stored under `key` with `collections`.
    fn save(&self, key: &str, collections: &Collections) -> Result<()>;

    /// The map stored under `key`, or `None` if nothing was ever saved there.
    fn load(&self, key: &str) -> Result<Option<Collections>>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key.
    fn clear(&self) -> Result<()>;

    fn has(&self, key: &str) -> Result<bool>;
}
