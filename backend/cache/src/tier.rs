use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use tally_core::TallyError;

/// One command inside an atomic tier batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierCommand {
    Set { key: String, value: String },
    Delete { key: String },
}

/// The shared cache tier: an external key/value store holding one
/// serialized document per guild with pending un-persisted counts.
///
/// `batch` executes its commands as a single atomic unit; callers never
/// inspect per-command replies, so the whole batch either commits or
/// surfaces one error.
#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TallyError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), TallyError>;

    async fn delete(&self, key: &str) -> Result<(), TallyError>;

    /// All keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, TallyError>;

    /// Execute the commands as one atomic multi-command batch.
    async fn batch(&self, commands: Vec<TierCommand>) -> Result<(), TallyError>;
}

/// In-process tier used by tests and single-node development runs where no
/// external cache is configured.
pub struct InMemoryCacheTier {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCacheTier {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCacheTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheTier for InMemoryCacheTier {
    async fn get(&self, key: &str) -> Result<Option<String>, TallyError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), TallyError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TallyError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, TallyError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn batch(&self, commands: Vec<TierCommand>) -> Result<(), TallyError> {
        let mut entries = self.entries.lock().unwrap();
        for command in commands {
            match command {
                TierCommand::Set { key, value } => {
                    entries.insert(key, value);
                }
                TierCommand::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
