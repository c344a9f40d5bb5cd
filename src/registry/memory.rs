use super::*;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process registry for a single server
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    entries: Arc<RwLock<HashMap<String, UserId>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn reserve(&self, name: &str, id: &UserId) -> RegistryResult<Reservation> {
        let mut entries = self.entries.write().await;
        match entries.entry(name.to_string()) {
            Entry::Occupied(_) => Ok(Reservation::Taken),
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
                Ok(Reservation::Reserved)
            }
        }
    }

    async fn list(&self) -> RegistryResult<Vec<(String, UserId)>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(name, id)| (name.clone(), id.clone()))
            .collect())
    }

    async fn remove(&self, name: &str) -> RegistryResult<()> {
        self.entries.write().await.remove(name);
        Ok(())
    }

    async fn clear(&self) -> RegistryResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}
