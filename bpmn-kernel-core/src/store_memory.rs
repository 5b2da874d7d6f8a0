use crate::error::EngineError;
use crate::events::RuntimeEvent;
use crate::instance::ProcessInstance;
use crate::store::ProcessStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory ProcessStore for tests, the CLI and embedding.
pub struct MemoryStore {
    instances: RwLock<HashMap<Uuid, ProcessInstance>>,
    events: RwLock<HashMap<Uuid, Vec<RuntimeEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessStore for MemoryStore {
    async fn save_instance(&self, instance: &ProcessInstance, expected_version: u64) -> Result<u64> {
        let mut store = self.instances.write().map_err(|e| anyhow!("Lock: {}", e))?;

        let actual = store.get(&instance.instance_id).map_or(0, |i| i.version);
        if actual != expected_version {
            return Err(EngineError::ConcurrentModification {
                instance_id: instance.instance_id,
                expected: expected_version,
                actual,
            }
            .into());
        }

        let mut stored = instance.clone();
        stored.version = expected_version + 1;
        stored.journal.clear();
        store.insert(stored.instance_id, stored);
        Ok(expected_version + 1)
    }

    async fn load_instance(&self, id: Uuid) -> Result<Option<ProcessInstance>> {
        let store = self.instances.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store.get(&id).cloned())
    }

    async fn list_instances(&self, process_key: Option<&str>) -> Result<Vec<Uuid>> {
        let store = self.instances.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut ids: Vec<Uuid> = store
            .values()
            .filter(|i| process_key.is_none() || process_key == Some(i.process_key.as_str()))
            .map(|i| i.instance_id)
            .collect();
        // v7 ids sort by creation time
        ids.sort();
        Ok(ids)
    }

    async fn append_event(&self, instance_id: Uuid, event: &RuntimeEvent) -> Result<u64> {
        let mut events = self.events.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let log = events.entry(instance_id).or_default();
        let seq = log.len() as u64;
        log.push(event.clone());
        Ok(seq)
    }

    async fn read_events(&self, instance_id: Uuid, from_seq: u64) -> Result<Vec<(u64, RuntimeEvent)>> {
        let events = self.events.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(events
            .get(&instance_id)
            .map(|log| {
                log.iter()
                    .enumerate()
                    .skip(from_seq as usize)
                    .map(|(seq, e)| (seq as u64, e.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
