use crate::events::RuntimeEvent;
use crate::instance::ProcessInstance;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence trait for process instances and their audit trail.
///
/// The engine reads a snapshot, dispatches on a private copy and writes it
/// back through `save_instance`, which enforces optimistic versioning.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    // ── Instance ──

    /// Store `instance` if the stored version still equals `expected_version`
    /// (0 for an instance that was never saved). Returns the new version.
    ///
    /// Fails with `EngineError::ConcurrentModification` on a stale version.
    async fn save_instance(&self, instance: &ProcessInstance, expected_version: u64) -> Result<u64>;
    async fn load_instance(&self, id: Uuid) -> Result<Option<ProcessInstance>>;
    /// Instance ids, oldest first, optionally restricted to one process key.
    async fn list_instances(&self, process_key: Option<&str>) -> Result<Vec<Uuid>>;

    // ── Event log (append-only) ──

    /// Append an event and return its sequence number.
    async fn append_event(&self, instance_id: Uuid, event: &RuntimeEvent) -> Result<u64>;
    async fn read_events(&self, instance_id: Uuid, from_seq: u64) -> Result<Vec<(u64, RuntimeEvent)>>;
}
