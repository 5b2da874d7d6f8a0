//! Named engine registry.
//!
//! An explicit value the embedding application owns and passes around; there
//! is no process-wide singleton.

use crate::engine::BpmnKernelEngine;
use crate::error::EngineError;
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Default)]
struct Inner {
    engines: BTreeMap<String, Arc<BpmnKernelEngine>>,
    default_name: Option<String>,
}

#[derive(Default)]
pub struct EngineRegistry {
    inner: RwLock<Inner>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `engine` as its default engine.
    pub fn init(engine: BpmnKernelEngine) -> Result<(Self, Arc<BpmnKernelEngine>)> {
        let registry = Self::new();
        let engine = registry.register(engine)?;
        Ok((registry, engine))
    }

    /// Add an engine under its configured name. The first engine registered
    /// becomes the default.
    pub fn register(&self, engine: BpmnKernelEngine) -> Result<Arc<BpmnKernelEngine>> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let name = engine.name().to_string();
        if inner.engines.contains_key(&name) {
            return Err(EngineError::DuplicateEngine(name).into());
        }
        let engine = Arc::new(engine);
        inner.engines.insert(name.clone(), engine.clone());
        if inner.default_name.is_none() {
            inner.default_name = Some(name.clone());
        }
        info!(engine = %name, "engine registered");
        Ok(engine)
    }

    /// Remove an engine without closing it. Unregistering the default engine
    /// clears the default.
    pub fn unregister(&self, name: &str) -> Result<Option<Arc<BpmnKernelEngine>>> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let removed = inner.engines.remove(name);
        if inner.default_name.as_deref() == Some(name) {
            inner.default_name = None;
        }
        if removed.is_some() {
            info!(engine = %name, "engine unregistered");
        }
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Result<Arc<BpmnKernelEngine>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        inner
            .engines
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEngine(name.to_string()).into())
    }

    pub fn default_engine(&self) -> Result<Arc<BpmnKernelEngine>> {
        let name = {
            let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
            inner
                .default_name
                .clone()
                .ok_or_else(|| EngineError::UnknownEngine("<default>".to_string()))?
        };
        self.get(&name)
    }

    pub fn names(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(inner.engines.keys().cloned().collect())
    }

    /// Close every registered engine and empty the registry. Handles still
    /// held elsewhere fail with `EngineClosed` from then on.
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        for engine in inner.engines.values() {
            engine.close();
        }
        inner.engines.clear();
        inner.default_name = None;
        Ok(())
    }
}
