//! Connector and listener hooks.
//!
//! Connectors are the only place embedding code runs inside a dispatch:
//! service tasks invoke their bound connector and lifecycle listeners invoke
//! theirs. Whatever error a connector returns unwinds through the kernel
//! unchanged.

use crate::error::KernelError;
use crate::kernel::TokenContext;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub trait Connector: Send + Sync {
    fn execute(&self, cx: &mut TokenContext<'_>) -> anyhow::Result<()>;
}

struct FnConnector<F>(F);

impl<F> Connector for FnConnector<F>
where
    F: Fn(&mut TokenContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn execute(&self, cx: &mut TokenContext<'_>) -> anyhow::Result<()> {
        (self.0)(cx)
    }
}

/// Name → connector lookup, populated before the engine starts serving.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, connector: Arc<dyn Connector>) {
        self.connectors.insert(name.into(), connector);
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut TokenContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnConnector(f)));
    }

    pub fn resolve(&self, name: &str) -> Result<&dyn Connector, KernelError> {
        self.connectors
            .get(name)
            .map(|c| c.as_ref())
            .ok_or_else(|| KernelError::UnknownConnector(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connectors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &names)
            .finish()
    }
}
