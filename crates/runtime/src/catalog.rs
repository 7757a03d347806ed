use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ExecutionMode;
use crate::tool::{Tool, ToolDescriptor};

/// Where a tool lives. Resolution is always local-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOrigin {
    Local,
    Remote,
}

/// Name-keyed table of the capabilities a run may dispatch to.
///
/// Local and remote tools are registered separately; a remote tool whose name
/// collides with a local one is shadowed, never invoked. Thread-safe via Arc
/// wrapping of individual tools.
pub struct ToolCatalog {
    local: HashMap<String, Arc<dyn Tool>>,
    remote: HashMap<String, Arc<dyn Tool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            local: HashMap::new(),
            remote: HashMap::new(),
        }
    }

    /// Register a local tool. Returns error if the name is already taken
    /// within the local origin.
    pub fn register_local(&mut self, tool: impl Tool + 'static) -> Result<(), CatalogError> {
        Self::insert(&mut self.local, Arc::new(tool))
    }

    /// Register a remote tool (already wrapped, typically a client adapter).
    pub fn register_remote(&mut self, tool: Arc<dyn Tool>) -> Result<(), CatalogError> {
        Self::insert(&mut self.remote, tool)
    }

    fn insert(
        table: &mut HashMap<String, Arc<dyn Tool>>,
        tool: Arc<dyn Tool>,
    ) -> Result<(), CatalogError> {
        let name = tool.descriptor().name;
        if table.contains_key(&name) {
            return Err(CatalogError::DuplicateName(name));
        }
        table.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name, local-first then remote.
    pub fn resolve(&self, name: &str) -> Option<(Arc<dyn Tool>, ToolOrigin)> {
        if let Some(tool) = self.local.get(name) {
            return Some((tool.clone(), ToolOrigin::Local));
        }
        self.remote
            .get(name)
            .map(|tool| (tool.clone(), ToolOrigin::Remote))
    }

    /// Descriptor list for one run, filtered by execution mode. Local-only
    /// excludes remote descriptors; the other modes see the union, with
    /// shadowed remote names omitted.
    pub fn descriptors(&self, mode: ExecutionMode) -> Vec<ToolDescriptor> {
        let mut defs: Vec<ToolDescriptor> =
            self.local.values().map(|t| t.descriptor()).collect();
        if mode != ExecutionMode::LocalOnly {
            for (name, tool) in &self.remote {
                if !self.local.contains_key(name) {
                    defs.push(tool.descriptor());
                }
            }
        }
        // Stable order for deterministic provider requests
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn has_remote(&self) -> bool {
        !self.remote.is_empty()
    }

    pub fn len(&self) -> usize {
        self.local.len() + self.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("tool with name '{0}' is already registered")]
    DuplicateName(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::EchoTool;

    #[test]
    fn test_register_and_resolve() {
        let mut catalog = ToolCatalog::new();
        catalog.register_local(EchoTool).unwrap();

        let (_, origin) = catalog.resolve("echo").unwrap();
        assert_eq!(origin, ToolOrigin::Local);
        assert!(catalog.resolve("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut catalog = ToolCatalog::new();
        catalog.register_local(EchoTool).unwrap();
        assert!(catalog.register_local(EchoTool).is_err());
    }

    #[test]
    fn test_local_shadows_remote() {
        let mut catalog = ToolCatalog::new();
        catalog.register_local(EchoTool).unwrap();
        catalog.register_remote(Arc::new(EchoTool)).unwrap();

        let (_, origin) = catalog.resolve("echo").unwrap();
        assert_eq!(origin, ToolOrigin::Local);

        // Shadowed remote name is not listed twice
        let defs = catalog.descriptors(ExecutionMode::Hybrid);
        assert_eq!(defs.iter().filter(|d| d.name == "echo").count(), 1);
    }

    #[test]
    fn test_local_only_excludes_remote() {
        let mut catalog = ToolCatalog::new();
        catalog.register_remote(Arc::new(EchoTool)).unwrap();

        assert!(catalog.descriptors(ExecutionMode::LocalOnly).is_empty());
        assert_eq!(catalog.descriptors(ExecutionMode::Hybrid).len(), 1);
        assert_eq!(
            catalog.descriptors(ExecutionMode::RemoteAugmented).len(),
            1
        );
        assert!(catalog.has_remote());
    }
}
