//! Agent registry - definitions and live runtimes keyed by agent ID

use nexus_core::{AgentRuntime, ToolHandler};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::types::AgentDefinition;

/// Shared, cloneable view of the registered agent definitions.
///
/// Tools and the router hold a catalog rather than the registry itself so
/// that runtimes never own a handle back to the pool they live in.
#[derive(Clone, Default)]
pub struct AgentCatalog {
    agents: Arc<RwLock<HashMap<String, Arc<AgentDefinition>>>>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a definition
    pub fn insert(&self, definition: AgentDefinition) {
        self.agents
            .write()
            .insert(definition.id.clone(), Arc::new(definition));
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.read().contains_key(id)
    }

    /// Snapshot of every definition, sorted by ID
    pub fn list(&self) -> Vec<Arc<AgentDefinition>> {
        let mut agents: Vec<_> = self.agents.read().values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Agents that accept handoffs, sorted by ID
    pub fn handoff_targets(&self) -> Vec<Arc<AgentDefinition>> {
        self.list()
            .into_iter()
            .filter(|a| a.can_receive_handoffs)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Case-insensitive match on ID or name
    pub fn find_by_name(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        let needle = name.trim().to_lowercase();
        self.list()
            .into_iter()
            .find(|a| a.id.to_lowercase() == needle || a.name.to_lowercase() == needle)
    }

    /// Resolve a user- or model-supplied agent reference: exact ID, then
    /// case-insensitive ID or name, then a partial name match.
    pub fn resolve(&self, reference: &str) -> Option<Arc<AgentDefinition>> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        if let Some(agent) = self.get(reference) {
            return Some(agent);
        }
        if let Some(agent) = self.find_by_name(reference) {
            return Some(agent);
        }
        let needle = reference.to_lowercase();
        self.list()
            .into_iter()
            .find(|a| a.name.to_lowercase().contains(&needle))
    }
}

/// Registry of agent definitions and their runtimes
pub struct AgentRegistry {
    catalog: AgentCatalog,
    runtimes: RwLock<HashMap<String, Arc<dyn AgentRuntime>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            catalog: AgentCatalog::new(),
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Catalog handle sharing this registry's definitions
    pub fn catalog(&self) -> AgentCatalog {
        self.catalog.clone()
    }

    /// Store a definition with its runtime, replacing any previous entry
    pub fn insert(
        &self,
        definition: AgentDefinition,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Result<(), RegistryError> {
        if definition.id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        let id = definition.id.clone();
        let replaced = {
            // Readers never see a runtime without its definition
            let mut runtimes = self.runtimes.write();
            self.catalog.insert(definition);
            runtimes.insert(id.clone(), runtime).is_some()
        };
        if replaced {
            info!("Replaced agent '{}'", id);
        } else {
            info!("Registered agent '{}'", id);
        }
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Option<Arc<AgentDefinition>> {
        self.catalog.get(id)
    }

    pub fn get_runtime(&self, id: &str) -> Option<Arc<dyn AgentRuntime>> {
        self.runtimes.read().get(id).cloned()
    }

    /// Snapshot of every definition, sorted by ID
    pub fn list_agents(&self) -> Vec<Arc<AgentDefinition>> {
        self.catalog.list()
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// Install a tool on one agent's runtime
    pub fn register_tool_for_agent(
        &self,
        agent_id: &str,
        tool: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        let runtime = self
            .get_runtime(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))?;
        debug!("Installing tool '{}' on agent '{}'", tool.name(), agent_id);
        runtime.register_tool(tool);
        Ok(())
    }

    /// Install a tool on every agent registered right now. Agents
    /// registered later do not receive it.
    pub fn register_tool_for_all(&self, tool: Arc<dyn ToolHandler>) -> usize {
        let runtimes: Vec<Arc<dyn AgentRuntime>> = self.runtimes.read().values().cloned().collect();
        for runtime in &runtimes {
            runtime.register_tool(tool.clone());
        }
        debug!("Installed tool '{}' on {} agent(s)", tool.name(), runtimes.len());
        runtimes.len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedRuntime, StaticTool};

    fn runtime() -> Arc<ScriptedRuntime> {
        Arc::new(ScriptedRuntime::new())
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = AgentRegistry::new();
        registry
            .insert(AgentDefinition::new("coder").with_name("Code Expert"), runtime())
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_agent("coder").unwrap().name, "Code Expert");
        assert!(registry.get_runtime("coder").is_some());
        assert!(registry.get_agent("missing").is_none());
        assert!(registry.get_runtime("missing").is_none());
    }

    #[test]
    fn test_empty_id_rejected() {
        let registry = AgentRegistry::new();
        let err = registry.insert(AgentDefinition::new(""), runtime()).unwrap_err();
        assert!(matches!(err, RegistryError::EmptyId));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reinsert_overwrites() {
        let registry = AgentRegistry::new();
        registry
            .insert(AgentDefinition::new("a").with_description("first"), runtime())
            .unwrap();
        registry
            .insert(AgentDefinition::new("a").with_description("second"), runtime())
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_agent("a").unwrap().description, "second");
    }

    #[test]
    fn test_runtime_never_visible_without_definition() {
        let registry = Arc::new(AgentRegistry::new());
        let ids: Vec<String> = (0..200).map(|i| format!("agent-{}", i)).collect();

        let writer = {
            let registry = registry.clone();
            let ids = ids.clone();
            std::thread::spawn(move || {
                for id in ids {
                    registry.insert(AgentDefinition::new(id), runtime()).unwrap();
                }
            })
        };
        while !writer.is_finished() {
            for id in &ids {
                if registry.get_runtime(id).is_some() {
                    assert!(registry.get_agent(id).is_some(), "{} has no definition", id);
                }
            }
        }
        writer.join().unwrap();
        assert_eq!(registry.len(), 200);
    }

    #[test]
    fn test_list_sorted() {
        let registry = AgentRegistry::new();
        for id in ["zeta", "alpha", "mid"] {
            registry.insert(AgentDefinition::new(id), runtime()).unwrap();
        }
        let ids: Vec<String> = registry.list_agents().iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_definition_is_a_copy() {
        let registry = AgentRegistry::new();
        let mut def = AgentDefinition::new("a");
        registry.insert(def.clone(), runtime()).unwrap();
        def.description = "changed later".into();
        assert_eq!(registry.get_agent("a").unwrap().description, "");
    }

    #[test]
    fn test_register_tool_for_agent() {
        let registry = AgentRegistry::new();
        let rt = runtime();
        registry.insert(AgentDefinition::new("a"), rt.clone()).unwrap();

        registry
            .register_tool_for_agent("a", Arc::new(StaticTool::new("clock", "noon")))
            .unwrap();
        assert_eq!(rt.tool_names(), vec!["clock".to_string()]);

        let err = registry
            .register_tool_for_agent("ghost", Arc::new(StaticTool::new("clock", "noon")))
            .unwrap_err();
        assert!(matches!(err, RegistryError::AgentNotFound(_)));
    }

    #[test]
    fn test_register_tool_for_all_is_not_retroactive() {
        let registry = AgentRegistry::new();
        let first = runtime();
        let second = runtime();
        registry.insert(AgentDefinition::new("a"), first.clone()).unwrap();
        registry.insert(AgentDefinition::new("b"), second.clone()).unwrap();

        let installed = registry.register_tool_for_all(Arc::new(StaticTool::new("clock", "noon")));
        assert_eq!(installed, 2);

        let late = runtime();
        registry.insert(AgentDefinition::new("c"), late.clone()).unwrap();

        assert!(first.tool_names().contains(&"clock".to_string()));
        assert!(second.tool_names().contains(&"clock".to_string()));
        assert!(late.tool_names().is_empty());
    }

    #[test]
    fn test_catalog_resolve() {
        let catalog = AgentCatalog::new();
        catalog.insert(AgentDefinition::new("code-expert").with_name("Code Expert"));
        catalog.insert(AgentDefinition::new("research").with_name("Research Expert"));

        assert_eq!(catalog.resolve("code-expert").unwrap().id, "code-expert");
        assert_eq!(catalog.resolve("CODE-EXPERT").unwrap().id, "code-expert");
        assert_eq!(catalog.resolve("research expert").unwrap().id, "research");
        assert_eq!(catalog.resolve("Code").unwrap().id, "code-expert");
        assert!(catalog.resolve("writer").is_none());
        assert!(catalog.resolve("  ").is_none());
    }

    #[test]
    fn test_handoff_targets_filtered() {
        let catalog = AgentCatalog::new();
        catalog.insert(AgentDefinition::new("open"));
        catalog.insert(AgentDefinition {
            can_receive_handoffs: false,
            ..AgentDefinition::new("closed")
        });
        let targets: Vec<String> = catalog.handoff_targets().iter().map(|a| a.id.clone()).collect();
        assert_eq!(targets, vec!["open"]);
    }
}
