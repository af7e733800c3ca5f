use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::shared::inference::{ToolDef, ToolFunction};
use crate::shared::models::constants::{
    LEGACY_DELETE_CELL_BY_ID, LEGACY_GEN_NOTEBOOK, LEGACY_RUN_NOTEBOOK, LEGACY_UPDATE_CELL_BY_ID,
    TOOL_ADD_CELL, TOOL_CREATE_NOTEBOOK, TOOL_DELETE_CELL, TOOL_RUN_CELLS, TOOL_UPDATE_CELL,
};
use crate::shared::models::ToolInvocation;

/// What a capability does to the notebook; drives announcements and plan checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Create,
    Edit,
    Run,
}

/// One entry of the capability catalog. Nothing here executes; the executor does.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Value,
    pub kind: ToolKind,
    /// Announcement text; `{notebook}` is replaced with the target notebook
    pub announcement: String,
}

impl ToolSpec {
    fn new(
        name: &str,
        description: &str,
        parameters: Value,
        kind: ToolKind,
        announcement: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            kind,
            announcement: announcement.to_string(),
        }
    }

    fn to_tool_def(&self) -> ToolDef {
        ToolDef {
            typ: "function".to_string(),
            function: ToolFunction {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.parameters.clone(),
            },
        }
    }
}

/// Maps parameters from one tool format to another (for aliases)
pub trait ParameterMapper: Send + Sync {
    fn map(&self, args: &Value) -> Value;
}

/// Registry of notebook capabilities and the legacy names that resolve to them
pub struct ToolRegistry {
    // Catalog order is the order tools are bound into the model call
    tools: Vec<ToolSpec>,
    aliases: HashMap<String, String>, // alias -> canonical_name
    mappers: HashMap<String, Box<dyn ParameterMapper>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_notebook_tools()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            aliases: HashMap::new(),
            mappers: HashMap::new(),
        }
    }

    /// The executor's full catalog plus the names older prompts still emit.
    pub fn with_notebook_tools() -> Self {
        let mut registry = Self::new();

        registry.register_tool(ToolSpec::new(
            TOOL_CREATE_NOTEBOOK,
            "Create a new Jupyter notebook. `notebook` is the full nbformat 4 document as JSON.",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Notebook file name without extension"},
                    "notebook": {"type": "object", "description": "Complete notebook document (nbformat 4)"}
                },
                "required": ["name"]
            }),
            ToolKind::Create,
            "I will now generate {notebook}.",
        ));
        registry.register_tool(ToolSpec::new(
            TOOL_ADD_CELL,
            "Insert a new cell into an existing notebook.",
            json!({
                "type": "object",
                "properties": {
                    "notebook_name": {"type": "string"},
                    "content": {"type": "string", "description": "Cell source"},
                    "cell_type": {"type": "string", "enum": ["code", "markdown"], "default": "code"},
                    "cell_index": {"type": "integer", "default": -1, "description": "Insertion index; -1 appends"}
                },
                "required": ["content"]
            }),
            ToolKind::Edit,
            "I will now add a cell to {notebook}.",
        ));
        registry.register_tool(ToolSpec::new(
            TOOL_UPDATE_CELL,
            "Replace the source of an existing cell, addressed by cell id.",
            json!({
                "type": "object",
                "properties": {
                    "notebook_name": {"type": "string"},
                    "cell_id": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["cell_id", "content"]
            }),
            ToolKind::Edit,
            "I will now edit {notebook}.",
        ));
        registry.register_tool(ToolSpec::new(
            TOOL_DELETE_CELL,
            "Remove a cell from a notebook, addressed by cell id.",
            json!({
                "type": "object",
                "properties": {
                    "notebook_name": {"type": "string"},
                    "cell_id": {"type": "string"}
                },
                "required": ["cell_id"]
            }),
            ToolKind::Edit,
            "I will now remove a cell from {notebook}.",
        ));
        registry.register_tool(ToolSpec::new(
            TOOL_RUN_CELLS,
            "Execute notebook cells. An empty `cells` list runs every cell with pending updates.",
            json!({
                "type": "object",
                "properties": {
                    "notebook_name": {"type": "string"},
                    "cells": {"type": "array", "items": {"type": "string"}, "default": []}
                },
                "required": ["cells"]
            }),
            ToolKind::Run,
            "I will now run {notebook}.",
        ));

        registry.register_alias(
            LEGACY_GEN_NOTEBOOK,
            TOOL_CREATE_NOTEBOOK,
            Some(Box::new(ConfigParameterMapper::from_pairs(&[("notebook_name", "name")]))),
        );
        registry.register_alias(
            LEGACY_RUN_NOTEBOOK,
            TOOL_RUN_CELLS,
            Some(Box::new(ConfigParameterMapper::from_pairs(&[("filename", "notebook_name")]))),
        );
        registry.register_alias(
            LEGACY_UPDATE_CELL_BY_ID,
            TOOL_UPDATE_CELL,
            Some(Box::new(ConfigParameterMapper::from_pairs(&[
                ("new_content", "content"),
                ("filename", "notebook_name"),
            ]))),
        );
        registry.register_alias(
            LEGACY_DELETE_CELL_BY_ID,
            TOOL_DELETE_CELL,
            Some(Box::new(ConfigParameterMapper::from_pairs(&[("filename", "notebook_name")]))),
        );

        registry
    }

    /// Register a tool with the registry; a later spec with the same name replaces the earlier one
    pub fn register_tool(&mut self, spec: ToolSpec) {
        debug!("Registering tool: {}", spec.name);
        match self.tools.iter_mut().find(|t| t.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.tools.push(spec),
        }
    }

    /// Register an alias for an existing tool
    pub fn register_alias(
        &mut self,
        alias: &str,
        target: &str,
        mapper: Option<Box<dyn ParameterMapper>>,
    ) {
        debug!("Registering alias '{}' -> '{}'", alias, target);
        self.aliases.insert(alias.to_string(), target.to_string());
        if let Some(mapper) = mapper {
            self.mappers.insert(alias.to_string(), mapper);
        }
    }

    /// Resolve a name, checking aliases first
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        if let Some(canonical) = self.aliases.get(name) {
            return Some(canonical.as_str());
        }
        self.tools
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.name.as_str())
    }

    pub fn get_tool(&self, name: &str) -> Option<&ToolSpec> {
        let canonical = self.canonical_name(name)?;
        self.tools.iter().find(|t| t.name == canonical)
    }

    pub fn kind_of(&self, name: &str) -> Option<ToolKind> {
        self.get_tool(name).map(|t| t.kind)
    }

    /// Rewrite a model-proposed call onto the canonical catalog. Unknown
    /// capabilities yield `None`; the invocation id is preserved.
    pub fn normalize(&self, call: ToolInvocation) -> Option<ToolInvocation> {
        let requested = call.name.trim();
        let Some(canonical) = self.canonical_name(requested) else {
            warn!("Dropping call to unknown tool '{}'", requested);
            return None;
        };

        let arguments = match call.arguments {
            Value::Object(_) => call.arguments,
            Value::Null => Value::Object(Map::new()),
            other => {
                warn!("Tool '{}' proposed with non-object arguments: {}", requested, other);
                Value::Object(Map::new())
            }
        };
        let arguments = match self.mappers.get(requested) {
            Some(mapper) => mapper.map(&arguments),
            None => arguments,
        };

        Some(ToolInvocation {
            id: call.id,
            name: canonical.to_string(),
            arguments,
        })
    }

    /// Provider tool definitions for the canonical catalog. Aliases are
    /// accepted on the way back in but never advertised.
    pub fn tool_defs(&self) -> Vec<ToolDef> {
        let defs: Vec<ToolDef> = self.tools.iter().map(ToolSpec::to_tool_def).collect();
        info!("Generated {} tool definitions", defs.len());
        defs
    }

    /// Human-readable line sent alongside an emitted call.
    pub fn announce(&self, call: &ToolInvocation, fallback_notebook: Option<&str>) -> String {
        let target_key = match self.kind_of(&call.name) {
            Some(ToolKind::Create) => "name",
            _ => "notebook_name",
        };
        let target = call
            .argument_str(target_key)
            .or_else(|| fallback_notebook.map(str::trim).filter(|s| !s.is_empty()))
            .map(|name| format!("notebook {}", name))
            .unwrap_or_else(|| "the notebook".to_string());

        match self.get_tool(&call.name) {
            Some(spec) => spec.announcement.replace("{notebook}", &target),
            None => format!("I will now call {}.", call.name),
        }
    }

    /// Get list of all available tools (including aliases)
    pub fn list_tools(&self) -> Vec<String> {
        let mut tool_names: Vec<String> = self.tools.iter().map(|t| t.name.clone()).collect();
        tool_names.extend(self.aliases.keys().cloned());
        tool_names.sort();
        tool_names
    }

    /// Canonical capability names in catalog order
    pub fn capability_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }
}

/// Parameter mapper that renames keys; unmapped keys pass through
pub struct ConfigParameterMapper {
    mapping: HashMap<String, String>,
}

impl ConfigParameterMapper {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            mapping: pairs
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        }
    }
}

impl ParameterMapper for ConfigParameterMapper {
    fn map(&self, args: &Value) -> Value {
        let mut result = Map::new();

        if let Some(obj) = args.as_object() {
            for (key, value) in obj {
                let target_key = self.mapping.get(key).unwrap_or(key);
                // An explicit canonical key wins over a renamed legacy one
                if target_key != key && obj.contains_key(target_key) {
                    continue;
                }
                result.insert(target_key.clone(), value.clone());
            }
        }

        Value::Object(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Value) -> ToolInvocation {
        ToolInvocation {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: args,
        }
    }

    #[test]
    fn test_catalog_contents() {
        let registry = ToolRegistry::with_notebook_tools();
        assert_eq!(
            registry.capability_names(),
            vec!["create_notebook", "add_cell", "update_cell", "delete_cell", "run_cells"]
        );
        assert_eq!(registry.tool_defs().len(), 5);
        assert_eq!(registry.list_tools().len(), 9);
        assert_eq!(registry.kind_of("run_cells"), Some(ToolKind::Run));
    }

    #[test]
    fn test_tool_alias() {
        let registry = ToolRegistry::with_notebook_tools();
        assert_eq!(registry.canonical_name("run_notebook"), Some("run_cells"));
        assert_eq!(registry.canonical_name("create_notebook"), Some("create_notebook"));
        assert_eq!(registry.canonical_name("rm_rf"), None);
    }

    #[test]
    fn test_alias_arguments_are_mapped() {
        let registry = ToolRegistry::with_notebook_tools();
        let normalized = registry
            .normalize(call(
                "update_cell_by_id",
                json!({"filename": "demo", "cell_id": "c1", "new_content": "print(1)"}),
            ))
            .unwrap();

        assert_eq!(normalized.id, "call_1");
        assert_eq!(normalized.name, "update_cell");
        assert_eq!(normalized.arguments["notebook_name"], "demo");
        assert_eq!(normalized.arguments["content"], "print(1)");
        assert!(normalized.arguments.get("new_content").is_none());
    }

    #[test]
    fn test_canonical_key_wins_over_legacy_key() {
        let mapper = ConfigParameterMapper::from_pairs(&[("filename", "notebook_name")]);
        let mapped = mapper.map(&json!({"filename": "old", "notebook_name": "new"}));
        assert_eq!(mapped, json!({"notebook_name": "new"}));
    }

    #[test]
    fn test_unknown_tool_is_dropped_and_bad_args_reset() {
        let registry = ToolRegistry::with_notebook_tools();
        assert!(registry.normalize(call("shell", json!({}))).is_none());

        let normalized = registry.normalize(call("run_cells", json!("all"))).unwrap();
        assert_eq!(normalized.arguments, json!({}));
    }

    #[test]
    fn test_announcements() {
        let registry = ToolRegistry::with_notebook_tools();

        let create = call("create_notebook", json!({"name": "scatter_1a2b"}));
        assert_eq!(
            registry.announce(&create, None),
            "I will now generate notebook scatter_1a2b."
        );

        let run = call("run_cells", json!({"cells": []}));
        assert_eq!(
            registry.announce(&run, Some("scatter_1a2b")),
            "I will now run notebook scatter_1a2b."
        );
        assert_eq!(registry.announce(&run, None), "I will now run the notebook.");

        let delete = call("delete_cell", json!({"notebook_name": "n", "cell_id": "x"}));
        assert_eq!(
            registry.announce(&delete, None),
            "I will now remove a cell from notebook n."
        );
    }
}
