//! Type definitions for the tool catalog.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A callable tool: the unit of retrieval.
///
/// `name` is the stable identity and may encode a call signature, e.g.
/// `open_cart_content(app, filter_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Ordered, name-unique collection of tools.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
    by_name: HashMap<String, usize>,
}

impl ToolCatalog {
    /// Build a catalog, rejecting empty input and duplicate names.
    pub fn new(tools: Vec<ToolDefinition>) -> Result<Self> {
        if tools.is_empty() {
            return Err(AppError::CatalogError("catalog contains no tools".into()));
        }

        let mut by_name = HashMap::with_capacity(tools.len());
        for (idx, tool) in tools.iter().enumerate() {
            if by_name.insert(tool.name.clone(), idx).is_some() {
                return Err(AppError::CatalogError(format!(
                    "duplicate tool name '{}'",
                    tool.name
                )));
            }
        }

        Ok(Self { tools, by_name })
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn get(&self, index: usize) -> Option<&ToolDefinition> {
        self.tools.get(index)
    }

    /// Catalog index of a tool by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_preserves_order_and_indexes_names() {
        let catalog = ToolCatalog::new(vec![
            ToolDefinition::new("b_tool", "second letter"),
            ToolDefinition::new("a_tool", "first letter"),
        ])
        .unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.tools()[0].name, "b_tool");
        assert_eq!(catalog.index_of("a_tool"), Some(1));
        assert!(!catalog.contains("c_tool"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ToolCatalog::new(vec![
            ToolDefinition::new("dup", "one"),
            ToolDefinition::new("dup", "two"),
        ]);

        assert!(matches!(result, Err(AppError::CatalogError(msg)) if msg.contains("dup")));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(ToolCatalog::new(Vec::new()).is_err());
    }
}
