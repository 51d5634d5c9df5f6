//! Catalog loading from JSON.
//!
//! Two shapes are accepted: a plain array of `{name, description}` records,
//! or an MCP `list_tools` JSON-RPC response carrying `result.tools`.
//! Individual malformed entries are logged and skipped (partial success model).

use crate::catalog::types::{ToolCatalog, ToolDefinition};
use crate::error::{AppError, Result};
use serde_json::Value;
use std::path::Path;

/// Load and validate the tool catalog from a JSON file.
///
/// Any failure here is fatal for the run, so errors name the offending file.
pub fn load_catalog(path: &Path) -> Result<ToolCatalog> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::CatalogError(format!("failed to read '{}': {}", path.display(), e))
    })?;

    let json: Value = serde_json::from_str(&content).map_err(|e| {
        AppError::CatalogError(format!("'{}' is not valid JSON: {}", path.display(), e))
    })?;

    let catalog = parse_catalog(&json)?;

    tracing::info!(
        path = %path.display(),
        tools = catalog.len(),
        "Tool catalog loaded"
    );

    Ok(catalog)
}

/// Parse a catalog from an already-decoded JSON value.
pub fn parse_catalog(json: &Value) -> Result<ToolCatalog> {
    let entries = extract_tools_array(json)?;

    let mut tools = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        match normalize_tool(entry) {
            Ok(tool) => tools.push(tool),
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "Skipping malformed tool definition");
            }
        }
    }

    if tools.is_empty() && !entries.is_empty() {
        return Err(AppError::CatalogError(
            "all tool definitions failed to parse".into(),
        ));
    }

    tracing::debug!(
        total = entries.len(),
        parsed = tools.len(),
        "Catalog normalization complete"
    );

    ToolCatalog::new(tools)
}

/// Locate the tool array: either the root itself or `result.tools`.
fn extract_tools_array(json: &Value) -> Result<&Vec<Value>> {
    if let Some(array) = json.as_array() {
        return Ok(array);
    }

    json.get("result")
        .and_then(|r| r.get("tools"))
        .and_then(|t| t.as_array())
        .ok_or_else(|| {
            AppError::CatalogError(
                "expected a JSON array of tools or an MCP response with 'result.tools'".into(),
            )
        })
}

fn normalize_tool(entry: &Value) -> Result<ToolDefinition> {
    let name = entry
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            AppError::CatalogError(format!(
                "tool missing required 'name' field: {:?}",
                entry.get("name")
            ))
        })?;

    // null or missing descriptions are legal; the tool stays retrievable by its history
    let description = entry
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim();

    Ok(ToolDefinition::new(name, description))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_parse_plain_array() {
        let json = json!([
            { "name": "open_cart_content(app, filter_type)", "description": "查看购物车" },
            { "name": "sign_in(app, page_type)", "description": "每日签到" }
        ]);

        let catalog = parse_catalog(&json).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.tools()[0].name, "open_cart_content(app, filter_type)");
        assert_eq!(catalog.tools()[1].description, "每日签到");
    }

    #[test]
    fn test_parse_mcp_response() {
        let json = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "tools": [{
                    "name": "calculate_sum",
                    "description": "Add two numbers.",
                    "inputSchema": { "type": "object" }
                }]
            }
        });

        let catalog = parse_catalog(&json).unwrap();
        assert_eq!(catalog.tools()[0].name, "calculate_sum");
        assert_eq!(catalog.tools()[0].description, "Add two numbers.");
    }

    #[test]
    fn test_missing_result_returns_error() {
        let result = parse_catalog(&json!({ "jsonrpc": "2.0" }));
        assert!(matches!(result, Err(AppError::CatalogError(_))));
    }

    #[test]
    fn test_null_description_uses_empty() {
        let json = json!([{ "name": "no_desc_tool", "description": null }]);
        let catalog = parse_catalog(&json).unwrap();
        assert_eq!(catalog.tools()[0].description, "");
    }

    #[test]
    fn test_missing_name_skips_tool() {
        let json = json!([
            { "description": "No name here" },
            { "name": "   ", "description": "Blank name" },
            { "name": " valid_tool ", "description": "Has name" }
        ]);

        let catalog = parse_catalog(&json).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.tools()[0].name, "valid_tool");
    }

    #[test]
    fn test_all_malformed_is_fatal() {
        let json = json!([{ "description": "x" }, { "name": 3 }]);
        assert!(parse_catalog(&json).is_err());
    }

    #[test]
    fn test_empty_array_is_fatal() {
        assert!(parse_catalog(&json!([])).is_err());
    }

    #[test]
    fn test_load_catalog_missing_file_names_path() {
        let err = load_catalog(Path::new("/nonexistent/tools.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tools.json"));
    }

    #[test]
    fn test_load_catalog_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "open_app(app)", "description": "打开指定的应用程序"}}]"#)
            .unwrap();

        let catalog = load_catalog(file.path()).unwrap();
        assert!(catalog.contains("open_app(app)"));
    }
}
