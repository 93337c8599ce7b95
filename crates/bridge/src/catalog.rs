//! Projection of discovered tools into the model-facing catalog.

use mb_domain::tool::ToolDefinition;
use mb_mcp_client::McpToolDef;

/// Convert the registry's catalog into capability declarations.
///
/// Pure and infallible: a descriptor whose parameter schema is not a
/// JSON object cannot be declared to the model, so it is omitted with a
/// warning. One bad tool never takes the session down with it.
pub fn project(catalog: &[(&str, &McpToolDef)]) -> Vec<ToolDefinition> {
    catalog
        .iter()
        .filter_map(|(server_id, tool)| {
            if !tool.input_schema.is_object() {
                tracing::warn!(
                    server_id = %server_id,
                    tool = %tool.name,
                    "parameter schema is not an object, omitting tool from catalog"
                );
                return None;
            }
            Some(ToolDefinition {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(json: serde_json::Value) -> McpToolDef {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn projects_name_description_and_schema() {
        let def = tool(serde_json::json!({
            "name": "add",
            "description": "Add two numbers",
            "inputSchema": {
                "type": "object",
                "properties": { "a": { "type": "number" }, "b": { "type": "number" } }
            }
        }));
        let projected = project(&[("calc", &def)]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].name, "add");
        assert_eq!(projected[0].description, "Add two numbers");
        assert!(projected[0].parameters["properties"]["a"].is_object());
    }

    #[test]
    fn malformed_schema_is_omitted_not_fatal() {
        let good = tool(serde_json::json!({ "name": "add" }));
        let bad = tool(serde_json::json!({ "name": "broken", "inputSchema": "not a schema" }));
        let projected = project(&[("calc", &good), ("calc", &bad)]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].name, "add");
    }

    #[test]
    fn empty_catalog_projects_empty() {
        assert!(project(&[]).is_empty());
    }
}
