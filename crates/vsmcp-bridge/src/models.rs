//! Data models shared across the bridge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One remote-callable operation the server exposes to MCP clients.
///
/// The server builds its catalog once at startup; the host consumes it for
/// display, grouped by category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub category: String,
}

/// Build state of the IDE, sampled on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    #[default]
    NoBuildPerformed,
    InProgress,
    Done,
}

/// Snapshot of the IDE build status. Not cached anywhere; every query goes
/// back to the automation collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatusReport {
    pub state: BuildState,
    pub failed_projects: u32,
}

/// Group tools by category for display, sorted by name within each category.
/// Category order follows the BTreeMap's alphabetical ordering.
pub fn group_by_category(tools: &[ToolInfo]) -> BTreeMap<String, Vec<ToolInfo>> {
    let mut grouped: BTreeMap<String, Vec<ToolInfo>> = BTreeMap::new();
    for tool in tools {
        grouped
            .entry(tool.category.clone())
            .or_default()
            .push(tool.clone());
    }
    for tools in grouped.values_mut() {
        tools.sort_by(|a, b| a.name.cmp(&b.name));
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, category: &str) -> ToolInfo {
        ToolInfo {
            name: name.to_string(),
            description: format!("{name} description"),
            category: category.to_string(),
        }
    }

    #[test]
    fn grouping_sorts_categories_and_names() {
        let tools = vec![
            tool("solution_open", "Solution"),
            tool("build_status", "Build"),
            tool("build_cancel", "Build"),
            tool("solution_info", "Solution"),
        ];

        let grouped = group_by_category(&tools);
        let categories: Vec<_> = grouped.keys().cloned().collect();
        assert_eq!(categories, ["Build", "Solution"]);

        let build: Vec<_> = grouped["Build"].iter().map(|t| t.name.as_str()).collect();
        assert_eq!(build, ["build_cancel", "build_status"]);
    }

    #[test]
    fn build_status_roundtrips() {
        let report = BuildStatusReport {
            state: BuildState::InProgress,
            failed_projects: 2,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"state": "in_progress", "failed_projects": 2})
        );
        let parsed: BuildStatusReport = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn build_state_defaults_to_no_build() {
        assert_eq!(BuildState::default(), BuildState::NoBuildPerformed);
    }
}
