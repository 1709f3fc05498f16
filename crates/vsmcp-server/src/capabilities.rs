//! Capability catalog: every operation this server exposes to MCP clients.
//!
//! A static registration table rather than runtime discovery: each group
//! declares its tools, the category comes from the declaring group, and the
//! catalog is built once on first query and cached for the process lifetime.

use std::sync::OnceLock;

use vsmcp_bridge::ToolInfo;

struct ToolGroup {
    category: &'static str,
    tools: &'static [(&'static str, &'static str)],
}

static GROUPS: &[ToolGroup] = &[
    ToolGroup {
        category: "Solution",
        tools: &[
            (
                "solution_info",
                "Get the name and path of the currently open solution",
            ),
            ("solution_open", "Open a solution file in the IDE"),
            ("solution_close", "Close the currently open solution"),
            ("project_list", "List all projects in the current solution"),
            ("project_info", "Get details for one project by display name"),
        ],
    },
    ToolGroup {
        category: "Document",
        tools: &[
            ("document_list", "List the open documents"),
            ("document_active", "Get the active document"),
            ("document_open", "Open a document in the editor"),
            ("document_close", "Close a document, optionally saving first"),
            ("document_read", "Read the full text of a document"),
            ("document_write", "Replace the full text of a document"),
            ("selection_get", "Get the current editor selection"),
            ("selection_set", "Set the selection in a document"),
            ("editor_insert", "Insert text at the caret"),
            ("editor_replace", "Replace one text occurrence with another"),
            ("editor_goto_line", "Move the caret to a line in the active document"),
            ("editor_find", "Find text across the active document"),
        ],
    },
    ToolGroup {
        category: "Build",
        tools: &[
            ("build_solution", "Start building the entire solution"),
            ("build_project", "Start building a single project"),
            ("clean_solution", "Remove all build outputs for the solution"),
            ("build_cancel", "Cancel a build or clean in progress"),
            ("build_status", "Get the current build state and failed-project count"),
        ],
    },
    ToolGroup {
        category: "Navigation",
        tools: &[
            ("symbol_document", "List the symbols declared in a document"),
            ("symbol_workspace", "Search symbols across the workspace"),
            ("goto_definition", "Find the definition of the symbol at a position"),
            ("find_references", "Find references to the symbol at a position"),
        ],
    },
];

/// The full catalog. Built once, immutable thereafter; repeated queries
/// return the same slice.
pub fn catalog() -> &'static [ToolInfo] {
    static CATALOG: OnceLock<Vec<ToolInfo>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        GROUPS
            .iter()
            .flat_map(|group| {
                group.tools.iter().map(|(name, description)| ToolInfo {
                    name: (*name).to_string(),
                    description: (*description).to_string(),
                    category: group.category.to_string(),
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use vsmcp_bridge::group_by_category;

    #[test]
    fn catalog_is_nonempty_and_stable() {
        let first = catalog();
        let second = catalog();
        assert!(!first.is_empty());
        // Cached: both queries see the identical allocation.
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn no_duplicate_names_within_a_category() {
        let mut seen = HashSet::new();
        for tool in catalog() {
            assert!(
                seen.insert((tool.category.clone(), tool.name.clone())),
                "duplicate tool {} in category {}",
                tool.name,
                tool.category
            );
        }
    }

    #[test]
    fn covers_all_tool_groups() {
        let categories: HashSet<_> = catalog().iter().map(|t| t.category.as_str()).collect();
        assert_eq!(
            categories,
            HashSet::from(["Solution", "Document", "Build", "Navigation"])
        );
    }

    #[test]
    fn grouped_view_is_sorted_for_display() {
        let grouped = group_by_category(catalog());
        let categories: Vec<_> = grouped.keys().map(String::as_str).collect();
        assert_eq!(categories, ["Build", "Document", "Navigation", "Solution"]);

        for tools in grouped.values() {
            let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
            let mut sorted = names.clone();
            sorted.sort_unstable();
            assert_eq!(names, sorted);
        }
    }

    #[test]
    fn every_tool_has_a_description() {
        for tool in catalog() {
            assert!(!tool.description.is_empty(), "{} lacks a description", tool.name);
        }
    }
}
