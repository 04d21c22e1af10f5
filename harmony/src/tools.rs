//! Built-in tool namespaces
//!
//! The browser and python tools that gpt-oss models were trained with.

use serde_json::json;

use crate::chat::{ToolDescription, ToolNamespaceConfig};

const BROWSER_NAMESPACE: &str = "browser";
const PYTHON_NAMESPACE: &str = "python";

/// Whether `name` is one of the built-in namespaces. These are the only tool
/// authors that can appear in a header on their own.
pub(crate) fn is_builtin_namespace(name: &str) -> bool {
    matches!(name, BROWSER_NAMESPACE | PYTHON_NAMESPACE)
}

const BROWSER_DESCRIPTION: &str = "Tool for browsing.
The `cursor` appears in brackets before each browsing display: `[{cursor}]`.
Cite information from the tool using the following format:
`【{cursor}†L{line_start}(-L{line_end})?】`, for example: `【6†L9-L11】` or `【8†L3】`.
Do not quote more than 10 words directly from the tool output.
sources=web (default: web)";

const PYTHON_DESCRIPTION: &str = "Use this tool to execute Python code in your chain of thought. The code will not be shown to the user. This tool should be used for internal reasoning, but not for code that is intended to be visible to the user (e.g. when creating plots, tables, or files).

When you send a message containing Python code to python, it will be executed in a stateful Jupyter notebook environment. python will respond with the output of the execution or time out after 120.0 seconds. The drive at '/mnt/data' can be used to save and persist user files. Internet access for this session is UNKNOWN. Depending on the environment, internet access may be available or not.";

impl ToolNamespaceConfig {
    /// The `browser` namespace: `search`, `open` and `find`.
    #[must_use]
    pub fn browser() -> Self {
        Self::new(
            BROWSER_NAMESPACE,
            Some(BROWSER_DESCRIPTION.to_string()),
            vec![
                ToolDescription::new(
                    "search",
                    "Searches for information related to `query` and displays `topn` results.",
                    Some(json!({
                        "type": "object",
                        "properties": {
                            "query": {"type": "string"},
                            "topn": {"type": "number", "default": 10},
                            "source": {"type": "string"}
                        },
                        "required": ["query"]
                    })),
                ),
                ToolDescription::new(
                    "open",
                    "Opens the link `id` from the page indicated by `cursor` starting at line number `loc`, showing `num_lines` lines.
Valid link ids are displayed with the formatting: `【{id}†.*】`.
If `cursor` is not provided, the most recent page is implied.
If `id` is a string, it is treated as a fully qualified URL associated with `source`.
If `loc` is not provided, the viewport will be positioned at the beginning of the document or centered on the most relevant passage, if available.
Use this function without `id` to scroll to a new location of an opened page.",
                    Some(json!({
                        "type": "object",
                        "properties": {
                            "id": {"type": ["number", "string"], "default": -1},
                            "cursor": {"type": "number", "default": -1},
                            "loc": {"type": "number", "default": -1},
                            "num_lines": {"type": "number", "default": -1},
                            "view_source": {"type": "boolean", "default": false},
                            "source": {"type": "string"}
                        }
                    })),
                ),
                ToolDescription::new(
                    "find",
                    "Finds exact matches of `pattern` in the current page, or the page given by `cursor`.",
                    Some(json!({
                        "type": "object",
                        "properties": {
                            "pattern": {"type": "string"},
                            "cursor": {"type": "number", "default": -1}
                        },
                        "required": ["pattern"]
                    })),
                ),
            ],
        )
    }

    /// The `python` namespace. It declares no functions; the model addresses
    /// messages to `python` directly.
    #[must_use]
    pub fn python() -> Self {
        Self::new(PYTHON_NAMESPACE, Some(PYTHON_DESCRIPTION.to_string()), vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_tools_in_order() {
        let ns = ToolNamespaceConfig::browser();
        let names: Vec<&str> = ns.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["search", "open", "find"]);
        assert!(ns.tools.iter().all(|t| t.parameters.is_some()));
    }

    #[test]
    fn test_python_has_no_functions() {
        let ns = ToolNamespaceConfig::python();
        assert_eq!(ns.name, "python");
        assert!(ns.tools.is_empty());
        assert!(ns.description.is_some());
    }
}
