//! Canonical text of structured content
//!
//! System and developer content render to fixed-layout text blocks. The
//! layout is deterministic, so [`recognize`] can turn a block back into the
//! structured value it came from.
//!
//! System content, sections separated by a blank line:
//!
//! ```text
//! {model_identity}
//! Knowledge cutoff: {knowledge_cutoff}
//! Current date: {conversation_start_date}
//!
//! Reasoning: {reasoning_effort}
//!
//! # Tools
//!
//! ## {namespace}
//! ...
//!
//! # Valid channels: analysis, commentary, final. Channel must be included for every message.
//! ```
//!
//! Developer content is `# Instructions`, the instructions, then the tools
//! section.

pub mod recognize;
pub mod typescript;

use std::collections::BTreeMap;

use crate::chat::{DeveloperContent, SystemContent, ToolNamespaceConfig};

pub(crate) const KNOWLEDGE_CUTOFF_PREFIX: &str = "Knowledge cutoff: ";
pub(crate) const CURRENT_DATE_PREFIX: &str = "Current date: ";
pub(crate) const REASONING_PREFIX: &str = "Reasoning: ";
pub(crate) const TOOLS_HEADER: &str = "# Tools";
pub(crate) const INSTRUCTIONS_HEADER: &str = "# Instructions";
pub(crate) const CHANNELS_PREFIX: &str = "# Valid channels: ";
pub(crate) const CHANNEL_REQUIRED_SUFFIX: &str = " Channel must be included for every message.";
pub(crate) const FUNCTIONS_CHANNEL_NOTE: &str =
    "Calls to these tools must go to the commentary channel: 'functions'.";
pub(crate) const SECTION_SEPARATOR: &str = "\n\n";

/// Render system content.
///
/// `conversation_has_function_tools` adds the note that routes function
/// calls to the commentary channel.
#[must_use]
pub fn render_system_content(content: &SystemContent, conversation_has_function_tools: bool) -> String {
    let mut sections = Vec::new();

    let mut top = Vec::new();
    if let Some(identity) = &content.model_identity {
        top.push(identity.clone());
    }
    if let Some(cutoff) = &content.knowledge_cutoff {
        top.push(format!("{KNOWLEDGE_CUTOFF_PREFIX}{cutoff}"));
    }
    if let Some(date) = &content.conversation_start_date {
        top.push(format!("{CURRENT_DATE_PREFIX}{date}"));
    }
    if !top.is_empty() {
        sections.push(top.join("\n"));
    }

    if let Some(effort) = content.reasoning_effort {
        sections.push(format!("{REASONING_PREFIX}{effort}"));
    }

    if let Some(tools) = content.tools.as_ref().filter(|t| !t.is_empty()) {
        sections.push(render_tools_section(tools));
    }

    if let Some(config) = &content.channel_config {
        if !config.valid_channels.is_empty() {
            let mut header = format!("{CHANNELS_PREFIX}{}.", config.valid_channels.join(", "));
            if config.channel_required {
                header.push_str(CHANNEL_REQUIRED_SUFFIX);
            }
            if conversation_has_function_tools {
                header.push('\n');
                header.push_str(FUNCTIONS_CHANNEL_NOTE);
            }
            sections.push(header);
        }
    }

    sections.join(SECTION_SEPARATOR)
}

/// Render developer content.
#[must_use]
pub fn render_developer_content(content: &DeveloperContent) -> String {
    let mut sections = Vec::new();
    if let Some(instructions) = &content.instructions {
        sections.push(INSTRUCTIONS_HEADER.to_string());
        sections.push(instructions.clone());
    }
    if let Some(tools) = content.tools.as_ref().filter(|t| !t.is_empty()) {
        sections.push(render_tools_section(tools));
    }
    sections.join(SECTION_SEPARATOR)
}

/// Render a `# Tools` section with one block per namespace, in name order.
#[must_use]
pub fn render_tools_section(tools: &BTreeMap<String, ToolNamespaceConfig>) -> String {
    let mut sections = vec![TOOLS_HEADER.to_string()];
    sections.extend(tools.values().map(render_namespace));
    sections.join(SECTION_SEPARATOR)
}

fn render_namespace(namespace: &ToolNamespaceConfig) -> String {
    let has_tools = !namespace.tools.is_empty();
    let mut parts = vec![format!("## {}\n", namespace.name)];

    if let Some(description) = &namespace.description {
        for line in description.lines() {
            if has_tools {
                parts.push(format!("// {line}"));
            } else {
                parts.push(line.to_string());
            }
        }
    }

    if has_tools {
        parts.push(format!("namespace {} {{\n", namespace.name));
        for tool in &namespace.tools {
            for line in tool.description.lines() {
                parts.push(format!("// {line}"));
            }
            match &tool.parameters {
                Some(schema) => parts.push(format!(
                    "type {} = (_: {}) => any;\n",
                    tool.name,
                    typescript::schema_to_typescript(schema)
                )),
                None => parts.push(format!("type {} = () => any;\n", tool.name)),
            }
        }
        parts.push(format!("}} // namespace {}", namespace.name));
    }

    parts.join("\n")
}
