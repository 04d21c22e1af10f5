//! Recover structured content from its canonical text.
//!
//! A candidate value is accepted only if rendering it reproduces the input
//! exactly; any other text stays plain text.

use std::collections::BTreeMap;

use super::typescript::{self, Cursor};
use super::{
    render_developer_content, render_system_content, CHANNELS_PREFIX, CHANNEL_REQUIRED_SUFFIX,
    CURRENT_DATE_PREFIX, FUNCTIONS_CHANNEL_NOTE, INSTRUCTIONS_HEADER, KNOWLEDGE_CUTOFF_PREFIX,
    REASONING_PREFIX, SECTION_SEPARATOR, TOOLS_HEADER,
};
use crate::chat::{
    ChannelConfig, DeveloperContent, SystemContent, ToolDescription, ToolNamespaceConfig,
};

/// Recognize the text of a system message.
///
/// Text that carries nothing beyond a model identity is left as text.
#[must_use]
pub fn recognize_system_content(text: &str) -> Option<SystemContent> {
    let mut content = SystemContent::new();

    let (head, channels) = split_last_section(text, CHANNELS_PREFIX);
    let mut has_function_tools = false;
    if let Some(channels) = channels {
        let (config, note) = parse_channels(channels)?;
        content.channel_config = Some(config);
        has_function_tools = note;
    }

    let (head, tools) = split_first_section(head, &tools_marker());
    if let Some(tools) = tools {
        content.tools = Some(parse_tools_section(tools)?);
    }

    let (top, last) = match head.rfind(SECTION_SEPARATOR) {
        Some(idx) => (&head[..idx], &head[idx + SECTION_SEPARATOR.len()..]),
        None => ("", head),
    };
    let top = match last.strip_prefix(REASONING_PREFIX) {
        Some(effort) => {
            content.reasoning_effort = Some(effort.parse().ok()?);
            top
        }
        None => head,
    };

    let mut lines: Vec<&str> = if top.is_empty() { Vec::new() } else { top.split('\n').collect() };
    if let Some(date) = lines.last().and_then(|l| l.strip_prefix(CURRENT_DATE_PREFIX)) {
        content.conversation_start_date = Some(date.to_string());
        lines.pop();
    }
    if let Some(cutoff) = lines.last().and_then(|l| l.strip_prefix(KNOWLEDGE_CUTOFF_PREFIX)) {
        content.knowledge_cutoff = Some(cutoff.to_string());
        lines.pop();
    }
    if !lines.is_empty() {
        content.model_identity = Some(lines.join("\n"));
    }

    let identity_only = SystemContent {
        model_identity: content.model_identity.clone(),
        ..SystemContent::new()
    };
    if content == identity_only {
        return None;
    }

    (render_system_content(&content, has_function_tools) == text).then_some(content)
}

/// Recognize the text of a developer message.
#[must_use]
pub fn recognize_developer_content(text: &str) -> Option<DeveloperContent> {
    let marker = tools_marker();
    let mut content = DeveloperContent::new();

    let tools = if text.starts_with(&marker) {
        Some(text)
    } else {
        let rest = text
            .strip_prefix(INSTRUCTIONS_HEADER)?
            .strip_prefix(SECTION_SEPARATOR)?;
        let (instructions, tools) = match rest.rfind(&format!("{SECTION_SEPARATOR}{marker}")) {
            Some(idx) => (&rest[..idx], Some(&rest[idx + SECTION_SEPARATOR.len()..])),
            None => (rest, None),
        };
        content.instructions = Some(instructions.to_string());
        tools
    };
    if let Some(tools) = tools {
        content.tools = Some(parse_tools_section(tools)?);
    }

    (render_developer_content(&content) == text).then_some(content)
}

/// A tools section always opens with the header and a namespace block.
fn tools_marker() -> String {
    format!("{TOOLS_HEADER}{SECTION_SEPARATOR}## ")
}

/// Split off the section starting with `prefix`, searching from the end.
fn split_last_section<'a>(text: &'a str, prefix: &str) -> (&'a str, Option<&'a str>) {
    if text.starts_with(prefix) {
        return ("", Some(text));
    }
    match text.rfind(&format!("{SECTION_SEPARATOR}{prefix}")) {
        Some(idx) => (&text[..idx], Some(&text[idx + SECTION_SEPARATOR.len()..])),
        None => (text, None),
    }
}

/// Split off the first section starting with `prefix` and everything after it.
fn split_first_section<'a>(text: &'a str, prefix: &str) -> (&'a str, Option<&'a str>) {
    if text.starts_with(prefix) {
        return ("", Some(text));
    }
    match text.find(&format!("{SECTION_SEPARATOR}{prefix}")) {
        Some(idx) => (&text[..idx], Some(&text[idx + SECTION_SEPARATOR.len()..])),
        None => (text, None),
    }
}

/// Parse the valid-channels section. The flag is set when the function
/// routing note is present.
fn parse_channels(section: &str) -> Option<(ChannelConfig, bool)> {
    let (first, note) = match section.split_once('\n') {
        Some((first, note)) => (first, Some(note)),
        None => (section, None),
    };
    let has_function_tools = match note {
        None => false,
        Some(FUNCTIONS_CHANNEL_NOTE) => true,
        Some(_) => return None,
    };

    let list = first.strip_prefix(CHANNELS_PREFIX)?;
    let (list, channel_required) = match list.strip_suffix(CHANNEL_REQUIRED_SUFFIX) {
        Some(list) => (list, true),
        None => (list, false),
    };
    let list = list.strip_suffix('.')?;
    let config = ChannelConfig {
        valid_channels: list.split(", ").map(str::to_string).collect(),
        channel_required,
    };
    Some((config, has_function_tools))
}

fn parse_tools_section(section: &str) -> Option<BTreeMap<String, ToolNamespaceConfig>> {
    let body = section
        .strip_prefix(TOOLS_HEADER)?
        .strip_prefix(SECTION_SEPARATOR)?
        .strip_prefix("## ")?;
    let mut namespaces = BTreeMap::new();
    for block in body.split("\n\n## ") {
        let namespace = parse_namespace(block)?;
        namespaces.insert(namespace.name.clone(), namespace);
    }
    Some(namespaces)
}

/// Parse one namespace block, minus its leading `## `.
fn parse_namespace(block: &str) -> Option<ToolNamespaceConfig> {
    let (name, rest) = block.split_once('\n')?;
    if rest.is_empty() {
        return Some(ToolNamespaceConfig::new(name, None, Vec::new()));
    }
    let rest = rest.strip_prefix('\n')?;

    let opening = format!("namespace {name} {{\n");
    let declarations = if rest.starts_with(&opening) {
        Some((None, &rest[opening.len()..]))
    } else {
        rest.find(&format!("\n{opening}"))
            .map(|idx| (Some(&rest[..idx]), &rest[idx + 1 + opening.len()..]))
    };

    let Some((comment, declarations)) = declarations else {
        return Some(ToolNamespaceConfig::new(name, Some(rest.to_string()), Vec::new()));
    };
    let description = match comment {
        Some(comment) => Some(strip_comment_lines(comment)?),
        None => None,
    };
    let tools = parse_declarations(name, declarations)?;
    Some(ToolNamespaceConfig::new(name, description, tools))
}

/// Parse the tool declarations between `namespace {name} {` and its
/// closing line.
fn parse_declarations(namespace: &str, text: &str) -> Option<Vec<ToolDescription>> {
    let closing = format!("}} // namespace {namespace}");
    let mut cursor = Cursor::new(text);
    let mut tools = Vec::new();

    if !cursor.eat("\n") {
        return None;
    }
    loop {
        if cursor.eat(&closing) {
            break;
        }

        let mut description = Vec::new();
        while cursor.eat("//") {
            let line = cursor.line()?;
            description.push(line.strip_prefix(' ').unwrap_or(line));
        }

        if !cursor.eat("type ") {
            return None;
        }
        let name_len = cursor.rest().find(" = ")?;
        let name = cursor.advance(name_len).to_string();
        cursor.eat(" = ");

        let parameters = if cursor.eat("() => any;\n") {
            None
        } else if cursor.eat("(_: ") {
            let (schema, used) = typescript::parse_prefix(cursor.rest())?;
            cursor.advance(used);
            if !cursor.eat(") => any;\n") {
                return None;
            }
            Some(schema)
        } else {
            return None;
        };
        if !cursor.eat("\n") {
            return None;
        }

        tools.push(ToolDescription::new(name, description.join("\n"), parameters));
    }

    cursor.is_empty().then_some(tools)
}

fn strip_comment_lines(text: &str) -> Option<String> {
    let lines: Option<Vec<&str>> = text
        .split('\n')
        .map(|line| {
            line.strip_prefix("//")
                .map(|l| l.strip_prefix(' ').unwrap_or(l))
        })
        .collect();
    Some(lines?.join("\n"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::chat::ReasoningEffort;

    fn assert_system_reverses(content: &SystemContent, has_function_tools: bool) {
        let text = render_system_content(content, has_function_tools);
        let recognized = recognize_system_content(&text)
            .unwrap_or_else(|| panic!("not recognized:\n{text}"));
        assert_eq!(&recognized, content, "text was:\n{text}");
    }

    fn weather_tools() -> Vec<ToolDescription> {
        vec![
            ToolDescription::new("get_location", "Gets the location of the user.", None),
            ToolDescription::new(
                "get_current_weather",
                "Gets the current weather in the provided location.",
                Some(json!({
                    "type": "object",
                    "properties": {
                        "location": {"type": "string", "description": "The city and state, e.g. San Francisco, CA"},
                        "format": {"type": "string", "enum": ["celsius", "fahrenheit"], "default": "celsius"}
                    },
                    "required": ["location"]
                })),
            ),
        ]
    }

    #[test]
    fn test_default_system_content() {
        assert_system_reverses(&SystemContent::default(), false);
        assert_system_reverses(&SystemContent::default(), true);
    }

    #[test]
    fn test_system_with_everything() {
        let sys = SystemContent::default()
            .with_conversation_start_date("2025-06-28")
            .with_reasoning_effort(ReasoningEffort::High)
            .with_browser_tool()
            .with_python_tool();
        assert_system_reverses(&sys, false);
    }

    #[test]
    fn test_system_partial_fields() {
        assert_system_reverses(&SystemContent::new().with_reasoning_effort(ReasoningEffort::Low), false);
        assert_system_reverses(&SystemContent::new().with_knowledge_cutoff("2024-06"), false);
        assert_system_reverses(
            &SystemContent::new().with_channel_config(ChannelConfig {
                valid_channels: vec!["final".into()],
                channel_required: false,
            }),
            false,
        );
    }

    #[test]
    fn test_plain_text_is_not_system_content() {
        assert_eq!(recognize_system_content("You are a helpful assistant."), None);
        assert_eq!(recognize_system_content(""), None);
        assert_eq!(recognize_system_content("Reasoning: extreme"), None);
    }

    #[test]
    fn test_non_canonical_text_rejected() {
        // Channel list without the trailing period.
        assert_eq!(recognize_system_content("# Valid channels: analysis, final"), None);
        assert_eq!(
            recognize_system_content("# Valid channels: final.\nSomething else."),
            None
        );
    }

    #[test]
    fn test_developer_instructions() {
        let dev = DeveloperContent::new().with_instructions("Talk like a pirate!");
        let text = render_developer_content(&dev);
        assert_eq!(recognize_developer_content(&text), Some(dev));
    }

    #[test]
    fn test_developer_with_function_tools() {
        let dev = DeveloperContent::new()
            .with_instructions("Answer concisely.\n\nUse tools when needed.")
            .with_function_tools(weather_tools());
        let text = render_developer_content(&dev);
        assert_eq!(recognize_developer_content(&text), Some(dev));
    }

    #[test]
    fn test_developer_tools_only() {
        let dev = DeveloperContent::new()
            .with_function_tools(weather_tools())
            .with_tools(ToolNamespaceConfig::python());
        let text = render_developer_content(&dev);
        assert_eq!(recognize_developer_content(&text), Some(dev));
    }

    #[test]
    fn test_developer_plain_text() {
        assert_eq!(recognize_developer_content("Be nice."), None);
        assert_eq!(recognize_developer_content("# Instructions\nno blank line"), None);
    }

    #[test]
    fn test_namespace_with_description_and_tools() {
        let mut tools = BTreeMap::new();
        let ns = ToolNamespaceConfig::new(
            "weather",
            Some("Weather lookups.\nData is hourly.".into()),
            weather_tools(),
        );
        tools.insert(ns.name.clone(), ns);
        let text = super::super::render_tools_section(&tools);
        assert_eq!(parse_tools_section(&text), Some(tools));
    }
}
