//! Conversation data model
//!
//! A [`Conversation`] is an ordered list of [`Message`]s. Each message has an
//! [`Author`], optional routing metadata (channel, recipient, content type)
//! and one or more [`Content`] parts.
//!
//! Everything here is a plain value type with serde support. On the wire,
//! content parts are tagged by a `type` field and enumerations are lowercase:
//!
//! ```json
//! {"role": "user", "content": [{"type": "text", "text": "hi"}]}
//! ```
//!
//! A bare string is accepted wherever a content list is expected.

#![allow(clippy::doc_markdown)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Declares a closed enumeration whose canonical form is a lowercase string.
///
/// One table drives `as_str`, `Display`, case-insensitive `FromStr` and the
/// serde impls.
macro_rules! lowercase_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident, unknown = $unknown:expr;
        { $($(#[$vmeta:meta])* $variant:ident => $text:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Every variant paired with its canonical text.
            pub const TABLE: &'static [($name, &'static str)] = &[$(($name::$variant, $text),)+];

            /// Canonical lowercase text
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::TABLE
                    .iter()
                    .find(|(_, text)| text.eq_ignore_ascii_case(s))
                    .map(|&(value, _)| value)
                    .ok_or_else(|| ($unknown)(s))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

lowercase_enum! {
    /// Who wrote a message.
    pub enum Role, unknown = |s: &str| Error::UnknownRole(s.to_string());
    {
        User => "user",
        Assistant => "assistant",
        System => "system",
        Developer => "developer",
        Tool => "tool",
    }
}

lowercase_enum! {
    /// How much the model should reason before answering.
    pub enum ReasoningEffort, unknown = |s: &str| Error::InvalidMessage(format!("unknown reasoning effort {s:?}"));
    {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

/// Role plus an optional name. Tool authors are identified by name,
/// e.g. `functions.get_weather`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Author {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Author {
    pub fn new(role: Role, name: impl Into<String>) -> Self {
        Self {
            role,
            name: Some(name.into()),
        }
    }
}

impl From<Role> for Author {
    fn from(role: Role) -> Self {
        Self { role, name: None }
    }
}

/// One callable tool. `parameters` is a JSON schema for its single argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDescription {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<serde_json::Value>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A named group of tools, rendered as one `namespace` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolNamespaceConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDescription>,
}

impl ToolNamespaceConfig {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        tools: Vec<ToolDescription>,
    ) -> Self {
        Self {
            name: name.into(),
            description,
            tools,
        }
    }
}

/// Channels a conversation may use, and whether assistant messages must
/// name one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub valid_channels: Vec<String>,
    pub channel_required: bool,
}

impl ChannelConfig {
    /// Config that requires every assistant message to use one of `channels`.
    pub fn require_channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            valid_channels: channels.into_iter().map(Into::into).collect(),
            channel_required: true,
        }
    }

    #[must_use]
    pub fn allows(&self, channel: &str) -> bool {
        self.valid_channels.iter().any(|c| c == channel)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

/// Structured configuration carried by a system message.
///
/// Only fields that are set are rendered. [`SystemContent::default`] gives
/// the gpt-oss defaults; [`SystemContent::new`] starts empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<BTreeMap<String, ToolNamespaceConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_cutoff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_config: Option<ChannelConfig>,
}

impl Default for SystemContent {
    fn default() -> Self {
        Self {
            model_identity: Some(
                "You are ChatGPT, a large language model trained by OpenAI.".to_string(),
            ),
            reasoning_effort: Some(ReasoningEffort::Medium),
            tools: None,
            conversation_start_date: None,
            knowledge_cutoff: Some("2024-06".to_string()),
            channel_config: Some(ChannelConfig::require_channels([
                "analysis",
                "commentary",
                "final",
            ])),
        }
    }
}

impl SystemContent {
    /// System content with every field unset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            model_identity: None,
            reasoning_effort: None,
            tools: None,
            conversation_start_date: None,
            knowledge_cutoff: None,
            channel_config: None,
        }
    }

    #[must_use]
    pub fn with_model_identity(mut self, identity: impl Into<String>) -> Self {
        self.model_identity = Some(identity.into());
        self
    }

    #[must_use]
    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    #[must_use]
    pub fn with_conversation_start_date(mut self, date: impl Into<String>) -> Self {
        self.conversation_start_date = Some(date.into());
        self
    }

    #[must_use]
    pub fn with_knowledge_cutoff(mut self, cutoff: impl Into<String>) -> Self {
        self.knowledge_cutoff = Some(cutoff.into());
        self
    }

    #[must_use]
    pub fn with_channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = Some(config);
        self
    }

    #[must_use]
    pub fn with_required_channels<I, S>(self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_channel_config(ChannelConfig::require_channels(channels))
    }

    /// Add (or replace) a tool namespace.
    #[must_use]
    pub fn with_tools(mut self, namespace: ToolNamespaceConfig) -> Self {
        self.tools
            .get_or_insert_with(BTreeMap::new)
            .insert(namespace.name.clone(), namespace);
        self
    }

    #[must_use]
    pub fn with_browser_tool(self) -> Self {
        self.with_tools(ToolNamespaceConfig::browser())
    }

    #[must_use]
    pub fn with_python_tool(self) -> Self {
        self.with_tools(ToolNamespaceConfig::python())
    }
}

/// Instructions and tools carried by a developer message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeveloperContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<BTreeMap<String, ToolNamespaceConfig>>,
}

impl DeveloperContent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Add (or replace) a tool namespace.
    #[must_use]
    pub fn with_tools(mut self, namespace: ToolNamespaceConfig) -> Self {
        self.tools
            .get_or_insert_with(BTreeMap::new)
            .insert(namespace.name.clone(), namespace);
        self
    }

    /// Declare `tools` in the `functions` namespace.
    #[must_use]
    pub fn with_function_tools(self, tools: Vec<ToolDescription>) -> Self {
        self.with_tools(ToolNamespaceConfig::new(FUNCTIONS_NAMESPACE, None, tools))
    }

    /// Whether this content declares at least one function tool.
    #[must_use]
    pub fn has_function_tools(&self) -> bool {
        self.tools
            .as_ref()
            .and_then(|tools| tools.get(FUNCTIONS_NAMESPACE))
            .is_some_and(|ns| !ns.tools.is_empty())
    }
}

/// Namespace that holds caller-defined function tools.
pub const FUNCTIONS_NAMESPACE: &str = "functions";

/// One part of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text(TextContent),
    SystemContent(SystemContent),
    DeveloperContent(DeveloperContent),
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(TextContent { text })
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::from(text.to_string())
    }
}

impl From<SystemContent> for Content {
    fn from(content: SystemContent) -> Self {
        Self::SystemContent(content)
    }
}

impl From<DeveloperContent> for Content {
    fn from(content: DeveloperContent) -> Self {
        Self::DeveloperContent(content)
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub author: Author,
    #[serde(deserialize_with = "deserialize_content")]
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Message {
    pub fn from_author_and_content(author: Author, content: impl Into<Content>) -> Self {
        Self {
            author,
            content: vec![content.into()],
            channel: None,
            recipient: None,
            content_type: None,
        }
    }

    pub fn from_role_and_content(role: Role, content: impl Into<Content>) -> Self {
        Self::from_author_and_content(role.into(), content)
    }

    /// Message with several content parts. An empty list becomes one empty
    /// text part.
    pub fn from_role_and_contents(role: Role, contents: Vec<Content>) -> Self {
        Self {
            author: role.into(),
            content: normalize_content(contents),
            channel: None,
            recipient: None,
            content_type: None,
        }
    }

    #[must_use]
    pub fn adding_content(mut self, content: impl Into<Content>) -> Self {
        self.content.push(content.into());
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Concatenated text of every [`Content::Text`] part.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                Content::Text(t) => Some(t.text.as_str()),
                Content::SystemContent(_) | Content::DeveloperContent(_) => None,
            })
            .collect()
    }
}

fn normalize_content(mut contents: Vec<Content>) -> Vec<Content> {
    if contents.is_empty() {
        contents.push(Content::Text(TextContent::default()));
    }
    contents
}

/// Accept either a bare string or a list of tagged content parts.
fn deserialize_content<'de, D>(deserializer: D) -> std::result::Result<Vec<Content>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Parts(Vec<Content>),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Text(text) => vec![Content::from(text)],
        Repr::Parts(parts) => normalize_content(parts),
    })
}

/// An ordered list of messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
        }
    }

    /// Whether any developer message declares function tools.
    #[must_use]
    pub fn has_function_tools(&self) -> bool {
        self.messages.iter().any(|m| {
            m.content.iter().any(|c| match c {
                Content::DeveloperContent(dev) => dev.has_function_tools(),
                Content::Text(_) | Content::SystemContent(_) => false,
            })
        })
    }
}

impl FromIterator<Message> for Conversation {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        Self::from_messages(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_parse_case_insensitive() {
        assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!("TOOL".parse::<Role>().unwrap(), Role::Tool);
        assert!(matches!("robot".parse::<Role>(), Err(Error::UnknownRole(r)) if r == "robot"));
    }

    #[test]
    fn test_enums_serialize_lowercase() {
        assert_eq!(serde_json::to_value(Role::Developer).unwrap(), json!("developer"));
        assert_eq!(serde_json::to_value(ReasoningEffort::High).unwrap(), json!("high"));
        let effort: ReasoningEffort = serde_json::from_value(json!("LOW")).unwrap();
        assert_eq!(effort, ReasoningEffort::Low);
        assert!(serde_json::from_value::<ReasoningEffort>(json!("extreme")).is_err());
    }

    #[test]
    fn test_table_matches_as_str() {
        for &(role, text) in Role::TABLE {
            assert_eq!(role.as_str(), text);
            assert_eq!(role.to_string(), text);
        }
    }

    #[test]
    fn test_message_from_bare_string() {
        let msg: Message = serde_json::from_value(json!({
            "role": "user",
            "content": "Hello"
        }))
        .unwrap();
        assert_eq!(msg, Message::from_role_and_content(Role::User, "Hello"));
    }

    #[test]
    fn test_message_from_parts() {
        let msg: Message = serde_json::from_value(json!({
            "role": "tool",
            "name": "functions.lookup",
            "channel": "commentary",
            "content": [{"type": "text", "text": "42"}]
        }))
        .unwrap();
        assert_eq!(msg.author, Author::new(Role::Tool, "functions.lookup"));
        assert_eq!(msg.channel.as_deref(), Some("commentary"));
        assert_eq!(msg.text(), "42");
    }

    #[test]
    fn test_empty_content_list_normalizes() {
        let msg: Message =
            serde_json::from_value(json!({"role": "assistant", "content": []})).unwrap();
        assert_eq!(msg.content, vec![Content::from("")]);
    }

    #[test]
    fn test_message_serializes_flat_author() {
        let msg = Message::from_author_and_content(Author::new(Role::Tool, "browser"), "ok")
            .with_recipient("assistant");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "tool",
                "name": "browser",
                "content": [{"type": "text", "text": "ok"}],
                "recipient": "assistant"
            })
        );
        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_system_content_tagged() {
        let content = Content::from(SystemContent::new().with_reasoning_effort(ReasoningEffort::Low));
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value, json!({"type": "system_content", "reasoning_effort": "low"}));
        assert_eq!(serde_json::from_value::<Content>(value).unwrap(), content);
    }

    #[test]
    fn test_system_content_defaults() {
        let sys = SystemContent::default();
        assert_eq!(sys.reasoning_effort, Some(ReasoningEffort::Medium));
        assert_eq!(sys.knowledge_cutoff.as_deref(), Some("2024-06"));
        let channels = sys.channel_config.unwrap();
        assert!(channels.channel_required);
        assert_eq!(channels.valid_channels, ["analysis", "commentary", "final"]);
        assert_eq!(SystemContent::new().model_identity, None);
    }

    #[test]
    fn test_function_tools_detection() {
        let conv = Conversation::from_messages([
            Message::from_role_and_content(Role::System, SystemContent::default()),
            Message::from_role_and_content(
                Role::Developer,
                DeveloperContent::new().with_function_tools(vec![ToolDescription::new(
                    "ping",
                    "Ping a host",
                    None,
                )]),
            ),
        ]);
        assert!(conv.has_function_tools());

        let empty = DeveloperContent::new().with_function_tools(vec![]);
        assert!(!empty.has_function_tools());
    }

    #[test]
    fn test_conversation_json() {
        let conv: Conversation = serde_json::from_value(json!({
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "channel": "final", "content": "hello"}
            ]
        }))
        .unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].channel.as_deref(), Some("final"));
    }
}
