//! Conversation → tokens
//!
//! Each message renders as
//!
//! ```text
//! <|start|>{author}[ to={recipient}][<|channel|>{channel}][ {content_type}]<|message|>{content}{terminator}
//! ```
//!
//! where the terminator is `<|call|>` for an assistant message addressed to
//! a tool and `<|end|>` otherwise.

use std::collections::HashSet;

use harmony_tokenizer::Rank;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::chat::{ChannelConfig, Content, Conversation, Message, Role};
use crate::content::{render_developer_content, render_system_content};
use crate::encoding::{FormattingToken, HarmonyEncoding};
use crate::tools::is_builtin_namespace;
use crate::{Error, Result};

/// Recipient that means "everyone"; never rendered.
const BROADCAST_RECIPIENT: &str = "all";

/// Options for rendering a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Whether the surrounding conversation declares function tools.
    pub conversation_has_function_tools: bool,
    /// Channel rules the message must follow.
    pub channel_config: Option<ChannelConfig>,
}

/// Options for rendering a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConversationConfig {
    /// Drop `analysis` messages that precede the first `final` message when
    /// the conversation ends on a final answer. Without a config nothing is
    /// dropped.
    pub auto_drop_analysis: bool,
}

impl Default for RenderConversationConfig {
    fn default() -> Self {
        Self {
            auto_drop_analysis: true,
        }
    }
}

impl HarmonyEncoding {
    /// Render a conversation, every message closed.
    ///
    /// # Errors
    /// Returns [`Error::InvalidChannel`] or [`Error::InvalidMessage`] for a
    /// message that breaks the format rules, or a tokenizer error if text
    /// contains special-token surface forms.
    pub fn render_conversation(
        &self,
        conversation: &Conversation,
        config: Option<&RenderConversationConfig>,
    ) -> Result<Vec<Rank>> {
        let mut tokens = Vec::new();
        self.render_conversation_into(conversation, &mut tokens, config)?;
        Ok(tokens)
    }

    /// Render a conversation, appending to `into`.
    ///
    /// # Errors
    /// See [`HarmonyEncoding::render_conversation`].
    pub fn render_conversation_into<B>(
        &self,
        conversation: &Conversation,
        into: &mut B,
        config: Option<&RenderConversationConfig>,
    ) -> Result<()>
    where
        B: Extend<Rank>,
    {
        let auto_drop_analysis = config.is_some_and(|c| c.auto_drop_analysis);
        let has_function_tools = conversation.has_function_tools();
        let messages = &conversation.messages;

        let ends_on_final = messages
            .iter()
            .rev()
            .find(|m| m.author.role == Role::Assistant)
            .is_some_and(|m| m.channel.as_deref() == Some("final"));
        let first_final = messages
            .iter()
            .position(|m| m.channel.as_deref() == Some("final"));
        let drop_before = if auto_drop_analysis && ends_on_final {
            first_final
        } else {
            None
        };

        let mut channel_config: Option<&ChannelConfig> = None;
        for (idx, message) in messages.iter().enumerate() {
            if let Some(system) = message.content.iter().find_map(|c| match c {
                Content::SystemContent(s) => Some(s),
                Content::Text(_) | Content::DeveloperContent(_) => None,
            }) {
                channel_config = system.channel_config.as_ref();
            }

            if drop_before.is_some_and(|first| idx < first)
                && message.channel.as_deref() == Some("analysis")
            {
                tracing::trace!(index = idx, "dropping analysis message");
                continue;
            }
            self.render_message_with(message, into, has_function_tools, channel_config)?;
        }
        Ok(())
    }

    /// Render a conversation followed by an open header for `next_role`,
    /// ready for the model to continue.
    ///
    /// # Errors
    /// See [`HarmonyEncoding::render_conversation`].
    pub fn render_conversation_for_completion(
        &self,
        conversation: &Conversation,
        next_role: Role,
        config: Option<&RenderConversationConfig>,
    ) -> Result<Vec<Rank>> {
        let mut tokens = self.render_conversation(conversation, config)?;
        tokens.push(self.render_formatting_token(FormattingToken::Start));
        self.render_text_into(next_role.as_str(), &mut tokens)?;
        Ok(tokens)
    }

    /// Render a conversation as a training example. A trailing assistant
    /// message on the `final` channel ends with `<|return|>`.
    ///
    /// # Errors
    /// See [`HarmonyEncoding::render_conversation`].
    pub fn render_conversation_for_training(
        &self,
        conversation: &Conversation,
        config: Option<&RenderConversationConfig>,
    ) -> Result<Vec<Rank>> {
        let mut tokens = self.render_conversation(conversation, config)?;
        let ends_on_final_answer = conversation.messages.last().is_some_and(|m| {
            m.author.role == Role::Assistant && m.channel.as_deref() == Some("final")
        });
        if ends_on_final_answer {
            if let Some(last) = tokens.last_mut() {
                *last = self.render_formatting_token(FormattingToken::EndMessageDoneSampling);
            }
        }
        Ok(tokens)
    }

    /// Render many conversations for completion in parallel.
    ///
    /// # Errors
    /// Returns the first error encountered, if any.
    pub fn render_conversations_for_completion_batch(
        &self,
        conversations: &[Conversation],
        next_role: Role,
        config: Option<&RenderConversationConfig>,
    ) -> Result<Vec<Vec<Rank>>> {
        conversations
            .par_iter()
            .map(|c| self.render_conversation_for_completion(c, next_role, config))
            .collect()
    }

    /// Render one message.
    ///
    /// # Errors
    /// See [`HarmonyEncoding::render_conversation`].
    pub fn render_message(&self, message: &Message, options: Option<&RenderOptions>) -> Result<Vec<Rank>> {
        let mut tokens = Vec::new();
        self.render_message_into(message, &mut tokens, options)?;
        Ok(tokens)
    }

    /// Render one message, appending to `into`.
    ///
    /// # Errors
    /// See [`HarmonyEncoding::render_conversation`].
    pub fn render_message_into<B>(
        &self,
        message: &Message,
        into: &mut B,
        options: Option<&RenderOptions>,
    ) -> Result<()>
    where
        B: Extend<Rank>,
    {
        let (has_function_tools, channel_config) = options.map_or((false, None), |o| {
            (o.conversation_has_function_tools, o.channel_config.as_ref())
        });
        self.render_message_with(message, into, has_function_tools, channel_config)
    }

    fn render_message_with<B>(
        &self,
        message: &Message,
        into: &mut B,
        has_function_tools: bool,
        channel_config: Option<&ChannelConfig>,
    ) -> Result<()>
    where
        B: Extend<Rank>,
    {
        check_channel(message, channel_config)?;

        let role = message.author.role;
        let recipient = message
            .recipient
            .as_deref()
            .filter(|r| *r != BROADCAST_RECIPIENT);
        let author = match (role, message.author.name.as_deref()) {
            (Role::Tool, Some(name)) => {
                check_header_word("tool name", name)?;
                let bare = recipient.is_none()
                    && message.channel.is_none()
                    && message.content_type.is_none();
                if name.parse::<Role>().is_ok()
                    || (bare && !name.contains('.') && !is_builtin_namespace(name))
                {
                    return Err(Error::InvalidMessage(format!(
                        "tool name {name:?} would not parse back as a tool"
                    )));
                }
                name.to_string()
            }
            (Role::Tool, None) => {
                return Err(Error::InvalidMessage(
                    "tool messages must have an author name".into(),
                ))
            }
            (role, Some(name)) => {
                check_header_word("author name", name)?;
                format!("{role}:{name}")
            }
            (role, None) => role.as_str().to_string(),
        };

        let mut tokens = Vec::new();
        tokens.push(self.render_formatting_token(FormattingToken::Start));
        self.render_text_into(&author, &mut tokens)?;

        if let Some(recipient) = recipient {
            check_header_word("recipient", recipient)?;
            self.render_text_into(&format!(" to={recipient}"), &mut tokens)?;
        }

        if let Some(channel) = &message.channel {
            tokens.push(self.render_formatting_token(FormattingToken::Channel));
            self.render_text_into(channel, &mut tokens)?;
        }

        if let Some(content_type) = &message.content_type {
            let constrain = FormattingToken::ConstrainedFormat;
            let format = content_type.strip_prefix(constrain.surface());
            check_header_word("content type", format.unwrap_or(content_type))?;
            if content_type.starts_with("to=") {
                return Err(Error::InvalidMessage(format!(
                    "content type {content_type:?} reads as a recipient"
                )));
            }
            if let Some(format) = format {
                self.render_text_into(" ", &mut tokens)?;
                tokens.push(self.render_formatting_token(constrain));
                self.render_text_into(format, &mut tokens)?;
            } else {
                self.render_text_into(&format!(" {content_type}"), &mut tokens)?;
            }
        }

        tokens.push(self.render_formatting_token(FormattingToken::Message));
        for content in &message.content {
            let text = match content {
                Content::Text(text) => text.text.clone(),
                Content::SystemContent(system) => {
                    if role != Role::System {
                        return Err(Error::InvalidMessage(format!(
                            "system content in a {role} message"
                        )));
                    }
                    render_system_content(system, has_function_tools)
                }
                Content::DeveloperContent(developer) => {
                    if role != Role::Developer {
                        return Err(Error::InvalidMessage(format!(
                            "developer content in a {role} message"
                        )));
                    }
                    render_developer_content(developer)
                }
            };
            self.render_text_into(&text, &mut tokens)?;
        }

        let terminator = if role == Role::Assistant && recipient.is_some() {
            FormattingToken::EndMessageAssistantToTool
        } else {
            FormattingToken::EndMessage
        };
        tokens.push(self.render_formatting_token(terminator));

        into.extend(tokens);
        Ok(())
    }

    /// Encode caller text. Special-token surface forms are rejected so text
    /// can never forge message structure.
    fn render_text_into(&self, text: &str, into: &mut Vec<Rank>) -> Result<()> {
        into.extend(self.tokenizer().encode(text, &HashSet::new())?);
        Ok(())
    }
}

/// Check `message.channel` against the governing channel rules.
fn check_channel(message: &Message, config: Option<&ChannelConfig>) -> Result<()> {
    let invalid = || Error::InvalidChannel {
        channel: message.channel.clone(),
        valid: config.map(|c| c.valid_channels.clone()).unwrap_or_default(),
    };
    match message.channel.as_deref() {
        Some(channel) if !is_header_word(channel) => Err(invalid()),
        Some(channel) => match config {
            Some(config) if !config.allows(channel) => Err(invalid()),
            _ => Ok(()),
        },
        None => {
            let required = config.is_some_and(|c| c.channel_required);
            if required && message.author.role == Role::Assistant {
                Err(invalid())
            } else {
                Ok(())
            }
        }
    }
}

/// A header value must be one non-empty run of text with no whitespace and
/// no `<`, or the parser would split it differently.
fn is_header_word(value: &str) -> bool {
    !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == '<')
}

fn check_header_word(field: &str, value: &str) -> Result<()> {
    if is_header_word(value) {
        Ok(())
    } else {
        Err(Error::InvalidMessage(format!(
            "{field} {value:?} must be a single word without '<'"
        )))
    }
}
