//! Harmony: the chat conversation format of the gpt-oss models
//!
//! This crate turns structured conversations into the token sequence a
//! model is prompted with, and turns model output back into messages.
//! Tokenization itself lives in `harmony-tokenizer`.
//!
//! A rendered message looks like
//!
//! ```text
//! <|start|>assistant to=functions.get_weather<|channel|>commentary <|constrain|>json<|message|>{"city":"Tokyo"}<|call|>
//! ```
//!
//! ```no_run
//! use harmony::{load_harmony_encoding, Conversation, HarmonyEncodingName, Message, Role};
//!
//! let enc = load_harmony_encoding(HarmonyEncodingName::HarmonyGptOss)?;
//! let convo = Conversation::from_messages([Message::from_role_and_content(Role::User, "Hi")]);
//! let prompt = enc.render_conversation_for_completion(&convo, Role::Assistant, None)?;
//! # let _ = prompt;
//! # let sampled: Vec<harmony::Rank> = Vec::new();
//! // `sampled` holds the tokens the model produced after the prompt.
//! let reply = enc.parse_messages_from_completion_tokens(&sampled, Some(Role::Assistant))?;
//! # let _ = reply;
//! # Ok::<(), harmony::Error>(())
//! ```

pub mod chat;
pub mod content;
pub mod encoding;
pub mod error;
pub mod parse;
pub mod registry;
pub mod render;
mod tools;

pub use chat::{
    Author, ChannelConfig, Content, Conversation, DeveloperContent, Message, ReasoningEffort, Role,
    SystemContent, TextContent, ToolDescription, ToolNamespaceConfig, FUNCTIONS_NAMESPACE,
};
pub use encoding::{FormattingToken, HarmonyEncoding};
pub use error::{Error, Result};
pub use harmony_tokenizer::Rank;
pub use parse::{ParsedHeader, ParsedMessage, ParserState, StreamState, StreamableParser};
pub use registry::{
    build_harmony_encoding, load, load_harmony_encoding, load_harmony_encoding_from_file,
    HarmonyEncodingName,
};
pub use render::{RenderConversationConfig, RenderOptions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HarmonyEncoding>();
        assert_send_sync::<StreamableParser>();
        assert_send_sync::<Conversation>();
    }
}
