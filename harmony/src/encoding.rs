//! The harmony encoding: a tokenizer plus the special tokens that frame
//! messages.
//!
//! Rendering lives in [`crate::render`] and parsing in [`crate::parse`];
//! both are `impl HarmonyEncoding` blocks over the data held here.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use harmony_tokenizer::{CoreBpe, Rank};

use crate::{Error, Result};

/// Structural markers of the harmony grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormattingToken {
    /// Opens a message header
    Start,
    /// Ends the header, starts the body
    Message,
    /// Ends a message
    EndMessage,
    /// Ends the final assistant message of a completion
    EndMessageDoneSampling,
    /// Ends an assistant message addressed to a tool
    EndMessageAssistantToTool,
    /// Prefixes a constrained content type, e.g. `<|constrain|>json`
    ConstrainedFormat,
    /// Introduces the channel name in a header
    Channel,
}

impl FormattingToken {
    pub const ALL: [Self; 7] = [
        Self::Start,
        Self::Message,
        Self::EndMessage,
        Self::EndMessageDoneSampling,
        Self::EndMessageAssistantToTool,
        Self::ConstrainedFormat,
        Self::Channel,
    ];

    /// Surface form in the harmony vocabulary
    #[must_use]
    pub const fn surface(self) -> &'static str {
        match self {
            Self::Start => "<|start|>",
            Self::Message => "<|message|>",
            Self::EndMessage => "<|end|>",
            Self::EndMessageDoneSampling => "<|return|>",
            Self::EndMessageAssistantToTool => "<|call|>",
            Self::ConstrainedFormat => "<|constrain|>",
            Self::Channel => "<|channel|>",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FormattingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.surface())
    }
}

/// An immutable, named encoding.
///
/// Cloning is cheap (shared handle); the encoding is `Send + Sync` and can
/// be used from any number of threads at once.
#[derive(Clone)]
pub struct HarmonyEncoding {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    tokenizer_name: String,
    tokenizer: CoreBpe,
    /// Ids of the formatting tokens, indexed by `FormattingToken as usize`
    format_ids: [Rank; FormattingToken::ALL.len()],
    stop_tokens: HashSet<Rank>,
    stop_tokens_for_assistant_actions: HashSet<Rank>,
}

impl HarmonyEncoding {
    /// Build the harmony grammar on top of `tokenizer`.
    ///
    /// # Errors
    /// Returns [`Error::UnknownMarker`] if the tokenizer lacks one of the
    /// formatting tokens as a special token.
    pub fn from_tokenizer(
        name: impl Into<String>,
        tokenizer_name: impl Into<String>,
        tokenizer: CoreBpe,
    ) -> Result<Self> {
        let mut format_ids = [0; FormattingToken::ALL.len()];
        for token in FormattingToken::ALL {
            format_ids[token.index()] = tokenizer
                .token_for_special(token.surface())
                .ok_or_else(|| Error::UnknownMarker(token.surface().to_string()))?;
        }
        let id = |t: FormattingToken| format_ids[t.index()];

        let stop_tokens_for_assistant_actions = HashSet::from([
            id(FormattingToken::EndMessageDoneSampling),
            id(FormattingToken::EndMessageAssistantToTool),
        ]);
        let mut stop_tokens = stop_tokens_for_assistant_actions.clone();
        stop_tokens.insert(id(FormattingToken::EndMessage));

        let name = name.into();
        tracing::debug!(encoding = %name, vocab = tokenizer.vocab_size(), "built harmony encoding");

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                tokenizer_name: tokenizer_name.into(),
                tokenizer,
                format_ids,
                stop_tokens,
                stop_tokens_for_assistant_actions,
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn tokenizer_name(&self) -> &str {
        &self.inner.tokenizer_name
    }

    #[must_use]
    pub fn tokenizer(&self) -> &CoreBpe {
        &self.inner.tokenizer
    }

    /// Id of a formatting token.
    #[must_use]
    pub fn render_formatting_token(&self, token: FormattingToken) -> Rank {
        self.inner.format_ids[token.index()]
    }

    /// Surface form a formatting token maps to.
    #[must_use]
    pub fn mapped_format_token(&self, token: FormattingToken) -> &'static str {
        token.surface()
    }

    /// Every token that ends a message: `<|return|>`, `<|call|>`, `<|end|>`.
    #[must_use]
    pub fn stop_tokens(&self) -> &HashSet<Rank> {
        &self.inner.stop_tokens
    }

    /// Tokens after which the caller must act (return to the user or run a
    /// tool): `<|return|>` and `<|call|>`.
    #[must_use]
    pub fn stop_tokens_for_assistant_actions(&self) -> &HashSet<Rank> {
        &self.inner.stop_tokens_for_assistant_actions
    }

    pub(crate) fn is_stop_token(&self, token: Rank) -> bool {
        self.inner.stop_tokens.contains(&token)
    }
}

impl fmt::Debug for HarmonyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarmonyEncoding")
            .field("name", &self.inner.name)
            .field("tokenizer_name", &self.inner.tokenizer_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use harmony_tokenizer::Pretrained;

    use super::*;

    fn byte_ranks() -> HashMap<Vec<u8>, Rank> {
        (0..=255u8).map(|b| (vec![b], Rank::from(b))).collect()
    }

    fn encoding() -> HarmonyEncoding {
        let tokenizer = Pretrained::O200kHarmony.build(byte_ranks()).unwrap();
        HarmonyEncoding::from_tokenizer("test", "o200k_harmony", tokenizer).unwrap()
    }

    #[test]
    fn test_formatting_token_ids() {
        let enc = encoding();
        assert_eq!(enc.render_formatting_token(FormattingToken::Start), 200_006);
        assert_eq!(enc.render_formatting_token(FormattingToken::Message), 200_008);
        assert_eq!(enc.render_formatting_token(FormattingToken::EndMessage), 200_007);
        assert_eq!(enc.render_formatting_token(FormattingToken::EndMessageDoneSampling), 200_002);
        assert_eq!(enc.render_formatting_token(FormattingToken::EndMessageAssistantToTool), 200_012);
        assert_eq!(enc.render_formatting_token(FormattingToken::ConstrainedFormat), 200_003);
        assert_eq!(enc.render_formatting_token(FormattingToken::Channel), 200_005);
        assert_eq!(enc.mapped_format_token(FormattingToken::Channel), "<|channel|>");
    }

    #[test]
    fn test_stop_sets() {
        let enc = encoding();
        assert_eq!(*enc.stop_tokens(), HashSet::from([200_002, 200_007, 200_012]));
        assert_eq!(*enc.stop_tokens_for_assistant_actions(), HashSet::from([200_002, 200_012]));
        assert!(enc.stop_tokens_for_assistant_actions().is_subset(enc.stop_tokens()));
    }

    #[test]
    fn test_missing_marker() {
        let specials = HashMap::from([("<|start|>".to_string(), 1000)]);
        let tokenizer = CoreBpe::new(byte_ranks(), specials, r"\S+|\s+").unwrap();
        let err = HarmonyEncoding::from_tokenizer("bad", "custom", tokenizer).unwrap_err();
        assert!(matches!(err, Error::UnknownMarker(m) if m == "<|message|>"));
    }

    #[test]
    fn test_encoding_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HarmonyEncoding>();
    }
}
