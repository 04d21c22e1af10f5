//! Tokens → conversation
//!
//! The parser is a state machine over the token stream:
//!
//! ```text
//! ExpectStart --<|start|>--> Header --<|message|>--> Content --stop--> ExpectStart
//! ```
//!
//! Header tokens are buffered until `<|message|>` and then decoded in one
//! go. Body tokens are decoded as they arrive; bytes of a multi-byte
//! character split across tokens are held back until the character is
//! complete.
//!
//! [`HarmonyEncoding::resume`] is the pure form: it takes a [`ParserState`]
//! and a token suffix and returns the advanced state plus the messages
//! completed by the suffix. [`StreamableParser`] wraps it for token-at-a-time
//! use, and [`HarmonyEncoding::parse`] runs it over a whole sequence.

#![allow(clippy::missing_errors_doc)]

use harmony_tokenizer::Rank;
use serde::{Deserialize, Serialize};

use crate::chat::{Author, Content, Message, Role};
use crate::content::recognize::{recognize_developer_content, recognize_system_content};
use crate::encoding::{FormattingToken, HarmonyEncoding};
use crate::tools::is_builtin_namespace;
use crate::{Error, Result};

/// Routing metadata decoded from a message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedHeader {
    pub author: Author,
    pub recipient: Option<String>,
    pub channel: Option<String>,
    pub content_type: Option<String>,
}

/// Where the parser is in the message grammar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamState {
    /// Between messages
    #[default]
    ExpectStart,
    /// After `<|start|>`, collecting header tokens
    Header { header_tokens: Vec<Rank> },
    /// After `<|message|>`, collecting body tokens
    Content {
        header: ParsedHeader,
        content_tokens: Vec<Rank>,
    },
}

/// Complete parser state. Cloneable and serializable, so a parse can be
/// snapshotted and resumed later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserState {
    stream: StreamState,
    /// Role for a header that carries no role text
    next_role: Option<Role>,
    /// Decoded text of the open body
    content: String,
    /// Body bytes that do not form complete UTF-8 yet
    pending: Vec<u8>,
    last_content_delta: Option<String>,
    /// Number of tokens consumed so far
    offset: usize,
}

impl ParserState {
    /// Fresh state. With `role`, the stream is expected to start inside a
    /// header whose role text was part of the prompt, e.g. right after
    /// `<|start|>assistant`.
    #[must_use]
    pub fn new(role: Option<Role>) -> Self {
        let stream = match role {
            Some(_) => StreamState::Header {
                header_tokens: Vec::new(),
            },
            None => StreamState::ExpectStart,
        };
        Self {
            stream,
            next_role: role,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn stream(&self) -> &StreamState {
        &self.stream
    }

    /// Tokens consumed so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Header of the open message, once its body has started.
    #[must_use]
    pub fn header(&self) -> Option<&ParsedHeader> {
        match &self.stream {
            StreamState::Content { header, .. } => Some(header),
            StreamState::ExpectStart | StreamState::Header { .. } => None,
        }
    }

    /// Text decoded so far for the open message.
    #[must_use]
    pub fn current_content(&self) -> &str {
        &self.content
    }

    /// Text produced by the most recent token, if it produced any.
    #[must_use]
    pub fn last_content_delta(&self) -> Option<&str> {
        self.last_content_delta.as_deref()
    }

    fn enter_body(&mut self, header: ParsedHeader) {
        self.stream = StreamState::Content {
            header,
            content_tokens: Vec::new(),
        };
        self.next_role = None;
        self.content.clear();
        self.pending.clear();
        self.last_content_delta = None;
    }

    fn push_body(&mut self, token: Rank, bytes: &[u8]) {
        if let StreamState::Content { content_tokens, .. } = &mut self.stream {
            content_tokens.push(token);
        }
        self.pending.extend_from_slice(bytes);
        let delta = drain_utf8(&mut self.pending);
        self.content.push_str(&delta);
        self.last_content_delta = (!delta.is_empty()).then_some(delta);
    }

    /// Text of the open body, with any incomplete trailing bytes replaced.
    fn body_text(&self) -> String {
        let mut text = self.content.clone();
        text.push_str(&String::from_utf8_lossy(&self.pending));
        text
    }

    /// Close the open body, returning its header and text.
    fn take_body(&mut self) -> Option<(ParsedHeader, String)> {
        if !matches!(self.stream, StreamState::Content { .. }) {
            return None;
        }
        let text = self.body_text();
        let StreamState::Content { header, .. } = std::mem::take(&mut self.stream) else {
            return None;
        };
        self.content.clear();
        self.pending.clear();
        self.last_content_delta = None;
        Some((header, text))
    }
}

/// Take the longest decodable prefix of `pending`. Invalid sequences become
/// U+FFFD; an incomplete trailing character stays buffered.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + len);
                    }
                    None => {
                        pending.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}

/// A message returned by [`HarmonyEncoding::parse`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    /// Closed by a stop token
    Complete(Message),
    /// The stream ended inside this message's body
    Partial(Message),
}

impl ParsedMessage {
    #[must_use]
    pub fn message(&self) -> &Message {
        match self {
            Self::Complete(m) | Self::Partial(m) => m,
        }
    }

    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Complete(m) | Self::Partial(m) => m,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

impl HarmonyEncoding {
    /// Parse a token sequence.
    ///
    /// Messages come back in the order they were closed. If the sequence
    /// ends inside a message body, that message is returned last as
    /// [`ParsedMessage::Partial`].
    ///
    /// # Errors
    /// Returns [`Error::MalformedTranscript`] (with the offending token
    /// offset) for a structurally invalid sequence and
    /// [`Error::UnknownRole`] for an unrecognized author.
    pub fn parse(&self, tokens: &[Rank], role: Option<Role>) -> Result<Vec<ParsedMessage>> {
        let (state, completed) = self.resume(ParserState::new(role), tokens)?;
        let mut parsed: Vec<ParsedMessage> =
            completed.into_iter().map(ParsedMessage::Complete).collect();
        if let Some(header) = state.header() {
            parsed.push(ParsedMessage::Partial(build_message(
                header.clone(),
                Content::from(state.body_text()),
            )));
        }
        Ok(parsed)
    }

    /// Parse model output. The end of `tokens` closes an open body, so the
    /// final message need not carry a stop token.
    ///
    /// # Errors
    /// As [`HarmonyEncoding::parse`]; also fails if the tokens end inside a
    /// non-empty header.
    pub fn parse_messages_from_completion_tokens(
        &self,
        tokens: &[Rank],
        role: Option<Role>,
    ) -> Result<Vec<Message>> {
        let (mut state, mut messages) = self.resume(ParserState::new(role), tokens)?;
        if let Some(message) = self.finish(&mut state)? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Advance `state` over `tokens`, returning the new state and every
    /// message completed along the way.
    ///
    /// Feeding a sequence in pieces gives the same messages as feeding it
    /// whole.
    ///
    /// # Errors
    /// As [`HarmonyEncoding::parse`].
    pub fn resume(&self, mut state: ParserState, tokens: &[Rank]) -> Result<(ParserState, Vec<Message>)> {
        let mut completed = Vec::new();
        for &token in tokens {
            if let Some(message) = self.step(&mut state, token)? {
                completed.push(message);
            }
        }
        Ok((state, completed))
    }

    /// Consume one token. `state` is left unchanged on error.
    fn step(&self, state: &mut ParserState, token: Rank) -> Result<Option<Message>> {
        let offset = state.offset;
        let start = self.render_formatting_token(FormattingToken::Start);
        let message = self.render_formatting_token(FormattingToken::Message);

        match state.stream {
            StreamState::ExpectStart => {
                if token != start {
                    return Err(Error::malformed(
                        offset,
                        format!("expected {} but found token {token}", FormattingToken::Start),
                    ));
                }
                state.stream = StreamState::Header {
                    header_tokens: Vec::new(),
                };
            }
            StreamState::Header {
                ref mut header_tokens,
            } => {
                if token == message {
                    let header = self.parse_header(header_tokens, state.next_role, offset)?;
                    state.enter_body(header);
                } else {
                    self.check_header_token(token, offset)?;
                    header_tokens.push(token);
                }
            }
            StreamState::Content { .. } => {
                if self.is_stop_token(token) {
                    state.offset += 1;
                    return Ok(state
                        .take_body()
                        .map(|(header, text)| self.complete_message(header, text)));
                }
                if token == start || token == message {
                    return Err(Error::malformed(
                        offset,
                        format!("unexpected token {token} inside a message body"),
                    ));
                }
                let bytes = self
                    .tokenizer()
                    .decode_bytes(&[token])
                    .map_err(|e| Error::malformed(offset, e.to_string()))?;
                state.push_body(token, &bytes);
            }
        }
        state.offset += 1;
        Ok(None)
    }

    /// Close an open body at end of input.
    fn finish(&self, state: &mut ParserState) -> Result<Option<Message>> {
        if let StreamState::Header { header_tokens } = &state.stream {
            if !header_tokens.is_empty() {
                return Err(Error::malformed(
                    state.offset,
                    "stream ended inside a message header",
                ));
            }
            state.stream = StreamState::ExpectStart;
            return Ok(None);
        }
        Ok(state
            .take_body()
            .map(|(header, text)| self.complete_message(header, text)))
    }

    fn check_header_token(&self, token: Rank, offset: usize) -> Result<()> {
        let allowed = [
            self.render_formatting_token(FormattingToken::Channel),
            self.render_formatting_token(FormattingToken::ConstrainedFormat),
        ];
        if self.tokenizer().is_special_token(token) && !allowed.contains(&token) {
            return Err(Error::malformed(
                offset,
                format!("unexpected special token {token} inside a message header"),
            ));
        }
        Ok(())
    }

    fn parse_header(&self, tokens: &[Rank], role: Option<Role>, offset: usize) -> Result<ParsedHeader> {
        let text = self
            .tokenizer()
            .decode_utf8(tokens)
            .map_err(|e| Error::malformed(offset, format!("undecodable message header: {e}")))?;
        parse_header_text(&text, role, offset)
    }

    /// Build a closed message, recognizing structured system and developer
    /// content.
    fn complete_message(&self, header: ParsedHeader, text: String) -> Message {
        let content = match header.author.role {
            Role::System => recognize_system_content(&text).map(Content::SystemContent),
            Role::Developer => recognize_developer_content(&text).map(Content::DeveloperContent),
            Role::User | Role::Assistant | Role::Tool => None,
        };
        let content = content.unwrap_or_else(|| {
            if matches!(header.author.role, Role::System | Role::Developer) {
                tracing::trace!(role = %header.author.role, "keeping message body as text");
            }
            Content::from(text)
        });
        build_message(header, content)
    }
}

fn build_message(header: ParsedHeader, content: Content) -> Message {
    Message {
        author: header.author,
        content: vec![content],
        channel: header.channel,
        recipient: header.recipient,
        content_type: header.content_type,
    }
}

/// Split decoded header text into author, recipient, channel and content
/// type.
///
/// The channel is the text after `<|channel|>` up to whitespace or the next
/// marker. Of the remaining words, the first is the author (unless `role`
/// is given), a `to=` word is the recipient and the last other word is the
/// content type.
fn parse_header_text(text: &str, role: Option<Role>, offset: usize) -> Result<ParsedHeader> {
    let channel_marker = FormattingToken::Channel.surface();
    let constrain_marker = FormattingToken::ConstrainedFormat.surface();

    let mut rest = text.to_string();
    let mut channel = None;
    if let Some(idx) = rest.find(channel_marker) {
        let after = &rest[idx + channel_marker.len()..];
        let len = after
            .find(|c: char| c.is_whitespace() || c == '<')
            .unwrap_or(after.len());
        if len == 0 {
            return Err(Error::malformed(offset, "channel marker without a channel name"));
        }
        channel = Some(after[..len].to_string());
        rest = format!("{}{}", &rest[..idx], &after[len..]);
        if rest.contains(channel_marker) {
            return Err(Error::malformed(offset, "more than one channel in a message header"));
        }
    }

    let rest = rest.replace(constrain_marker, &format!(" {constrain_marker}"));
    let mut parts: Vec<&str> = rest.split_whitespace().collect();

    let author = match role {
        Some(role) => Author::from(role),
        None => {
            if parts.is_empty() {
                return Err(Error::malformed(offset, "message header has no author"));
            }
            let word = parts.remove(0);
            parse_author(word, !parts.is_empty() || channel.is_some())?
        }
    };

    let mut recipient = None;
    let mut content_type = None;
    if let Some(last) = parts.pop() {
        if let Some(to) = last.strip_prefix("to=") {
            recipient = Some(to);
        } else {
            content_type = Some(last);
            if let Some(to) = parts.last().and_then(|p| p.strip_prefix("to=")) {
                recipient = Some(to);
                parts.pop();
            }
        }
    }
    if !parts.is_empty() {
        return Err(Error::malformed(
            offset,
            format!("unexpected text in message header: {}", parts.join(" ")),
        ));
    }
    if recipient == Some("") {
        return Err(Error::malformed(offset, "empty recipient in message header"));
    }

    Ok(ParsedHeader {
        author,
        recipient: recipient.map(str::to_string),
        channel,
        content_type: content_type.map(str::to_string),
    })
}

/// Resolve the author word of a header.
///
/// Anything that is not a role (or `role:name`) names a tool, provided the
/// header has more to say, the name is namespaced (`functions.foo`) or it is
/// a built-in namespace such as `python`.
fn parse_author(word: &str, header_continues: bool) -> Result<Author> {
    if let Ok(role) = word.parse::<Role>() {
        return Ok(role.into());
    }
    if let Some((role, name)) = word.split_once(':') {
        if let Ok(role) = role.parse::<Role>() {
            if !name.is_empty() {
                return Ok(Author::new(role, name));
            }
        }
    }
    let looks_like_tool = !word.starts_with("to=") && !word.starts_with("<|");
    let unambiguous = header_continues || word.contains('.') || is_builtin_namespace(word);
    if looks_like_tool && unambiguous {
        return Ok(Author::new(Role::Tool, word));
    }
    Err(Error::UnknownRole(word.to_string()))
}

/// Token-at-a-time parser for model output.
///
/// ```no_run
/// # use harmony::{load_harmony_encoding, HarmonyEncodingName, Role, StreamableParser};
/// # let enc = load_harmony_encoding(HarmonyEncodingName::HarmonyGptOss)?;
/// # let sampled: Vec<u32> = Vec::new();
/// let mut parser = StreamableParser::new(enc, Some(Role::Assistant));
/// for token in sampled {
///     parser.process(token)?;
///     if let Some(delta) = parser.last_content_delta() {
///         print!("{delta}");
///     }
/// }
/// parser.process_eos()?;
/// # Ok::<(), harmony::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct StreamableParser {
    encoding: HarmonyEncoding,
    state: ParserState,
    tokens: Vec<Rank>,
    messages: Vec<Message>,
}

impl StreamableParser {
    pub fn new(encoding: HarmonyEncoding, role: Option<Role>) -> Self {
        Self::from_state(encoding, ParserState::new(role))
    }

    /// Continue from a saved state.
    pub fn from_state(encoding: HarmonyEncoding, state: ParserState) -> Self {
        Self {
            encoding,
            state,
            tokens: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Consume one token. On error the parser is unchanged.
    pub fn process(&mut self, token: Rank) -> Result<&mut Self> {
        if let Some(message) = self.encoding.step(&mut self.state, token)? {
            self.messages.push(message);
        }
        self.tokens.push(token);
        Ok(self)
    }

    /// Signal end of input, closing an open message body.
    pub fn process_eos(&mut self) -> Result<&mut Self> {
        if let Some(message) = self.encoding.finish(&mut self.state)? {
            self.messages.push(message);
        }
        Ok(self)
    }

    #[must_use]
    pub fn current_content(&self) -> &str {
        self.state.current_content()
    }

    #[must_use]
    pub fn current_role(&self) -> Option<Role> {
        self.state
            .header()
            .map(|h| h.author.role)
            .or(self.state.next_role)
    }

    #[must_use]
    pub fn current_channel(&self) -> Option<&str> {
        self.state.header().and_then(|h| h.channel.as_deref())
    }

    #[must_use]
    pub fn current_recipient(&self) -> Option<&str> {
        self.state.header().and_then(|h| h.recipient.as_deref())
    }

    #[must_use]
    pub fn current_content_type(&self) -> Option<&str> {
        self.state.header().and_then(|h| h.content_type.as_deref())
    }

    #[must_use]
    pub fn last_content_delta(&self) -> Option<&str> {
        self.state.last_content_delta()
    }

    /// Messages completed so far.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Every token processed so far.
    #[must_use]
    pub fn tokens(&self) -> &[Rank] {
        &self.tokens
    }

    #[must_use]
    pub fn state(&self) -> &StreamState {
        &self.state.stream
    }

    #[must_use]
    pub fn parser_state(&self) -> &ParserState {
        &self.state
    }

    /// Snapshot of the current state as JSON.
    pub fn state_json(&self) -> Result<String> {
        let snapshot = serde_json::json!({
            "state": &self.state.stream,
            "current_role": self.current_role(),
            "current_channel": self.current_channel(),
            "current_recipient": self.current_recipient(),
            "current_content_type": self.current_content_type(),
            "current_content": self.current_content(),
            "last_content_delta": self.last_content_delta(),
            "tokens_processed": self.tokens.len(),
        });
        Ok(serde_json::to_string(&snapshot)?)
    }

    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}
