//! Streaming parser tests.

mod test_helpers;

use harmony::{
    Conversation, Error, FormattingToken, Message, ParserState, Role, StreamState,
    StreamableParser, SystemContent,
};

use test_helpers::{encoding, tokens};

const REPLY: &str = "<|channel|>analysis<|message|>User wants €5 in ¥.<|end|>\
                     <|start|>assistant<|channel|>final<|message|>That is about ¥800 🎉<|return|>";

#[test]
fn test_token_by_token_matches_batch_parse() {
    let enc = encoding();
    let toks = tokens(&enc, REPLY);

    let mut parser = StreamableParser::new(enc.clone(), Some(Role::Assistant));
    let mut streamed = String::new();
    for &t in &toks {
        parser.process(t).unwrap();
        if let Some(delta) = parser.last_content_delta() {
            streamed.push_str(delta);
        }
    }
    parser.process_eos().unwrap();

    let batch = enc
        .parse_messages_from_completion_tokens(&toks, Some(Role::Assistant))
        .unwrap();
    assert_eq!(parser.messages(), batch.as_slice());
    assert_eq!(streamed, "User wants €5 in ¥.That is about ¥800 🎉");
    assert_eq!(parser.tokens(), toks.as_slice());
}

#[test]
fn test_deltas_are_whole_characters() {
    let enc = encoding();
    let mut parser = StreamableParser::new(enc.clone(), Some(Role::Assistant));
    for t in tokens(&enc, "<|channel|>final<|message|>") {
        parser.process(t).unwrap();
    }

    let crab = enc.tokenizer().encode_ordinary("🦀").unwrap();
    assert_eq!(crab.len(), 4);
    for &t in &crab[..3] {
        parser.process(t).unwrap();
        assert_eq!(parser.last_content_delta(), None);
        assert_eq!(parser.current_content(), "");
    }
    parser.process(crab[3]).unwrap();
    assert_eq!(parser.last_content_delta(), Some("🦀"));
    assert_eq!(parser.current_content(), "🦀");
}

#[test]
fn test_resume_from_every_split_point() {
    let enc = encoding();
    let convo = Conversation::from_messages([
        Message::from_role_and_content(Role::System, SystemContent::default()),
        Message::from_role_and_content(Role::User, "¿Qué tal? 😀"),
        Message::from_role_and_content(Role::Assistant, "Bien.").with_channel("final"),
    ]);
    let toks = enc.render_conversation(&convo, None).unwrap();
    let (end_state, whole) = enc.resume(ParserState::default(), &toks).unwrap();
    assert_eq!(whole, convo.messages);
    assert_eq!(end_state.stream(), &StreamState::ExpectStart);

    for split in 0..=toks.len() {
        let (mid, mut first) = enc.resume(ParserState::default(), &toks[..split]).unwrap();
        // Snapshot through JSON to exercise state persistence as well.
        let mid: ParserState = serde_json::from_str(&serde_json::to_string(&mid).unwrap()).unwrap();
        let (end, second) = enc.resume(mid, &toks[split..]).unwrap();
        first.extend(second);
        assert_eq!(first, whole, "split at {split}");
        assert_eq!(end, end_state, "split at {split}");
    }
}

#[test]
fn test_malformed_reports_offset_and_keeps_state() {
    let enc = encoding();
    let good = tokens(&enc, "<|start|>user<|message|>hi");
    let mut parser = StreamableParser::new(enc.clone(), None);
    for &t in &good {
        parser.process(t).unwrap();
    }
    let before = parser.parser_state().clone();

    let start = enc.render_formatting_token(FormattingToken::Start);
    match parser.process(start) {
        Err(Error::MalformedTranscript { offset, .. }) => assert_eq!(offset, good.len()),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(parser.parser_state(), &before);

    // The stream continues once a valid token arrives.
    parser.process(enc.render_formatting_token(FormattingToken::EndMessage)).unwrap();
    assert_eq!(parser.messages()[0].text(), "hi");
}

#[test]
fn test_unknown_role_in_header() {
    let enc = encoding();
    let toks = tokens(&enc, "<|start|>narrator<|message|>Once upon a time<|end|>");
    assert!(matches!(
        enc.parse(&toks, None),
        Err(Error::UnknownRole(role)) if role == "narrator"
    ));
}

#[test]
fn test_stop_token_sets() {
    let enc = encoding();
    let all = enc.stop_tokens();
    let actions = enc.stop_tokens_for_assistant_actions();

    let ret = enc.render_formatting_token(FormattingToken::EndMessageDoneSampling);
    let call = enc.render_formatting_token(FormattingToken::EndMessageAssistantToTool);
    let end = enc.render_formatting_token(FormattingToken::EndMessage);
    assert_eq!(all.len(), 3);
    assert!(all.contains(&ret) && all.contains(&call) && all.contains(&end));
    assert_eq!(actions.len(), 2);
    assert!(actions.is_subset(all));
    assert!(!actions.contains(&end));

    // Ordinary text never produces a stop token.
    let text = "<|end|> <|call|> <|return|> plain text";
    let ordinary = enc.tokenizer().encode_ordinary(text).unwrap();
    assert!(ordinary.iter().all(|t| !all.contains(t)));
}

#[test]
fn test_state_json_tracks_header() {
    let enc = encoding();
    let mut parser = StreamableParser::new(enc.clone(), None);
    for t in tokens(
        &enc,
        "<|start|>assistant to=functions.lookup<|channel|>commentary <|constrain|>json<|message|>{",
    ) {
        parser.process(t).unwrap();
    }
    assert_eq!(parser.current_recipient(), Some("functions.lookup"));
    assert_eq!(parser.current_content_type(), Some("<|constrain|>json"));

    let state: serde_json::Value = serde_json::from_str(&parser.state_json().unwrap()).unwrap();
    assert_eq!(state["current_recipient"], "functions.lookup");
    assert_eq!(state["current_channel"], "commentary");
    assert_eq!(state["current_content"], "{");
    assert_eq!(state["last_content_delta"], "{");
}

#[test]
fn test_partial_then_complete() {
    let enc = encoding();
    let message = Message::from_role_and_content(Role::Assistant, "The answer is 4.").with_channel("final");
    let toks = enc.render_message(&message, None).unwrap();

    let prefix = &toks[..toks.len() - 1];
    let parsed = enc.parse(prefix, None).unwrap();
    assert_eq!(parsed.len(), 1);
    assert!(!parsed[0].is_complete());
    assert_eq!(parsed[0].message().text(), "The answer is 4.");

    let parsed = enc.parse(&toks, None).unwrap();
    assert_eq!(parsed.len(), 1);
    assert!(parsed[0].is_complete());
    assert_eq!(parsed[0].message(), &message);
}
