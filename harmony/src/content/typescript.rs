//! JSON schema ⇄ TypeScript-like type declarations
//!
//! Tool parameters are shown to the model as a type literal:
//!
//! ```text
//! {
//! // The city and state, e.g. San Francisco, CA
//! location: string,
//! format?: "celsius" | "fahrenheit", // default: celsius
//! }
//! ```
//!
//! Supported schema features: objects (`properties`, `required`,
//! per-property `description` and `default`), `enum`, `oneOf`, `type`
//! arrays, `array` with or without `items`, and the primitive types.
//! Anything else renders as `any`. [`typescript_to_schema`] reverses the
//! rendering for text produced by [`schema_to_typescript`].

use std::collections::HashSet;

use serde_json::{json, Map, Value};

const NESTED_INDENT: &str = "    ";

/// Render a JSON schema as a type declaration.
#[must_use]
pub fn schema_to_typescript(schema: &Value) -> String {
    render_type(schema, "")
}

/// Parse a type declaration back into a JSON schema.
///
/// Returns `None` if `text` is not entirely a declaration in the form
/// [`schema_to_typescript`] produces.
#[must_use]
pub fn typescript_to_schema(text: &str) -> Option<Value> {
    let (schema, used) = parse_prefix(text)?;
    (used == text.len()).then_some(schema)
}

/// Parse a declaration at the start of `text`, returning the schema and the
/// number of bytes consumed.
pub(crate) fn parse_prefix(text: &str) -> Option<(Value, usize)> {
    let mut cursor = Cursor::new(text);
    let schema = parse_union(&mut cursor, "")?;
    Some((schema, cursor.pos))
}

fn render_type(schema: &Value, indent: &str) -> String {
    if let Some(values) = non_empty_array(schema, "enum") {
        return values
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(" | ");
    }
    if let Some(variants) = non_empty_array(schema, "oneOf") {
        return variants
            .iter()
            .map(|v| render_member(v, indent))
            .collect::<Vec<_>>()
            .join(" | ");
    }
    match schema.get("type") {
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).map(type_name).collect();
            if names.is_empty() {
                "any".to_string()
            } else {
                names.join(" | ")
            }
        }
        Some(Value::String(ty)) => match ty.as_str() {
            "object" => render_object(schema, indent),
            "array" => match schema.get("items") {
                Some(items) => format!("{}[]", render_member(items, indent)),
                None => "Array<any>".to_string(),
            },
            other => type_name(other).to_string(),
        },
        _ => "any".to_string(),
    }
}

/// Render a union member, parenthesized when it is itself a union.
fn render_member(schema: &Value, indent: &str) -> String {
    let rendered = render_type(schema, indent);
    if is_union(schema) {
        format!("({rendered})")
    } else {
        rendered
    }
}

fn render_object(schema: &Value, indent: &str) -> String {
    let mut out = String::from("{\n");
    let required: HashSet<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let nested = format!("{indent}{NESTED_INDENT}");

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, property) in properties {
            if let Some(description) = property.get("description").and_then(Value::as_str) {
                for line in description.lines() {
                    out.push_str(&format!("{indent}// {line}\n"));
                }
            }
            let optional = if required.contains(key.as_str()) { "" } else { "?" };
            out.push_str(&format!(
                "{indent}{key}{optional}: {}",
                render_type(property, &nested)
            ));
            match property.get("default") {
                Some(Value::String(default)) => out.push_str(&format!(", // default: {default}")),
                Some(default) => out.push_str(&format!(", // default: {default}")),
                None => out.push(','),
            }
            out.push('\n');
        }
    }

    out.push_str(indent);
    out.push('}');
    out
}

fn type_name(json_type: &str) -> &str {
    match json_type {
        "integer" | "number" => "number",
        "string" => "string",
        "boolean" => "boolean",
        "null" => "null",
        "array" => "Array<any>",
        _ => "any",
    }
}

fn is_union(schema: &Value) -> bool {
    non_empty_array(schema, "enum").is_some_and(|v| v.len() > 1)
        || non_empty_array(schema, "oneOf").is_some_and(|v| v.len() > 1)
        || schema
            .get("type")
            .and_then(Value::as_array)
            .is_some_and(|v| v.len() > 1)
}

fn non_empty_array<'a>(schema: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    schema
        .get(key)
        .and_then(Value::as_array)
        .filter(|v| !v.is_empty())
}

/// Position in a text being parsed.
pub(crate) struct Cursor<'a> {
    src: &'a str,
    pub(crate) pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub(crate) fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.src.len()
    }

    /// Consume `prefix` if the remaining text starts with it.
    pub(crate) fn eat(&mut self, prefix: &str) -> bool {
        if self.rest().starts_with(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    /// Consume through the next newline and return the line without it.
    pub(crate) fn line(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let end = rest.find('\n')?;
        self.pos += end + 1;
        Some(&rest[..end])
    }

    pub(crate) fn advance(&mut self, len: usize) -> &'a str {
        let rest = self.rest();
        self.pos += len;
        &rest[..len]
    }
}

fn parse_union(cursor: &mut Cursor<'_>, indent: &str) -> Option<Value> {
    let mut members = vec![parse_member(cursor, indent)?];
    while cursor.eat(" | ") {
        members.push(parse_member(cursor, indent)?);
    }
    Some(combine_union(members))
}

fn parse_member(cursor: &mut Cursor<'_>, indent: &str) -> Option<Value> {
    let mut schema = if cursor.eat("(") {
        let inner = parse_union(cursor, indent)?;
        if !cursor.eat(")") {
            return None;
        }
        inner
    } else {
        parse_primary(cursor, indent)?
    };
    while cursor.eat("[]") {
        schema = json!({"type": "array", "items": schema});
    }
    Some(schema)
}

fn parse_primary(cursor: &mut Cursor<'_>, indent: &str) -> Option<Value> {
    if cursor.eat("{\n") {
        return parse_object(cursor, indent);
    }
    if cursor.eat("Array<any>") {
        return Some(json!({"type": "array"}));
    }

    let rest = cursor.rest();
    let first = rest.chars().next()?;
    if first == '"' {
        let len = string_literal_len(rest)?;
        let value: Value = serde_json::from_str(cursor.advance(len)).ok()?;
        return Some(literal(value));
    }
    if first == '-' || first.is_ascii_digit() {
        let len = rest
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')))
            .unwrap_or(rest.len());
        let value: Value = serde_json::from_str(cursor.advance(len)).ok()?;
        return Some(literal(value));
    }

    let len = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    let schema = match &rest[..len] {
        "any" => json!({}),
        name @ ("string" | "number" | "boolean" | "null") => json!({"type": name}),
        "true" | "false" => literal(serde_json::from_str(&rest[..len]).ok()?),
        _ => return None,
    };
    cursor.advance(len);
    Some(schema)
}

/// Byte length of the JSON string literal at the start of `text`.
fn string_literal_len(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in text.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i + 1),
            '\n' => return None,
            _ => {}
        }
    }
    None
}

fn parse_object(cursor: &mut Cursor<'_>, indent: &str) -> Option<Value> {
    let nested = format!("{indent}{NESTED_INDENT}");
    let closing = format!("{indent}}}");
    let mut properties = Map::new();
    let mut required = Vec::new();
    let mut comment: Vec<&str> = Vec::new();

    loop {
        if cursor.eat(&closing) {
            break;
        }
        if !cursor.eat(indent) {
            return None;
        }
        if cursor.eat("//") {
            let line = cursor.line()?;
            comment.push(line.strip_prefix(' ').unwrap_or(line));
            continue;
        }

        let rest = cursor.rest();
        let key_len = rest.find(['?', ':', '\n'])?;
        let key = cursor.advance(key_len);
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        let optional = cursor.eat("?");
        if !cursor.eat(": ") {
            return None;
        }

        let mut property = parse_union(cursor, &nested)?;
        if cursor.eat(", // default: ") {
            let text = cursor.line()?;
            let default = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));
            set(&mut property, "default", default);
        } else if !cursor.eat(",\n") {
            return None;
        }
        if !comment.is_empty() {
            set(&mut property, "description", Value::String(comment.join("\n")));
            comment.clear();
        }
        if !optional {
            required.push(Value::String(key.to_string()));
        }
        properties.insert(key.to_string(), property);
    }

    if !comment.is_empty() {
        return None;
    }

    let mut schema = json!({"type": "object"});
    if !properties.is_empty() {
        set(&mut schema, "properties", Value::Object(properties));
    }
    if !required.is_empty() {
        set(&mut schema, "required", Value::Array(required));
    }
    Some(schema)
}

fn literal(value: Value) -> Value {
    json!({"enum": [value]})
}

/// Fold parsed union members into one schema: literals become an `enum`,
/// bare type names a `type` array, anything else a `oneOf`.
fn combine_union(mut members: Vec<Value>) -> Value {
    let literals: Option<Vec<Value>> = members
        .iter()
        .map(|m| match m.as_object() {
            Some(obj) if obj.len() == 1 => obj
                .get("enum")
                .and_then(Value::as_array)
                .filter(|v| v.len() == 1)
                .map(|v| v[0].clone()),
            _ => None,
        })
        .collect();
    if let Some(values) = literals {
        return if values.iter().all(Value::is_string) {
            json!({"type": "string", "enum": values})
        } else {
            json!({"enum": values})
        };
    }

    if members.len() == 1 {
        return members.remove(0);
    }

    let names: Option<Vec<Value>> = members
        .iter()
        .map(|m| match m.as_object() {
            Some(obj) if obj.len() == 1 => obj.get("type").filter(|t| t.is_string()).cloned(),
            _ => None,
        })
        .collect();
    match names {
        Some(names) => json!({"type": names}),
        None => json!({"oneOf": members}),
    }
}

fn set(schema: &mut Value, key: &str, value: Value) {
    if let Some(obj) = schema.as_object_mut() {
        obj.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_reverses(schema: &Value) {
        let text = schema_to_typescript(schema);
        let parsed = typescript_to_schema(&text)
            .unwrap_or_else(|| panic!("could not parse back:\n{text}"));
        assert_eq!(&parsed, schema, "rendered as:\n{text}");
    }

    #[test]
    fn test_primitives() {
        assert_eq!(schema_to_typescript(&json!({"type": "string"})), "string");
        assert_eq!(schema_to_typescript(&json!({"type": "integer"})), "number");
        assert_eq!(schema_to_typescript(&json!({"type": "boolean"})), "boolean");
        assert_eq!(schema_to_typescript(&json!({})), "any");
        assert_eq!(schema_to_typescript(&json!({"type": "array"})), "Array<any>");
    }

    #[test]
    fn test_unions() {
        assert_eq!(
            schema_to_typescript(&json!({"type": ["number", "string"]})),
            "number | string"
        );
        assert_eq!(
            schema_to_typescript(&json!({"type": "string", "enum": ["a", "b"]})),
            "\"a\" | \"b\""
        );
        assert_eq!(
            schema_to_typescript(&json!({"oneOf": [{"type": "string"}, {"type": "array", "items": {"type": "number"}}]})),
            "string | number[]"
        );
        assert_eq!(
            schema_to_typescript(&json!({"type": "array", "items": {"type": ["string", "null"]}})),
            "(string | null)[]"
        );
    }

    #[test]
    fn test_object_layout() {
        let schema = json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search terms"},
                "topn": {"type": "number", "default": 10},
                "filters": {
                    "type": "object",
                    "properties": {"site": {"type": "string"}}
                }
            },
            "required": ["query"]
        });
        assert_eq!(
            schema_to_typescript(&schema),
            "{\n\
             // Search terms\n\
             query: string,\n\
             topn?: number, // default: 10\n\
             filters?: {\n    site?: string,\n    },\n\
             }"
        );
    }

    #[test]
    fn test_reverse_simple() {
        assert_reverses(&json!({"type": "string"}));
        assert_reverses(&json!({"type": "number"}));
        assert_reverses(&json!({"type": ["number", "string"]}));
        assert_reverses(&json!({"type": "string", "enum": ["celsius", "fahrenheit"]}));
        assert_reverses(&json!({"enum": [1, 2, 3]}));
        assert_reverses(&json!({"type": "array", "items": {"type": "string"}}));
        assert_reverses(&json!({"type": "array"}));
        assert_reverses(&json!({}));
    }

    #[test]
    fn test_reverse_object() {
        assert_reverses(&json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city and state\nor a postcode"
                },
                "format": {"type": "string", "enum": ["c", "f"], "default": "c"},
                "days": {"type": "number", "default": -1},
                "verbose": {"type": "boolean", "default": false},
                "tags": {"type": "array", "items": {"type": "string", "enum": ["a \"quoted\" tag", "b"]}},
                "nested": {
                    "type": "object",
                    "properties": {
                        "inner": {
                            "type": "object",
                            "properties": {"x": {"type": "number"}},
                            "required": ["x"]
                        }
                    }
                },
                "choice": {"oneOf": [{"type": "string"}, {"type": "object", "properties": {"y": {"type": "boolean"}}}]}
            },
            "required": ["location", "nested"]
        }));
    }

    #[test]
    fn test_reject_trailing_text() {
        assert!(typescript_to_schema("string extra").is_none());
        assert!(typescript_to_schema("{\nname string,\n}").is_none());
        assert!(typescript_to_schema("widget").is_none());
    }

    #[test]
    fn test_parse_prefix_reports_length() {
        let (schema, used) = parse_prefix("{\nx: number,\n}) => any;").unwrap();
        assert_eq!(schema, json!({"type": "object", "properties": {"x": {"type": "number"}}, "required": ["x"]}));
        assert_eq!(used, "{\nx: number,\n}".len());
    }
}
