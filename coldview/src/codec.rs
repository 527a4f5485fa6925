//! Flatten nested JSON into a map of paths to scalars, and back.
//!
//! Object keys are joined with `.` and array indices are bracketed, so
//! `{"a": [{"b": 1}]}` flattens to `{"a[0].b": 1}`. Partial edits are sent to
//! the server one flattened path at a time.
//!
//! Neither direction fails. Malformed paths are accepted and may nest in
//! surprising ways; keys that themselves contain `.`, `[` or `]` do not
//! survive a round trip. Bracketed numbers above [`MAX_INDEX`] are read as
//! object keys rather than array positions, so arrays longer than that do
//! not round-trip either.

use std::fmt;

use serde_json::{Map, Value};

/// Largest bracketed number treated as an array index.
pub const MAX_INDEX: usize = 1_000_000;

/// One segment of a flattened path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathToken {
    Field(String),
    Index(usize),
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathToken::Field(name) => f.write_str(name),
            PathToken::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Splits `a.b[2].c` into `[Field(a), Field(b), Index(2), Field(c)]`.
///
/// Characters that cannot start a token (a stray `]`, a `[` not followed by
/// digits and `]`) are skipped. A bracketed number above [`MAX_INDEX`] is a
/// field named by its digits.
pub fn parse_path(path: &str) -> Vec<PathToken> {
    let mut tokens = Vec::new();
    let mut name = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' | ']' => push_field(&mut name, &mut tokens),
            '[' => {
                push_field(&mut name, &mut tokens);
                let mut ahead = chars.clone();
                let mut digits = String::new();
                while let Some(d) = ahead.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    ahead.next();
                }
                if !digits.is_empty() && ahead.peek() == Some(&']') {
                    ahead.next();
                    chars = ahead;
                    match digits.parse::<usize>() {
                        Ok(i) if i <= MAX_INDEX => tokens.push(PathToken::Index(i)),
                        _ => tokens.push(PathToken::Field(digits)),
                    }
                }
            }
            _ => name.push(c),
        }
    }
    push_field(&mut name, &mut tokens);
    tokens
}

fn push_field(name: &mut String, tokens: &mut Vec<PathToken>) {
    if !name.is_empty() {
        tokens.push(PathToken::Field(std::mem::take(name)));
    }
}

/// Renders tokens back into the canonical path string.
pub fn join_path(tokens: &[PathToken]) -> String {
    let mut out = String::new();
    for t in tokens {
        if matches!(t, PathToken::Field(_)) && !out.is_empty() {
            out.push('.');
        }
        out.push_str(&t.to_string());
    }
    out
}

/// Flattens objects and arrays into a single-level object keyed by path.
/// Scalars are returned unchanged.
///
/// Empty containers are kept as leaves so they survive `unflatten`. The root
/// never gets a key, except an empty root array which maps to `{"": []}`.
pub fn flatten(value: &Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => {
            let mut out = Map::new();
            flatten_into(value, String::new(), &mut out);
            Value::Object(out)
        }
        scalar => scalar.clone(),
    }
}

fn flatten_into(value: &Value, prefix: String, out: &mut Map<String, Value>) {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                out.insert(prefix, Value::Array(Vec::new()));
                return;
            }
            for (i, item) in items.iter().enumerate() {
                flatten_into(item, format!("{prefix}[{i}]"), out);
            }
        }
        Value::Object(map) => {
            if map.is_empty() {
                if !prefix.is_empty() {
                    out.insert(prefix, Value::Object(Map::new()));
                }
                return;
            }
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, path, out);
            }
        }
        scalar => {
            out.insert(prefix, scalar.clone());
        }
    }
}

/// Rebuilds the nested structure from a path-keyed object. Anything that is
/// not an object (scalars, arrays) is returned unchanged.
pub fn unflatten(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    if map.is_empty() {
        return Value::Object(Map::new());
    }

    let mut root = Value::Null;
    for (path, leaf) in map {
        insert(&mut root, &parse_path(path), leaf.clone());
    }
    root
}

fn insert(slot: &mut Value, tokens: &[PathToken], leaf: Value) {
    let Some((head, rest)) = tokens.split_first() else {
        *slot = leaf;
        return;
    };

    match (head, slot) {
        (PathToken::Index(i), Value::Array(items)) => {
            let Some(len) = i.checked_add(1).filter(|_| *i <= MAX_INDEX) else {
                return;
            };
            if items.len() < len {
                items.resize(len, Value::Null);
            }
            insert(&mut items[*i], rest, leaf);
        }
        (PathToken::Index(i), Value::Object(map)) => {
            insert(map.entry(i.to_string()).or_insert(Value::Null), rest, leaf);
        }
        (PathToken::Field(name), Value::Object(map)) => {
            insert(map.entry(name.clone()).or_insert(Value::Null), rest, leaf);
        }
        // named members of an array have no JSON form
        (PathToken::Field(_), Value::Array(_)) => {}
        (token, slot) => {
            *slot = match token {
                PathToken::Index(_) => Value::Array(Vec::new()),
                PathToken::Field(_) => Value::Object(Map::new()),
            };
            insert(slot, tokens, leaf);
        }
    }
}
