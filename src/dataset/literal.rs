//! Minimal reader for Python literal cells.
//!
//! Annotation sheets store tool lists as the `repr` of a Python list of dicts,
//! e.g. `[{'name': 'sign_in(app, page_type)', 'description': '...'}]`. This
//! converts such a cell into a `serde_json::Value`. Supported: lists, tuples,
//! dicts, single/double quoted strings, integers, floats, `True`, `False`, `None`.

use serde_json::{Map, Number, Value};
use std::iter::Peekable;
use std::str::Chars;

/// Nesting limit, matching serde_json's recursion limit.
const MAX_DEPTH: usize = 128;

/// Parse a Python literal. Returns `None` when the text is not a complete
/// literal or nests deeper than `MAX_DEPTH`.
pub fn parse_python_literal(text: &str) -> Option<Value> {
    let mut chars = text.trim().chars().peekable();
    let value = parse_value(&mut chars, 0)?;
    skip_whitespace(&mut chars);
    if chars.peek().is_some() {
        return None;
    }
    Some(value)
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn parse_value(chars: &mut Peekable<Chars<'_>>, depth: usize) -> Option<Value> {
    skip_whitespace(chars);
    match *chars.peek()? {
        '[' | '(' | '{' if depth >= MAX_DEPTH => None,
        '[' => parse_sequence(chars, '[', ']', depth + 1),
        '(' => parse_sequence(chars, '(', ')', depth + 1),
        '{' => parse_dict(chars, depth + 1),
        '\'' | '"' => parse_string(chars).map(Value::String),
        c if c == '-' || c.is_ascii_digit() => parse_number(chars),
        _ => parse_keyword(chars),
    }
}

fn parse_sequence(
    chars: &mut Peekable<Chars<'_>>,
    open: char,
    close: char,
    depth: usize,
) -> Option<Value> {
    if chars.next()? != open {
        return None;
    }
    let mut items = Vec::new();
    loop {
        skip_whitespace(chars);
        if chars.peek() == Some(&close) {
            chars.next();
            return Some(Value::Array(items));
        }
        items.push(parse_value(chars, depth)?);
        skip_whitespace(chars);
        match chars.next()? {
            ',' => continue,
            c if c == close => return Some(Value::Array(items)),
            _ => return None,
        }
    }
}

fn parse_dict(chars: &mut Peekable<Chars<'_>>, depth: usize) -> Option<Value> {
    chars.next();
    let mut map = Map::new();
    loop {
        skip_whitespace(chars);
        if chars.peek() == Some(&'}') {
            chars.next();
            return Some(Value::Object(map));
        }
        let key = match parse_value(chars, depth)? {
            Value::String(s) => s,
            other => other.to_string(),
        };
        skip_whitespace(chars);
        if chars.next()? != ':' {
            return None;
        }
        let value = parse_value(chars, depth)?;
        map.insert(key, value);
        skip_whitespace(chars);
        match chars.next()? {
            ',' => continue,
            '}' => return Some(Value::Object(map)),
            _ => return None,
        }
    }
}

fn parse_string(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let quote = chars.next()?;
    let mut out = String::new();
    loop {
        match chars.next()? {
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                other => out.push(other),
            },
            c if c == quote => return Some(out),
            c => out.push(c),
        }
    }
}

fn parse_number(chars: &mut Peekable<Chars<'_>>) -> Option<Value> {
    let mut raw = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
            raw.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn parse_keyword(chars: &mut Peekable<Chars<'_>>) -> Option<Value> {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphabetic() {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    match word.as_str() {
        "True" => Some(Value::Bool(true)),
        "False" => Some(Value::Bool(false)),
        "None" => Some(Value::Null),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_of_dicts() {
        let cell = "[{'name': 'sign_in(app, page_type)', 'description': '在app程序中完成每日签到'}]";
        let value = parse_python_literal(cell).unwrap();
        assert_eq!(
            value,
            json!([{ "name": "sign_in(app, page_type)", "description": "在app程序中完成每日签到" }])
        );
    }

    #[test]
    fn test_escaped_quote_and_keywords() {
        let value = parse_python_literal(r#"{'a': 'it\'s', "b": True, 'c': None, 'd': -2}"#).unwrap();
        assert_eq!(value, json!({ "a": "it's", "b": true, "c": null, "d": -2 }));
    }

    #[test]
    fn test_empty_list_and_tuple() {
        assert_eq!(parse_python_literal("[]").unwrap(), json!([]));
        assert_eq!(parse_python_literal("('x',)").unwrap(), json!(["x"]));
    }

    #[test]
    fn test_malformed_returns_none() {
        assert!(parse_python_literal("[{'name': 'unterminated}]").is_none());
        assert!(parse_python_literal("nan").is_none());
        assert!(parse_python_literal("[1, 2] trailing").is_none());
        assert!(parse_python_literal("").is_none());
    }

    #[test]
    fn test_nesting_limit() {
        let nested = format!("{}{}", "[".repeat(200_000), "]".repeat(200_000));
        assert!(parse_python_literal(&nested).is_none());

        let at_limit = format!("{}{}", "[".repeat(MAX_DEPTH), "]".repeat(MAX_DEPTH));
        assert!(parse_python_literal(&at_limit).is_some());

        let over_limit = format!("{}{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(parse_python_literal(&over_limit).is_none());
    }
}
