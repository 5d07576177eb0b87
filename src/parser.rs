use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{NuggetError, Result};

static LIST_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[[^\[\]]*\]").expect("list pattern is valid"));

/// Pulls the first bracketed list of string literals out of free text.
///
/// Both `'single'` and `"double"` quoted items are accepted, as are trailing
/// commas. Text without any parsable list is a `MalformedOutput` error; the
/// caller decides whether to retry.
pub fn extract_list(text: &str) -> Result<Vec<String>> {
    let mut last_error = None;
    for candidate in LIST_CANDIDATE.find_iter(text) {
        match parse_literal_list(candidate.as_str()) {
            Ok(items) => return Ok(items),
            Err(e) => last_error = Some(e),
        }
    }
    Err(NuggetError::MalformedOutput(match last_error {
        Some(e) => e,
        None => "no bracketed list found in response".to_string(),
    }))
}

/// [`extract_list`] plus the check that exactly one label came back per item.
pub fn extract_labels(text: &str, expected: usize) -> Result<Vec<String>> {
    let labels = extract_list(text)?;
    if labels.len() != expected {
        return Err(NuggetError::MalformedOutput(format!(
            "expected {expected} labels, got {}",
            labels.len()
        )));
    }
    Ok(labels)
}

fn parse_literal_list(src: &str) -> std::result::Result<Vec<String>, String> {
    let mut chars = src.chars().peekable();
    if chars.next() != Some('[') {
        return Err("list must start with '['".into());
    }
    let mut items = Vec::new();
    loop {
        skip_ws(&mut chars);
        match chars.next() {
            Some(']') => return Ok(items),
            Some(q @ ('\'' | '"')) => items.push(parse_string(&mut chars, q)?),
            Some(c) => return Err(format!("unexpected '{c}' in list literal")),
            None => return Err("unterminated list literal".into()),
        }
        skip_ws(&mut chars);
        match chars.next() {
            Some(',') => continue,
            Some(']') => return Ok(items),
            Some(c) => return Err(format!("expected ',' or ']' but found '{c}'")),
            None => return Err("unterminated list literal".into()),
        }
    }
}

fn parse_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    quote: char,
) -> std::result::Result<String, String> {
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => break,
            },
            c if c == quote => return Ok(out),
            c => out.push(c),
        }
    }
    Err("unterminated string literal".into())
}

fn skip_ws(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}
