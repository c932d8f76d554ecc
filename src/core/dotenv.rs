//! # Environment file parser
//!
//! Line-oriented `KEY=VALUE` parsing shared by the layer store (which
//! interpolates) and the policy validator (which reads raw values).
//!
//! Rules:
//! - blank lines and lines starting with `#` are ignored;
//! - an optional `export ` prefix is accepted;
//! - the line is split on the first `=`;
//! - one matching pair of surrounding `'`, `"` or `` ` `` quotes is removed;
//! - an unquoted value loses any ` #comment` suffix.

use std::{fs, io, path::Path};

const QUOTES: [char; 3] = ['\'', '"', '`'];

/// One `KEY=VALUE` line, before interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Variable name, without any `export ` prefix.
    pub key: String,
    /// Unquoted value, inline comment removed.
    pub value: String,
    /// The quote character that wrapped the value, if any.
    pub quote: Option<char>,
    /// 1-based line number, for diagnostics.
    pub line: usize,
}

impl Assignment {
    /// Single-quoted values are taken verbatim.
    pub fn is_verbatim(&self) -> bool {
        self.quote == Some('\'')
    }
}

/// Parses the content of an environment file.
pub fn parse(content: &str) -> Vec<Assignment> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| parse_line(line, index + 1))
        .collect()
}

/// Reads and parses an environment file.
pub fn parse_file(path: &Path) -> io::Result<Vec<Assignment>> {
    Ok(parse(&fs::read_to_string(path)?))
}

fn parse_line(raw: &str, line: usize) -> Option<Assignment> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);

    let Some((key, value)) = trimmed.split_once('=') else {
        log::trace!("Ignoring line {} without '=': {:?}", line, raw);
        return None;
    };
    let key = key.trim();
    if key.is_empty() {
        log::trace!("Ignoring line {} with an empty key.", line);
        return None;
    }

    let (value, quote) = unquote(value.trim());
    Some(Assignment {
        key: key.to_string(),
        value,
        quote,
        line,
    })
}

fn unquote(value: &str) -> (String, Option<char>) {
    for quote in QUOTES {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return (inner.to_string(), Some(quote));
        }
    }
    if value.starts_with(QUOTES) {
        // Unmatched quote: keep the value exactly as written.
        return (value.to_string(), None);
    }
    (strip_inline_comment(value).to_string(), None)
}

fn strip_inline_comment(value: &str) -> &str {
    let mut previous_is_space = true;
    for (index, c) in value.char_indices() {
        if c == '#' && previous_is_space {
            return value.get(..index).unwrap_or(value).trim_end();
        }
        previous_is_space = c.is_whitespace();
    }
    value
}
