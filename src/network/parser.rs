//! Nom-based IRC line parser.
//!
//! Borrowing parser for a single IRC line with IRCv3 tags. Tag values are
//! unescaped on demand.

use nom::{
    IResult,
    bytes::complete::{take_until, take_while1},
    character::complete::char,
    sequence::{preceded, terminated},
};
use std::borrow::Cow;
use thiserror::Error;

/// RFC 2812: at most 15 parameters.
const MAX_PARAMS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// A parsed IRC line borrowing from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcLine<'a> {
    raw_tags: Option<&'a str>,
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub params: Vec<&'a str>,
}

impl<'a> IrcLine<'a> {
    /// Unescaped value of a tag. Tags present without a value yield `""`.
    pub fn tag(&self, key: &str) -> Option<Cow<'a, str>> {
        self.raw_tags?.split(';').find_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (k == key).then(|| unescape_tag_value(v))
        })
    }

    /// Nickname part of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&'a str> {
        self.prefix.map(|p| p.split('!').next().unwrap_or(p))
    }

    pub fn param(&self, index: usize) -> Option<&'a str> {
        self.params.get(index).copied()
    }
}

/// Parse IRCv3 message tags (the part after `@` and before the first space).
fn parse_tags(input: &str) -> IResult<&str, &str> {
    terminated(preceded(char('@'), take_until(" ")), char(' '))(input)
}

/// Parse message prefix (the part after `:` and before the first space).
fn parse_prefix(input: &str) -> IResult<&str, &str> {
    terminated(
        preceded(char(':'), take_while1(|c| c != ' ')),
        char(' '),
    )(input)
}

fn parse_command(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric())(input)
}

/// Space-separated middle params, then an optional `:` trailing param.
fn parse_params(mut rest: &str) -> Vec<&str> {
    let mut params = Vec::new();
    while params.len() < MAX_PARAMS {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing);
            break;
        }
        let (middle, next) = rest.split_once(' ').unwrap_or((rest, ""));
        params.push(middle);
        rest = next;
    }
    params
}

/// Parse one line (without trailing CR/LF, though they are tolerated).
pub fn parse_line(line: &str) -> Result<IrcLine<'_>, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let (rest, raw_tags) = if line.starts_with('@') {
        let (rest, tags) = parse_tags(line).map_err(|_| ParseError::Malformed("tags"))?;
        (rest, Some(tags))
    } else {
        (line, None)
    };
    let (rest, prefix) = if rest.starts_with(':') {
        let (rest, prefix) = parse_prefix(rest).map_err(|_| ParseError::Malformed("prefix"))?;
        (rest, Some(prefix))
    } else {
        (rest, None)
    };
    let (rest, command) = parse_command(rest).map_err(|_| ParseError::Malformed("command"))?;

    Ok(IrcLine {
        raw_tags,
        prefix,
        command,
        params: parse_params(rest),
    })
}

/// Undo IRCv3 tag value escaping.
pub fn unescape_tag_value(value: &str) -> Cow<'_, str> {
    if !value.contains('\\') {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    Cow::Owned(out)
}
