//! # Filter Query-String Parser
//!
//! Parses the URL-style filter syntax used by monitoring list views into a
//! [`Filter`] tree.
//!
//! Syntax:
//! ```text
//! host_name=web*&(state>1|handled=0)&!(service=ping)&state=(1|2)&is_flapping
//! ```
//!
//! One level may use either `&` or `|`, never both; parenthesise to mix.
//! Keys and values are percent-decoded.

use thiserror::Error;

use super::{Filter, FilterValue, Sign};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid filter \"{input}\": {message} at position {position}")]
pub struct FilterParseError {
    pub input: String,
    pub position: usize,
    pub message: String,
}

const KEY_STOPS: &[char] = &['=', '(', ')', '&', '|', '>', '<', '!'];
const VALUE_STOPS: &[char] = &[')', '&', '|', '>', '<'];

/// Parse a filter query string. The empty string matches everything.
pub fn parse(input: &str) -> Result<Filter, FilterParseError> {
    let mut parser = Parser {
        input,
        chars: input.chars().collect(),
        pos: 0,
    };
    if parser.chars.iter().all(|c| c.is_whitespace()) {
        return Ok(Filter::match_all());
    }

    let filter = parser.chain(0)?;
    if parser.pos < parser.chars.len() {
        return Err(parser.error("unexpected input"));
    }
    Ok(filter)
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn chain(&mut self, depth: usize) -> Result<Filter, FilterParseError> {
        let mut items = vec![self.term(depth)?];
        let mut op: Option<char> = None;

        loop {
            match self.peek() {
                Some(c @ ('&' | '|')) => {
                    if op.is_some_and(|o| o != c) {
                        return Err(self.error("mixed '&' and '|' without parentheses"));
                    }
                    op = Some(c);
                    self.pos += 1;
                    items.push(self.term(depth)?);
                }
                Some(')') if depth > 0 => break,
                None => break,
                Some(c) => return Err(self.error(&format!("unexpected '{}'", c))),
            }
        }

        if items.len() == 1 {
            return Ok(items.remove(0));
        }
        Ok(match op {
            Some('|') => Filter::Any(items),
            _ => Filter::All(items),
        })
    }

    fn term(&mut self, depth: usize) -> Result<Filter, FilterParseError> {
        match self.peek() {
            Some('!') => {
                self.pos += 1;
                let inner = self.term(depth)?;
                Ok(Filter::not(inner))
            }
            Some('(') => {
                self.pos += 1;
                let inner = self.chain(depth + 1)?;
                self.expect(')')?;
                Ok(inner)
            }
            _ => self.expression(),
        }
    }

    fn expression(&mut self) -> Result<Filter, FilterParseError> {
        let raw_key = self.read_until(KEY_STOPS);
        let key = percent_decode(raw_key.trim());
        if key.is_empty() {
            return Err(self.error("expected column name"));
        }

        let sign = match self.peek() {
            Some('=') => {
                self.pos += 1;
                Sign::Eq
            }
            Some('!') => {
                self.pos += 1;
                self.expect('=')?;
                Sign::Neq
            }
            Some(c @ ('<' | '>')) => {
                self.pos += 1;
                let or_equal = self.peek() == Some('=');
                if or_equal {
                    self.pos += 1;
                }
                match (c, or_equal) {
                    ('<', false) => Sign::Lt,
                    ('<', true) => Sign::Lte,
                    (_, false) => Sign::Gt,
                    (_, true) => Sign::Gte,
                }
            }
            // A bare column is a flag check.
            _ => return Ok(Filter::eq(key, true)),
        };

        let value = if self.peek() == Some('(') {
            self.pos += 1;
            let raw = self.read_until(&[')']);
            self.expect(')')?;
            FilterValue::List(
                raw.split('|')
                    .map(|v| serde_json::Value::String(percent_decode(v)))
                    .collect(),
            )
        } else {
            FilterValue::from(percent_decode(&self.read_until(VALUE_STOPS)))
        };

        Ok(Filter::expression(key, sign, value))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, want: char) -> Result<(), FilterParseError> {
        if self.peek() == Some(want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", want)))
        }
    }

    fn read_until(&mut self, stops: &[char]) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if stops.contains(&c) {
                break;
            }
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn error(&self, message: &str) -> FilterParseError {
        FilterParseError {
            input: self.input.to_string(),
            position: self.pos,
            message: message.to_string(),
        }
    }
}

/// Decode `%XX` escapes. Malformed escapes are kept literally; invalid
/// UTF-8 is replaced.
fn percent_decode(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned(),
    }
}
