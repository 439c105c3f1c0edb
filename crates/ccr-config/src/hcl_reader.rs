//! Reader for the HCL subset produced by [`crate::hcl_encoder`].
//!
//! Attributes decode to JSON values, blocks decode the way Terraform tooling
//! usually presents them: `variable "clusters" { .. }` becomes
//! `{"variable": [{"clusters": {..}}]}`. Expressions outside the literal subset
//! (type constraints, references, function calls) are kept as opaque
//! `"${...}"` strings instead of being evaluated. Heredocs decode to their
//! body text.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Deepest block/object/list nesting accepted before decoding gives up.
const MAX_NESTING_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
/// Decoding failure with the 1-based source line it was detected on.
pub struct HclReadError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number(String),
    Punct(char),
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
    line: usize,
}

/// Decodes an HCL body (a sequence of attributes and blocks) into a map.
pub fn decode_hcl_body(source: &str) -> Result<Map<String, Value>, HclReadError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        position: 0,
        nesting: 0,
    };
    let body = parser.parse_body(false)?;
    let token = parser.peek();
    if token.kind != TokenKind::Eof {
        return Err(parser.error_at(token, "unexpected trailing content"));
    }
    Ok(body)
}

fn tokenize(source: &str) -> Result<Vec<Token>, HclReadError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut index = 0usize;
    let mut line = 1usize;

    while index < bytes.len() {
        let byte = bytes[index];
        match byte {
            b'\n' => {
                tokens.push(Token {
                    kind: TokenKind::Newline,
                    start: index,
                    end: index + 1,
                    line,
                });
                line += 1;
                index += 1;
            }
            b' ' | b'\t' | b'\r' => index += 1,
            b'#' => index = skip_line_comment(bytes, index),
            b'/' if bytes.get(index + 1) == Some(&b'/') => index = skip_line_comment(bytes, index),
            b'/' if bytes.get(index + 1) == Some(&b'*') => {
                let close = source[index + 2..].find("*/").ok_or_else(|| HclReadError {
                    line,
                    message: "unterminated block comment".to_string(),
                })?;
                let end = index + 2 + close + 2;
                line += source[index..end].matches('\n').count();
                index = end;
            }
            b'"' => {
                let (text, end) = read_string(source, index, line)?;
                tokens.push(Token {
                    kind: TokenKind::Str(text),
                    start: index,
                    end,
                    line,
                });
                index = end;
            }
            b'0'..=b'9' => {
                let end = scan_number(bytes, index);
                tokens.push(Token {
                    kind: TokenKind::Number(source[index..end].to_string()),
                    start: index,
                    end,
                    line,
                });
                index = end;
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let mut end = index + 1;
                while end < bytes.len()
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_' || bytes[end] == b'-')
                {
                    end += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(source[index..end].to_string()),
                    start: index,
                    end,
                    line,
                });
                index = end;
            }
            _ => {
                let ch = source[index..].chars().next().unwrap_or('\u{fffd}');
                if ch == '<' {
                    if let Some((text, end)) = read_heredoc(source, index, line)? {
                        tokens.push(Token {
                            kind: TokenKind::Str(text),
                            start: index,
                            end,
                            line,
                        });
                        line += source[index..end].matches('\n').count();
                        index = end;
                        continue;
                    }
                }
                let width = ch.len_utf8();
                tokens.push(Token {
                    kind: TokenKind::Punct(ch),
                    start: index,
                    end: index + width,
                    line,
                });
                index += width;
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        start: source.len(),
        end: source.len(),
        line,
    });
    Ok(tokens)
}

fn skip_line_comment(bytes: &[u8], mut index: usize) -> usize {
    while index < bytes.len() && bytes[index] != b'\n' {
        index += 1;
    }
    index
}

fn scan_number(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exponent = end + 1;
        if exponent < bytes.len() && (bytes[exponent] == b'+' || bytes[exponent] == b'-') {
            exponent += 1;
        }
        if exponent < bytes.len() && bytes[exponent].is_ascii_digit() {
            end = exponent;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }
    end
}

/// Reads a quoted string starting at `start` (the opening quote). Returns the
/// decoded text and the byte offset just past the closing quote.
fn read_string(source: &str, start: usize, line: usize) -> Result<(String, usize), HclReadError> {
    let error = |message: &str| HclReadError {
        line,
        message: message.to_string(),
    };
    let mut text = String::new();
    let mut chars = source[start + 1..].char_indices().peekable();
    while let Some((offset, ch)) = chars.next() {
        match ch {
            '"' => return Ok((text, start + 1 + offset + 1)),
            '\n' => return Err(error("unterminated string literal")),
            '\\' => {
                let Some((_, escape)) = chars.next() else {
                    return Err(error("unterminated escape sequence"));
                };
                match escape {
                    'n' => text.push('\n'),
                    'r' => text.push('\r'),
                    't' => text.push('\t'),
                    'b' => text.push('\u{8}'),
                    'f' => text.push('\u{c}'),
                    '"' => text.push('"'),
                    '\\' => text.push('\\'),
                    '/' => text.push('/'),
                    'u' | 'U' => {
                        let width = if escape == 'u' { 4 } else { 8 };
                        let mut digits = String::with_capacity(width);
                        for _ in 0..width {
                            match chars.next() {
                                Some((_, digit)) if digit.is_ascii_hexdigit() => digits.push(digit),
                                _ => return Err(error("invalid unicode escape")),
                            }
                        }
                        let code = u32::from_str_radix(&digits, 16)
                            .map_err(|_| error("invalid unicode escape"))?;
                        let decoded = decode_code_point(code, &mut chars)
                            .ok_or_else(|| error("invalid unicode scalar in escape"))?;
                        text.push(decoded);
                    }
                    other => {
                        return Err(HclReadError {
                            line,
                            message: format!("unsupported escape sequence '\\{other}'"),
                        })
                    }
                }
            }
            other => text.push(other),
        }
    }
    Err(error("unterminated string literal"))
}

/// Reads a `<<EOT` or `<<-EOT` heredoc whose opener starts at `start`.
/// Returns the body text and the offset just past the closing delimiter, or
/// `None` when the text there is not a heredoc opener.
fn read_heredoc(source: &str, start: usize, line: usize) -> Result<Option<(String, usize)>, HclReadError> {
    let Some(rest) = source[start..].strip_prefix("<<") else {
        return Ok(None);
    };
    let (indented, rest) = match rest.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, rest),
    };
    let delimiter_len = rest
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .unwrap_or(rest.len());
    let delimiter = &rest[..delimiter_len];
    let after = rest[delimiter_len..].trim_start_matches([' ', '\t', '\r']);
    if delimiter.is_empty() || !after.starts_with('\n') {
        return Ok(None);
    }

    let mut cursor = source.len() - after.len() + 1;
    let mut lines = Vec::new();
    while cursor < source.len() {
        let line_end = source[cursor..]
            .find('\n')
            .map_or(source.len(), |offset| cursor + offset);
        let text = &source[cursor..line_end];
        if text.trim() == delimiter {
            return Ok(Some((heredoc_text(&lines, indented), line_end)));
        }
        lines.push(text.strip_suffix('\r').unwrap_or(text));
        cursor = line_end + 1;
    }
    Err(HclReadError {
        line,
        message: format!("unterminated heredoc '{delimiter}'"),
    })
}

/// Joins heredoc lines. The indented form drops the smallest leading
/// whitespace shared by its non-blank lines.
fn heredoc_text(lines: &[&str], indented: bool) -> String {
    let strip = if indented {
        lines
            .iter()
            .filter(|text| !text.trim().is_empty())
            .map(|text| text.len() - text.trim_start_matches([' ', '\t']).len())
            .min()
            .unwrap_or(0)
    } else {
        0
    };
    let mut body = String::new();
    for text in lines {
        body.push_str(text.get(strip..).unwrap_or(""));
        body.push('\n');
    }
    body
}

fn decode_code_point(
    code: u32,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> Option<char> {
    if (0xD800..0xDC00).contains(&code) {
        // JSON-style surrogate pair.
        let mut lookahead = chars.clone();
        if lookahead.next()?.1 != '\\' || lookahead.next()?.1 != 'u' {
            return None;
        }
        let mut digits = String::with_capacity(4);
        for _ in 0..4 {
            digits.push(lookahead.next()?.1);
        }
        let low = u32::from_str_radix(&digits, 16).ok()?;
        if !(0xDC00..0xE000).contains(&low) {
            return None;
        }
        *chars = lookahead;
        return char::from_u32(0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00));
    }
    char::from_u32(code)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    position: usize,
    nesting: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: &str) -> HclReadError {
        let found = &self.source[token.start..token.end];
        let found = if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else if token.kind == TokenKind::Newline {
            "end of line".to_string()
        } else {
            format!("'{found}'")
        };
        HclReadError {
            line: token.line,
            message: format!("{message} (found {found})"),
        }
    }

    fn enter_nested(&mut self, token: &Token) -> Result<(), HclReadError> {
        if self.nesting >= MAX_NESTING_DEPTH {
            return Err(HclReadError {
                line: token.line,
                message: format!("nesting deeper than {MAX_NESTING_DEPTH} levels"),
            });
        }
        self.nesting += 1;
        Ok(())
    }

    fn skip_newlines(&mut self) {
        while *self.peek_kind() == TokenKind::Newline {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Punct(',')) {
            self.advance();
        }
    }

    fn parse_body(&mut self, in_block: bool) -> Result<Map<String, Value>, HclReadError> {
        let mut body = Map::new();
        loop {
            self.skip_newlines();
            match self.peek_kind() {
                TokenKind::Eof => {
                    if in_block {
                        let token = self.peek().clone();
                        return Err(self.error_at(&token, "unterminated block"));
                    }
                    return Ok(body);
                }
                TokenKind::Punct('}') if in_block => return Ok(body),
                _ => {}
            }

            let key_token = self.advance();
            let key = match key_token.kind {
                TokenKind::Ident(ref name) => name.clone(),
                TokenKind::Str(ref name) => name.clone(),
                _ => return Err(self.error_at(&key_token, "expected attribute or block name")),
            };

            match self.peek_kind().clone() {
                TokenKind::Punct('=') | TokenKind::Punct(':') => {
                    self.advance();
                    let value = self.parse_expression()?;
                    let after = self.peek().clone();
                    match after.kind {
                        TokenKind::Newline | TokenKind::Eof => {}
                        TokenKind::Punct('}') if in_block => {}
                        _ => return Err(self.error_at(&after, "expected end of attribute")),
                    }
                    body.insert(key, value);
                }
                TokenKind::Ident(_) | TokenKind::Str(_) | TokenKind::Punct('{') => {
                    let mut labels = Vec::new();
                    loop {
                        let token = self.advance();
                        match &token.kind {
                            TokenKind::Ident(label) | TokenKind::Str(label) => {
                                labels.push(label.clone())
                            }
                            TokenKind::Punct('{') => break,
                            _ => return Err(self.error_at(&token, "expected block label or '{'")),
                        }
                    }
                    self.enter_nested(&key_token)?;
                    let nested_body = self.parse_body(true);
                    self.nesting -= 1;
                    let mut nested = Value::Object(nested_body?);
                    self.advance();
                    for label in labels.into_iter().rev() {
                        let mut wrapper = Map::new();
                        wrapper.insert(label, nested);
                        nested = Value::Object(wrapper);
                    }
                    match body
                        .entry(key)
                        .or_insert_with(|| Value::Array(Vec::new()))
                    {
                        Value::Array(blocks) => blocks.push(nested),
                        slot => *slot = Value::Array(vec![nested]),
                    }
                }
                _ => {
                    let token = self.peek().clone();
                    return Err(self.error_at(&token, "expected '=' or block body"));
                }
            }
        }
    }

    fn parse_expression(&mut self) -> Result<Value, HclReadError> {
        let start = self.position;
        let literal = self.parse_literal()?;
        if let Some(value) = literal {
            if self.at_expression_end() {
                return Ok(value);
            }
        }
        self.position = start;
        self.parse_opaque()
    }

    fn at_expression_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Punct(',')
                | TokenKind::Punct('}')
                | TokenKind::Punct(']')
                | TokenKind::Punct(')')
        )
    }

    /// Parses a literal value, returning `None` when the upcoming tokens are not
    /// part of the literal subset.
    fn parse_literal(&mut self) -> Result<Option<Value>, HclReadError> {
        let token = self.peek().clone();
        let value = match &token.kind {
            TokenKind::Str(text) => {
                self.advance();
                Value::String(text.clone())
            }
            TokenKind::Number(raw) => {
                self.advance();
                parse_number(raw, false).ok_or_else(|| self.error_at(&token, "invalid number"))?
            }
            TokenKind::Punct('-') => {
                let next = self.tokens.get(self.position + 1).cloned();
                match next {
                    Some(Token {
                        kind: TokenKind::Number(raw),
                        start,
                        ..
                    }) if start == token.end => {
                        self.advance();
                        self.advance();
                        parse_number(&raw, true)
                            .ok_or_else(|| self.error_at(&token, "invalid number"))?
                    }
                    _ => return Ok(None),
                }
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => {
                    self.advance();
                    Value::Bool(true)
                }
                "false" => {
                    self.advance();
                    Value::Bool(false)
                }
                "null" => {
                    self.advance();
                    Value::Null
                }
                _ => return Ok(None),
            },
            TokenKind::Punct('{') => {
                self.advance();
                self.enter_nested(&token)?;
                let items = self.parse_object_items();
                self.nesting -= 1;
                match items? {
                    Some(map) => Value::Object(map),
                    None => return Ok(None),
                }
            }
            TokenKind::Punct('[') => {
                self.advance();
                self.enter_nested(&token)?;
                let items = self.parse_tuple_items();
                self.nesting -= 1;
                match items? {
                    Some(items) => Value::Array(items),
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn parse_object_items(&mut self) -> Result<Option<Map<String, Value>>, HclReadError> {
        let mut map = Map::new();
        loop {
            self.skip_separators();
            let token = self.advance();
            let key = match &token.kind {
                TokenKind::Punct('}') => return Ok(Some(map)),
                TokenKind::Ident(name) | TokenKind::Str(name) => name.clone(),
                TokenKind::Eof => return Err(self.error_at(&token, "unterminated object")),
                _ => return Ok(None),
            };
            if !matches!(self.peek_kind(), TokenKind::Punct('=') | TokenKind::Punct(':')) {
                return Ok(None);
            }
            self.advance();
            let value = self.parse_expression()?;
            map.insert(key, value);
        }
    }

    fn parse_tuple_items(&mut self) -> Result<Option<Vec<Value>>, HclReadError> {
        let mut items = Vec::new();
        loop {
            self.skip_separators();
            match self.peek_kind() {
                TokenKind::Punct(']') => {
                    self.advance();
                    return Ok(Some(items));
                }
                TokenKind::Eof => {
                    let token = self.peek().clone();
                    return Err(self.error_at(&token, "unterminated list"));
                }
                TokenKind::Ident(name) if name == "for" => return Ok(None),
                _ => {}
            }
            items.push(self.parse_expression()?);
        }
    }

    /// Consumes an expression the literal subset does not cover and keeps its
    /// source text.
    fn parse_opaque(&mut self) -> Result<Value, HclReadError> {
        let first = self.peek().clone();
        let mut depth = 0usize;
        let mut last_end = first.start;
        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Eof => {
                    if depth > 0 {
                        return Err(self.error_at(&token, "unterminated expression"));
                    }
                    break;
                }
                TokenKind::Newline if depth == 0 => break,
                TokenKind::Punct(',') | TokenKind::Punct('}') | TokenKind::Punct(']')
                | TokenKind::Punct(')')
                    if depth == 0 =>
                {
                    break
                }
                TokenKind::Punct('(') | TokenKind::Punct('[') | TokenKind::Punct('{') => {
                    depth += 1
                }
                TokenKind::Punct(')') | TokenKind::Punct(']') | TokenKind::Punct('}') => {
                    depth -= 1
                }
                _ => {}
            }
            last_end = token.end;
            self.advance();
        }
        if last_end <= first.start {
            return Err(self.error_at(&first, "expected expression"));
        }
        let raw = self.source[first.start..last_end].trim();
        Ok(Value::String(format!("${{{raw}}}")))
    }
}

fn parse_number(raw: &str, negative: bool) -> Option<Value> {
    let is_fractional = raw.contains(['.', 'e', 'E']);
    if !is_fractional {
        if negative {
            if let Ok(value) = format!("-{raw}").parse::<i64>() {
                return Some(Value::Number(Number::from(value)));
            }
        } else if let Ok(value) = raw.parse::<u64>() {
            return Some(Value::Number(Number::from(value)));
        }
    }
    let value = raw.parse::<f64>().ok()?;
    let value = if negative { -value } else { value };
    Number::from_f64(value).map(Value::Number)
}
