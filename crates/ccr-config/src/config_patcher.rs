//! Textual surgery on a single brace-delimited block.
//!
//! The block is found by marker text (whitespace-insensitive) and closed by a
//! brace-depth scan. Both the marker search and the scan ignore text inside
//! string literals, comments and heredocs.
//! Everything outside `marker .. matching }` is copied through byte for byte.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use ccr_core::write_text_atomic;

use crate::hcl_encoder::encode_hcl_body;

#[derive(Debug, Error)]
/// Enumerates failures while locating or rewriting a block.
pub enum PatchError {
    #[error("block marker '{marker}' not found")]
    BlockNotFound { marker: String },
    #[error("block opened by '{marker}' has no matching closing brace")]
    UnterminatedBlock { marker: String },
    #[error("block marker '{marker}' must end with an opening brace")]
    InvalidMarker { marker: String },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Describes which block to rewrite.
///
/// `anchor` optionally names an enclosing block that must contain the marker,
/// `depth` is the indentation level of the body entries.
pub struct BlockTarget<'a> {
    pub anchor: Option<&'a str>,
    pub marker: &'a str,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Byte offsets of a located block within its document.
pub struct BlockSpan {
    /// First byte of the marker text.
    pub start: usize,
    /// Offset of the marker's opening brace.
    pub open: usize,
    /// Offset of the matching closing brace.
    pub close: usize,
}

impl BlockSpan {
    /// Offset just past the closing brace.
    pub fn end(&self) -> usize {
        self.close + 1
    }

    pub fn marker_text<'d>(&self, document: &'d str) -> &'d str {
        &document[self.start..=self.open]
    }
}

/// Builds a regex that matches `marker` with any amount of whitespace between
/// its words and punctuation.
fn marker_regex(marker: &str) -> Result<Regex, PatchError> {
    let mut pieces: Vec<String> = Vec::new();
    let mut word = String::new();
    for ch in marker.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == '-' {
            word.push(ch);
            continue;
        }
        if !word.is_empty() {
            pieces.push(regex::escape(&word));
            word.clear();
        }
        if !ch.is_whitespace() {
            pieces.push(regex::escape(&ch.to_string()));
        }
    }
    if !word.is_empty() {
        pieces.push(regex::escape(&word));
    }
    if pieces.last().map(String::as_str) != Some(r"\{") {
        return Err(PatchError::InvalidMarker {
            marker: marker.to_string(),
        });
    }
    let boundary = if marker
        .trim_start()
        .starts_with(|ch: char| ch.is_alphanumeric() || ch == '_')
    {
        r"\b"
    } else {
        ""
    };
    Regex::new(&format!("{boundary}{}", pieces.join(r"\s*"))).map_err(|_| PatchError::InvalidMarker {
        marker: marker.to_string(),
    })
}

/// Returns the offset of the last byte of a heredoc whose `<<` starts at
/// `start`, or `None` when the text there does not open a heredoc.
fn heredoc_end(document: &str, start: usize) -> Option<usize> {
    let rest = document.get(start..)?.strip_prefix("<<")?;
    let rest = rest.strip_prefix('-').unwrap_or(rest);
    let delimiter_len = rest
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .unwrap_or(rest.len());
    let delimiter = &rest[..delimiter_len];
    if delimiter.is_empty() || !rest[delimiter_len..].trim_start_matches([' ', '\t', '\r']).starts_with('\n') {
        return None;
    }
    let mut line_start = start + document[start..].find('\n')? + 1;
    loop {
        let line_end = document[line_start..]
            .find('\n')
            .map_or(document.len(), |offset| line_start + offset);
        if document[line_start..line_end].trim() == delimiter {
            return Some(line_end - 1);
        }
        if line_end >= document.len() {
            return None;
        }
        line_start = line_end + 1;
    }
}

/// Walks `document` from `start` and hands every byte outside string
/// literals, comments and heredoc bodies to `visit`, stopping at the first
/// `Some`. Returns `None` when the walk reaches the end, including when a
/// comment or heredoc is left open.
fn scan_code<T>(document: &str, start: usize, mut visit: impl FnMut(usize, u8) -> Option<T>) -> Option<T> {
    let bytes = document.as_bytes();
    let mut index = start;
    while index < bytes.len() {
        match bytes[index] {
            b'"' => {
                index += 1;
                while index < bytes.len() && bytes[index] != b'"' {
                    if bytes[index] == b'\\' {
                        index += 1;
                    }
                    index += 1;
                }
            }
            b'#' => {
                while index < bytes.len() && bytes[index] != b'\n' {
                    index += 1;
                }
            }
            b'/' if bytes.get(index + 1) == Some(&b'/') => {
                while index < bytes.len() && bytes[index] != b'\n' {
                    index += 1;
                }
            }
            b'/' if bytes.get(index + 1) == Some(&b'*') => {
                let close = document[index + 2..].find("*/")?;
                index += 2 + close + 1;
            }
            b'<' if bytes.get(index + 1) == Some(&b'<') => match heredoc_end(document, index) {
                Some(end) => index = end,
                None => {
                    if let Some(found) = visit(index, b'<') {
                        return Some(found);
                    }
                }
            },
            byte => {
                if let Some(found) = visit(index, byte) {
                    return Some(found);
                }
            }
        }
        index += 1;
    }
    None
}

/// Returns the offset of the `}` matching the `{` at `open`.
fn matching_close_brace(document: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    scan_code(document, open, |index, byte| {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
        None
    })
}

/// Marks the offsets in `from..to` that are code at brace depth zero relative
/// to `from`.
fn top_level_code(document: &str, from: usize, to: usize) -> Vec<bool> {
    let mut mask = vec![false; to.saturating_sub(from)];
    let mut depth = 0usize;
    scan_code(document, from, |index, byte| {
        if index >= to {
            return Some(());
        }
        match byte {
            b'{' => {
                mask[index - from] = depth == 0;
                depth += 1;
            }
            b'}' => depth = depth.saturating_sub(1),
            _ => mask[index - from] = depth == 0,
        }
        None
    });
    mask
}

/// Finds the first marker that starts in code at the top level of
/// `search_from..search_to`. Matches inside comments, strings, heredocs or
/// nested blocks are skipped.
fn find_block_from(
    document: &str,
    marker: &str,
    search_from: usize,
    search_to: usize,
) -> Result<BlockSpan, PatchError> {
    let pattern = marker_regex(marker)?;
    let mask = top_level_code(document, search_from, search_to);
    let found = pattern
        .find_iter(&document[..search_to])
        .filter(|found| found.start() >= search_from)
        .find(|found| mask[found.start() - search_from])
        .ok_or_else(|| PatchError::BlockNotFound {
            marker: marker.to_string(),
        })?;
    let open = found.end() - 1;
    let close = matching_close_brace(document, open).ok_or_else(|| {
        PatchError::UnterminatedBlock {
            marker: marker.to_string(),
        }
    })?;
    Ok(BlockSpan {
        start: found.start(),
        open,
        close,
    })
}

/// Locates the block named by `target` inside `document`.
pub fn locate_block(document: &str, target: &BlockTarget<'_>) -> Result<BlockSpan, PatchError> {
    let (search_from, search_to) = match target.anchor {
        Some(anchor) => {
            let scope = find_block_from(document, anchor, 0, document.len())?;
            (scope.open + 1, scope.close)
        }
        None => (0, document.len()),
    };
    find_block_from(document, target.marker, search_from, search_to)
}

/// Replaces the body of the located block with `body` encoded at
/// `target.depth`. The marker text itself is kept as written in the document.
pub fn patch_block(
    document: &str,
    target: &BlockTarget<'_>,
    body: &Map<String, Value>,
) -> Result<String, PatchError> {
    let span = locate_block(document, target)?;
    let closing_indent = "  ".repeat(target.depth.saturating_sub(1));
    let encoded = encode_hcl_body(body, target.depth);

    let mut patched = String::with_capacity(document.len() + encoded.len());
    patched.push_str(&document[..span.start]);
    patched.push_str(span.marker_text(document));
    patched.push('\n');
    patched.push_str(&encoded);
    patched.push_str(&closing_indent);
    patched.push('}');
    patched.push_str(&document[span.end()..]);
    Ok(patched)
}

/// Reads `path`, patches the target block and writes the result back
/// atomically. Returns the new document text.
pub fn patch_file(
    path: &Path,
    target: &BlockTarget<'_>,
    body: &Map<String, Value>,
) -> Result<String, PatchError> {
    let document = std::fs::read_to_string(path).map_err(|source| PatchError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let patched = patch_block(&document, target, body)?;
    write_text_atomic(path, &patched).map_err(|error| PatchError::Write {
        path: path.to_path_buf(),
        message: format!("{error:#}"),
    })?;
    Ok(patched)
}
