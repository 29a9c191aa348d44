//-
// Copyright (c) 2026, the pgpst-mailer authors
//
// This file is part of pgpst-mailer.
//
// pgpst-mailer is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// pgpst-mailer is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with pgpst-mailer. If not, see <http://www.gnu.org/licenses/>.

//! Structural analysis of raw messages.
//!
//! The analyser never copies part data. Each node records where its header
//! and body live within the top-level buffer, so a client holding the
//! decrypted message can cut any part out of it directly.

use memchr::memmem;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::header::{self, ContentType, Headers};

/// Multipart nesting beyond this is rejected rather than recursed into.
const MAX_DEPTH: u32 = 32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeError {
    #[error("Malformed header block")]
    MalformedHeader,
    #[error("Unparsable Content-Type")]
    BadContentType,
    #[error("Multipart body has no opening boundary")]
    MissingBoundary,
    #[error("Multipart nesting too deep")]
    TooDeep,
}

/// One MIME part.
///
/// All positions are absolute byte offsets into the buffer that was passed
/// to `analyze()`. Ranges are half-open, and `header_position[1]` is always
/// equal to `body_position[0]`; the blank line ending the header belongs to
/// the header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailNode {
    pub headers: Headers,
    pub base_position: usize,
    pub header_position: [usize; 2],
    pub body_position: [usize; 2],
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EmailNode>,
}

impl EmailNode {
    /// The first value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        header::get(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.header("Content-Type")
            .and_then(header::parse_content_type)
    }

    /// Whether this part is, or for multipart parts contains, OpenPGP
    /// encrypted content.
    pub fn is_encrypted(&self) -> bool {
        let Some(content_type) = self.content_type() else {
            return false;
        };

        match &content_type.media_type[..] {
            "multipart/encrypted" | "application/pgp-encrypted" => true,
            _ if content_type.is_multipart() => {
                self.children.iter().any(EmailNode::is_encrypted)
            },
            _ => false,
        }
    }
}

/// Analyses `input`, which is a complete message.
pub fn analyze(input: &[u8]) -> Result<EmailNode, MimeError> {
    analyze_at(input, 0, 0)
}

fn analyze_at(
    input: &[u8],
    base: usize,
    depth: u32,
) -> Result<EmailNode, MimeError> {
    if depth > MAX_DEPTH {
        return Err(MimeError::TooDeep);
    }

    let nl: &[u8] = match memchr::memchr(b'\n', input) {
        Some(ix) if ix > 0 && b'\r' == input[ix - 1] => b"\r\n",
        _ => b"\n",
    };
    let double_nl = [nl, nl].concat();

    // `header_end` excludes the blank line; `body_start` is just past it.
    let (header_end, body_start) = if input.starts_with(nl) {
        (0, nl.len())
    } else {
        match memmem::find(input, &double_nl) {
            Some(sep) => (sep + nl.len(), sep + double_nl.len()),
            None => (input.len(), input.len()),
        }
    };

    let mut node = EmailNode {
        headers: header::parse_block(&input[..header_end])?,
        base_position: base,
        header_position: [base, base + body_start],
        body_position: [base + body_start, base + input.len()],
        children: Vec::new(),
    };

    let content_type = match node.header("Content-Type") {
        None => return Ok(node),
        Some(value) => header::parse_content_type(value)
            .ok_or(MimeError::BadContentType)?,
    };

    let boundary = match content_type.boundary {
        Some(ref b) if content_type.is_multipart() => b,
        _ => return Ok(node),
    };

    let delimiter = [&b"--"[..], boundary.as_bytes(), nl].concat();
    let close_delimiter =
        [&b"--"[..], boundary.as_bytes(), &b"--"[..]].concat();

    let start = memmem::find(&input[body_start..], &delimiter)
        .map(|ix| ix + body_start)
        .ok_or(MimeError::MissingBoundary)?;
    let parts_start = start + delimiter.len();
    // A message truncated before the close delimiter still gets its parts.
    let parts_end = memmem::find(&input[parts_start..], &close_delimiter)
        .map_or(input.len(), |ix| ix + parts_start);

    let mut part_base = base + parts_start;
    for part in split(&input[parts_start..parts_end], &delimiter) {
        node.children.push(analyze_at(part, part_base, depth + 1)?);
        part_base += part.len() + delimiter.len();
    }

    Ok(node)
}

fn split<'a>(
    haystack: &'a [u8],
    delimiter: &'a [u8],
) -> impl Iterator<Item = &'a [u8]> + 'a {
    let mut rest = Some(haystack);
    std::iter::from_fn(move || {
        let current = rest?;
        match memmem::find(current, delimiter) {
            Some(ix) => {
                rest = Some(&current[ix + delimiter.len()..]);
                Some(&current[..ix])
            },
            None => {
                rest = None;
                Some(current)
            },
        }
    })
}
