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

//! Utilities for working with individual RFC 5322 headers.
//!
//! Only as much of the grammar is understood as the analyser and the thread
//! matcher need: header blocks with folding, the media type and boundary of
//! `Content-Type`, address lists and bracketed message ids.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use super::analysis::MimeError;

/// Header values keyed by canonical name, in the order they occurred.
pub type Headers = BTreeMap<String, Vec<String>>;

lazy_static! {
    static ref RX_BOUNDARY: Regex =
        Regex::new(r#"(?i);\s*boundary\s*=\s*(?:"([^"]*)"|([^\s;"]+))"#)
            .unwrap();
}

/// Canonicalises a header name: the first letter and every letter after a
/// hyphen are upper case, the rest lower case.
///
/// So `message-id` and `MESSAGE-ID` both become `Message-Id`.
pub fn canonical_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let mapped = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = '-' == c;
            mapped
        })
        .collect()
}

/// Parses a header block, which must not include the blank line ending it.
///
/// Continuation lines are joined to the previous line with a single space.
/// Bytes which are not valid UTF-8 are replaced.
pub fn parse_block(block: &[u8]) -> Result<Headers, MimeError> {
    let mut headers = Headers::new();
    let mut current: Option<(String, String)> = None;

    for line in block.split(|&b| b'\n' == b) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let line = String::from_utf8_lossy(line);
        if line.starts_with(' ') || line.starts_with('\t') {
            match current {
                Some((_, ref mut value)) => {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(line.trim());
                },
                None => return Err(MimeError::MalformedHeader),
            }
            continue;
        }

        let (name, value) =
            line.split_once(':').ok_or(MimeError::MalformedHeader)?;
        let name = name.trim_end();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(MimeError::MalformedHeader);
        }

        if let Some((name, value)) = current.take() {
            headers.entry(name).or_default().push(value);
        }
        current = Some((canonical_name(name), value.trim().to_owned()));
    }

    if let Some((name, value)) = current {
        headers.entry(name).or_default().push(value);
    }

    Ok(headers)
}

/// The first value of header `name`, which need not be canonical.
pub fn get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .get(&canonical_name(name))
        .and_then(|values| values.first())
        .map(String::as_str)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentType {
    /// The lower-case `type/subtype`.
    pub media_type: String,
    pub boundary: Option<String>,
}

impl ContentType {
    pub fn is_multipart(&self) -> bool {
        self.media_type.starts_with("multipart/")
    }
}

/// Parses a `Content-Type` value.
///
/// Returns `None` if the value does not even have a `type/subtype` shape.
pub fn parse_content_type(value: &str) -> Option<ContentType> {
    let media_type = value.split(';').next()?.trim().to_ascii_lowercase();
    let (ty, subtype) = media_type.split_once('/')?;
    if ty.is_empty()
        || subtype.is_empty()
        || media_type.contains(char::is_whitespace)
    {
        return None;
    }

    let boundary = RX_BOUNDARY
        .captures(value)
        .and_then(|cap| cap.get(1).or_else(|| cap.get(2)))
        .map(|m| m.as_str().to_owned())
        .filter(|b| !b.is_empty());

    Some(ContentType {
        media_type,
        boundary,
    })
}

/// Returns the text inside the first `<...>` pair of `value`, or `value`
/// itself if there is none.
pub fn first_bracketed(value: &str) -> &str {
    value
        .find('<')
        .and_then(|start| {
            let rest = &value[start + 1..];
            rest.find('>').map(|end| &rest[..end])
        })
        .unwrap_or(value)
}

/// Extracts the bare addresses from an address list such as the value of
/// `To` or `Cc`.
///
/// Display names, comments and group names are dropped. Anything which does
/// not contain an `@` is not an address and is skipped.
pub fn address_list(value: &str) -> Vec<String> {
    let mut addresses = Vec::new();
    let mut token = String::new();
    let mut angle = None::<String>;
    let mut quoted = false;
    let mut escaped = false;
    let mut comment_depth = 0u32;

    let mut finish = |token: &mut String, angle: &mut Option<String>| {
        let candidate = angle.take().unwrap_or_else(|| token.clone());
        let candidate = candidate.trim();
        if candidate.contains('@') {
            addresses.push(candidate.to_owned());
        }
        token.clear();
    };

    for c in value.chars() {
        if escaped {
            escaped = false;
            continue;
        }

        match c {
            '\\' if quoted || comment_depth > 0 => escaped = true,
            '"' if 0 == comment_depth && angle.is_none() => {
                quoted = !quoted
            },
            _ if quoted => (),
            '(' if angle.is_none() => comment_depth += 1,
            ')' if comment_depth > 0 => comment_depth -= 1,
            _ if comment_depth > 0 => (),
            '<' if angle.is_none() => angle = Some(String::new()),
            // The bracketed part wins; the rest of the mailbox is display
            // text.
            '>' if angle.is_some() => finish(&mut token, &mut angle),
            ':' if angle.is_none() => token.clear(),
            ',' | ';' if angle.is_none() => finish(&mut token, &mut None),
            _ => match angle {
                Some(ref mut a) => a.push(c),
                None => token.push(c),
            },
        }
    }
    finish(&mut token, &mut angle);

    addresses
}
