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

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// HELO origin-host ignored...
    Helo(Result<String, ArgError>),
    /// EHLO origin-host ignored...
    Ehlo(Result<String, ArgError>),
    /// MAIL FROM:<return-path> [SIZE=sz] [BODY=encoding]
    MailFrom(Result<MailArgs, ArgError>),
    /// RCPT TO:<forward-path>
    /// The final element is a list of warnings.
    Recipient(Result<(String, Vec<String>), ArgError>),
    /// DATA
    Data,
    /// RSET
    Reset,
    /// NOOP
    Noop,
    /// QUIT
    Quit,
    /// STARTTLS
    StartTls,
    /// Anything else, including blank lines.
    Unknown,
}

/// Why the argument of a command could not be extracted.
///
/// This is carried inside the command rather than failing the parse, since
/// the server checks command ordering before it looks at arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgError {
    Missing,
    Invalid,
}

impl ArgError {
    pub fn reply_text(self) -> &'static str {
        match self {
            ArgError::Missing => "Missing parameter.",
            ArgError::Invalid => "Invalid second parameter.",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailArgs {
    /// The path exactly as sent, angle brackets included.
    pub path: String,
    /// The declared message size, if any.
    pub size: Option<u64>,
    pub warnings: Vec<String>,
}

const MAX_WARNINGS: usize = 4;

lazy_static! {
    static ref RX_MAIL_BODY_PARM: Regex =
        Regex::new("^(?i)BODY=(7BIT|8BITMIME)$").unwrap();
    static ref RX_MAIL_SIZE_PARM: Regex =
        Regex::new("^(?i)SIZE=([0-9]+)$").unwrap();
}

impl FromStr for Command {
    type Err = ();

    /// Never fails; unrecognised input becomes `Command::Unknown`.
    fn from_str(s: &str) -> Result<Self, ()> {
        let mut fields = s.split_whitespace();
        let verb = match fields.next() {
            Some(verb) => verb.to_ascii_uppercase(),
            None => return Ok(Command::Unknown),
        };

        Ok(match &verb[..] {
            "HELO" => Command::Helo(greeting_arg(fields.next())),
            "EHLO" => Command::Ehlo(greeting_arg(fields.next())),
            "MAIL" => Command::MailFrom(
                path_arg("FROM", &mut fields)
                    .map(|(path, rest)| parse_mail_params(path, rest)),
            ),
            "RCPT" => Command::Recipient(path_arg("TO", &mut fields).map(
                |(path, rest)| {
                    let mut warnings = Vec::new();
                    let rest = rest.join(" ");
                    if !rest.is_empty() {
                        warnings.push(format!(
                            "Ignoring extraneous RCPT TO parameters: {:?}",
                            truncate(&rest),
                        ));
                    }
                    (path, warnings)
                },
            )),
            "DATA" => Command::Data,
            "RSET" => Command::Reset,
            "NOOP" => Command::Noop,
            "QUIT" => Command::Quit,
            "STARTTLS" => Command::StartTls,
            _ => Command::Unknown,
        })
    }
}

fn greeting_arg(field: Option<&str>) -> Result<String, ArgError> {
    field.map(str::to_owned).ok_or(ArgError::Missing)
}

/// Splits `KEY:<path> params...` into the path and the remaining fields.
///
/// A space after the colon is tolerated, as many clients send one.
fn path_arg<'a>(
    key: &str,
    fields: &mut impl Iterator<Item = &'a str>,
) -> Result<(String, Vec<&'a str>), ArgError> {
    let first = fields.next().ok_or(ArgError::Missing)?;
    let (k, path) = first.split_once(':').ok_or(ArgError::Invalid)?;
    if !k.eq_ignore_ascii_case(key) {
        return Err(ArgError::Invalid);
    }

    let path = if path.is_empty() {
        fields.next().ok_or(ArgError::Invalid)?
    } else {
        path
    };

    Ok((path.to_owned(), fields.collect()))
}

fn parse_mail_params(path: String, params: Vec<&str>) -> MailArgs {
    let mut size = None::<u64>;
    let mut warnings = Vec::<String>::new();
    let mut add_warning = |w: String| {
        if warnings.len() < MAX_WARNINGS {
            warnings.push(w);
        }
    };

    for parm in params {
        if let Some(cap) = RX_MAIL_SIZE_PARM.captures(parm) {
            if let Some(s) =
                cap.get(1).and_then(|c| c.as_str().parse::<u64>().ok())
            {
                size = Some(s);
            } else {
                add_warning(format!(
                    "Ignoring invalid MAIL FROM parameter {:?}",
                    truncate(parm),
                ));
            }
        } else if !RX_MAIL_BODY_PARM.is_match(parm) {
            add_warning(format!(
                "Ignoring unknown MAIL FROM parameter {:?}",
                truncate(parm),
            ));
        }
    }

    MailArgs {
        path,
        size,
        warnings,
    }
}

fn truncate(s: &str) -> &str {
    &s[..s.char_indices().nth(64).map(|(ix, _)| ix).unwrap_or(s.len())]
}
