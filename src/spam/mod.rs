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

//! A client for the SpamAssassin daemon protocol (`spamc`/`spamd`).
//!
//! Each call opens a fresh TCP connection, sends one request and reads the
//! reply until the daemon hangs up. The whole exchange is bounded by the
//! configured timeout.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::support::sysexits::{Sysexit, EX_OK, EX_UNAVAILABLE};
use crate::support::system_config::SpamdConfig;

pub const PROTOCOL_VERSION: &str = "1.5";

/// Replies larger than this are cut off. `PROCESS` echoes the whole message
/// back, so this has to be comfortably above the largest message accepted.
const MAX_REPLY: u64 = 64 * 1024 * 1024;

const TABLE_MARK: &str = "----";

lazy_static! {
    static ref RX_STATUS: Regex =
        Regex::new(r"(?i)SPAMD/([0-9.]+)\s([0-9]+)\s([0-9A-Z_]+)").unwrap();
    static ref RX_VERDICT: Regex = Regex::new(
        r"(?i)Spam:\s(True|False|Yes|No)\s;\s(-?[0-9.]+)\s/\s(-?[0-9.]+)"
    )
    .unwrap();
}

#[derive(Error, Debug)]
pub enum SpamError {
    #[error("Connection to spamd failed: {0}")]
    Connect(io::Error),
    #[error("I/O error talking to spamd: {0}")]
    Io(#[from] io::Error),
    #[error("spamd did not answer in time")]
    Timeout,
    #[error("Unrecognised spamd reply: {0}")]
    Unrecognized(String),
    #[error("spamd returned {code}: {description}")]
    Daemon {
        code: i32,
        description: &'static str,
    },
    #[error("TELL commands are not enabled, set the --allow-tell switch")]
    TellDisabled,
    #[error("Unknown learn type: {0}")]
    UnknownLearnType(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Ping,
    Check,
    Symbols,
    Report,
    ReportIfSpam,
    /// Sent as `REPORT`, but rules scoring zero are dropped from the table.
    ReportIgnoreWarning,
    Process,
    Headers,
    Skip,
    Tell,
}

impl Command {
    fn verb(self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Check => "CHECK",
            Command::Symbols => "SYMBOLS",
            Command::Report | Command::ReportIgnoreWarning => "REPORT",
            Command::ReportIfSpam => "REPORT_IFSPAM",
            Command::Process => "PROCESS",
            Command::Headers => "HEADERS",
            Command::Skip => "SKIP",
            Command::Tell => "TELL",
        }
    }

    fn is_report(self) -> bool {
        matches!(
            self,
            Command::Report
                | Command::ReportIfSpam
                | Command::ReportIgnoreWarning
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// What a `TELL` should teach the daemon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LearnType {
    Spam,
    Ham,
    Forget,
}

impl FromStr for LearnType {
    type Err = SpamError;

    fn from_str(s: &str) -> Result<Self, SpamError> {
        match &*s.to_ascii_uppercase() {
            "SPAM" => Ok(LearnType::Spam),
            "HAM" | "NOTSPAM" | "NOT_SPAM" => Ok(LearnType::Ham),
            "FORGET" => Ok(LearnType::Forget),
            _ => Err(SpamError::UnknownLearnType(s.to_owned())),
        }
    }
}

/// The `Spam:` line of a reply.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Verdict {
    pub is_spam: bool,
    pub score: f64,
    pub threshold: f64,
}

/// One row of a report table.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRule {
    pub score: f64,
    pub symbol: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpamReply {
    pub code: i32,
    pub message: String,
    pub verdict: Option<Verdict>,
    /// Rule names, for `SYMBOLS`.
    pub symbols: Vec<String>,
    /// The rule table, for the `REPORT` family.
    pub report: Vec<ReportRule>,
    /// The rewritten message, for `PROCESS` and `HEADERS`.
    pub body: Option<String>,
    pub did_set: bool,
    pub did_remove: bool,
}

impl SpamReply {
    pub fn is_spam(&self) -> bool {
        self.verdict.map_or(false, |v| v.is_spam)
    }
}

pub struct SpamClient {
    address: String,
    timeout: Duration,
    user: Option<String>,
}

impl SpamClient {
    pub fn new(config: &SpamdConfig) -> Self {
        Self {
            address: config.address.clone(),
            timeout: config.timeout(),
            user: config.user.clone(),
        }
    }

    pub async fn ping(&self) -> Result<SpamReply, SpamError> {
        self.call(Command::Ping, None, &[]).await
    }

    pub async fn check(&self, message: &[u8]) -> Result<SpamReply, SpamError> {
        self.call(Command::Check, Some(message), &[]).await
    }

    pub async fn symbols(
        &self,
        message: &[u8],
    ) -> Result<SpamReply, SpamError> {
        self.call(Command::Symbols, Some(message), &[]).await
    }

    pub async fn report(&self, message: &[u8]) -> Result<SpamReply, SpamError> {
        self.call(Command::Report, Some(message), &[]).await
    }

    pub async fn report_if_spam(
        &self,
        message: &[u8],
    ) -> Result<SpamReply, SpamError> {
        self.call(Command::ReportIfSpam, Some(message), &[]).await
    }

    pub async fn report_ignore_warning(
        &self,
        message: &[u8],
    ) -> Result<SpamReply, SpamError> {
        self.call(Command::ReportIgnoreWarning, Some(message), &[])
            .await
    }

    pub async fn process(
        &self,
        message: &[u8],
    ) -> Result<SpamReply, SpamError> {
        self.call(Command::Process, Some(message), &[]).await
    }

    pub async fn headers(
        &self,
        message: &[u8],
    ) -> Result<SpamReply, SpamError> {
        self.call(Command::Headers, Some(message), &[]).await
    }

    pub async fn skip(&self) -> Result<SpamReply, SpamError> {
        self.call(Command::Skip, None, &[]).await
    }

    /// Trains the local database.
    pub async fn learn(
        &self,
        learn_type: LearnType,
        message: &[u8],
    ) -> Result<SpamReply, SpamError> {
        let headers: &[(&str, &str)] = match learn_type {
            LearnType::Spam => &[("Message-class", "spam"), ("Set", "local")],
            LearnType::Ham => &[("Message-class", "ham"), ("Set", "local")],
            LearnType::Forget => &[("Remove", "local")],
        };
        self.call(Command::Tell, Some(message), headers).await
    }

    /// Reports `message` as spam to both the local and remote databases.
    pub async fn report_spam(
        &self,
        message: &[u8],
    ) -> Result<SpamReply, SpamError> {
        self.call(
            Command::Tell,
            Some(message),
            &[("Message-class", "spam"), ("Set", "local,remote")],
        )
        .await
    }

    /// Reports `message` as a false positive.
    pub async fn revoke_spam(
        &self,
        message: &[u8],
    ) -> Result<SpamReply, SpamError> {
        self.call(
            Command::Tell,
            Some(message),
            &[("Message-class", "ham"), ("Set", "local,remote")],
        )
        .await
    }

    async fn call(
        &self,
        command: Command,
        message: Option<&[u8]>,
        headers: &[(&str, &str)],
    ) -> Result<SpamReply, SpamError> {
        let request = self.request(command, message, headers);
        let raw = tokio::time::timeout(self.timeout, self.exchange(&request))
            .await
            .map_err(|_| SpamError::Timeout)??;
        parse_reply(command, &String::from_utf8_lossy(&raw))
    }

    fn request(
        &self,
        command: Command,
        message: Option<&[u8]>,
        headers: &[(&str, &str)],
    ) -> Vec<u8> {
        let mut request =
            format!("{} SPAMC/{}\r\n", command.verb(), PROTOCOL_VERSION)
                .into_bytes();
        let Some(message) = message else {
            request.extend_from_slice(b"\r\n");
            return request;
        };

        // The length counts the CRLF which follows the message.
        request.extend_from_slice(
            format!("Content-length: {}\r\n", message.len() + 2).as_bytes(),
        );
        if let Some(ref user) = self.user {
            request.extend_from_slice(format!("User: {user}\r\n").as_bytes());
        }
        for (name, value) in headers {
            request.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        request.extend_from_slice(b"\r\n");
        request.extend_from_slice(message);
        request.extend_from_slice(b"\r\n\r\n");
        request
    }

    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, SpamError> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(SpamError::Connect)?;
        stream.write_all(request).await?;
        stream.flush().await?;

        let mut reply = Vec::new();
        (&mut stream).take(MAX_REPLY).read_to_end(&mut reply).await?;
        Ok(reply)
    }
}

/// Parses a complete reply to `command`.
pub fn parse_reply(
    command: Command,
    raw: &str,
) -> Result<SpamReply, SpamError> {
    let (status, rest) = raw.split_once('\n').unwrap_or((raw, ""));
    let status = status.trim_end_matches('\r');

    let Some(captures) = RX_STATUS.captures(status) else {
        if Command::Skip == command {
            return Ok(SpamReply {
                code: EX_OK.0,
                message: "SKIPPED".to_owned(),
                ..SpamReply::default()
            });
        }
        return Err(SpamError::Unrecognized(status.to_owned()));
    };

    let code = captures[2]
        .parse::<i32>()
        .map_err(|_| SpamError::Unrecognized(status.to_owned()))?;
    if Command::Tell == command && EX_UNAVAILABLE.0 == code {
        return Err(SpamError::TellDisabled);
    }
    if let Some(description) = Sysexit(code).description() {
        return Err(SpamError::Daemon { code, description });
    }

    let mut reply = SpamReply {
        code,
        message: captures[3].to_owned(),
        ..SpamReply::default()
    };

    // Headers run up to the first blank line; everything after is the body.
    let mut lines = rest.split('\n').map(|l| l.trim_end_matches('\r'));
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }

        if let Some(verdict) = RX_VERDICT.captures(line) {
            reply.verdict = Some(Verdict {
                is_spam: matches!(&verdict[1][..1], "T" | "t" | "Y" | "y"),
                score: verdict[2].parse().unwrap_or(0.0),
                threshold: verdict[3].parse().unwrap_or(0.0),
            });
        } else if line.starts_with("DidSet") {
            reply.did_set = true;
        } else if line.starts_with("DidRemove") {
            reply.did_remove = true;
        }
    }
    let body = lines.collect::<Vec<_>>();

    match command {
        Command::Symbols => {
            reply.symbols = body
                .iter()
                .find(|l| !l.is_empty())
                .map(|l| {
                    l.split(',')
                        .map(|s| s.trim().to_owned())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();
        },
        _ if command.is_report() => {
            reply.report = parse_report_table(&body);
            if Command::ReportIgnoreWarning == command {
                reply.report.retain(|rule| 0.0 != rule.score);
            }
        },
        Command::Process | Command::Headers => {
            let mut text = body.join("\r\n");
            if !text.is_empty() && !text.ends_with("\r\n") {
                text.push_str("\r\n");
            }
            reply.body = Some(text);
        },
        _ => (),
    }

    Ok(reply)
}

/// Extracts the rows following the `----` rule of a report. A row whose
/// first column is not a number continues the previous row's description.
fn parse_report_table(body: &[&str]) -> Vec<ReportRule> {
    let mut rules = Vec::<ReportRule>::new();
    let Some(start) = body.iter().position(|l| l.starts_with(TABLE_MARK))
    else {
        return rules;
    };

    for line in &body[start + 1..] {
        if line.trim().is_empty() {
            break;
        }

        let mut columns = line.split_whitespace();
        let first = columns.next().unwrap_or_default();
        match first.parse::<f64>() {
            Ok(score) => {
                let symbol = columns.next().unwrap_or_default().to_owned();
                let description = line
                    .trim_start()
                    .get(first.len()..)
                    .map(str::trim_start)
                    .and_then(|rest| rest.get(symbol.len()..))
                    .unwrap_or_default()
                    .trim()
                    .to_owned();
                rules.push(ReportRule {
                    score,
                    symbol,
                    description,
                });
            },
            Err(_) => {
                if let Some(last) = rules.last_mut() {
                    last.description.push(' ');
                    last.description.push_str(line.trim());
                }
            },
        }
    }

    rules
}
