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

//! Extension points of the SMTP server.
//!
//! A connection runs three ordered chains of `MailHandler`s: one after a
//! valid `MAIL`, one after each valid `RCPT`, and one after the message data
//! has been received. Each link gets the mail context and a `Next` handle;
//! it either rejects the command by returning an `SmtpResponse`, or passes
//! control on with `next.run(cx)`. The command only takes effect if control
//! reaches the end of the chain.
//!
//! Separately, `Wrapper`s surround the whole of each connection's serve
//! loop.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use log::error;

use super::codes::SmtpResponse;
use crate::delivery::model::Recipient;
use crate::support::{error::Error, log_prefix::LogPrefix};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Smtp,
    Esmtp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Protocol::Smtp => f.write_str("SMTP"),
            Protocol::Esmtp => f.write_str("ESMTP"),
        }
    }
}

/// What is known about the connection as a whole.
#[derive(Clone)]
pub struct SessionInfo {
    /// The argument of the last HELO or EHLO. Empty before the greeting.
    pub helo: String,
    pub protocol: Protocol,
    pub peer: String,
    /// The TLS session description (`version:cipher:bits`), once TLS is up.
    pub tls: Option<String>,
    pub log_prefix: LogPrefix,
    /// Our own host name.
    pub hostname: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    /// The reverse path without angle brackets. Empty for the null path.
    pub sender: String,
    /// Forward paths in RCPT order, duplicates included.
    pub recipients: Vec<String>,
    pub data: Vec<u8>,
}

/// State of one mail transaction, from MAIL until the envelope is reset.
#[derive(Clone, Debug, Default)]
pub struct Transaction {
    pub envelope: Envelope,
    /// Recipients resolved by the recipient chain, for the delivery chain.
    pub resolved_recipients: Vec<Recipient>,
}

impl Transaction {
    pub fn new(sender: String) -> Self {
        Self {
            envelope: Envelope {
                sender,
                ..Envelope::default()
            },
            resolved_recipients: Vec::new(),
        }
    }
}

/// The state chain links operate on.
pub struct MailContext {
    pub session: SessionInfo,
    /// The open transaction. While the sender chain runs, this holds the
    /// transaction MAIL would open; it is discarded if the chain rejects.
    pub transaction: Option<Transaction>,
    /// While the recipient chain runs, the address being added.
    pub recipient: Option<String>,
    complete: bool,
}

impl MailContext {
    pub fn new(session: SessionInfo) -> Self {
        Self {
            session,
            transaction: None,
            recipient: None,
            complete: false,
        }
    }
}

pub type HandlerFuture<'a> = BoxFuture<'a, Result<(), SmtpResponse>>;

pub trait MailHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        cx: &'a mut MailContext,
        next: Next<'a>,
    ) -> HandlerFuture<'a>;
}

/// The remainder of a chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    links: &'a [Arc<dyn MailHandler>],
}

impl<'a> Next<'a> {
    /// Passes control to the rest of the chain. `cx` is only borrowed for
    /// the call, so the link can still inspect it afterwards.
    pub fn run<'b>(self, cx: &'b mut MailContext) -> HandlerFuture<'b>
    where
        'a: 'b,
    {
        match self.links.split_first() {
            Some((head, rest)) => head.handle(cx, Next { links: rest }),
            None => {
                cx.complete = true;
                Box::pin(async { Ok(()) })
            },
        }
    }
}

/// Runs `links` in order over `cx`.
///
/// Returns `Ok` only if every link passed control on. A link which returns
/// `Ok` without doing so is a bug, and the command fails with a local error.
pub async fn run_chain(
    links: &[Arc<dyn MailHandler>],
    cx: &mut MailContext,
) -> Result<(), SmtpResponse> {
    cx.complete = false;
    Next { links }.run(cx).await?;

    if !cx.complete {
        error!(
            "{} [BUG] Chain link neither continued nor rejected",
            cx.session.log_prefix
        );
        return Err(SmtpResponse::local_error());
    }

    Ok(())
}

pub type ServeFuture = BoxFuture<'static, Result<(), Error>>;

/// Surrounds the serve loop of every connection.
pub trait Wrapper: Send + Sync {
    fn wrap(&self, log_prefix: &LogPrefix, inner: ServeFuture) -> ServeFuture;
}

/// Applies `wrappers` to `inner` such that the first wrapper is outermost.
pub fn wrap_all(
    wrappers: &[Arc<dyn Wrapper>],
    log_prefix: &LogPrefix,
    inner: ServeFuture,
) -> ServeFuture {
    wrappers
        .iter()
        .rev()
        .fold(inner, |inner, wrapper| wrapper.wrap(log_prefix, inner))
}

/// Turns a panic inside the connection into an ordinary error, so that the
/// task ends cleanly and the connection slot is released.
pub struct CatchPanic;

impl Wrapper for CatchPanic {
    fn wrap(&self, log_prefix: &LogPrefix, inner: ServeFuture) -> ServeFuture {
        let log_prefix = log_prefix.clone();
        Box::pin(async move {
            match AssertUnwindSafe(inner).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!("{log_prefix} Connection handler panicked");
                    Err(Error::Panic)
                },
            }
        })
    }
}

/// The chains a server hands to each connection.
#[derive(Clone, Default)]
pub struct Chains {
    pub wrappers: Vec<Arc<dyn Wrapper>>,
    pub sender: Vec<Arc<dyn MailHandler>>,
    pub recipient: Vec<Arc<dyn MailHandler>>,
    pub delivery: Vec<Arc<dyn MailHandler>>,
}

impl Chains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrapper(mut self, wrapper: impl Wrapper + 'static) -> Self {
        self.wrappers.push(Arc::new(wrapper));
        self
    }

    pub fn sender(mut self, handler: impl MailHandler + 'static) -> Self {
        self.sender.push(Arc::new(handler));
        self
    }

    pub fn recipient(mut self, handler: impl MailHandler + 'static) -> Self {
        self.recipient.push(Arc::new(handler));
        self
    }

    pub fn delivery(mut self, handler: impl MailHandler + 'static) -> Self {
        self.delivery.push(Arc::new(handler));
        self
    }
}
