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

//! The terminal link of the delivery chain.

use std::sync::Arc;

use chrono::prelude::*;
use log::{error, info, warn};

use super::model::*;
use super::store::Store;
use super::threads::{reference_of, Incoming, ThreadMatcher};
use crate::crypt::manifest::{parse_keyring, seal};
use crate::mime::analysis::{analyze, EmailNode};
use crate::mime::header::{address_list, first_bracketed};
use crate::smtp::chain::{
    HandlerFuture, MailContext, MailHandler, Next, Transaction,
};
use crate::smtp::codes::SmtpResponse;
use crate::spam::SpamClient;
use crate::support::{error::Error, log_prefix::LogPrefix};

/// Message ids made up for messages which lack one end with this, so they
/// can never be confused with a real one.
pub const SYNTHETIC_ID_DOMAIN: &str = "invalid-incoming.pgp.st";

/// Delivers a received message to every resolved recipient.
///
/// The message is scored for spam and analysed once. Each recipient then
/// gets an independently encrypted copy filed into one of their threads.
/// Delivery stops at the first recipient that fails; copies already
/// delivered to earlier recipients are kept.
pub struct Deliverer {
    spam: Option<SpamClient>,
    matcher: ThreadMatcher,
}

impl Deliverer {
    pub fn new(spam: Option<SpamClient>, store: Arc<dyn Store>) -> Self {
        Self {
            spam,
            matcher: ThreadMatcher::new(store),
        }
    }

    /// Delivers the message of `transaction`, returning the stored emails.
    pub async fn deliver(
        &self,
        transaction: &mut Transaction,
        log_prefix: &LogPrefix,
    ) -> Result<Vec<Email>, Error> {
        let is_spam = self.classify(&transaction.envelope.data, log_prefix).await;

        let data = &mut transaction.envelope.data;
        let end = data
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |ix| ix + 1);
        data.truncate(end);
        let data = &transaction.envelope.data;

        let description = analyze(data)?;
        let message_id = message_id_of(&description);
        let members = members_of(&description, log_prefix);
        let incoming = Incoming {
            message_id: &message_id,
            reference: reference_of(&description),
            members: &members,
            is_spam,
            encrypted: description.is_encrypted(),
        };

        let mut delivered = Vec::new();
        for recipient in &transaction.resolved_recipients {
            let keyring = parse_keyring(&recipient.key.body)?;
            let sealed = seal(data, &description, &keyring)?;

            let now = Utc::now();
            let email = Email {
                id: new_id(),
                date_created: now,
                date_modified: now,
                owner: recipient.account.id.clone(),
                message_id: message_id.clone(),
                thread: String::new(),
                status: STATUS_RECEIVED.to_owned(),
                manifest: sealed.manifest,
                body: sealed.body,
            };
            let email = self.matcher.file(email, recipient, &incoming).await?;

            info!(
                "{} Email received for {} (account {})",
                log_prefix, recipient.address.id, recipient.account.main_address,
            );
            delivered.push(email);
        }

        Ok(delivered)
    }

    /// Spam scoring is advisory: any failure counts as "not spam".
    async fn classify(&self, data: &[u8], log_prefix: &LogPrefix) -> bool {
        let Some(ref spam) = self.spam else {
            return false;
        };

        match spam.report(data).await {
            Ok(reply) => reply.is_spam(),
            Err(e) => {
                error!("{log_prefix} Unable to check message with spamd: {e}");
                false
            },
        }
    }
}

impl MailHandler for Deliverer {
    fn handle<'a>(
        &'a self,
        cx: &'a mut MailContext,
        next: Next<'a>,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let log_prefix = cx.session.log_prefix.clone();
            let Some(ref mut transaction) = cx.transaction else {
                error!("{log_prefix} [BUG] Delivery chain run without MAIL");
                return Err(SmtpResponse::local_error());
            };

            if let Err(e) = self.deliver(transaction, &log_prefix).await {
                error!("{log_prefix} Delivery failed: {e}");
                return Err(SmtpResponse::local_error());
            }

            next.run(cx).await
        })
    }
}

fn message_id_of(description: &EmailNode) -> String {
    match description
        .header("Message-ID")
        .map(|v| first_bracketed(v.trim()))
        .filter(|v| !v.is_empty())
    {
        Some(id) => id.to_owned(),
        None => format!("{}@{}", new_id(), SYNTHETIC_ID_DOMAIN),
    }
}

/// The sender and all visible recipients, without duplicates.
fn members_of(
    description: &EmailNode,
    log_prefix: &LogPrefix,
) -> Vec<String> {
    let mut members = Vec::<String>::new();
    for header in ["From", "To", "Cc"] {
        let Some(value) = description.header(header) else {
            if "From" == header {
                warn!("{log_prefix} Message has no From header");
            }
            continue;
        };

        let addresses = address_list(value);
        if addresses.is_empty() && "From" == header {
            warn!("{log_prefix} Unparseable From header: {value:?}");
        }

        for address in addresses {
            if !members.contains(&address) {
                members.push(address);
            }
        }
    }

    members
}
