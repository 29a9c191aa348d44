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

use std::sync::Arc;

use log::{error, info};

use super::model::{Recipient, SystemLabels};
use super::store::{Store, StoreError};
use crate::smtp::chain::{HandlerFuture, MailContext, MailHandler, Next};
use crate::smtp::codes::SmtpResponse;
use crate::support::address::canonical;

pub const INBOX: &str = "Inbox";
pub const SPAM: &str = "Spam";

/// Recipient-chain link which turns RCPT addresses into deliverable
/// `Recipient`s.
///
/// An address is only accepted if it, its owning account, a key to encrypt
/// to and both system labels all exist. Nothing is written.
pub struct Resolver {
    store: Arc<dyn Store>,
}

impl Resolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, raw: &str) -> Result<Option<Recipient>, StoreError> {
        let Some(address) = self.store.address(&canonical(raw))? else {
            return Ok(None);
        };
        let Some(account) = self.store.account(&address.owner)? else {
            return Ok(None);
        };

        let key = match address.public_key.as_deref() {
            Some(key_id) if !key_id.is_empty() => self.store.key(key_id)?,
            _ => self.store.newest_key(&account.id)?,
        };
        let Some(key) = key else {
            return Ok(None);
        };

        let inbox = self.store.system_label(INBOX, &account.id)?;
        let spam = self.store.system_label(SPAM, &account.id)?;
        let (Some(inbox), Some(spam)) = (inbox, spam) else {
            return Ok(None);
        };

        Ok(Some(Recipient {
            address,
            account,
            key,
            labels: SystemLabels {
                inbox: inbox.id,
                spam: spam.id,
            },
        }))
    }
}

impl MailHandler for Resolver {
    fn handle<'a>(
        &'a self,
        cx: &'a mut MailContext,
        next: Next<'a>,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            let log_prefix = cx.session.log_prefix.clone();
            let Some(raw) = cx.recipient.clone() else {
                error!("{log_prefix} [BUG] Recipient chain run without RCPT");
                return Err(SmtpResponse::local_error());
            };

            let recipient = match self.resolve(&raw) {
                Ok(Some(recipient)) => recipient,
                Ok(None) => {
                    info!("{log_prefix} Rejected RCPT {raw:?}: no such address");
                    return Err(SmtpResponse::no_such_address());
                },
                Err(e) => {
                    error!("{log_prefix} Failed to resolve {raw:?}: {e}");
                    return Err(SmtpResponse::local_error());
                },
            };

            next.run(&mut *cx).await?;
            if let Some(ref mut transaction) = cx.transaction {
                transaction.resolved_recipients.push(recipient);
            }
            Ok(())
        })
    }
}
