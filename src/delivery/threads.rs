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

//! Filing delivered emails into conversation threads.

use std::sync::Arc;

use chrono::prelude::*;

use super::model::*;
use super::store::{Store, StoreError};
use crate::mime::analysis::EmailNode;
use crate::mime::header::first_bracketed;
use crate::support::keyed_lock::KeyedLocks;

/// What the thread matcher needs to know about an incoming message.
#[derive(Clone, Debug)]
pub struct Incoming<'a> {
    pub message_id: &'a str,
    /// The message id this one replies to, if any.
    pub reference: Option<&'a str>,
    pub members: &'a [String],
    pub is_spam: bool,
    pub encrypted: bool,
}

/// The id of the message `node` replies to.
///
/// `In-Reply-To` is preferred over `References`; of either, only the first
/// bracketed id counts.
pub fn reference_of(node: &EmailNode) -> Option<&str> {
    node.header("In-Reply-To")
        .filter(|v| !v.trim().is_empty())
        .or_else(|| node.header("References"))
        .map(|v| first_bracketed(v.trim()))
        .filter(|v| !v.is_empty())
}

pub struct ThreadMatcher {
    store: Arc<dyn Store>,
    locks: KeyedLocks,
}

impl ThreadMatcher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Finds or creates the thread `email` belongs to, updates it, and then
    /// stores `email` with its `thread` field set.
    ///
    /// All of this happens under the owner's lock, so concurrent deliveries
    /// to one account cannot lose each other's thread updates.
    pub async fn file(
        &self,
        mut email: Email,
        recipient: &Recipient,
        incoming: &Incoming<'_>,
    ) -> Result<Email, StoreError> {
        let owner = &recipient.account.id;
        let _guard = self.locks.lock(owner).await;
        let now = Utc::now();

        let thread = match self.find(owner, incoming.reference)? {
            Some(mut thread) => {
                merge(&mut thread, &recipient.labels, incoming, now);
                thread.emails.push(email.id.clone());
                self.store.update_thread(&thread)?;
                thread
            },
            None => {
                let mut labels = vec![recipient.labels.inbox.clone()];
                if incoming.is_spam {
                    labels.push(recipient.labels.spam.clone());
                }

                let mut members = Vec::new();
                for member in incoming.members {
                    push_unique(&mut members, member);
                }

                let thread = Thread {
                    id: new_id(),
                    date_created: now,
                    date_modified: now,
                    owner: owner.clone(),
                    emails: vec![email.id.clone()],
                    labels,
                    members,
                    is_read: false,
                    last_read: None,
                    secure: Secure::of(incoming.encrypted),
                };
                self.store.insert_thread(&thread)?;
                thread
            },
        };

        email.thread = thread.id;
        self.store.insert_email(&email)?;
        Ok(email)
    }

    fn find(
        &self,
        owner: &str,
        reference: Option<&str>,
    ) -> Result<Option<Thread>, StoreError> {
        let Some(reference) = reference else {
            return Ok(None);
        };

        // An ambiguous reference starts a new thread.
        match &self.store.emails_by_message_id(reference, owner)?[..] {
            [email] => self.store.thread(&email.thread),
            _ => Ok(None),
        }
    }
}

fn merge(
    thread: &mut Thread,
    labels: &SystemLabels,
    incoming: &Incoming<'_>,
    now: DateTime<Utc>,
) {
    push_unique(&mut thread.labels, &labels.inbox);
    if incoming.is_spam {
        push_unique(&mut thread.labels, &labels.spam);
    }
    for member in incoming.members {
        push_unique(&mut thread.members, member);
    }

    thread.secure = thread.secure.merge(incoming.encrypted);
    thread.date_modified = now;
    thread.is_read = false;
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|i| i == item) {
        list.push(item.to_owned());
    }
}
