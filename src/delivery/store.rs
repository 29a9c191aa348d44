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

//! The boundary between the delivery pipeline and persistent storage.
//!
//! The pipeline only relies on single-record operations being atomic.
//! Multi-step sequences, such as merging into a thread, are serialised by
//! the caller.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::*;
use crate::support::error::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record {0} already exists")]
    Duplicate(String),
    #[error("Thread {0} does not exist")]
    NoSuchThread(String),
}

pub trait Store: Send + Sync {
    /// Looks an address up by its canonical form.
    fn address(&self, id: &str) -> Result<Option<Address>, StoreError>;
    fn account(&self, id: &str) -> Result<Option<Account>, StoreError>;
    fn key(&self, id: &str) -> Result<Option<Key>, StoreError>;
    /// The most recently created key owned by `owner`.
    fn newest_key(&self, owner: &str) -> Result<Option<Key>, StoreError>;
    /// Finds the system label called `name` of account `owner`.
    fn system_label(
        &self,
        name: &str,
        owner: &str,
    ) -> Result<Option<Label>, StoreError>;
    fn emails_by_message_id(
        &self,
        message_id: &str,
        owner: &str,
    ) -> Result<Vec<Email>, StoreError>;
    fn thread(&self, id: &str) -> Result<Option<Thread>, StoreError>;
    fn insert_thread(&self, thread: &Thread) -> Result<(), StoreError>;
    /// Replaces an existing thread.
    fn update_thread(&self, thread: &Thread) -> Result<(), StoreError>;
    fn insert_email(&self, email: &Email) -> Result<(), StoreError>;
}

/// The directory file the binary seeds its store from.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Seed {
    pub accounts: Vec<Account>,
    pub addresses: Vec<Address>,
    pub keys: Vec<Key>,
    pub labels: Vec<Label>,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// A `Store` which keeps everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    addresses: HashMap<String, Address>,
    keys: HashMap<String, Key>,
    labels: HashMap<String, Label>,
    emails: HashMap<String, Email>,
    threads: HashMap<String, Thread>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.lock().unwrap();
            for account in seed.accounts {
                tables.accounts.insert(account.id.clone(), account);
            }
            for address in seed.addresses {
                tables.addresses.insert(address.id.clone(), address);
            }
            for key in seed.keys {
                tables.keys.insert(key.id.clone(), key);
            }
            for label in seed.labels {
                tables.labels.insert(label.id.clone(), label);
            }
        }
        store
    }

    pub fn add_account(&self, account: Account) {
        let mut tables = self.tables.lock().unwrap();
        tables.accounts.insert(account.id.clone(), account);
    }

    pub fn add_address(&self, address: Address) {
        let mut tables = self.tables.lock().unwrap();
        tables.addresses.insert(address.id.clone(), address);
    }

    pub fn add_key(&self, key: Key) {
        let mut tables = self.tables.lock().unwrap();
        tables.keys.insert(key.id.clone(), key);
    }

    pub fn add_label(&self, label: Label) {
        let mut tables = self.tables.lock().unwrap();
        tables.labels.insert(label.id.clone(), label);
    }

    /// All emails owned by `owner`, oldest first.
    pub fn emails_of(&self, owner: &str) -> Vec<Email> {
        let tables = self.tables.lock().unwrap();
        let mut emails = tables
            .emails
            .values()
            .filter(|e| e.owner == owner)
            .cloned()
            .collect::<Vec<_>>();
        emails.sort_by_key(|e| e.date_created);
        emails
    }

    /// All threads owned by `owner`, oldest first.
    pub fn threads_of(&self, owner: &str) -> Vec<Thread> {
        let tables = self.tables.lock().unwrap();
        let mut threads = tables
            .threads
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect::<Vec<_>>();
        threads.sort_by_key(|t| t.date_created);
        threads
    }
}

impl Store for MemoryStore {
    fn address(&self, id: &str) -> Result<Option<Address>, StoreError> {
        Ok(self.tables.lock().unwrap().addresses.get(id).cloned())
    }

    fn account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.lock().unwrap().accounts.get(id).cloned())
    }

    fn key(&self, id: &str) -> Result<Option<Key>, StoreError> {
        Ok(self.tables.lock().unwrap().keys.get(id).cloned())
    }

    fn newest_key(&self, owner: &str) -> Result<Option<Key>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .keys
            .values()
            .filter(|k| k.owner == owner)
            .max_by_key(|k| k.date_created)
            .cloned())
    }

    fn system_label(
        &self,
        name: &str,
        owner: &str,
    ) -> Result<Option<Label>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .labels
            .values()
            .find(|l| l.system && l.name == name && l.owner == owner)
            .cloned())
    }

    fn emails_by_message_id(
        &self,
        message_id: &str,
        owner: &str,
    ) -> Result<Vec<Email>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .emails
            .values()
            .filter(|e| e.message_id == message_id && e.owner == owner)
            .cloned()
            .collect())
    }

    fn thread(&self, id: &str) -> Result<Option<Thread>, StoreError> {
        Ok(self.tables.lock().unwrap().threads.get(id).cloned())
    }

    fn insert_thread(&self, thread: &Thread) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.threads.contains_key(&thread.id) {
            return Err(StoreError::Duplicate(thread.id.clone()));
        }
        tables.threads.insert(thread.id.clone(), thread.clone());
        Ok(())
    }

    fn update_thread(&self, thread: &Thread) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        match tables.threads.get_mut(&thread.id) {
            Some(existing) => {
                *existing = thread.clone();
                Ok(())
            },
            None => Err(StoreError::NoSuchThread(thread.id.clone())),
        }
    }

    fn insert_email(&self, email: &Email) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.emails.contains_key(&email.id) {
            return Err(StoreError::Duplicate(email.id.clone()));
        }
        tables.emails.insert(email.id.clone(), email.clone());
        Ok(())
    }
}
