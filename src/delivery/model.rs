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

//! The records the delivery pipeline reads and writes.

use chrono::prelude::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypt::manifest::b64;

pub const ID_LEN: usize = 32;

/// Generates a fresh random record id.
pub fn new_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

/// A deliverable address.
///
/// `id` is the canonical form of the address (see
/// `support::address::canonical`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    /// The address as the owner likes to see it written.
    #[serde(default)]
    pub styled_id: String,
    pub owner: String,
    /// The key to encrypt to for this address. If empty, the owner's newest
    /// key is used.
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub main_address: String,
    #[serde(default)]
    pub status: String,
}

/// A public key. `id` is the key's fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub id: String,
    pub owner: String,
    #[serde(default = "Utc::now")]
    pub date_created: DateTime<Utc>,
    /// The keyring, armoured or binary.
    #[serde(with = "b64_or_text")]
    pub body: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub owner: String,
    pub name: String,
    #[serde(default, rename = "is_system")]
    pub system: bool,
}

/// One delivered copy of a message, readable only by its owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub owner: String,
    pub message_id: String,
    pub thread: String,
    pub status: String,
    /// The OpenPGP-encrypted manifest.
    #[serde(with = "b64")]
    pub manifest: Vec<u8>,
    /// The chunked ciphertext of the raw message.
    #[serde(with = "b64")]
    pub body: Vec<u8>,
}

pub const STATUS_RECEIVED: &str = "received";

/// Whether the messages of a thread were encrypted by their senders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Secure {
    All,
    Some,
    None,
}

impl Secure {
    pub fn of(encrypted: bool) -> Self {
        if encrypted {
            Secure::All
        } else {
            Secure::None
        }
    }

    /// The status after a message with the given status joins.
    pub fn merge(self, encrypted: bool) -> Self {
        match (self, encrypted) {
            (Secure::All, false) | (Secure::None, true) => Secure::Some,
            (s, _) => s,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub owner: String,
    pub emails: Vec<String>,
    pub labels: Vec<String>,
    pub members: Vec<String>,
    pub is_read: bool,
    pub last_read: Option<String>,
    #[serde(rename = "is_secure")]
    pub secure: Secure,
}

/// The ids of the system labels of one account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemLabels {
    pub inbox: String,
    pub spam: String,
}

/// Everything needed to deliver to one RCPT address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    pub address: Address,
    pub account: Account,
    pub key: Key,
    pub labels: SystemLabels,
}

/// Keys in the directory file are usually pasted in armoured. Binary keys
/// can be given as base64 with a `base64:` prefix.
mod b64_or_text {
    use serde::{de, Deserialize, Deserializer, Serializer};

    const PREFIX: &str = "base64:";

    pub fn serialize<S: Serializer>(
        data: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(data) {
            Ok(s) if !s.starts_with(PREFIX) => serializer.serialize_str(s),
            _ => serializer
                .serialize_str(&format!("{PREFIX}{}", base64::encode(data))),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.strip_prefix(PREFIX) {
            Some(encoded) => base64::decode(encoded).map_err(de::Error::custom),
            None => Ok(s.into_bytes()),
        }
    }
}
