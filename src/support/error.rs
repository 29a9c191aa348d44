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

use std::io;

use thiserror::Error;

use crate::delivery::store::StoreError;
use crate::mime::analysis::MimeError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Keyring contains no key usable for encryption")]
    NoEncryptionKey,
    #[error("Connection handler panicked")]
    Panic,
    #[error("TLS handshake failed: {0}")]
    Handshake(#[from] openssl::ssl::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Pgp(#[from] pgp::errors::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Mime(#[from] MimeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
