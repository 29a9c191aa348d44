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

//! Response codes from RFC 5321 and RFC 4954.
//!
//! The module is designed to be wildcard-imported, and defines a submodule
//! with a short name for accessing the enum values in a consistent way.

use std::borrow::Cow;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum PrimaryCode {
    CommandSyntaxError = 500,
    CommandNotImplemented = 502,
    ServiceReady = 220,
    ServiceClosing = 221,
    ServiceNotAvailableClosing = 421,
    Ok = 250,
    StartMailInput = 354,
    PasswordTransitionNeeded = 432,
    ActionNotTakenTemporary = 450,
    ActionAborted = 451,
    // Also TooManyRecipients
    InsufficientStorage = 452,
    TemporaryAuthenticationFailure = 454,
    AuthenticationRequired = 530,
    AuthenticationCredentialsInvalid = 535,
    EncryptionRequired = 538,
    ActionNotTakenPermanent = 550,
    ExceededStorageAllocation = 552,
}

pub mod pc {
    pub use super::PrimaryCode::*;
}

/// A complete single-line reply.
///
/// This is what chain links reject with. The text is always fixed or built
/// from client-supplied values; internal error messages never go here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmtpResponse(pub PrimaryCode, pub Cow<'static, str>);

impl SmtpResponse {
    pub fn new(code: PrimaryCode, text: &'static str) -> Self {
        SmtpResponse(code, Cow::Borrowed(text))
    }

    pub fn code(&self) -> u16 {
        self.0 as u16
    }

    /// Generic reply for failures inside the delivery pipeline.
    pub fn local_error() -> Self {
        Self::new(
            pc::ActionAborted,
            "Requested action aborted: local error in processing",
        )
    }

    /// Reply for recipients that do not resolve to a deliverable mailbox.
    pub fn no_such_address() -> Self {
        Self::new(pc::ActionNotTakenPermanent, "No such address")
    }

    pub fn password_transition_needed() -> Self {
        Self::new(
            pc::PasswordTransitionNeeded,
            "A password transition is needed",
        )
    }

    pub fn mailbox_unavailable() -> Self {
        Self::new(
            pc::ActionNotTakenTemporary,
            "Requested mail action not taken",
        )
    }

    pub fn insufficient_storage() -> Self {
        Self::new(
            pc::InsufficientStorage,
            "Requested action not taken: insufficient system storage",
        )
    }

    pub fn temporary_auth_failure() -> Self {
        Self::new(
            pc::TemporaryAuthenticationFailure,
            "Temporary authentication failure",
        )
    }

    pub fn auth_required() -> Self {
        Self::new(pc::AuthenticationRequired, "Authentication required")
    }

    pub fn auth_invalid() -> Self {
        Self::new(
            pc::AuthenticationCredentialsInvalid,
            "Authentication credentials invalid",
        )
    }

    pub fn encryption_required() -> Self {
        Self::new(
            pc::EncryptionRequired,
            "Encryption required for requested authentication mechanism",
        )
    }

    pub fn server_error() -> Self {
        Self::new(
            pc::ActionNotTakenPermanent,
            "Requested mail action not taken: server error",
        )
    }

    pub fn exceeded_storage() -> Self {
        Self::new(
            pc::ExceededStorageAllocation,
            "Requested mail action aborted: exceeded storage allocation",
        )
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.0 as u16, self.1)
    }
}
