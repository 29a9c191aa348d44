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

//! Constants from `sysexits.h`
//!
//! The binary uses them for its own exit statuses. The SpamAssassin daemon
//! reuses the same numbering for the status codes in its replies, so the
//! descriptions here double as that protocol's error table.

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_OK: Sysexit = Sysexit(0);
pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_DATAERR: Sysexit = Sysexit(65);
pub const EX_NOINPUT: Sysexit = Sysexit(66);
pub const EX_NOUSER: Sysexit = Sysexit(67);
pub const EX_NOHOST: Sysexit = Sysexit(68);
pub const EX_UNAVAILABLE: Sysexit = Sysexit(69);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_OSERR: Sysexit = Sysexit(71);
pub const EX_OSFILE: Sysexit = Sysexit(72);
pub const EX_CANTCREAT: Sysexit = Sysexit(73);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_TEMPFAIL: Sysexit = Sysexit(75);
pub const EX_PROTOCOL: Sysexit = Sysexit(76);
pub const EX_NOPERM: Sysexit = Sysexit(77);
pub const EX_CONFIG: Sysexit = Sysexit(78);
/// Not part of `sysexits.h`; spamd's extension for read timeouts.
pub const EX_TIMEOUT: Sysexit = Sysexit(79);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }

    /// Returns the human-readable meaning of this code, or `None` if it is
    /// not an error code.
    pub fn description(self) -> Option<&'static str> {
        Some(match self {
            EX_USAGE => "Command line usage error",
            EX_DATAERR => "Data format error",
            EX_NOINPUT => "Cannot open input",
            EX_NOUSER => "Addressee unknown",
            EX_NOHOST => "Host name unknown",
            EX_UNAVAILABLE => "Service unavailable",
            EX_SOFTWARE => "Internal software error",
            EX_OSERR => "System error",
            EX_OSFILE => "Critical OS file missing",
            EX_CANTCREAT => "Can't create (user) output file",
            EX_IOERR => "Input/output error",
            EX_TEMPFAIL => "Temp failure; user is invited to retry",
            EX_PROTOCOL => "Remote error in protocol",
            EX_NOPERM => "Permission denied",
            EX_CONFIG => "Configuration error",
            EX_TIMEOUT => "Read timeout",
            _ => return None,
        })
    }
}
