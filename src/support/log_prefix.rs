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

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex};

/// Tracks text that should be included at the start of every log statement
/// made on behalf of one connection.
///
/// Clones of a `LogPrefix` share the same underlying data, so the connection
/// and the chain links it calls always agree on what is printed.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    protocol: String,
    peer: String,
    tls: bool,
    helo: Option<String>,
}

impl LogPrefix {
    pub fn new(protocol: String, peer: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                protocol,
                peer,
                tls: false,
                helo: None,
            })),
        }
    }

    pub fn set_tls(&self) {
        self.inner.lock().unwrap().tls = true;
    }

    pub fn set_helo(&self, helo: String) {
        self.inner.lock().unwrap().helo = Some(sanitise(helo));
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{}:{}", inner.protocol, inner.peer)?;
        if inner.tls || inner.helo.is_some() {
            write!(f, "[")?;
            let mut first = true;
            if inner.tls {
                write!(f, "~tls")?;
                first = false;
            }

            if let Some(ref helo) = inner.helo {
                if !mem::take(&mut first) {
                    write!(f, " ")?;
                }
                write!(f, "helo={helo}")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formatting() {
        let prefix = LogPrefix::new("smtp".to_owned(), "10.0.0.1".to_owned());
        assert_eq!("smtp:10.0.0.1", prefix.to_string());

        let clone = prefix.clone();
        clone.set_helo("mx.example.com\r\n".to_owned());
        assert_eq!("smtp:10.0.0.1[helo=mx.example.com]", prefix.to_string());

        prefix.set_tls();
        assert_eq!(
            "smtp:10.0.0.1[~tls helo=mx.example.com]",
            clone.to_string()
        );
    }

    #[test]
    fn helo_is_truncated() {
        let prefix = LogPrefix::new("smtp".to_owned(), "::1".to_owned());
        prefix.set_helo("x".repeat(200));
        assert_eq!(
            format!("smtp:::1[helo={}]", "x".repeat(64)),
            prefix.to_string()
        );
    }
}
