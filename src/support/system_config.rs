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

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// The system-wide configuration for the mailer.
///
/// This is stored in a file named `mailer.toml` under the configuration root,
/// which is typically `/usr/local/etc/pgpst-mailer` or `/etc/pgpst-mailer`.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Configuration for the SMTP listener.
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Configuration for TLS. If absent, STARTTLS is not offered.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// How to reach the SpamAssassin daemon.
    #[serde(default)]
    pub spamd: SpamdConfig,

    /// Where the account directory comes from.
    #[serde(default)]
    pub directory: DirectoryConfig,
}

impl SystemConfig {
    /// Reads and parses the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(toml::from_slice(&data)?)
    }
}

/// Limits and identity of the SMTP server.
///
/// Every numeric field treats 0 as "use the default", which is also what an
/// omitted field means.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// The address to listen on. Defaults to `0.0.0.0:25`.
    pub listen: String,
    /// The host name to announce in greetings and trace headers.
    ///
    /// Defaults to `localhost`.
    pub hostname: String,
    /// The text following `220` in the connection banner.
    ///
    /// Defaults to `<hostname> ESMTP ready.`.
    pub welcome_message: String,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// How long the client gets to send the entire DATA payload.
    pub data_timeout_secs: u64,
    /// The number of connections served at once. Connections beyond this are
    /// turned away with a 421 reply.
    pub max_connections: usize,
    pub max_recipients: usize,
    /// The largest message accepted, in bytes.
    pub max_message_size: usize,
    /// If true, MAIL is refused until the client has negotiated TLS.
    ///
    /// Requires the `[tls]` section.
    pub force_tls: bool,
    /// If true, a `Received:` trace header is prepended to every message
    /// before it enters the delivery pipeline.
    pub add_received_header: bool,
}

impl SmtpConfig {
    pub fn listen(&self) -> &str {
        non_empty(&self.listen, "0.0.0.0:25")
    }

    pub fn hostname(&self) -> &str {
        non_empty(&self.hostname, "localhost")
    }

    pub fn welcome_message(&self) -> String {
        if self.welcome_message.is_empty() {
            format!("{} ESMTP ready.", self.hostname())
        } else {
            self.welcome_message.clone()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(non_zero(self.read_timeout_secs, 60))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(non_zero(self.write_timeout_secs, 60))
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(non_zero(self.data_timeout_secs, 5 * 60))
    }

    pub fn max_connections(&self) -> usize {
        non_zero(self.max_connections, 100)
    }

    pub fn max_recipients(&self) -> usize {
        non_zero(self.max_recipients, 100)
    }

    pub fn max_message_size(&self) -> usize {
        non_zero(self.max_message_size, 20 * 1024 * 1024)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct TlsConfig {
    /// The path to the TLS private key, which must be in PEM format.
    ///
    /// Relative paths are resolved against the configuration root.
    pub private_key: PathBuf,
    /// The path to the TLS certificate chain, which must be in PEM format.
    pub certificate_chain: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SpamdConfig {
    /// If false, every message is treated as not spam without asking.
    pub enabled: bool,
    pub address: String,
    pub timeout_secs: u64,
    /// Sent as the `User` header, selecting per-user spamd settings.
    pub user: Option<String>,
}

impl Default for SpamdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1:783".to_owned(),
            timeout_secs: 10,
            user: None,
        }
    }
}

impl SpamdConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(non_zero(self.timeout_secs, 10))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// A JSON file listing the accounts, addresses, keys and labels to load
    /// into the in-memory store at start-up.
    ///
    /// Relative paths are resolved against the configuration root.
    pub seed: Option<PathBuf>,
}

fn non_empty<'a>(s: &'a str, default: &'a str) -> &'a str {
    if s.is_empty() {
        default
    } else {
        s
    }
}

fn non_zero<T: Default + PartialEq>(v: T, default: T) -> T {
    if v == T::default() {
        default
    } else {
        v
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: SystemConfig = toml::from_str("").unwrap();
        assert_eq!("0.0.0.0:25", config.smtp.listen());
        assert_eq!("localhost", config.smtp.hostname());
        assert_eq!("localhost ESMTP ready.", config.smtp.welcome_message());
        assert_eq!(Duration::from_secs(60), config.smtp.read_timeout());
        assert_eq!(Duration::from_secs(60), config.smtp.write_timeout());
        assert_eq!(Duration::from_secs(300), config.smtp.data_timeout());
        assert_eq!(100, config.smtp.max_connections());
        assert_eq!(100, config.smtp.max_recipients());
        assert_eq!(20 * 1024 * 1024, config.smtp.max_message_size());
        assert!(!config.smtp.force_tls);
        assert!(config.tls.is_none());
        assert!(config.spamd.enabled);
        assert_eq!("127.0.0.1:783", config.spamd.address);
        assert_eq!(Duration::from_secs(10), config.spamd.timeout());
        assert!(config.directory.seed.is_none());
    }

    #[test]
    fn full_config_parses() {
        let config: SystemConfig = toml::from_str(
            r#"
[smtp]
listen = "127.0.0.1:2525"
hostname = "pgp.st"
read_timeout_secs = 5
max_recipients = 0
max_message_size = 1024
force_tls = true

[tls]
private_key = "key.pem"
certificate_chain = "cert.pem"

[spamd]
enabled = false
address = "10.1.1.1:783"
user = "mailer"

[directory]
seed = "directory.json"
"#,
        )
        .unwrap();

        assert_eq!("127.0.0.1:2525", config.smtp.listen());
        assert_eq!("pgp.st ESMTP ready.", config.smtp.welcome_message());
        assert_eq!(Duration::from_secs(5), config.smtp.read_timeout());
        assert_eq!(100, config.smtp.max_recipients());
        assert_eq!(1024, config.smtp.max_message_size());
        assert!(config.smtp.force_tls);
        assert_eq!(
            PathBuf::from("cert.pem"),
            config.tls.unwrap().certificate_chain
        );
        assert!(!config.spamd.enabled);
        assert_eq!(Some("mailer"), config.spamd.user.as_deref());
        assert_eq!(Duration::from_secs(10), config.spamd.timeout());
        assert_eq!(
            Some(PathBuf::from("directory.json")),
            config.directory.seed
        );
    }

    #[test]
    fn load_reports_bad_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mailer.toml");
        assert_matches!(Err(Error::Io(_)), SystemConfig::load(&path));

        fs::write(&path, "[smtp]\nmax_recipients = \"many\"\n").unwrap();
        assert_matches!(Err(Error::Config(_)), SystemConfig::load(&path));

        fs::write(&path, "[smtp]\nmax_recipients = 5\n").unwrap();
        assert_eq!(
            5,
            SystemConfig::load(&path).unwrap().smtp.max_recipients()
        );
    }
}
