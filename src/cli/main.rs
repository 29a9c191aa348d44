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

use std::path::{Path, PathBuf};

use log::LevelFilter;
use structopt::StructOpt;

use crate::support::address::{normalize_address, remove_dots};
use crate::support::error::Error;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Run the SMTP server.
    ///
    /// The server listens on the configured address until it receives
    /// SIGINT or SIGTERM. Every accepted message is encrypted to each of its
    /// recipients and filed into their conversations.
    Serve(ServeOptions),
    /// Print the canonical form of the given addresses.
    ///
    /// This is the form addresses are looked up by, and so the form they
    /// must take in the directory file.
    Normalize {
        /// The addresses to normalise.
        #[structopt(required = true)]
        addresses: Vec<String>,
    },
}

#[derive(StructOpt)]
pub(super) struct ServeOptions {
    /// The directory containing `mailer.toml` etc
    /// [default: /etc/pgpst-mailer or /usr/local/etc/pgpst-mailer]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,

    /// Log at debug level when logging to a terminal.
    #[structopt(short, long)]
    verbose: bool,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    match cmd {
        Command::Serve(options) => serve(options),
        Command::Normalize { addresses } => {
            for address in addresses {
                println!("{}", remove_dots(&normalize_address(&address)));
            }
        },
    }
}

fn serve(options: ServeOptions) {
    let root = options.root.unwrap_or_else(|| {
        if Path::new("/etc/pgpst-mailer/mailer.toml").is_file() {
            "/etc/pgpst-mailer".to_owned().into()
        } else if Path::new("/usr/local/etc/pgpst-mailer/mailer.toml").is_file()
        {
            "/usr/local/etc/pgpst-mailer".to_owned().into()
        } else {
            eprintln!(
                "Neither /etc/pgpst-mailer nor /usr/local/etc/pgpst-mailer\n\
                 looks like the configuration root; use\n\
                 --root=/path/to/config if your installation is elsewhere."
            );
            EX_CONFIG.exit()
        }
    });

    let system_config_path = root.join("mailer.toml");
    let system_config = match SystemConfig::load(&system_config_path) {
        Ok(config) => config,
        Err(Error::Io(e)) => {
            eprintln!(
                "Error reading '{}': {}",
                system_config_path.display(),
                e
            );
            EX_CONFIG.exit()
        },
        Err(e) => {
            eprintln!(
                "Error in config file at '{}': {}",
                system_config_path.display(),
                e
            );
            EX_CONFIG.exit()
        },
    };

    if system_config.smtp.force_tls && system_config.tls.is_none() {
        eprintln!(
            "'{}' sets smtp.force_tls but has no [tls] section",
            system_config_path.display()
        );
        EX_CONFIG.exit();
    }

    init_log(&root, options.verbose);
    super::serve::serve(system_config, root);
}

fn init_log(root: &Path, verbose: bool) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        init_console_log(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });
        return;
    }

    // log4rs and syslog are alternatives; log4rs-syslog has not kept up with
    // either crate.
    let log_config_file = root.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::config::Deserializers::new(),
        ) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
            EX_CONFIG.exit();
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw() as u32,
        };

        let logger = match syslog::unix(formatter) {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("Failed to connect to syslog: {}", e);
                EX_OSERR.exit()
            },
        };

        if let Err(e) =
            log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
        {
            eprintln!("Failed to initialise logging: {}", e);
            EX_SOFTWARE.exit();
        }
        log::set_max_level(LevelFilter::Info);
    }
}

fn init_console_log(level: LevelFilter) {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%dT%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
        )))
        .build();

    let result = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| e.to_string())
        .and_then(|config| {
            log4rs::init_config(config).map_err(|e| e.to_string())
        });

    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {}", e);
        EX_SOFTWARE.exit();
    }
}
