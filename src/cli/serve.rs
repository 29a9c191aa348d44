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

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use tokio::net::TcpListener;

use crate::delivery::orchestrator::Deliverer;
use crate::delivery::resolver::Resolver;
use crate::delivery::store::{MemoryStore, Seed};
use crate::smtp::chain::{CatchPanic, Chains};
use crate::smtp::connection::Settings;
use crate::smtp::received::AddReceivedHeader;
use crate::smtp::server::{create_ssl_acceptor, shutdown_signal, SmtpServer};
use crate::spam::SpamClient;
use crate::support::system_config::SystemConfig;

// Used instead of die! so that errors go to syslog/etc
macro_rules! fatal {
    ($ex:ident, $($stuff:tt)*) => {{
        error!($($stuff)*);
        crate::support::sysexits::$ex.exit()
    }}
}

pub fn serve(system_config: SystemConfig, system_root: PathBuf) {
    let ssl_acceptor = system_config.tls.as_ref().map(|tls| {
        create_ssl_acceptor(tls, &system_root).unwrap_or_else(|e| {
            fatal!(
                EX_CONFIG,
                "Unable to set up TLS from '{}' and '{}': {}",
                system_root.join(&tls.private_key).display(),
                system_root.join(&tls.certificate_chain).display(),
                e
            )
        })
    });

    let store = match system_config.directory.seed {
        None => MemoryStore::new(),
        Some(ref seed) => {
            let path = system_root.join(seed);
            match Seed::load(&path) {
                Ok(seed) => MemoryStore::from_seed(seed),
                Err(crate::support::error::Error::Io(e)) => fatal!(
                    EX_NOINPUT,
                    "Unable to read directory file '{}': {}",
                    path.display(),
                    e
                ),
                Err(e) => fatal!(
                    EX_CONFIG,
                    "Error in directory file '{}': {}",
                    path.display(),
                    e
                ),
            }
        },
    };
    let store = Arc::new(store);

    let spam = if system_config.spamd.enabled {
        Some(SpamClient::new(&system_config.spamd))
    } else {
        info!("Spam checking is disabled");
        None
    };

    let mut chains = Chains::new()
        .wrapper(CatchPanic)
        .recipient(Resolver::new(store.clone()));
    if system_config.smtp.add_received_header {
        chains = chains.delivery(AddReceivedHeader);
    }
    chains = chains.delivery(Deliverer::new(spam, store));

    let server = SmtpServer::new(
        Settings::from_config(&system_config.smtp),
        system_config.smtp.max_connections(),
        ssl_acceptor,
        chains,
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => fatal!(EX_OSERR, "Failed to start async runtime: {}", e),
    };

    runtime.block_on(async move {
        let listen = system_config.smtp.listen();
        let listener = match TcpListener::bind(listen).await {
            Ok(listener) => listener,
            Err(e) => fatal!(EX_OSERR, "Unable to listen on {}: {}", listen, e),
        };

        if let Err(e) = server.serve(listener, shutdown_signal()).await {
            fatal!(EX_OSERR, "Server failed: {}", e);
        }
    });
}
