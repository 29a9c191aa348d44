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

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use super::chain::{wrap_all, Chains};
use super::connection::{self, Settings, Shared};
use crate::support::{
    error::Error, log_prefix::LogPrefix, system_config::TlsConfig,
};

/// Accepts SMTP connections and serves each on its own task.
#[derive(Clone)]
pub struct SmtpServer {
    shared: Arc<Shared>,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl SmtpServer {
    pub fn new(
        settings: Settings,
        max_connections: usize,
        ssl_acceptor: Option<SslAcceptor>,
        chains: Chains,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                ssl_acceptor,
                chains,
            }),
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Accepts connections from `listener` until `shutdown` completes, then
    /// waits for the connections already being served to finish.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        tokio::pin!(shutdown);
        info!("Listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    },
                },
                _ = &mut shutdown => break,
            };

            self.spawn(stream, peer);
        }

        info!("Shutting down; no longer accepting connections");
        drop(listener);
        let in_flight = self.max_connections - self.slots.available_permits();
        if in_flight > 0 {
            info!("Waiting for {in_flight} connection(s) to finish");
        }
        // Never fails since the semaphore is never closed
        let _ = self.slots.acquire_many(self.max_connections as u32).await;
        Ok(())
    }

    fn spawn(&self, mut stream: TcpStream, peer: SocketAddr) {
        let log_prefix = LogPrefix::new("smtp".to_owned(), peer.ip().to_string());
        // Slots are taken on the accept loop so that admission follows
        // accept order.
        let permit = Arc::clone(&self.slots).try_acquire_owned();
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            let Ok(_permit) = permit else {
                warn!("{log_prefix} Rejected: maximum connections exceeded");
                let _ = stream
                    .write_all(
                        b"421 Maximum connections count exceeded. \
                          Try again later.\r\n",
                    )
                    .await;
                let _ = stream.shutdown().await;
                return;
            };

            info!("{log_prefix} Connection accepted");
            let serve = connection::serve(
                stream,
                peer.ip().to_string(),
                log_prefix.clone(),
                Arc::clone(&shared),
            );

            match wrap_all(&shared.chains.wrappers, &log_prefix, Box::pin(serve))
                .await
            {
                Ok(()) => info!("{log_prefix} Normal client disconnect"),
                Err(e) => warn!("{log_prefix} Abnormal client disconnect: {e}"),
            }
        });
    }
}

/// Builds the acceptor used for STARTTLS from the PEM files named by `tls`,
/// resolving relative paths against `root`.
pub fn create_ssl_acceptor(
    tls: &TlsConfig,
    root: &Path,
) -> Result<SslAcceptor, Error> {
    let mut acceptor =
        SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())?;
    acceptor.set_private_key_file(root.join(&tls.private_key), SslFiletype::PEM)?;
    acceptor.set_certificate_chain_file(root.join(&tls.certificate_chain))?;
    acceptor.check_private_key()?;
    Ok(acceptor.build())
}

/// Completes on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        },
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}
