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
use std::mem;
use std::pin::Pin;
use std::task;

use openssl::ssl::{Ssl, SslAcceptor};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_openssl::SslStream;

use crate::support::error::Error;

/// The I/O object a server connection runs over.
///
/// This exists to support switching from cleartext to TLS mid-stream without
/// the connection having to give up its buffered wrapper around it.
pub struct ServerIo<S> {
    mode: Mode<S>,
}

enum Mode<S> {
    Cleartext(S),
    Ssl(Box<SslStream<S>>),
    /// TLS set-up failed in a way that consumed the stream.
    Lost,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ServerIo<S> {
    pub fn new(stream: S) -> Self {
        Self {
            mode: Mode::Cleartext(stream),
        }
    }

    pub fn is_ssl(&self) -> bool {
        matches!(self.mode, Mode::Ssl(_))
    }

    pub fn ssl_string(&self) -> Option<String> {
        match self.mode {
            Mode::Cleartext(..) | Mode::Lost => None,
            Mode::Ssl(ref stream) => {
                let ssl = stream.ssl();
                let cipher = ssl.current_cipher();
                Some(format!(
                    "{tls_version}:{cipher}:{strength}",
                    tls_version = ssl.version_str(),
                    cipher = cipher.map_or("NONE", |c| c.name()),
                    strength = cipher.map_or(0, |c| c.bits().algorithm),
                ))
            },
        }
    }

    /// Performs server-side SSL setup with the given acceptor.
    ///
    /// If the handshake itself fails, `self` is left in SSL mode with an
    /// unusable session; the only thing left to do with it is
    /// `write_cleartext()`.
    pub async fn ssl_accept(
        &mut self,
        acceptor: &SslAcceptor,
    ) -> Result<(), Error> {
        let stream = match mem::replace(&mut self.mode, Mode::Lost) {
            Mode::Cleartext(stream) => stream,
            mode => {
                self.mode = mode;
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "TLS already active",
                )));
            },
        };

        let ssl = match Ssl::new(acceptor.context()) {
            Ok(ssl) => ssl,
            Err(e) => {
                self.mode = Mode::Cleartext(stream);
                return Err(Error::Ssl(e));
            },
        };

        let mut ssl_stream = Box::new(SslStream::new(ssl, stream)?);
        let result = Pin::new(&mut *ssl_stream)
            .accept()
            .await
            .map_err(Error::Handshake);
        self.mode = Mode::Ssl(ssl_stream);
        result
    }

    /// Writes `data` directly to the underlying stream, bypassing any TLS
    /// session.
    ///
    /// This is only meaningful for reporting a failed handshake, when the
    /// client may still be speaking cleartext.
    pub async fn write_cleartext(&mut self, data: &[u8]) -> io::Result<()> {
        let raw = match self.mode {
            Mode::Cleartext(ref mut s) => s,
            Mode::Ssl(ref mut s) => s.get_mut(),
            Mode::Lost => return Err(lost()),
        };
        raw.write_all(data).await?;
        raw.flush().await
    }
}

fn lost() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream lost in TLS set-up")
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for ServerIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        ctx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> task::Poll<io::Result<()>> {
        match self.get_mut().mode {
            Mode::Cleartext(ref mut s) => Pin::new(s).poll_read(ctx, buf),
            Mode::Ssl(ref mut s) => Pin::new(&mut **s).poll_read(ctx, buf),
            Mode::Lost => task::Poll::Ready(Err(lost())),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for ServerIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        ctx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> task::Poll<io::Result<usize>> {
        match self.get_mut().mode {
            Mode::Cleartext(ref mut s) => Pin::new(s).poll_write(ctx, buf),
            Mode::Ssl(ref mut s) => Pin::new(&mut **s).poll_write(ctx, buf),
            Mode::Lost => task::Poll::Ready(Err(lost())),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        ctx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<()>> {
        match self.get_mut().mode {
            Mode::Cleartext(ref mut s) => Pin::new(s).poll_flush(ctx),
            Mode::Ssl(ref mut s) => Pin::new(&mut **s).poll_flush(ctx),
            Mode::Lost => task::Poll::Ready(Err(lost())),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        ctx: &mut task::Context<'_>,
    ) -> task::Poll<io::Result<()>> {
        match self.get_mut().mode {
            Mode::Cleartext(ref mut s) => Pin::new(s).poll_shutdown(ctx),
            Mode::Ssl(ref mut s) => Pin::new(&mut **s).poll_shutdown(ctx),
            Mode::Lost => task::Poll::Ready(Ok(())),
        }
    }
}
