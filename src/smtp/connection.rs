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

//! The per-connection SMTP command loop.

use std::io;
use std::str;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use openssl::ssl::SslAcceptor;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite,
    AsyncWriteExt, BufReader, BufWriter,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::chain::*;
use super::codes::*;
use super::syntax::*;
use crate::support::{
    address::parse_path, async_io::ServerIo, error::Error,
    log_prefix::LogPrefix, system_config::SmtpConfig,
};

const MAX_LINE: usize = 1024;
/// The most data read from a DATA payload in one go, whether or not a line
/// ending was found.
const MAX_DATA_CHUNK: u64 = 8192;

/// Connection parameters, with configuration defaults already applied.
#[derive(Clone, Debug)]
pub struct Settings {
    pub hostname: String,
    pub welcome_message: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub data_timeout: Duration,
    pub max_recipients: usize,
    pub max_message_size: usize,
    pub force_tls: bool,
}

impl Settings {
    pub fn from_config(config: &SmtpConfig) -> Self {
        Self {
            hostname: config.hostname().to_owned(),
            welcome_message: config.welcome_message(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            data_timeout: config.data_timeout(),
            max_recipients: config.max_recipients(),
            max_message_size: config.max_message_size(),
            force_tls: config.force_tls,
        }
    }
}

/// Everything the connections of one server share.
pub struct Shared {
    pub settings: Settings,
    /// If `None`, STARTTLS is neither offered nor accepted.
    pub ssl_acceptor: Option<SslAcceptor>,
    pub chains: Chains,
}

struct Connection<S> {
    io: BufReader<BufWriter<ServerIo<S>>>,
    shared: Arc<Shared>,
    cx: MailContext,

    deadline_tx: mpsc::Sender<Option<Instant>>,
    quit: bool,
}

/// Serves one client over `stream` until it quits, the connection fails, or
/// a deadline expires.
pub async fn serve<S>(
    stream: S,
    peer: String,
    log_prefix: LogPrefix,
    shared: Arc<Shared>,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (deadline_tx, deadline_rx) = mpsc::channel(1);

    let session = SessionInfo {
        helo: String::new(),
        protocol: Protocol::Smtp,
        peer,
        tls: None,
        log_prefix,
        hostname: shared.settings.hostname.clone(),
    };

    let connection = Connection {
        io: BufReader::new(BufWriter::new(ServerIo::new(stream))),
        shared,
        cx: MailContext::new(session),
        deadline_tx,
        quit: false,
    };

    tokio::select! {
        r = connection.run() => r,
        _ = idle_timer(deadline_rx) => {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "Connection deadline expired",
            )))
        },
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Connection<S> {
    async fn run(mut self) -> Result<(), Error> {
        let welcome = self.shared.settings.welcome_message.clone();
        self.reply(pc::ServiceReady, &welcome).await?;

        let mut buffer = Vec::new();
        while !self.quit {
            self.run_command(&mut buffer).await?;
        }

        let _ = self.io.shutdown().await;
        Ok(())
    }

    async fn run_command(&mut self, buffer: &mut Vec<u8>) -> Result<(), Error> {
        buffer.clear();

        (&mut self.io)
            .take(MAX_LINE as u64)
            .read_until(b'\n', buffer)
            .await?;
        if buffer.is_empty() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF reached at start of command",
            )));
        }

        if !buffer.ends_with(b"\n") {
            if buffer.len() >= MAX_LINE {
                self.reply(pc::CommandSyntaxError, "Line too long").await?;

                // Skip the rest of the line
                while !buffer.is_empty() && !buffer.ends_with(b"\n") {
                    buffer.clear();
                    (&mut self.io)
                        .take(MAX_LINE as u64)
                        .read_until(b'\n', buffer)
                        .await?;
                }

                self.reset();
                return Ok(());
            } else {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF reached within command",
                )));
            }
        }

        let line_ending_len = if buffer.ends_with(b"\r\n") { 2 } else { 1 };
        let command_line = &buffer[..buffer.len() - line_ending_len];
        if command_line.contains(&0) {
            warn!(
                "{} Remote is speaking binary, closing connection",
                self.cx.session.log_prefix,
            );
            self.quit = true;
            return Ok(());
        }

        let Ok(command_line) = str::from_utf8(command_line) else {
            warn!(
                "{} Non-UTF-8 command received",
                self.cx.session.log_prefix
            );
            return self.reply(pc::CommandSyntaxError, "Malformed UTF-8").await;
        };

        let command = match command_line.parse::<Command>() {
            Ok(command) => command,
            Err(()) => Command::Unknown,
        };

        match command {
            Command::Helo(origin) => self.cmd_helo(origin, Protocol::Smtp).await,
            Command::Ehlo(origin) => {
                self.cmd_helo(origin, Protocol::Esmtp).await
            },
            Command::MailFrom(args) => self.cmd_mail_from(args).await,
            Command::Recipient(args) => self.cmd_recipient(args).await,
            Command::Data => self.cmd_data().await,
            Command::Reset => {
                self.reset();
                self.reply(pc::Ok, "Go ahead.").await
            },
            Command::Noop => self.reply(pc::Ok, "Go ahead.").await,
            Command::Quit => self.reply(pc::ServiceClosing, "OK, bye").await,
            Command::StartTls => self.cmd_start_tls().await,
            Command::Unknown => {
                self.reply(pc::CommandNotImplemented, "Unsupported command.")
                    .await
            },
        }
    }

    async fn cmd_helo(
        &mut self,
        origin: Result<String, ArgError>,
        protocol: Protocol,
    ) -> Result<(), Error> {
        let origin = match origin {
            Ok(origin) => origin,
            Err(e) => {
                return self
                    .reply(pc::CommandNotImplemented, e.reply_text())
                    .await
            },
        };

        if self.greeted() {
            self.reset();
        }

        self.cx.session.log_prefix.set_helo(origin.clone());
        self.cx.session.helo = origin;
        self.cx.session.protocol = protocol;

        if Protocol::Smtp == protocol {
            return self.reply(pc::Ok, "Go ahead.").await;
        }

        let mut lines = vec![
            self.shared.settings.hostname.clone(),
            format!("SIZE {}", self.shared.settings.max_message_size),
            "8BITMIME".to_owned(),
            "PIPELINING".to_owned(),
        ];
        if self.shared.ssl_acceptor.is_some() && !self.transport().is_ssl() {
            lines.push("STARTTLS".to_owned());
        }

        self.reply_lines(pc::Ok, &lines).await
    }

    async fn cmd_mail_from(
        &mut self,
        args: Result<MailArgs, ArgError>,
    ) -> Result<(), Error> {
        if !self.greeted() {
            return self
                .reply(
                    pc::CommandNotImplemented,
                    "Please introduce yourself first.",
                )
                .await;
        }

        if self.shared.settings.force_tls && !self.transport().is_ssl() {
            return self
                .reply(
                    pc::AuthenticationRequired,
                    "Must issue a STARTTLS command first",
                )
                .await;
        }

        let args = match args {
            Ok(args) => args,
            Err(e) => {
                return self
                    .reply(pc::CommandNotImplemented, e.reply_text())
                    .await
            },
        };

        for warning in &args.warnings {
            warn!("{} {}", self.cx.session.log_prefix, warning);
        }

        if self.cx.transaction.is_some() {
            return self
                .reply(
                    pc::CommandNotImplemented,
                    "Duplicate MAIL. Please reset the envelope.",
                )
                .await;
        }

        let sender = if "<>" == args.path {
            String::new()
        } else {
            match parse_path(&args.path) {
                Ok(sender) => sender,
                Err(e) => {
                    return self
                        .reply(pc::CommandNotImplemented, &e.to_string())
                        .await
                },
            }
        };

        if args.size.unwrap_or(0) > self.shared.settings.max_message_size as u64
        {
            return self.reply_too_big().await;
        }

        self.cx.transaction = Some(Transaction::new(sender));
        let shared = Arc::clone(&self.shared);
        match self.run_chain(&shared.chains.sender).await {
            Ok(()) => self.reply(pc::Ok, "Go ahead.").await,
            Err(response) => {
                self.cx.transaction = None;
                self.respond(response).await
            },
        }
    }

    async fn cmd_recipient(
        &mut self,
        args: Result<(String, Vec<String>), ArgError>,
    ) -> Result<(), Error> {
        let Some(ref transaction) = self.cx.transaction else {
            return self
                .reply(pc::CommandNotImplemented, "Missing MAIL FROM command.")
                .await;
        };

        if transaction.envelope.recipients.len()
            >= self.shared.settings.max_recipients
        {
            return self
                .reply(pc::InsufficientStorage, "Too many recipients.")
                .await;
        }

        let (path, warnings) = match args {
            Ok(args) => args,
            Err(e) => {
                return self
                    .reply(pc::CommandNotImplemented, e.reply_text())
                    .await
            },
        };

        for warning in &warnings {
            warn!("{} {}", self.cx.session.log_prefix, warning);
        }

        let recipient = match parse_path(&path) {
            Ok(recipient) => recipient,
            Err(e) => {
                return self
                    .reply(pc::CommandNotImplemented, &e.to_string())
                    .await
            },
        };

        self.cx.recipient = Some(recipient.clone());
        let shared = Arc::clone(&self.shared);
        let result = self.run_chain(&shared.chains.recipient).await;
        self.cx.recipient = None;

        match result {
            Ok(()) => {
                if let Some(ref mut transaction) = self.cx.transaction {
                    transaction.envelope.recipients.push(recipient);
                }
                self.reply(pc::Ok, "Go ahead.").await
            },
            Err(response) => self.respond(response).await,
        }
    }

    async fn cmd_data(&mut self) -> Result<(), Error> {
        if self
            .cx
            .transaction
            .as_ref()
            .map_or(true, |t| t.envelope.recipients.is_empty())
        {
            return self
                .reply(pc::CommandNotImplemented, "Missing RCPT TO command.")
                .await;
        }

        self.reply(
            pc::StartMailInput,
            "Go ahead. End your data with <CR><LF>.<CR><LF>",
        )
        .await?;
        self.set_deadline(Some(self.shared.settings.data_timeout))
            .await;

        let mut data = Vec::new();
        let within_limit = copy_with_dot_stuffing(
            &mut data,
            &mut self.io,
            self.shared.settings.max_message_size,
        )
        .await?;

        if !within_limit {
            info!(
                "{} Rejected message larger than {} bytes",
                self.cx.session.log_prefix,
                self.shared.settings.max_message_size,
            );
            self.reset();
            return self.reply_too_big().await;
        }

        if let Some(ref mut transaction) = self.cx.transaction {
            transaction.envelope.data = data;
        }

        let shared = Arc::clone(&self.shared);
        let result = self.run_chain(&shared.chains.delivery).await;
        self.reset();

        match result {
            Ok(()) => self.reply(pc::Ok, "Thank you.").await,
            Err(response) => self.respond(response).await,
        }
    }

    async fn cmd_start_tls(&mut self) -> Result<(), Error> {
        if self.transport().is_ssl() {
            return self
                .reply(pc::CommandNotImplemented, "Already running in TLS")
                .await;
        }

        let shared = Arc::clone(&self.shared);
        let Some(ref acceptor) = shared.ssl_acceptor else {
            return self
                .reply(pc::CommandNotImplemented, "TLS not supported")
                .await;
        };

        self.reply(pc::ServiceReady, "Go ahead").await?;
        info!("{} Start TLS handshake", self.cx.session.log_prefix);

        // Anything the client pipelined after STARTTLS arrived in cleartext
        // and must not be run once TLS is up.
        let pipelined = self.io.buffer().len();
        if pipelined > 0 {
            warn!(
                "{} Discarding {} byte(s) sent before the TLS handshake",
                self.cx.session.log_prefix, pipelined,
            );
            AsyncBufReadExt::consume(&mut self.io, pipelined);
        }

        self.set_deadline(Some(self.shared.settings.read_timeout))
            .await;
        if let Err(e) = self.transport_mut().ssl_accept(acceptor).await {
            warn!(
                "{} TLS handshake failed: {}",
                self.cx.session.log_prefix, e
            );
            let _ = self
                .transport_mut()
                .write_cleartext(b"550 Handshake error\r\n")
                .await;
            self.quit = true;
            return Ok(());
        }

        self.reset();
        self.cx.session.helo.clear();
        self.cx.session.tls = self.transport().ssl_string();
        self.cx.session.log_prefix.set_tls();
        info!(
            "{} TLS handshake completed: {}",
            self.cx.session.log_prefix,
            self.cx.session.tls.as_deref().unwrap_or_default(),
        );
        self.set_deadline(Some(self.shared.settings.read_timeout))
            .await;

        Ok(())
    }

    fn transport(&self) -> &ServerIo<S> {
        self.io.get_ref().get_ref()
    }

    fn transport_mut(&mut self) -> &mut ServerIo<S> {
        self.io.get_mut().get_mut()
    }

    fn greeted(&self) -> bool {
        !self.cx.session.helo.is_empty()
    }

    fn reset(&mut self) {
        self.cx.transaction = None;
        self.cx.recipient = None;
    }

    /// Runs `links` over the mail context with the idle timer paused.
    async fn run_chain(
        &mut self,
        links: &[Arc<dyn MailHandler>],
    ) -> Result<(), SmtpResponse> {
        self.set_deadline(None).await;
        run_chain(links, &mut self.cx).await
    }

    async fn reply_too_big(&mut self) -> Result<(), Error> {
        let text = format!(
            "Message exceeded max message size of {} bytes.",
            self.shared.settings.max_message_size,
        );
        self.reply(pc::ExceededStorageAllocation, &text).await
    }

    async fn respond(&mut self, response: SmtpResponse) -> Result<(), Error> {
        self.reply(response.0, &response.1).await
    }

    async fn reply(
        &mut self,
        code: PrimaryCode,
        text: &str,
    ) -> Result<(), Error> {
        self.reply_lines(code, &[text]).await
    }

    /// Sends a reply of one or more lines, then flushes.
    ///
    /// The write deadline covers sending; once the reply is out, the read
    /// deadline starts for the client's next command.
    async fn reply_lines(
        &mut self,
        code: PrimaryCode,
        lines: &[impl AsRef<str>],
    ) -> Result<(), Error> {
        use std::fmt::Write as _;

        if code == pc::ServiceClosing || code == pc::ServiceNotAvailableClosing
        {
            self.quit = true;
        }

        let mut s = String::new();
        for (ix, line) in lines.iter().enumerate() {
            let indicator = if ix + 1 == lines.len() { ' ' } else { '-' };
            let _ = write!(s, "{}{}{}\r\n", code as u16, indicator, line.as_ref());
        }

        self.set_deadline(Some(self.shared.settings.write_timeout))
            .await;
        self.io.write_all(s.as_bytes()).await?;
        self.io.flush().await?;
        self.set_deadline(Some(self.shared.settings.read_timeout))
            .await;

        Ok(())
    }

    async fn set_deadline(&mut self, timeout: Option<Duration>) {
        let _ = self
            .deadline_tx
            .send(timeout.map(|t| Instant::now() + t))
            .await;
    }
}

/// Copies a DATA payload from `src` to `dst`, stripping dot stuffing,
/// consuming up to and including the line with just `.`.
///
/// Both CRLF and bare LF end lines, and line endings are copied unchanged.
/// At most `max` bytes are kept. If the payload is longer, the rest is still
/// consumed up to the terminator, `dst` is cleared, and `false` is returned.
async fn copy_with_dot_stuffing(
    dst: &mut Vec<u8>,
    src: &mut (impl AsyncBufRead + Unpin),
    max: usize,
) -> io::Result<bool> {
    // Whether the next read starts a line; i.e., true at the beginning of
    // text and after each line ending.
    let mut start_of_line = true;
    let mut overflow = false;
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        (&mut *src)
            .take(MAX_DATA_CHUNK)
            .read_until(b'\n', &mut buffer)
            .await?;

        if buffer.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF encountered in DATA payload",
            ));
        }

        if start_of_line && (b".\r\n" == &buffer[..] || b".\n" == &buffer[..])
        {
            break;
        }

        let content = if start_of_line && b'.' == buffer[0] {
            &buffer[1..]
        } else {
            &buffer[..]
        };

        if !overflow {
            if dst.len() + content.len() > max {
                overflow = true;
                dst.clear();
            } else {
                dst.extend_from_slice(content);
            }
        }

        start_of_line = buffer.ends_with(b"\n");
    }

    Ok(!overflow)
}

// Runs until either the deadline channel is closed or the current deadline has
// expired. A `None` deadline pauses the timer until the next update.
async fn idle_timer(mut deadline_rx: mpsc::Receiver<Option<Instant>>) {
    let mut deadline = None::<Instant>;

    loop {
        let update = match deadline {
            Some(d) => {
                match tokio::time::timeout_at(d, deadline_rx.recv()).await {
                    Err(_) => return, // Timed out
                    Ok(update) => update,
                }
            },
            None => deadline_rx.recv().await,
        };

        match update {
            None => return, // Done
            Some(d) => deadline = d,
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn copy_with_dot_stuffing_sync(
        stuffed: &[u8],
        buffer_size: usize,
        max: usize,
    ) -> (bool, Vec<u8>, Vec<u8>) {
        let mut decoded_bytes = Vec::<u8>::new();
        let mut reader =
            tokio::io::BufReader::with_capacity(buffer_size, stuffed);
        let within_limit = futures::executor::block_on(
            copy_with_dot_stuffing(&mut decoded_bytes, &mut reader, max),
        )
        .unwrap();

        let mut rest = Vec::new();
        futures::executor::block_on(reader.read_to_end(&mut rest)).unwrap();
        (within_limit, decoded_bytes, rest)
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 4096,
            ..ProptestConfig::default()
        })]

        #[test]
        fn dot_stuffing_decodes_properly(
            content in "[x.\r\n]{0,100}\r\n",
            buffer_size in 1usize..=32,
        ) {
            let mut stuffed = content.replace("\n.", "\n..");
            if stuffed.starts_with(".") {
                stuffed = format!(".{}", stuffed);
            }
            stuffed.push_str(".\r\nNOOP\r\n");

            let (within_limit, decoded_bytes, rest) =
                copy_with_dot_stuffing_sync(
                    stuffed.as_bytes(),
                    buffer_size,
                    usize::MAX,
                );

            assert!(within_limit);
            assert_eq!(content, str::from_utf8(&decoded_bytes).unwrap());
            assert_eq!(b"NOOP\r\n", &rest[..]);
        }
    }

    #[test]
    fn bare_lf_terminator() {
        let (within_limit, decoded, rest) =
            copy_with_dot_stuffing_sync(b"foo\n..bar\n.\nQUIT\n", 64, 100);
        assert!(within_limit);
        assert_eq!(b"foo\n.bar\n", &decoded[..]);
        assert_eq!(b"QUIT\n", &rest[..]);
    }

    #[test]
    fn size_limit() {
        let payload = b"0123456789\r\n..\r\n.\r\n";

        // 12 + 3 bytes after unstuffing
        let (within_limit, decoded, _) =
            copy_with_dot_stuffing_sync(payload, 64, 15);
        assert!(within_limit);
        assert_eq!(b"0123456789\r\n.\r\n", &decoded[..]);

        let (within_limit, decoded, rest) =
            copy_with_dot_stuffing_sync(payload, 64, 14);
        assert!(!within_limit);
        assert!(decoded.is_empty());
        assert!(rest.is_empty());
    }

    #[test]
    fn long_lines_are_read_in_chunks() {
        let mut payload = vec![b'x'; 3 * MAX_DATA_CHUNK as usize + 7];
        payload.extend_from_slice(b"\r\n.\r\n");

        let (within_limit, decoded, rest) =
            copy_with_dot_stuffing_sync(&payload, 4096, usize::MAX);
        assert!(within_limit);
        assert_eq!(&payload[..payload.len() - 3], &decoded[..]);
        assert!(rest.is_empty());
    }

    #[test]
    fn eof_inside_payload_is_an_error() {
        let mut reader = tokio::io::BufReader::new(&b"foo\r\nbar"[..]);
        let mut dst = Vec::new();
        let result = futures::executor::block_on(copy_with_dot_stuffing(
            &mut dst,
            &mut reader,
            100,
        ));
        assert_eq!(
            io::ErrorKind::UnexpectedEof,
            result.unwrap_err().kind()
        );
    }

    #[test]
    fn idle_timer_pauses_and_expires() {
        let rt = crate::test_runtime();
        rt.block_on(async {
            let (tx, rx) = mpsc::channel(1);
            let timer = tokio::spawn(idle_timer(rx));

            tx.send(None).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(!timer.is_finished());

            tx.send(Some(Instant::now() + Duration::from_millis(10)))
                .await
                .unwrap();
            tokio::time::timeout(Duration::from_secs(5), timer)
                .await
                .unwrap()
                .unwrap();
        });
    }
}
