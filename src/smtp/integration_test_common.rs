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

use std::io::{self, BufRead, Read, Write};
use std::mem;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use openssl::ssl::{SslAcceptor, SslConnector, SslMethod, SslVerifyMode};
use tokio::net::TcpListener;

use super::chain::{CatchPanic, Chains};
use super::connection::Settings;
use super::received::AddReceivedHeader;
use super::server::SmtpServer;
use crate::delivery::model::*;
use crate::delivery::orchestrator::Deliverer;
use crate::delivery::resolver::{Resolver, INBOX, SPAM};
use crate::delivery::store::MemoryStore;
use crate::test_data::{
    CERTIFICATE, CERTIFICATE_PRIVATE_KEY, RECIPIENT_PUBLIC_KEY,
};

pub fn ssl_acceptor() -> SslAcceptor {
    let mut ssl_acceptor =
        SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server()).unwrap();
    ssl_acceptor
        .set_private_key(&CERTIFICATE_PRIVATE_KEY)
        .unwrap();
    ssl_acceptor.set_certificate(&CERTIFICATE).unwrap();
    ssl_acceptor.build()
}

pub fn settings() -> Settings {
    Settings {
        hostname: "mx.test".to_owned(),
        welcome_message: "mx.test ESMTP ready.".to_owned(),
        read_timeout: Duration::from_secs(30),
        write_timeout: Duration::from_secs(30),
        data_timeout: Duration::from_secs(30),
        max_recipients: 3,
        max_message_size: 1024,
        force_tls: false,
    }
}

/// A server on a loopback port, backed by a `MemoryStore` holding the single
/// account "bob" with address `b@y.test`.
///
/// The server runs until this is dropped.
pub struct TestServer {
    pub store: Arc<MemoryStore>,
    pub addr: SocketAddr,
    _runtime: tokio::runtime::Runtime,
}

impl TestServer {
    pub fn start(settings: Settings, max_connections: usize) -> Self {
        Self::start_with(settings, max_connections, Some(ssl_acceptor()))
    }

    pub fn start_with(
        settings: Settings,
        max_connections: usize,
        ssl_acceptor: Option<SslAcceptor>,
    ) -> Self {
        crate::init_test_log();

        let store = Arc::new(MemoryStore::new());
        add_bob(&store);

        let chains = Chains::new()
            .wrapper(CatchPanic)
            .recipient(Resolver::new(store.clone()))
            .delivery(AddReceivedHeader)
            .delivery(Deliverer::new(None, store.clone()));
        let server =
            SmtpServer::new(settings, max_connections, ssl_acceptor, chains);

        let runtime = crate::test_runtime();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        runtime.spawn(server.serve(listener, futures::future::pending()));

        Self {
            store,
            addr,
            _runtime: runtime,
        }
    }

    pub fn connect(&self, name: &'static str) -> SmtpClient {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(30)))
            .unwrap();
        SmtpClient::new(name, stream)
    }
}

fn add_bob(store: &MemoryStore) {
    store.add_account(Account {
        id: "bob".to_owned(),
        main_address: "b@y.test".to_owned(),
        status: "active".to_owned(),
    });
    store.add_address(Address {
        id: "b@y.test".to_owned(),
        styled_id: "b@y.test".to_owned(),
        owner: "bob".to_owned(),
        public_key: None,
    });
    store.add_key(Key {
        id: "bob-key".to_owned(),
        owner: "bob".to_owned(),
        date_created: chrono::Utc::now(),
        body: RECIPIENT_PUBLIC_KEY.as_bytes().to_vec(),
    });
    for name in [INBOX, SPAM] {
        store.add_label(Label {
            id: format!("bob-{name}"),
            owner: "bob".to_owned(),
            name: name.to_owned(),
            system: true,
        });
    }
}

pub trait ReadWrite: Read + Write {}
impl<T: Read + Write + ?Sized> ReadWrite for T {}

pub struct SmtpClient {
    name: &'static str,
    io: Box<dyn ReadWrite>,
}

impl SmtpClient {
    pub fn new(name: &'static str, io: impl ReadWrite + 'static) -> Self {
        Self {
            name,
            io: Box::new(io),
        }
    }

    /// Read responses from the server up to and including the final
    /// response.
    ///
    /// This creates a `BufReader` over `io` and will lose any data which was
    /// buffered after the last read line. This is fine since the tests only
    /// pipeline where they read every response at once.
    pub fn read_responses(&mut self) -> Vec<String> {
        let mut ret = Vec::<String>::new();
        let mut r = io::BufReader::new(&mut self.io);

        loop {
            let mut line = String::new();
            r.read_line(&mut line).unwrap();
            println!("[{}] >> {:?}", self.name, line);

            if line.is_empty() {
                panic!("Unexpected EOF");
            }

            let last = " " == &line[3..4];
            ret.push(line);

            if last {
                break;
            }
        }

        ret
    }

    /// Returns whether the server has closed the connection, consuming
    /// anything it still had to say.
    pub fn is_closed(&mut self) -> bool {
        let mut rest = Vec::new();
        match self.io.read_to_end(&mut rest) {
            Ok(_) => {
                println!("[{}] >> {:?} <EOF>", self.name, rest);
                true
            },
            Err(e) => {
                println!("[{}] >> error {}", self.name, e);
                io::ErrorKind::ConnectionReset == e.kind()
            },
        }
    }

    /// Writes the given complete line to the server.
    pub fn write_line(&mut self, s: &str) {
        assert!(s.ends_with('\n'));
        for line in s.split_inclusive('\n') {
            println!("[{}] << {:?}", self.name, line);
        }
        self.io.write_all(s.as_bytes()).unwrap();
    }

    /// Writes the given raw data to the server.
    pub fn write_raw(&mut self, data: &[u8]) {
        println!("[{}] << [{} bytes]", self.name, data.len());
        self.io.write_all(data).unwrap();
    }

    /// Skip the server greeting, then send the given command and consume the
    /// responses. Assert that the command succeeds.
    pub fn skip_pleasantries(&mut self, cmd: &str) {
        self.read_responses();
        self.write_line(&format!("{}\r\n", cmd));
        let responses = self.read_responses();
        assert!(responses.last().unwrap().starts_with("250"));
    }

    /// Send a command which is expected to have one response with the given
    /// prefix.
    pub fn simple_command(&mut self, command: &str, prefix: &str) {
        self.write_line(&format!("{}\r\n", command));
        let responses = self.read_responses();
        assert_eq!(1, responses.len());
        assert!(
            responses[0].starts_with(prefix),
            "Expected {:?}, got {:?}",
            prefix,
            responses[0],
        );
    }

    /// Performs a TLS handshake on the connection.
    pub fn start_tls(&mut self) {
        let mut connector = SslConnector::builder(SslMethod::tls()).unwrap();
        connector.set_verify(SslVerifyMode::NONE);

        println!("[{}] <> Start TLS handshake", self.name);
        let cxn = mem::replace(&mut self.io, Box::new(io::empty()));
        let cxn = connector
            .build()
            .connect("localhost", cxn)
            .map_err(|_| "SSL handshake failed")
            .unwrap();
        println!("[{}] <> TLS handshake succeeded", self.name);
        self.io = Box::new(cxn);
    }

    /// Skip the greeting, perform an EHLO, STARTTLS, and the second EHLO.
    pub fn skip_pleasantries_with_tls(&mut self, command: &str) {
        self.skip_pleasantries(command);
        self.simple_command("STARTTLS", "220 ");
        self.start_tls();
        self.write_line(&format!("{}\r\n", command));
        let responses = self.read_responses();
        assert!(responses.last().unwrap().starts_with("250"));
    }

    /// Sends `message` as the DATA payload, dot-stuffing it and appending
    /// the terminator, and returns the final reply.
    pub fn send_data(&mut self, message: &[u8]) -> String {
        self.simple_command("DATA", "354 ");

        let mut payload = Vec::new();
        for line in message.split_inclusive(|&b| b'\n' == b) {
            if line.starts_with(b".") {
                payload.push(b'.');
            }
            payload.extend_from_slice(line);
        }
        if !payload.ends_with(b"\n") {
            payload.extend_from_slice(b"\r\n");
        }
        payload.extend_from_slice(b".\r\n");
        self.write_raw(&payload);

        let mut responses = self.read_responses();
        assert_eq!(1, responses.len());
        responses.pop().unwrap()
    }
}
