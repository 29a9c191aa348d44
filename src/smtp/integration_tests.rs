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

use super::integration_test_common::*;
use crate::crypt::manifest::test::open;
use crate::test_data::PLAIN_MESSAGE;

const RECEIVED_PREFIX: &str =
    "Received: from client.test [127.0.0.1] by mx.test with ESMTP;\r\n\t";

#[test]
fn ehlo_advertises_extensions() {
    let server = TestServer::start(settings(), 10);
    let mut cxn = server.connect("ehlo");

    assert_eq!(vec!["220 mx.test ESMTP ready.\r\n"], cxn.read_responses());
    cxn.write_line("EHLO client.test\r\n");
    assert_eq!(
        vec![
            "250-mx.test\r\n",
            "250-SIZE 1024\r\n",
            "250-8BITMIME\r\n",
            "250-PIPELINING\r\n",
            "250 STARTTLS\r\n",
        ],
        cxn.read_responses()
    );

    cxn.simple_command("STARTTLS", "220 Go ahead");
    cxn.start_tls();
    cxn.write_line("EHLO client.test\r\n");
    let responses = cxn.read_responses();
    assert_eq!("250 PIPELINING\r\n", responses.last().unwrap());
    assert!(!responses.iter().any(|r| r.contains("STARTTLS")));

    cxn.simple_command("HELO client.test", "250 Go ahead.");
    cxn.simple_command("QUIT", "221 OK, bye");
    assert!(cxn.is_closed());
}

#[test]
fn command_ordering() {
    let server = TestServer::start(settings(), 10);
    let mut cxn = server.connect("ordering");
    cxn.read_responses();

    cxn.simple_command(
        "MAIL FROM:<a@x.test>",
        "502 Please introduce yourself first.",
    );
    cxn.simple_command("HELO client.test", "250 ");
    cxn.simple_command("RCPT TO:<b@y.test>", "502 Missing MAIL FROM command.");
    cxn.simple_command("DATA", "502 Missing RCPT TO command.");
    cxn.simple_command("MAIL FROM:<a@x.test>", "250 ");
    cxn.simple_command(
        "MAIL FROM:<a@x.test>",
        "502 Duplicate MAIL. Please reset the envelope.",
    );
    cxn.simple_command("RCPT TO:<nobody@y.test>", "550 No such address");
    cxn.simple_command("RCPT TO:<not an address>", "502 ");
    cxn.simple_command("DATA", "502 Missing RCPT TO command.");
    cxn.simple_command("RSET", "250 Go ahead.");
    cxn.simple_command("RCPT TO:<b@y.test>", "502 Missing MAIL FROM command.");
    cxn.simple_command("NOOP", "250 Go ahead.");
    cxn.simple_command("VRFY b@y.test", "502 Unsupported command.");
    cxn.simple_command("QUIT", "221 ");
    assert!(cxn.is_closed());
}

#[test]
fn too_many_recipients() {
    let server = TestServer::start(settings(), 10);
    let mut cxn = server.connect("recipients");
    cxn.skip_pleasantries("EHLO client.test");

    cxn.simple_command("MAIL FROM:<a@x.test>", "250 ");
    for _ in 0..3 {
        cxn.simple_command("RCPT TO:<b@y.test>", "250 ");
    }
    cxn.simple_command("RCPT TO:<b@y.test>", "452 Too many recipients.");
}

#[test]
fn message_size_limits() {
    let server = TestServer::start(settings(), 10);
    let mut cxn = server.connect("size");
    cxn.skip_pleasantries("EHLO client.test");

    cxn.simple_command(
        "MAIL FROM:<a@x.test> SIZE=1025",
        "552 Message exceeded max message size of 1024 bytes.",
    );

    let header = b"From: a@x.test\r\nTo: b@y.test\r\nSubject: pad\r\n\r\n";
    let mut message = header.to_vec();
    message.resize(1022, b'x');
    message.extend_from_slice(b"\r\n");
    assert_eq!(1024, message.len());

    cxn.simple_command("MAIL FROM:<a@x.test> SIZE=1024", "250 ");
    cxn.simple_command("RCPT TO:<b@y.test>", "250 ");
    assert_eq!("250 Thank you.\r\n", cxn.send_data(&message));

    message.insert(header.len(), b'x');
    cxn.simple_command("MAIL FROM:<a@x.test>", "250 ");
    cxn.simple_command("RCPT TO:<b@y.test>", "250 ");
    assert_eq!(
        "552 Message exceeded max message size of 1024 bytes.\r\n",
        cxn.send_data(&message)
    );

    // The envelope is gone, but the session carries on
    cxn.simple_command("DATA", "502 Missing RCPT TO command.");
    cxn.simple_command("MAIL FROM:<a@x.test>", "250 ");

    assert_eq!(1, server.store.emails_of("bob").len());
}

#[test]
fn end_to_end_delivery() {
    let server = TestServer::start(settings(), 10);
    let mut cxn = server.connect("delivery");
    cxn.skip_pleasantries("EHLO client.test");

    cxn.simple_command("MAIL FROM:<>", "250 ");
    cxn.simple_command("RCPT TO:<B@Y.TEST>", "250 ");
    assert_eq!("250 Thank you.\r\n", cxn.send_data(PLAIN_MESSAGE));
    cxn.simple_command("QUIT", "221 ");

    let emails = server.store.emails_of("bob");
    assert_eq!(1, emails.len());
    assert_eq!("m1@x.test", emails[0].message_id);

    let (_, plaintext) = open(&emails[0].body, &emails[0].manifest);
    let plaintext = String::from_utf8(plaintext).unwrap();
    assert!(plaintext.starts_with(RECEIVED_PREFIX), "{plaintext:?}");
    assert!(plaintext.ends_with(
        std::str::from_utf8(PLAIN_MESSAGE).unwrap().trim_end()
    ));
    assert!(!plaintext.contains("(version="));
}

#[test]
fn dot_stuffed_lines_are_restored() {
    let server = TestServer::start(settings(), 10);
    let mut cxn = server.connect("dots");
    cxn.skip_pleasantries("HELO client.test");

    cxn.simple_command("MAIL FROM:<a@x.test>", "250 ");
    cxn.simple_command("RCPT TO:<b@y.test>", "250 ");
    assert_eq!(
        "250 Thank you.\r\n",
        cxn.send_data(b"Subject: dots\r\n\r\n.\r\n..leading\r\nend\r\n")
    );

    let emails = server.store.emails_of("bob");
    let (_, plaintext) = open(&emails[0].body, &emails[0].manifest);
    assert!(plaintext.ends_with(b"\r\nSubject: dots\r\n\r\n.\r\n..leading\r\nend"));
}

#[test]
fn starttls_session() {
    let server = TestServer::start(settings(), 10);
    let mut cxn = server.connect("starttls");
    cxn.skip_pleasantries("EHLO client.test");

    cxn.simple_command("MAIL FROM:<a@x.test>", "250 ");
    cxn.simple_command("STARTTLS", "220 Go ahead");
    cxn.start_tls();

    // Both the envelope and the greeting are forgotten
    cxn.simple_command(
        "MAIL FROM:<a@x.test>",
        "502 Please introduce yourself first.",
    );
    cxn.simple_command("EHLO client.test", "250 ");
    cxn.simple_command("STARTTLS", "502 Already running in TLS");
    cxn.simple_command("MAIL FROM:<a@x.test>", "250 ");
    cxn.simple_command("RCPT TO:<b@y.test>", "250 ");
    assert_eq!("250 Thank you.\r\n", cxn.send_data(PLAIN_MESSAGE));

    let emails = server.store.emails_of("bob");
    let (_, plaintext) = open(&emails[0].body, &emails[0].manifest);
    let plaintext = String::from_utf8(plaintext).unwrap();
    assert!(plaintext.starts_with(
        "Received: from client.test [127.0.0.1] by mx.test with ESMTP;\r\n\
         \t(version=TLSv1."
    ));
}

#[test]
fn commands_pipelined_before_tls_are_dropped() {
    let server = TestServer::start(settings(), 10);
    let mut cxn = server.connect("tls-pipelining");
    cxn.skip_pleasantries("EHLO client.test");

    cxn.write_raw(b"STARTTLS\r\nNOOP injected\r\n");
    assert_eq!(vec!["220 Go ahead\r\n"], cxn.read_responses());
    cxn.start_tls();

    // The first reply over TLS must answer the first command sent over TLS
    cxn.simple_command("VRFY b@y.test", "502 Unsupported command.");
    cxn.simple_command(
        "MAIL FROM:<a@x.test>",
        "502 Please introduce yourself first.",
    );
    cxn.simple_command("QUIT", "221 ");
    assert!(cxn.is_closed());
}

#[test]
fn force_tls() {
    let mut settings = settings();
    settings.force_tls = true;
    let server = TestServer::start(settings, 10);
    let mut cxn = server.connect("force-tls");
    cxn.skip_pleasantries("EHLO client.test");

    cxn.simple_command(
        "MAIL FROM:<a@x.test>",
        "530 Must issue a STARTTLS command first",
    );
    cxn.simple_command("STARTTLS", "220 ");
    cxn.start_tls();
    cxn.simple_command("EHLO client.test", "250 ");
    cxn.simple_command("MAIL FROM:<a@x.test>", "250 ");
}

#[test]
fn starttls_unsupported() {
    let server = TestServer::start_with(settings(), 10, None);
    let mut cxn = server.connect("no-tls");
    cxn.read_responses();

    cxn.write_line("EHLO client.test\r\n");
    let responses = cxn.read_responses();
    assert_eq!("250 PIPELINING\r\n", responses.last().unwrap());
    cxn.simple_command("STARTTLS", "502 TLS not supported");
}

#[test]
fn failed_handshake_ends_connection() {
    let server = TestServer::start(settings(), 10);
    let mut cxn = server.connect("bad-tls");
    cxn.skip_pleasantries("EHLO client.test");

    cxn.simple_command("STARTTLS", "220 ");
    cxn.write_line("EHLO client.test\r\n");
    assert!(cxn.is_closed());
}

#[test]
fn connection_limit() {
    let server = TestServer::start(settings(), 1);
    let mut first = server.connect("first");
    first.read_responses();

    let mut second = server.connect("second");
    assert_eq!(
        vec!["421 Maximum connections count exceeded. Try again later.\r\n"],
        second.read_responses()
    );
    assert!(second.is_closed());

    first.simple_command("NOOP", "250 ");
}

#[test]
fn bad_input() {
    let server = TestServer::start(settings(), 10);
    let mut cxn = server.connect("bad-input");
    cxn.skip_pleasantries("HELO client.test");
    cxn.simple_command("MAIL FROM:<a@x.test>", "250 ");

    cxn.write_line(&format!("NOOP {}\r\n", "x".repeat(2000)));
    assert_eq!(vec!["500 Line too long\r\n"], cxn.read_responses());
    // The over-long line also dropped the envelope
    cxn.simple_command("RCPT TO:<b@y.test>", "502 Missing MAIL FROM command.");

    cxn.write_raw(b"NOOP \xff\r\n");
    assert_eq!(vec!["500 Malformed UTF-8\r\n"], cxn.read_responses());
    cxn.simple_command("NOOP", "250 ");

    cxn.write_raw(b"NO\0OP\r\n");
    assert!(cxn.is_closed());
}
