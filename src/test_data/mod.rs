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


/// Public key of "Test Recipient <b@y.test>", generated with GnuPG: an
/// RSA-2048 signing primary key with an RSA-2048 encryption subkey.
pub static RECIPIENT_PUBLIC_KEY: &str = include_str!("recipient-pub.asc");

/// The secret half of `RECIPIENT_PUBLIC_KEY`. Not passphrase-protected.
pub static RECIPIENT_SECRET_KEY: &str = include_str!("recipient-sec.asc");

/// A plain single-part message.
pub static PLAIN_MESSAGE: &[u8] = b"From: Alice <a@x.test>\r\n\
To: Bob <b@y.test>\r\n\
Subject: Hello\r\n\
Message-ID: <m1@x.test>\r\n\
\r\n\
Hello Bob.\r\n";

/// A reply to `PLAIN_MESSAGE` from a third party, who also copies someone
/// else in.
pub static REPLY_MESSAGE: &[u8] = b"From: Carol <c@z.test>\r\n\
To: Bob <b@y.test>, Alice <a@x.test>\r\n\
Cc: d@z.test\r\n\
Subject: Re: Hello\r\n\
Message-ID: <m2@z.test>\r\n\
In-Reply-To: <m1@x.test>\r\n\
References: <m1@x.test>\r\n\
\r\n\
Hello everyone.\r\n";

/// A PGP/MIME message which is not part of any conversation.
pub static ENCRYPTED_MESSAGE: &[u8] = b"From: Dave <d@z.test>\r\n\
To: b@y.test\r\n\
Subject: ...\r\n\
Message-ID: <m3@z.test>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/encrypted; boundary=\"enc\";\r\n\
\tprotocol=\"application/pgp-encrypted\"\r\n\
\r\n\
--enc\r\n\
Content-Type: application/pgp-encrypted\r\n\
\r\n\
Version: 1\r\n\
\r\n\
--enc\r\n\
Content-Type: application/octet-stream\r\n\
\r\n\
-----BEGIN PGP MESSAGE-----\r\n\
\r\n\
hQEMA0ZW\r\n\
-----END PGP MESSAGE-----\r\n\
\r\n\
--enc--\r\n";

lazy_static::lazy_static! {
    pub static ref CERTIFICATE_PRIVATE_KEY: openssl::pkey::PKey<openssl::pkey::Private> =
        openssl::pkey::PKey::from_rsa(openssl::rsa::Rsa::generate(2048).unwrap())
            .unwrap();
    /// A self-signed certificate for `CERTIFICATE_PRIVATE_KEY`, good for
    /// two days.
    pub static ref CERTIFICATE: openssl::x509::X509 = {
        let mut builder = openssl::x509::X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_pubkey(&CERTIFICATE_PRIVATE_KEY).unwrap();
        builder
            .set_not_before(&openssl::asn1::Asn1Time::from_unix(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&openssl::asn1::Asn1Time::days_from_now(2).unwrap())
            .unwrap();
        builder
            .sign(
                &CERTIFICATE_PRIVATE_KEY,
                openssl::hash::MessageDigest::sha256(),
            )
            .unwrap();
        builder.build()
    };
}
