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

//! The per-recipient manifest and its OpenPGP envelope.
//!
//! A manifest carries everything needed to read an `Email` body: the chunked
//! cipher key and nonce, and the structure of the plaintext. It is the only
//! place the key exists, and it is stored encrypted to the recipient's
//! public key.

use std::io::Cursor;

use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::ser::Serialize as _;
use pgp::types::PublicKeyTrait;
use pgp::{Deserializable, Message, SignedPublicKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use super::chunked::{self, Secret};
use crate::mime::analysis::EmailNode;
use crate::support::error::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(with = "b64")]
    pub key: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    pub description: EmailNode,
}

/// The result of sealing one message for one recipient.
pub struct Sealed {
    /// The chunked ciphertext of the message.
    pub body: Vec<u8>,
    /// The serialised manifest, encrypted to the recipient.
    pub manifest: Vec<u8>,
}

/// Encrypts `data` under a fresh secret and wraps the manifest describing it
/// for the holder of `keyring`.
pub fn seal(
    data: &[u8],
    description: &EmailNode,
    keyring: &[SignedPublicKey],
) -> Result<Sealed, Error> {
    let secret = Secret::generate();
    let body = chunked::encrypt(&secret.key, &secret.nonce, data);
    let manifest = Manifest {
        key: secret.key.to_vec(),
        nonce: secret.nonce.to_vec(),
        description: description.clone(),
    };

    let json = serde_json::to_vec(&manifest)?;
    Ok(Sealed {
        body,
        manifest: encrypt_to_keyring(&json, keyring)?,
    })
}

/// Parses a keyring in either armoured or binary form.
pub fn parse_keyring(data: &[u8]) -> Result<Vec<SignedPublicKey>, Error> {
    let leading_ws = data
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    let keys = if data[leading_ws..].starts_with(b"-----BEGIN") {
        let (keys, _) = SignedPublicKey::from_armor_many(Cursor::new(data))?;
        keys.collect::<Result<Vec<_>, _>>()?
    } else {
        SignedPublicKey::from_bytes_many(Cursor::new(data))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(keys)
}

/// Encrypts `data` to every key in `keyring` as a binary OpenPGP message.
///
/// Encryption-capable subkeys are preferred. A primary key is only used if
/// no key in the ring has such a subkey.
pub fn encrypt_to_keyring(
    data: &[u8],
    keyring: &[SignedPublicKey],
) -> Result<Vec<u8>, Error> {
    let literal = Message::new_literal_bytes("manifest.json", data);

    let subkeys = keyring
        .iter()
        .flat_map(|key| key.public_subkeys.iter())
        .filter(|subkey| subkey.is_encryption_key())
        .collect::<Vec<_>>();

    let encrypted = if !subkeys.is_empty() {
        literal.encrypt_to_keys_seipdv1(
            OsRng,
            SymmetricKeyAlgorithm::AES256,
            &subkeys,
        )?
    } else {
        let primaries = keyring
            .iter()
            .filter(|key| key.is_encryption_key())
            .collect::<Vec<_>>();
        if primaries.is_empty() {
            return Err(Error::NoEncryptionKey);
        }

        literal.encrypt_to_keys_seipdv1(
            OsRng,
            SymmetricKeyAlgorithm::AES256,
            &primaries,
        )?
    };

    Ok(encrypted.to_bytes()?)
}

pub(crate) mod b64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        data: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::decode(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use pgp::SignedSecretKey;

    use super::*;
    use crate::mime::analysis::analyze;
    use crate::test_data::{RECIPIENT_PUBLIC_KEY, RECIPIENT_SECRET_KEY};

    /// Decrypts an OpenPGP message produced by `encrypt_to_keyring` with the
    /// test recipient's secret key.
    pub fn decrypt_with_test_key(data: &[u8]) -> Vec<u8> {
        let (secret, _) =
            SignedSecretKey::from_string(RECIPIENT_SECRET_KEY).unwrap();
        let message = Message::from_bytes(Cursor::new(data)).unwrap();
        let (decrypted, _) =
            message.decrypt(String::new, &[&secret]).unwrap();
        decrypted.get_content().unwrap().unwrap()
    }

    /// Opens a sealed message with the test recipient's secret key.
    pub fn open(body: &[u8], manifest: &[u8]) -> (Manifest, Vec<u8>) {
        let manifest: Manifest =
            serde_json::from_slice(&decrypt_with_test_key(manifest)).unwrap();
        let key: [u8; chunked::KEY_SIZE] =
            manifest.key.as_slice().try_into().unwrap();
        let plaintext = chunked::decrypt(&key, body).unwrap();
        (manifest, plaintext)
    }

    #[test]
    fn parse_armoured_and_binary_keyrings() {
        let armoured = parse_keyring(RECIPIENT_PUBLIC_KEY.as_bytes()).unwrap();
        assert_eq!(1, armoured.len());

        let binary = armoured[0].to_bytes().unwrap();
        let reparsed = parse_keyring(&binary).unwrap();
        assert_eq!(1, reparsed.len());
        assert_eq!(armoured[0].fingerprint(), reparsed[0].fingerprint());
    }

    #[test]
    fn garbage_keyring_is_an_error() {
        assert!(parse_keyring(b"-----BEGIN PGP PUBLIC KEY BLOCK-----\n\nxx")
            .is_err());
    }

    #[test]
    fn empty_keyring_cannot_encrypt() {
        assert_matches!(
            Err(Error::NoEncryptionKey),
            encrypt_to_keyring(b"x", &[])
        );
    }

    #[test]
    fn seal_and_open() {
        let keyring = parse_keyring(RECIPIENT_PUBLIC_KEY.as_bytes()).unwrap();
        let data = b"Subject: sealed\r\n\r\nsecret words\r\n";
        let description = analyze(data).unwrap();

        let sealed = seal(data, &description, &keyring).unwrap();
        assert!(!sealed.body.windows(12).any(|w| w == b"secret words"));

        let (manifest, plaintext) = open(&sealed.body, &sealed.manifest);
        assert_eq!(&data[..], &plaintext[..]);
        assert_eq!(description, manifest.description);
        assert_eq!(chunked::NONCE_SIZE, manifest.nonce.len());
        assert_eq!(&manifest.nonce[..], &sealed.body[..chunked::NONCE_SIZE]);
    }

    #[test]
    fn manifest_json_uses_base64() {
        let manifest = Manifest {
            key: vec![0xff; 3],
            nonce: vec![0; 3],
            description: EmailNode::default(),
        };
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!("////", json["key"]);
        assert_eq!("AAAA", json["nonce"]);
        assert_eq!(
            manifest,
            serde_json::from_value::<Manifest>(json).unwrap()
        );
    }
}
