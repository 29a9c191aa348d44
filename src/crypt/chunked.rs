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

//! Chunked authenticated encryption of message bodies.
//!
//! The format is
//!
//! ```text
//! nonce (12 bytes)
//! [ciphertext chunk (0..=1024 bytes) | Poly1305 tag (16 bytes)]+
//! ```
//!
//! Every chunk except the last holds exactly 1024 bytes of ciphertext. The
//! last one holds the remainder, and is empty only when the whole plaintext
//! is. The ChaCha20 keystream is divided into 17-block windows, one per
//! chunk: the first block keys that chunk's Poly1305 instance, and the
//! following 16 blocks encrypt it. The tag covers the chunk's ciphertext.
//! This lets a reader authenticate and decrypt one chunk at a time with
//! bounded memory, and also allows random access.
//!
//! Intermediate chunks take their Poly1305 key from the first half of the
//! key block and the final chunk from the second half. A ciphertext cut off
//! at a chunk boundary therefore fails authentication on its new last
//! chunk.

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use poly1305::universal_hash::KeyInit;
use poly1305::Poly1305;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const CHUNK_SIZE: usize = 1024;
pub const TAG_SIZE: usize = 16;

const BLOCK_SIZE: u64 = 64;
const BLOCKS_PER_CHUNK: u64 = 1 + CHUNK_SIZE as u64 / BLOCK_SIZE;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Ciphertext is too short to hold a nonce and a tag")]
    Truncated,
    #[error("Chunk {0} failed authentication")]
    BadTag(usize),
    #[error("Trailing chunk {0} is too short to hold any data")]
    ShortChunk(usize),
}

/// A freshly generated key and nonce.
pub struct Secret {
    pub key: [u8; KEY_SIZE],
    pub nonce: [u8; NONCE_SIZE],
}

impl Secret {
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut nonce);
        Secret { key, nonce }
    }
}

/// Positions `cipher` at the start of chunk `index` and returns the
/// authenticator for that chunk. Afterwards `cipher` is positioned at the
/// first byte of keystream for the chunk data.
fn start_chunk(cipher: &mut ChaCha20, index: usize, last: bool) -> Poly1305 {
    cipher.seek(index as u64 * BLOCKS_PER_CHUNK * BLOCK_SIZE);
    let mut block = [0u8; BLOCK_SIZE as usize];
    cipher.apply_keystream(&mut block);
    let (inner, last_key) = block.split_at(32);
    Poly1305::new(poly1305::Key::from_slice(if last {
        last_key
    } else {
        inner
    }))
}

pub fn encrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Vec<u8> {
    let chunks = plaintext.len().div_ceil(CHUNK_SIZE).max(1);
    let mut out =
        Vec::with_capacity(NONCE_SIZE + plaintext.len() + chunks * TAG_SIZE);
    out.extend_from_slice(nonce);

    let mut cipher = ChaCha20::new(
        chacha20::Key::from_slice(key),
        chacha20::Nonce::from_slice(nonce),
    );
    for index in 0..chunks {
        let chunk_start = index * CHUNK_SIZE;
        let chunk_end = plaintext.len().min(chunk_start + CHUNK_SIZE);
        let chunk = &plaintext[chunk_start..chunk_end];

        let mac = start_chunk(&mut cipher, index, index + 1 == chunks);
        let start = out.len();
        out.extend_from_slice(chunk);
        cipher.apply_keystream(&mut out[start..]);
        let tag = mac.compute_unpadded(&out[start..]);
        out.extend_from_slice(&tag);
    }

    out
}

pub fn decrypt(
    key: &[u8; KEY_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, ChunkError> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(ChunkError::Truncated);
    }

    let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
    let mut cipher = ChaCha20::new(
        chacha20::Key::from_slice(key),
        chacha20::Nonce::from_slice(nonce),
    );
    let mut out = Vec::with_capacity(body.len());

    let chunks = body.len().div_ceil(CHUNK_SIZE + TAG_SIZE);
    for (index, sealed) in body.chunks(CHUNK_SIZE + TAG_SIZE).enumerate() {
        // Only a lone chunk may carry no data
        if sealed.len() < TAG_SIZE || (sealed.len() == TAG_SIZE && index > 0) {
            return Err(ChunkError::ShortChunk(index));
        }

        let (data, tag) = sealed.split_at(sealed.len() - TAG_SIZE);
        let mac = start_chunk(&mut cipher, index, index + 1 == chunks);
        let expected = mac.compute_unpadded(data);
        if !openssl::memcmp::eq(&expected, tag) {
            return Err(ChunkError::BadTag(index));
        }

        let start = out.len();
        out.extend_from_slice(data);
        cipher.apply_keystream(&mut out[start..]);
    }

    Ok(out)
}
