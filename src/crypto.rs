// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Cryptographic primitives for bundle verification.
//!
//! Signatures are raw P-256 `r ‖ s` over a SHA-256 digest of the exact
//! serialized metadata bytes; keys are SEC1 uncompressed points.

use {
    crate::errors::Error,
    p256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey},
    sha2::{Digest, Sha256},
    std::io::Read,
};

/// SHA-256 digest length.
pub const DIGEST_LENGTH: usize = 32;

/// Length of a key id (SHA-256 of key type ‖ scheme ‖ key value).
pub const KEY_ID_LENGTH: usize = DIGEST_LENGTH;

/// Length of a SEC1 uncompressed P-256 public key (0x04 ‖ X ‖ Y).
pub const PUBLIC_KEY_LENGTH: usize = 65;

/// Length of a raw P-256 signature (r ‖ s).
pub const SIGNATURE_LENGTH: usize = 64;

/// Calculate the SHA-256 digest of everything `read` yields.
pub fn sha256<R: Read>(mut read: R) -> Result<[u8; DIGEST_LENGTH], Error> {
    let mut context = Sha256::new();
    let mut buf = [0u8; 1024];
    loop {
        let read_bytes = read.read(&mut buf)?;
        if read_bytes == 0 {
            break;
        }
        context.update(&buf[..read_bytes]);
    }
    Ok(context.finalize().into())
}

/// Verify a raw P-256 signature over a precomputed digest. Any parse
/// failure of the key or signature counts as an unverified signature, not
/// an error; threshold counting treats both the same way.
pub fn verify_ecdsa_p256(
    public_key: &[u8; PUBLIC_KEY_LENGTH],
    digest: &[u8; DIGEST_LENGTH],
    signature: &[u8; SIGNATURE_LENGTH],
) -> bool {
    let key = match VerifyingKey::from_sec1_bytes(public_key) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let signature = match Signature::from_slice(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    key.verify_prehash(digest, &signature).is_ok()
}

/// The id of a key is the SHA-256 fingerprint of its canonical encoding:
/// one key-type byte, one scheme byte, then the key value.
pub fn key_id(key_type: u8, scheme: u8, keyval: &[u8]) -> [u8; KEY_ID_LENGTH] {
    let mut context = Sha256::new();
    context.update([key_type]);
    context.update([scheme]);
    context.update(keyval);
    context.finalize().into()
}
