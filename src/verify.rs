// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Threshold signature verification over a trusted key set.

use {
    crate::{
        crypto::{self, KEY_ID_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH},
        errors::Error,
        format,
        wire::{self, Interval, IntervalReader, Message},
    },
    std::io::{Read, Seek},
    tracing::debug,
};

/// One entry of a trusted root's key map. The id is trusted to be the
/// SHA-256 fingerprint of the key; root content checks enforce that before
/// a summary is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct KeyEntry {
    pub id: [u8; KEY_ID_LENGTH],
    pub value: [u8; PUBLIC_KEY_LENGTH],
}

/// A role's signature policy: at least `threshold` distinct keys out of
/// `key_ids` must have produced valid signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SignatureRequirement {
    pub threshold: u32,
    pub key_ids: Vec<[u8; KEY_ID_LENGTH]>,
}

/// Splits a signed metadata wrapper into the serialized content (the exact
/// signature preimage) and its signature records.
pub(crate) fn signed_metadata_parts<S: Read + Seek>(
    source: &mut S,
    signed: Message,
) -> Result<(Message, Vec<Message>), Error> {
    let serialized = signed
        .message(source, format::SIGNED_METADATA_SERIALIZED)?
        .ok_or(Error::Missing("serialized metadata"))?;
    let signatures = signed.repeated(source, format::SIGNED_METADATA_SIGNATURES)?;
    Ok((serialized, signatures))
}

/// Verifies that at least `requirement.threshold` distinct allowed keys
/// signed `message`. Signatures by keys outside the allowed set are skipped;
/// repeated signatures by one key count once. Returns
/// [`Error::NoSignatures`] when the list is empty so self-verification can
/// tell unsigned bundles apart from rejected ones.
pub(crate) fn verify_signatures<S: Read + Seek>(
    source: &mut S,
    message: Interval,
    signatures: &[Message],
    requirement: &SignatureRequirement,
    keys: &[KeyEntry],
) -> Result<(), Error> {
    let threshold = requirement.threshold;
    let mut digest = None;
    let mut counted = vec![false; requirement.key_ids.len()];
    let mut verified: u32 = 0;
    let mut total: usize = 0;

    for signature in signatures {
        total += 1;

        let key_id_interval = signature
            .bytes(source, format::SIGNATURE_KEY_ID)?
            .ok_or(Error::Missing("signature key id"))?;
        let key_id: [u8; KEY_ID_LENGTH] = wire::read_fixed(source, key_id_interval)?;

        let index = match requirement.key_ids.iter().position(|allowed| allowed == &key_id) {
            Some(index) => index,
            None => {
                debug!("skipping signature by unlisted key {}", hex::encode(key_id));
                continue;
            }
        };
        if counted[index] {
            debug!("ignoring duplicate signature by key {}", hex::encode(key_id));
            continue;
        }

        let key = keys
            .iter()
            .find(|key| key.id == key_id)
            .ok_or(Error::Missing("key for an allowed key id"))?;

        let sig_interval = signature
            .bytes(source, format::SIGNATURE_SIG)?
            .ok_or(Error::Missing("signature bytes"))?;
        let sig: [u8; SIGNATURE_LENGTH] = wire::read_fixed(source, sig_interval)?;

        // The preimage is hashed over its exact byte interval; computed once
        // and reused across signatures.
        let digest = match digest {
            Some(digest) => digest,
            None => {
                let computed = crypto::sha256(IntervalReader::new(source, message))?;
                digest = Some(computed);
                computed
            }
        };

        if crypto::verify_ecdsa_p256(&key.value, &digest, &sig) {
            counted[index] = true;
            verified += 1;
            if verified == threshold {
                return Ok(());
            }
        }
    }

    if total == 0 {
        return Err(Error::NoSignatures);
    }
    debug!("not enough signatures verified: required {}, verified {}", threshold, verified);
    Err(Error::ThresholdNotMet { threshold, verified })
}
