// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Root metadata: trust anchor decoding, content checks, and the upgrade
//! protocol.
//!
//! An incoming root must verify against the current trust anchor *and*
//! against its own key set before it is persisted and promoted. The second
//! check defeats a rotation fraud where an attacker signs only with keys
//! that are being rotated out.

use {
    crate::{
        backend::Backend,
        crypto::{self, KEY_ID_LENGTH, PUBLIC_KEY_LENGTH},
        errors::Error,
        format,
        verify::{self, KeyEntry, SignatureRequirement},
        wire::{self, IntervalReader, Message},
    },
    std::io::{Read, Seek, SeekFrom},
    tracing::{debug, warn},
};

/// The facts a trust anchor contributes to verification, decoded out of a
/// signed root and validated by content checks. Small and owned, so it
/// outlives any borrow of the stream it came from; the signed preimages it
/// vouches for stay in the stream.
#[derive(Clone, Debug)]
pub(crate) struct RootSummary {
    pub version: u32,
    pub keys: Vec<KeyEntry>,
    pub root_requirement: SignatureRequirement,
    pub targets_requirement: SignatureRequirement,
}

/// Decodes `serialized_root` (the content message of a signed root) into a
/// [`RootSummary`], enforcing the content checks every trusted root must
/// pass: correct role, unique well-formed ECDSA-P256 keys whose ids match
/// their fingerprints, and satisfiable signature requirements over known
/// keys.
pub(crate) fn decode_root_summary<S: Read + Seek>(
    source: &mut S,
    serialized_root: Message,
) -> Result<RootSummary, Error> {
    let common = serialized_root
        .message(source, format::ROOT_COMMON_METADATA)?
        .ok_or(Error::Missing("root common metadata"))?;
    let mut role_buf = [0u8; format::MAX_ROLE_LENGTH];
    let role = common
        .str_into(source, format::COMMON_ROLE, &mut role_buf)
        .map_err(|e| match e {
            Error::StringOverflow { .. } => Error::MetadataContent("unrecognized role"),
            other => other,
        })?
        .ok_or(Error::MetadataContent("root metadata carries no role"))?;
    if role != format::ROLE_ROOT {
        return Err(Error::MetadataContent("metadata role is not \"root\""));
    }
    let version = common
        .uint32(source, format::COMMON_VERSION)?
        .ok_or(Error::Missing("root metadata version"))?;

    let mut keys: Vec<KeyEntry> = Vec::new();
    for entry in serialized_root.repeated(source, format::ROOT_KEYS)? {
        let id_interval = entry
            .bytes(source, format::MAP_KEY)?
            .ok_or(Error::MetadataContent("key map entry carries no id"))?;
        if id_interval.len != KEY_ID_LENGTH as u64 {
            return Err(Error::MetadataContent("key id is not 32 bytes"));
        }
        let id: [u8; KEY_ID_LENGTH] = wire::read_fixed(source, id_interval)?;

        let key = entry
            .message(source, format::MAP_VALUE)?
            .ok_or(Error::MetadataContent("key map entry carries no key"))?;
        let key_type = key
            .uint32(source, format::KEY_KEY_TYPE)?
            .ok_or(Error::MetadataContent("key carries no type"))?;
        let scheme = key
            .uint32(source, format::KEY_SCHEME)?
            .ok_or(Error::MetadataContent("key carries no scheme"))?;
        if key_type != format::KEY_TYPE_ECDSA_SHA2_NISTP256
            || scheme != format::KEY_SCHEME_ECDSA_SHA2_NISTP256
        {
            return Err(Error::MetadataContent("only ecdsa-sha2-nistp256 keys are supported"));
        }
        let value_interval = key
            .bytes(source, format::KEY_KEYVAL)?
            .ok_or(Error::MetadataContent("key carries no value"))?;
        if value_interval.len != PUBLIC_KEY_LENGTH as u64 {
            return Err(Error::MetadataContent("key value is not a 65 byte sec1 point"));
        }
        let value: [u8; PUBLIC_KEY_LENGTH] = wire::read_fixed(source, value_interval)?;

        if crypto::key_id(key_type as u8, scheme as u8, &value) != id {
            return Err(Error::MetadataContent("key id does not match key fingerprint"));
        }
        if keys.iter().any(|existing| existing.id == id) {
            return Err(Error::MetadataContent("duplicate key id in key map"));
        }
        keys.push(KeyEntry { id, value });
    }

    let root_requirement_message = serialized_root
        .message(source, format::ROOT_ROOT_SIGNATURE_REQUIREMENT)?
        .ok_or(Error::Missing("root signature requirement"))?;
    let root_requirement = decode_requirement(source, root_requirement_message, &keys)?;
    let targets_requirement_message = serialized_root
        .message(source, format::ROOT_TARGETS_SIGNATURE_REQUIREMENT)?
        .ok_or(Error::Missing("targets signature requirement"))?;
    let targets_requirement = decode_requirement(source, targets_requirement_message, &keys)?;

    Ok(RootSummary { version, keys, root_requirement, targets_requirement })
}

fn decode_requirement<S: Read + Seek>(
    source: &mut S,
    requirement: Message,
    keys: &[KeyEntry],
) -> Result<SignatureRequirement, Error> {
    let threshold = requirement
        .uint32(source, format::REQUIREMENT_THRESHOLD)?
        .ok_or(Error::Missing("signature threshold"))?;
    let mut key_ids: Vec<[u8; KEY_ID_LENGTH]> = Vec::new();
    for id in requirement.repeated(source, format::REQUIREMENT_KEY_IDS)? {
        let interval = id.interval();
        if interval.len != KEY_ID_LENGTH as u64 {
            return Err(Error::MetadataContent("requirement key id is not 32 bytes"));
        }
        let id: [u8; KEY_ID_LENGTH] = wire::read_fixed(source, interval)?;
        if key_ids.contains(&id) {
            return Err(Error::MetadataContent("duplicate key id in signature requirement"));
        }
        if !keys.iter().any(|key| key.id == id) {
            return Err(Error::MetadataContent("requirement references an unknown key"));
        }
        key_ids.push(id);
    }
    if threshold == 0 {
        return Err(Error::MetadataContent("signature threshold of zero"));
    }
    if threshold as usize > key_ids.len() {
        return Err(Error::MetadataContent("signature threshold exceeds allowed key count"));
    }
    Ok(SignatureRequirement { threshold, key_ids })
}

/// Reads and decodes the trust anchor persisted on the device.
pub(crate) fn device_root_summary<B: Backend + ?Sized>(
    backend: &mut B,
) -> Result<RootSummary, Error> {
    let mut reader = backend.root_metadata_reader()?;
    // The backend resets the reader; re-seek in case it forgot.
    reader.seek(SeekFrom::Start(0))?;
    let signed = Message::from_source(&mut reader)?;
    let (serialized, _signatures) = verify::signed_metadata_parts(&mut reader, signed)?;
    decode_root_summary(&mut reader, serialized)
}

/// Verifies and adopts the bundle's incoming root metadata, if any.
///
/// On success the returned summary is the trust anchor for the rest of the
/// verification run: the incoming root when one was accepted, otherwise the
/// device root (or none at all in self-verifying mode). A verified incoming
/// root is persisted *before* targets verification so that key revocations
/// propagate even if the rest of the bundle is later rejected.
pub(crate) fn upgrade_root<S: Read + Seek, B: Backend + ?Sized>(
    source: &mut S,
    bundle: Message,
    backend: &mut B,
    self_verifying: bool,
) -> Result<Option<RootSummary>, Error> {
    // A bundle may legitimately omit the root; a root that does not decode
    // as a message, including one truncated mid-stream, is treated the
    // same way.
    let new_root = match bundle.message(source, format::BUNDLE_ROOT_METADATA) {
        Ok(Some(new_root)) => new_root,
        Ok(None) | Err(Error::Decode(_)) | Err(Error::ShortRead) => {
            warn!("incoming root metadata not found or invalid");
            if self_verifying {
                return Ok(None);
            }
            return device_root_summary(backend).map(Some);
        }
        Err(other) => return Err(other),
    };

    let (serialized, signatures) = verify::signed_metadata_parts(source, new_root)?;
    let new_summary = decode_root_summary(source, serialized)?;

    // The anchor for the outer check: the incoming root itself when
    // self-verifying, the device root otherwise.
    let device_summary;
    let trusted: &RootSummary = if self_verifying {
        &new_summary
    } else {
        device_summary = device_root_summary(backend)?;
        &device_summary
    };

    // Outer check: the current anchor must endorse the incoming root.
    verify::verify_signatures(
        source,
        serialized.interval(),
        &signatures,
        &trusted.root_requirement,
        &trusted.keys,
    )?;

    // Self check: the incoming root must also satisfy its own requirement,
    // proving the rotated-in keys took part in signing.
    verify::verify_signatures(
        source,
        serialized.interval(),
        &signatures,
        &new_summary.root_requirement,
        &new_summary.keys,
    )?;

    if trusted.version > new_summary.version {
        debug!(
            "root attempts to roll back from version {} to {}",
            trusted.version, new_summary.version
        );
        return Err(Error::RootRollback {
            trusted: trusted.version,
            incoming: new_summary.version,
        });
    }

    if !self_verifying {
        let mut new_root_bytes = IntervalReader::new(source, new_root.interval());
        backend.safely_persist_root_metadata(&mut new_root_bytes)?;
    }

    Ok(Some(new_summary))
}
