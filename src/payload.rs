// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-target payload verification.
//!
//! Each target the bundle manifests is measured: an in-bundle payload is
//! length-checked and stream-hashed; a personalized-out payload (absent
//! from the bundle) must instead match the measurement cached in the
//! device manifest from a previous update.

use {
    crate::{
        backend::{self, Backend},
        crypto::{self, DIGEST_LENGTH},
        errors::Error,
        format,
        manifest::Manifest,
        wire::{self, Interval, IntervalReader, Message},
        MAX_TARGET_NAME_LENGTH, MAX_TARGET_PAYLOAD_SIZE,
    },
    std::io::{Cursor, Read, Seek},
    tracing::error,
};

/// Reads a target file's name into a fixed buffer, enforcing the name
/// length bound.
pub(crate) fn read_target_name<'b, S: Read + Seek>(
    source: &mut S,
    target_file: Message,
    buf: &'b mut [u8; MAX_TARGET_NAME_LENGTH],
) -> Result<&'b str, Error> {
    let interval = target_file
        .bytes(source, format::TARGET_FILE_FILE_NAME)?
        .ok_or(Error::Missing("target file name"))?;
    if interval.len > MAX_TARGET_NAME_LENGTH as u64 {
        return Err(Error::TargetNameTooLong { max: MAX_TARGET_NAME_LENGTH });
    }
    match target_file.str_into(source, format::TARGET_FILE_FILE_NAME, buf)? {
        Some(name) => Ok(name),
        None => Err(Error::Missing("target file name")),
    }
}

/// The declared SHA-256 of a target file record.
fn declared_sha256<S: Read + Seek>(
    source: &mut S,
    target_file: Message,
) -> Result<[u8; DIGEST_LENGTH], Error> {
    for hash in target_file.repeated(source, format::TARGET_FILE_HASHES)? {
        let function = hash
            .uint32(source, format::HASH_FUNCTION)?
            .ok_or(Error::Missing("hash function"))?;
        if function == format::HASH_FUNCTION_SHA256 {
            let interval =
                hash.bytes(source, format::HASH_HASH)?.ok_or(Error::Missing("hash value"))?;
            return wire::read_fixed(source, interval);
        }
    }
    Err(Error::Missing("sha256 hash for target"))
}

/// Verifies every target the bundle manifests, in bundle or out.
pub(crate) fn verify_payloads<S: Read + Seek, B: Backend + ?Sized>(
    source: &mut S,
    bundle: Message,
    backend: &mut B,
    personalization: bool,
) -> Result<(), Error> {
    let manifest = Manifest::from_bundle(bundle);
    // The device manifest is only needed for personalized-out targets;
    // loaded at most once.
    let mut device_manifest: Option<Option<Vec<u8>>> = None;

    for target_file in manifest.target_files(source)? {
        let mut name_buf = [0u8; MAX_TARGET_NAME_LENGTH];
        let name = read_target_name(source, target_file, &mut name_buf)?;

        let length = target_file
            .uint64(source, format::TARGET_FILE_LENGTH)?
            .ok_or(Error::Missing("target length"))?;
        if length > MAX_TARGET_PAYLOAD_SIZE {
            error!("target {:?} too large: {} bytes", name, length);
            return Err(Error::PayloadTooLarge {
                name: name.to_string(),
                length,
                max: MAX_TARGET_PAYLOAD_SIZE,
            });
        }

        let sha256 = declared_sha256(source, target_file)?;

        match bundle.map_value(source, format::BUNDLE_TARGET_PAYLOADS, name.as_bytes())? {
            Some(payload) => {
                verify_in_bundle(source, name, length, &sha256, payload.interval())?
            }
            None => {
                if !personalization {
                    error!("target {:?} not found in bundle", name);
                    return Err(Error::PayloadMissing { name: name.to_string() });
                }
                if device_manifest.is_none() {
                    device_manifest = Some(backend::read_device_manifest(backend)?);
                }
                let cached = device_manifest.as_ref().and_then(|cached| cached.as_deref());
                verify_personalized_out(cached, name, length, &sha256)?;
            }
        }
    }

    Ok(())
}

fn verify_in_bundle<S: Read + Seek>(
    source: &mut S,
    name: &str,
    expected_length: u64,
    expected_sha256: &[u8; DIGEST_LENGTH],
    payload: Interval,
) -> Result<(), Error> {
    if payload.len != expected_length {
        error!(
            "target {:?} has wrong payload length: expected {}, actual {}",
            name, expected_length, payload.len
        );
        return Err(Error::PayloadLengthMismatch {
            name: name.to_string(),
            expected: expected_length,
            actual: payload.len,
        });
    }
    let actual = crypto::sha256(IntervalReader::new(source, payload))?;
    if &actual != expected_sha256 {
        error!("target {:?} has a wrong payload sha256", name);
        return Err(Error::PayloadHashMismatch { name: name.to_string() });
    }
    Ok(())
}

/// A personalized-out target is attested by the measurement the device
/// cached when the payload was last seen; any discrepancy is a trust
/// failure, not a decode problem.
fn verify_personalized_out(
    device_manifest: Option<&[u8]>,
    name: &str,
    expected_length: u64,
    expected_sha256: &[u8; DIGEST_LENGTH],
) -> Result<(), Error> {
    let mismatch = |reason| {
        error!("can't verify personalized-out target {:?}: {}", name, reason);
        Error::PersonalizedTargetMismatch { name: name.to_string(), reason }
    };

    let bytes = device_manifest.ok_or_else(|| mismatch("device manifest not found"))?;
    let mut source = Cursor::new(bytes);
    let manifest = Manifest::from_persisted(&mut source)?;
    let cached = manifest
        .target_file(&mut source, name)?
        .ok_or_else(|| mismatch("target not in device manifest"))?;

    let cached_length = cached
        .uint64(&mut source, format::TARGET_FILE_LENGTH)?
        .ok_or(Error::Missing("cached target length"))?;
    if cached_length != expected_length {
        return Err(mismatch("cached length differs"));
    }
    let cached_sha256 = declared_sha256(&mut source, cached)?;
    if &cached_sha256 != expected_sha256 {
        return Err(mismatch("cached sha256 differs"));
    }
    Ok(())
}
