// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Targets metadata verification: signatures against the trusted root's
//! targets requirement, then anti-rollback against the device manifest.

use {
    crate::{
        backend::{self, Backend},
        errors::Error,
        format,
        manifest::Manifest,
        root::RootSummary,
        verify,
        wire::Message,
        TOP_LEVEL_TARGETS_NAME,
    },
    std::io::{Cursor, Read, Seek},
    tracing::{debug, warn},
};

/// The version recorded in a targets metadata content message.
pub(crate) fn metadata_version<S: Read + Seek>(
    source: &mut S,
    serialized_targets: Message,
) -> Result<u32, Error> {
    let common = serialized_targets
        .message(source, format::TARGETS_COMMON_METADATA)?
        .ok_or(Error::Missing("targets common metadata"))?;
    common.uint32(source, format::COMMON_VERSION)?.ok_or(Error::Missing("targets metadata version"))
}

/// Verifies the bundle's top-level targets metadata against the trust
/// anchor established by the root upgrade, then enforces anti-rollback
/// against the device manifest. Self-verification is best effort: it
/// tolerates a missing anchor and unsigned metadata, and never compares
/// versions.
pub(crate) fn verify_targets_metadata<S: Read + Seek, B: Backend + ?Sized>(
    source: &mut S,
    bundle: Message,
    trusted: Option<&RootSummary>,
    backend: &mut B,
    self_verifying: bool,
) -> Result<(), Error> {
    let trusted = match trusted {
        Some(trusted) => trusted,
        None if self_verifying => {
            warn!("targets metadata self-verification is a no-op without a root");
            return Ok(());
        }
        None => return Err(Error::NoTrustedRoot),
    };

    let signed = bundle
        .map_value(source, format::BUNDLE_TARGETS_METADATA, TOP_LEVEL_TARGETS_NAME.as_bytes())?
        .ok_or(Error::Missing("top-level targets metadata"))?;
    let (serialized, signatures) = verify::signed_metadata_parts(source, signed)?;

    match verify::verify_signatures(
        source,
        serialized.interval(),
        &signatures,
        &trusted.targets_requirement,
        &trusted.keys,
    ) {
        Err(Error::NoSignatures) if self_verifying => {
            warn!("unsigned bundle ignored by self-verification");
            return Ok(());
        }
        result => result?,
    }

    // Content check mirroring the root's: the signed metadata must claim
    // the role it is filed under.
    let mut role_buf = [0u8; format::MAX_ROLE_LENGTH];
    let common = serialized
        .message(source, format::TARGETS_COMMON_METADATA)?
        .ok_or(Error::Missing("targets common metadata"))?;
    match common.str_into(source, format::COMMON_ROLE, &mut role_buf) {
        Ok(Some(role)) if role == format::ROLE_TARGETS => {}
        Ok(_) => return Err(Error::MetadataContent("metadata role is not \"targets\"")),
        Err(Error::StringOverflow { .. }) => {
            return Err(Error::MetadataContent("metadata role is not \"targets\""))
        }
        Err(other) => return Err(other),
    }

    if self_verifying {
        warn!("self-verification skips targets anti-rollback");
        return Ok(());
    }

    let device_manifest = match backend::read_device_manifest(backend)? {
        Some(bytes) => bytes,
        None => {
            warn!("skipping targets anti-rollback: no device manifest");
            return Ok(());
        }
    };
    let mut device_source = Cursor::new(device_manifest.as_slice());
    let current = Manifest::from_persisted(&mut device_source)?.version(&mut device_source)?;
    let incoming = metadata_version(source, serialized)?;
    if current > incoming {
        debug!("targets attempt to roll back from version {} to {}", current, incoming);
        return Err(Error::TargetsRollback { current, incoming });
    }

    Ok(())
}
