// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stable field tags and codes for the update bundle message format.
//!
//! Field identities are wire-compatibility surface; do not renumber.

// UpdateBundle
pub(crate) const BUNDLE_ROOT_METADATA: u32 = 1;
pub(crate) const BUNDLE_TARGETS_METADATA: u32 = 2;
pub(crate) const BUNDLE_TARGET_PAYLOADS: u32 = 3;

// SignedRootMetadata / SignedTargetsMetadata share a shape: the serialized
// metadata bytes (the signature preimage) and the signatures over them.
pub(crate) const SIGNED_METADATA_SERIALIZED: u32 = 1;
pub(crate) const SIGNED_METADATA_SIGNATURES: u32 = 2;

// RootMetadata
pub(crate) const ROOT_COMMON_METADATA: u32 = 1;
pub(crate) const ROOT_KEYS: u32 = 2;
pub(crate) const ROOT_ROOT_SIGNATURE_REQUIREMENT: u32 = 3;
pub(crate) const ROOT_TARGETS_SIGNATURE_REQUIREMENT: u32 = 4;

// TargetsMetadata
pub(crate) const TARGETS_COMMON_METADATA: u32 = 1;
pub(crate) const TARGETS_TARGET_FILES: u32 = 2;

// CommonMetadata
pub(crate) const COMMON_ROLE: u32 = 1;
pub(crate) const COMMON_VERSION: u32 = 2;

// Key
pub(crate) const KEY_KEY_TYPE: u32 = 1;
pub(crate) const KEY_SCHEME: u32 = 2;
pub(crate) const KEY_KEYVAL: u32 = 3;

// SignatureRequirement
pub(crate) const REQUIREMENT_THRESHOLD: u32 = 1;
pub(crate) const REQUIREMENT_KEY_IDS: u32 = 2;

// Signature
pub(crate) const SIGNATURE_KEY_ID: u32 = 1;
pub(crate) const SIGNATURE_SIG: u32 = 2;

// TargetFile
pub(crate) const TARGET_FILE_FILE_NAME: u32 = 1;
pub(crate) const TARGET_FILE_LENGTH: u32 = 2;
pub(crate) const TARGET_FILE_HASHES: u32 = 3;

// Hash
pub(crate) const HASH_FUNCTION: u32 = 1;
pub(crate) const HASH_HASH: u32 = 2;

// Manifest
pub(crate) const MANIFEST_TARGETS_METADATA: u32 = 1;

// Map entries follow protobuf convention.
pub(crate) const MAP_KEY: u32 = 1;
pub(crate) const MAP_VALUE: u32 = 2;

// Codes.
pub(crate) const HASH_FUNCTION_SHA256: u32 = 1;
pub(crate) const KEY_TYPE_ECDSA_SHA2_NISTP256: u32 = 1;
pub(crate) const KEY_SCHEME_ECDSA_SHA2_NISTP256: u32 = 1;

// Role strings carried in CommonMetadata.
pub(crate) const ROLE_ROOT: &str = "root";
pub(crate) const ROLE_TARGETS: &str = "targets";

/// Longest role string the verifier will read.
pub(crate) const MAX_ROLE_LENGTH: usize = 16;
