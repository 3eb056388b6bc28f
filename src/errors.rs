// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Errors surfaced while opening and verifying an update bundle.

use {std::io, thiserror::Error};

/// Coarse classification of [`Error`] variants, mirroring the status space
/// of the verification pipeline. Useful when a caller only cares whether a
/// failure was an authenticity problem versus a malformed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte format is invalid.
    Decode,
    /// A signature, threshold, anti-rollback, hash, or length check failed.
    Unauthenticated,
    /// A name or length exceeds a configured maximum.
    OutOfRange,
    /// An expected field or entry is absent, or the bundle is unsigned.
    NotFound,
    /// An accessor was used before a successful verification.
    FailedPrecondition,
    /// The decoder or a storage hook behaved unexpectedly.
    Internal,
    /// A string does not fit the caller-provided buffer.
    ResourceExhausted,
}

/// An error encountered while opening, verifying, or reading an update
/// bundle.
#[derive(Debug, Error)]
pub enum Error {
    #[error("while reading from the update source")]
    Io(#[from] io::Error),

    #[error("while accessing device storage")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("malformed message: {0}")]
    Decode(&'static str),

    #[error("missing {0}")]
    Missing(&'static str),

    /// Sentinel distinguishing an entirely unsigned metadata message from
    /// one whose signatures failed to satisfy the threshold.
    #[error("metadata carries no signatures")]
    NoSignatures,

    #[error("verified {verified} of {threshold} required signatures")]
    ThresholdNotMet { threshold: u32, verified: u32 },

    #[error("metadata content check failed: {0}")]
    MetadataContent(&'static str),

    #[error("root metadata attempts to roll back from version {trusted} to {incoming}")]
    RootRollback { trusted: u32, incoming: u32 },

    #[error("targets metadata attempts to roll back from version {current} to {incoming}")]
    TargetsRollback { current: u32, incoming: u32 },

    #[error("no trusted root metadata is available")]
    NoTrustedRoot,

    #[error("target name exceeds {max} bytes")]
    TargetNameTooLong { max: usize },

    #[error("target {name:?} declares length {length} above the {max} byte maximum")]
    PayloadTooLarge { name: String, length: u64, max: u64 },

    #[error("target {name:?} payload is {actual} bytes where the manifest declares {expected}")]
    PayloadLengthMismatch { name: String, expected: u64, actual: u64 },

    #[error("target {name:?} payload does not match its manifest sha256")]
    PayloadHashMismatch { name: String },

    #[error("target {name:?} is not in the bundle and personalization is disabled")]
    PayloadMissing { name: String },

    #[error("personalized-out target {name:?} failed device attestation: {reason}")]
    PersonalizedTargetMismatch { name: String, reason: &'static str },

    #[error("bundle has not passed verification")]
    NotVerified,

    #[error("unexpected end of stream")]
    ShortRead,

    #[error("expected a {expected} byte field, found {actual} bytes")]
    ByteLength { expected: usize, actual: u64 },

    #[error("string field does not fit a {capacity} byte buffer")]
    StringOverflow { capacity: usize },
}

impl Error {
    /// The coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Decode(_) => ErrorKind::Decode,
            Error::ThresholdNotMet { .. }
            | Error::MetadataContent(_)
            | Error::RootRollback { .. }
            | Error::TargetsRollback { .. } => ErrorKind::Unauthenticated,
            Error::PayloadLengthMismatch { .. }
            | Error::PayloadHashMismatch { .. }
            | Error::PayloadMissing { .. }
            | Error::PersonalizedTargetMismatch { .. } => ErrorKind::Unauthenticated,
            Error::TargetNameTooLong { .. } | Error::PayloadTooLarge { .. } => ErrorKind::OutOfRange,
            Error::Missing(_) | Error::NoSignatures => ErrorKind::NotFound,
            Error::NotVerified | Error::NoTrustedRoot => ErrorKind::FailedPrecondition,
            Error::Io(_) | Error::Backend(_) | Error::ShortRead | Error::ByteLength { .. } => {
                ErrorKind::Internal
            }
            Error::StringOverflow { .. } => ErrorKind::ResourceExhausted,
        }
    }
}
