// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Verification of signed update bundles for embedded software updates.
//!
//! A bundle carries root metadata (the trust anchor role), targets
//! metadata (what files the update consists of), and payload blobs, all in
//! one tag-encoded byte stream. [`UpdateBundleAccessor`] opens such a
//! stream, proves it authentic against the trust anchor persisted on the
//! device, enforces anti-rollback, measures every payload, and only then
//! lets callers read target payloads or persist the new manifest.
//!
//! Verification is streaming: metadata is decoded as lazy views into the
//! source and payloads are hashed in place, so a bundle is never buffered
//! in memory. Signatures always cover the exact serialized metadata bytes
//! as they appear in the stream.
//!
//! ```no_run
//! use update_bundle::{Options, UpdateBundleAccessor};
//! # fn open_blob_store() -> std::io::Cursor<Vec<u8>> { unimplemented!() }
//! # fn open_backend() -> update_bundle::test_support::MemBackend { unimplemented!() }
//! # fn main() -> Result<(), update_bundle::Error> {
//! let mut bundle =
//!     UpdateBundleAccessor::new(open_blob_store(), open_backend(), Options::default());
//! bundle.open_and_verify()?;
//! let mut payload = bundle.target_payload("app")?;
//! // ... stage `payload` ...
//! bundle.persist_manifest()?;
//! bundle.close()?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod bundle;
mod crypto;
mod errors;
mod format;
mod manifest;
mod payload;
mod root;
mod targets;
mod verify;
mod wire;

pub mod test_support;

pub use {
    backend::{Backend, ReadSeek},
    bundle::{Options, UpdateBundleAccessor},
    crypto::{sha256, DIGEST_LENGTH, KEY_ID_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH},
    errors::{Error, ErrorKind},
    manifest::Manifest,
    wire::{Interval, IntervalReader},
};

/// Upper bound on a target file name, in bytes. Names are read into
/// fixed-size stack buffers.
pub const MAX_TARGET_NAME_LENGTH: usize = 64;

/// Upper bound on a single target's declared payload length.
pub const MAX_TARGET_PAYLOAD_SIZE: u64 = 1024 * 1024 * 1024;

/// The map key of the top-level targets metadata within a bundle.
pub const TOP_LEVEL_TARGETS_NAME: &str = "targets";
