// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fixtures for exercising bundle verification: deterministic signing
//! keys, encoders for every message in the format, and an in-memory
//! backend. Not intended for production use.

use {
    crate::{
        backend::{Backend, ReadSeek},
        crypto::{self, KEY_ID_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH},
        errors::Error,
        format, wire,
    },
    p256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey},
    sha2::{Digest, Sha256},
    std::io::{Cursor, Read, Write},
};

/// A deterministic P-256 signing key derived from a seed byte.
pub struct TestKey {
    signing: SigningKey,
}

impl TestKey {
    /// Key for a non-zero `seed`; equal seeds yield equal keys.
    pub fn from_seed(seed: u8) -> Self {
        assert_ne!(seed, 0, "the zero scalar is not a valid key");
        let mut scalar = [0u8; 32];
        scalar[31] = seed;
        TestKey { signing: SigningKey::from_slice(&scalar).expect("small scalars are valid") }
    }

    /// The SEC1 uncompressed public key.
    pub fn public(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.signing
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .try_into()
            .expect("uncompressed p256 points are 65 bytes")
    }

    /// The key id as the verifier derives it.
    pub fn key_id(&self) -> [u8; KEY_ID_LENGTH] {
        crypto::key_id(
            format::KEY_TYPE_ECDSA_SHA2_NISTP256 as u8,
            format::KEY_SCHEME_ECDSA_SHA2_NISTP256 as u8,
            &self.public(),
        )
    }

    /// Raw `r ‖ s` signature over SHA-256 of `data`.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        let digest: [u8; 32] = Sha256::digest(data).into();
        let signature: Signature = self.signing.sign_prehash(&digest).expect("signing succeeds");
        signature.to_bytes().as_slice().try_into().expect("raw p256 signatures are 64 bytes")
    }
}

/// Describes the content of a root metadata message.
pub struct RootSpec {
    pub role: String,
    pub version: u32,
    /// Key map entries: (map key id, SEC1 key value).
    pub keys: Vec<([u8; KEY_ID_LENGTH], [u8; PUBLIC_KEY_LENGTH])>,
    pub root_threshold: u32,
    pub root_key_ids: Vec<[u8; KEY_ID_LENGTH]>,
    pub targets_threshold: u32,
    pub targets_key_ids: Vec<[u8; KEY_ID_LENGTH]>,
}

impl RootSpec {
    /// A root trusting one key for both roles at threshold 1.
    pub fn single(key: &TestKey, version: u32) -> Self {
        RootSpec {
            role: format::ROLE_ROOT.to_string(),
            version,
            keys: vec![(key.key_id(), key.public())],
            root_threshold: 1,
            root_key_ids: vec![key.key_id()],
            targets_threshold: 1,
            targets_key_ids: vec![key.key_id()],
        }
    }

    /// A root trusting every key in `keys` for both roles at the given
    /// thresholds.
    pub fn with_keys(keys: &[&TestKey], version: u32, threshold: u32) -> Self {
        RootSpec {
            role: format::ROLE_ROOT.to_string(),
            version,
            keys: keys.iter().map(|key| (key.key_id(), key.public())).collect(),
            root_threshold: threshold,
            root_key_ids: keys.iter().map(|key| key.key_id()).collect(),
            targets_threshold: threshold,
            targets_key_ids: keys.iter().map(|key| key.key_id()).collect(),
        }
    }
}

/// Encodes a RootMetadata content message.
pub fn encode_root_metadata(spec: &RootSpec) -> Vec<u8> {
    let mut out = Vec::new();

    let mut common = Vec::new();
    wire::write_len_prefixed(&mut common, format::COMMON_ROLE, spec.role.as_bytes()).unwrap();
    wire::write_uint(&mut common, format::COMMON_VERSION, u64::from(spec.version)).unwrap();
    wire::write_len_prefixed(&mut out, format::ROOT_COMMON_METADATA, &common).unwrap();

    for (id, value) in &spec.keys {
        let mut key = Vec::new();
        wire::write_uint(
            &mut key,
            format::KEY_KEY_TYPE,
            u64::from(format::KEY_TYPE_ECDSA_SHA2_NISTP256),
        )
        .unwrap();
        wire::write_uint(
            &mut key,
            format::KEY_SCHEME,
            u64::from(format::KEY_SCHEME_ECDSA_SHA2_NISTP256),
        )
        .unwrap();
        wire::write_len_prefixed(&mut key, format::KEY_KEYVAL, value).unwrap();

        let mut entry = Vec::new();
        wire::write_len_prefixed(&mut entry, format::MAP_KEY, id).unwrap();
        wire::write_len_prefixed(&mut entry, format::MAP_VALUE, &key).unwrap();
        wire::write_len_prefixed(&mut out, format::ROOT_KEYS, &entry).unwrap();
    }

    let root_requirement = encode_requirement(spec.root_threshold, &spec.root_key_ids);
    wire::write_len_prefixed(&mut out, format::ROOT_ROOT_SIGNATURE_REQUIREMENT, &root_requirement)
        .unwrap();
    let targets_requirement = encode_requirement(spec.targets_threshold, &spec.targets_key_ids);
    wire::write_len_prefixed(
        &mut out,
        format::ROOT_TARGETS_SIGNATURE_REQUIREMENT,
        &targets_requirement,
    )
    .unwrap();

    out
}

fn encode_requirement(threshold: u32, key_ids: &[[u8; KEY_ID_LENGTH]]) -> Vec<u8> {
    let mut out = Vec::new();
    wire::write_uint(&mut out, format::REQUIREMENT_THRESHOLD, u64::from(threshold)).unwrap();
    for id in key_ids {
        wire::write_len_prefixed(&mut out, format::REQUIREMENT_KEY_IDS, id).unwrap();
    }
    out
}

/// Describes one target file record.
#[derive(Clone)]
pub struct TargetSpec {
    pub name: String,
    pub length: u64,
    pub sha256: [u8; 32],
    pub hash_function: u32,
}

impl TargetSpec {
    /// The record a well-formed bundle would carry for `payload`.
    pub fn for_payload(name: &str, payload: &[u8]) -> Self {
        TargetSpec {
            name: name.to_string(),
            length: payload.len() as u64,
            sha256: Sha256::digest(payload).into(),
            hash_function: format::HASH_FUNCTION_SHA256,
        }
    }
}

/// Encodes a TargetsMetadata content message with the `"targets"` role.
pub fn encode_targets_metadata(version: u32, targets: &[TargetSpec]) -> Vec<u8> {
    let mut out = Vec::new();

    let mut common = Vec::new();
    wire::write_len_prefixed(&mut common, format::COMMON_ROLE, format::ROLE_TARGETS.as_bytes())
        .unwrap();
    wire::write_uint(&mut common, format::COMMON_VERSION, u64::from(version)).unwrap();
    wire::write_len_prefixed(&mut out, format::TARGETS_COMMON_METADATA, &common).unwrap();

    for target in targets {
        let mut hash = Vec::new();
        wire::write_uint(&mut hash, format::HASH_FUNCTION, u64::from(target.hash_function))
            .unwrap();
        wire::write_len_prefixed(&mut hash, format::HASH_HASH, &target.sha256).unwrap();

        let mut record = Vec::new();
        wire::write_len_prefixed(&mut record, format::TARGET_FILE_FILE_NAME, target.name.as_bytes())
            .unwrap();
        wire::write_uint(&mut record, format::TARGET_FILE_LENGTH, target.length).unwrap();
        wire::write_len_prefixed(&mut record, format::TARGET_FILE_HASHES, &hash).unwrap();

        wire::write_len_prefixed(&mut out, format::TARGETS_TARGET_FILES, &record).unwrap();
    }

    out
}

/// Wraps serialized metadata content and raw signature records into a
/// signed metadata message (the shape shared by root and targets).
pub fn encode_signed_metadata(
    content: &[u8],
    signatures: &[([u8; KEY_ID_LENGTH], [u8; SIGNATURE_LENGTH])],
) -> Vec<u8> {
    let mut out = Vec::new();
    wire::write_len_prefixed(&mut out, format::SIGNED_METADATA_SERIALIZED, content).unwrap();
    for (key_id, signature) in signatures {
        let mut record = Vec::new();
        wire::write_len_prefixed(&mut record, format::SIGNATURE_KEY_ID, key_id).unwrap();
        wire::write_len_prefixed(&mut record, format::SIGNATURE_SIG, signature).unwrap();
        wire::write_len_prefixed(&mut out, format::SIGNED_METADATA_SIGNATURES, &record).unwrap();
    }
    out
}

/// Encodes a persisted manifest from (role name, targets metadata content)
/// entries.
pub fn encode_manifest(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, metadata) in entries {
        let mut entry = Vec::new();
        wire::write_len_prefixed(&mut entry, format::MAP_KEY, name.as_bytes()).unwrap();
        wire::write_len_prefixed(&mut entry, format::MAP_VALUE, metadata).unwrap();
        wire::write_len_prefixed(&mut out, format::MANIFEST_TARGETS_METADATA, &entry).unwrap();
    }
    out
}

/// Assembles an UpdateBundle message.
#[derive(Default)]
pub struct BundleBuilder {
    root: Option<Vec<u8>>,
    targets: Vec<(String, Vec<u8>)>,
    payloads: Vec<(String, Vec<u8>)>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        BundleBuilder::default()
    }

    /// Includes signed root metadata.
    pub fn root_metadata(mut self, signed: Vec<u8>) -> Self {
        self.root = Some(signed);
        self
    }

    /// Includes signed targets metadata under the top-level name.
    pub fn targets_metadata(self, signed: Vec<u8>) -> Self {
        self.named_targets_metadata(crate::TOP_LEVEL_TARGETS_NAME, signed)
    }

    /// Includes signed targets metadata under an arbitrary role name.
    pub fn named_targets_metadata(mut self, name: &str, signed: Vec<u8>) -> Self {
        self.targets.push((name.to_string(), signed));
        self
    }

    /// Includes a raw target payload.
    pub fn payload(mut self, name: &str, bytes: &[u8]) -> Self {
        self.payloads.push((name.to_string(), bytes.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            wire::write_len_prefixed(&mut out, format::BUNDLE_ROOT_METADATA, root).unwrap();
        }
        for (name, signed) in &self.targets {
            let mut entry = Vec::new();
            wire::write_len_prefixed(&mut entry, format::MAP_KEY, name.as_bytes()).unwrap();
            wire::write_len_prefixed(&mut entry, format::MAP_VALUE, signed).unwrap();
            wire::write_len_prefixed(&mut out, format::BUNDLE_TARGETS_METADATA, &entry).unwrap();
        }
        for (name, bytes) in &self.payloads {
            let mut entry = Vec::new();
            wire::write_len_prefixed(&mut entry, format::MAP_KEY, name.as_bytes()).unwrap();
            wire::write_len_prefixed(&mut entry, format::MAP_VALUE, bytes).unwrap();
            wire::write_len_prefixed(&mut out, format::BUNDLE_TARGET_PAYLOADS, &entry).unwrap();
        }
        out
    }
}

/// An in-memory [`Backend`] with inspectable state.
#[derive(Default)]
pub struct MemBackend {
    /// The persisted signed root metadata.
    pub root: Vec<u8>,
    /// The persisted manifest, if any update has completed.
    pub manifest: Option<Vec<u8>>,
    /// How many times a verified root was persisted.
    pub root_persist_count: usize,
    staging: Vec<u8>,
}

impl MemBackend {
    /// A backend provisioned with `root` as its trust anchor and no
    /// manifest.
    pub fn with_root(root: Vec<u8>) -> Self {
        MemBackend { root, ..Default::default() }
    }
}

impl Backend for MemBackend {
    fn root_metadata_reader(&mut self) -> Result<Box<dyn ReadSeek + '_>, Error> {
        Ok(Box::new(Cursor::new(self.root.as_slice())))
    }

    fn safely_persist_root_metadata(&mut self, root: &mut dyn Read) -> Result<(), Error> {
        // Stage fully before replacing, as a real backend must.
        let mut staged = Vec::new();
        root.read_to_end(&mut staged)?;
        self.root = staged;
        self.root_persist_count += 1;
        Ok(())
    }

    fn manifest_reader(&mut self) -> Result<Option<Box<dyn ReadSeek + '_>>, Error> {
        match &self.manifest {
            Some(manifest) => Ok(Some(Box::new(Cursor::new(manifest.as_slice())))),
            None => Ok(None),
        }
    }

    fn manifest_writer(&mut self) -> Result<Box<dyn Write + '_>, Error> {
        self.staging.clear();
        Ok(Box::new(&mut self.staging))
    }

    fn after_manifest_write(&mut self) -> Result<(), Error> {
        self.manifest = Some(std::mem::take(&mut self.staging));
        Ok(())
    }
}
