// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The update bundle accessor: open, verify, read, persist, close.

use {
    crate::{
        backend::Backend,
        errors::Error,
        format,
        manifest::Manifest,
        payload::{self, read_target_name},
        root, targets,
        wire::{IntervalReader, Message},
        MAX_TARGET_NAME_LENGTH,
    },
    std::io::{Read, Seek},
    tracing::warn,
};

/// Verification behavior knobs, fixed at construction.
#[derive(Clone, Copy, Debug, Default)]
pub struct Options {
    /// Runs the pipeline in best-effort self-verifying mode: the bundle is
    /// checked against its own root (if any), unsigned metadata is
    /// tolerated, and nothing is persisted or compared against device
    /// state. Development only.
    pub disable_verification: bool,
    /// Permits targets whose payloads were personalized out of the bundle,
    /// attested by the device manifest.
    pub personalization: bool,
}

#[derive(Clone, Copy, Debug)]
enum State {
    Closed,
    Opened { bundle: Message },
    Verified { bundle: Message },
}

/// Opens an update bundle from a seekable source, verifies it against the
/// device trust anchor, and then serves reads of the verified content.
///
/// All accessors gate on the verified state; nothing is readable from a
/// bundle that has not passed [`open_and_verify`](Self::open_and_verify),
/// and nothing remains readable after [`close`](Self::close).
#[derive(Debug)]
pub struct UpdateBundleAccessor<S: Read + Seek, B: Backend> {
    source: S,
    backend: B,
    options: Options,
    state: State,
}

impl<S: Read + Seek, B: Backend> UpdateBundleAccessor<S, B> {
    /// Binds an accessor over `source`. No I/O happens until
    /// [`open_and_verify`](Self::open_and_verify).
    pub fn new(source: S, backend: B, options: Options) -> Self {
        UpdateBundleAccessor { source, backend, options, state: State::Closed }
    }

    /// Opens the bundle and runs the verification pipeline: root upgrade,
    /// targets metadata, target payloads. On failure the accessor is
    /// closed and the first error is returned; the one side effect that
    /// may survive a failure is a persisted root accepted before a later
    /// phase rejected the bundle.
    pub fn open_and_verify(&mut self) -> Result<(), Error> {
        self.do_open()?;
        if let Err(e) = self.do_verify() {
            let _ = self.close();
            return Err(e);
        }
        Ok(())
    }

    /// Releases the bundle. All views become invalid and accessors fail
    /// until the next successful `open_and_verify`.
    pub fn close(&mut self) -> Result<(), Error> {
        self.state = State::Closed;
        Ok(())
    }

    /// The manifest synthesized from the verified bundle.
    pub fn manifest(&self) -> Result<Manifest, Error> {
        Ok(Manifest::from_bundle(self.verified_bundle()?))
    }

    /// Total size of the payloads actually carried by the bundle:
    /// manifested targets that were personalized out do not count.
    pub fn total_payload_size(&mut self) -> Result<u64, Error> {
        let bundle = self.verified_bundle()?;
        let manifest = Manifest::from_bundle(bundle);
        let mut total: u64 = 0;
        for target_file in manifest.target_files(&mut self.source)? {
            let mut name_buf = [0u8; MAX_TARGET_NAME_LENGTH];
            let name = read_target_name(&mut self.source, target_file, &mut name_buf)?;
            if bundle
                .map_value(&mut self.source, format::BUNDLE_TARGET_PAYLOADS, name.as_bytes())?
                .is_none()
            {
                continue;
            }
            let length = target_file
                .uint64(&mut self.source, format::TARGET_FILE_LENGTH)?
                .ok_or(Error::Missing("target length"))?;
            total = total
                .checked_add(length)
                .ok_or(Error::Decode("total payload size overflows u64"))?;
        }
        Ok(total)
    }

    /// A bounded reader over the named target's verified payload bytes.
    pub fn target_payload(&mut self, name: &str) -> Result<IntervalReader<'_, S>, Error> {
        let bundle = self.verified_bundle()?;
        Manifest::from_bundle(bundle)
            .target_file(&mut self.source, name)?
            .ok_or(Error::Missing("target in manifest"))?;
        let payload = bundle
            .map_value(&mut self.source, format::BUNDLE_TARGET_PAYLOADS, name.as_bytes())?
            .ok_or(Error::Missing("target payload in bundle"))?;
        Ok(IntervalReader::new(&mut self.source, payload.interval()))
    }

    /// Exports the verified bundle's manifest through the backend's
    /// manifest writer, bracketed by the write hooks.
    pub fn persist_manifest(&mut self) -> Result<(), Error> {
        let bundle = self.verified_bundle()?;
        let manifest = Manifest::from_bundle(bundle);
        self.backend.before_manifest_write()?;
        {
            let mut writer = self.backend.manifest_writer()?;
            manifest.export(&mut self.source, &mut *writer)?;
        }
        self.backend.after_manifest_write()?;
        Ok(())
    }

    fn do_open(&mut self) -> Result<(), Error> {
        let bundle = Message::from_source(&mut self.source)?;
        self.state = State::Opened { bundle };
        Ok(())
    }

    fn do_verify(&mut self) -> Result<(), Error> {
        let bundle = match self.state {
            State::Opened { bundle } => bundle,
            State::Closed | State::Verified { .. } => return Err(Error::NotVerified),
        };

        let self_verifying = self.options.disable_verification;
        if self_verifying {
            warn!("update bundle verification is disabled; self-verifying only");
        }

        let trusted =
            root::upgrade_root(&mut self.source, bundle, &mut self.backend, self_verifying)?;
        targets::verify_targets_metadata(
            &mut self.source,
            bundle,
            trusted.as_ref(),
            &mut self.backend,
            self_verifying,
        )?;
        payload::verify_payloads(
            &mut self.source,
            bundle,
            &mut self.backend,
            self.options.personalization,
        )?;

        self.state = State::Verified { bundle };
        Ok(())
    }

    fn verified_bundle(&self) -> Result<Message, Error> {
        match self.state {
            State::Verified { bundle } => Ok(bundle),
            State::Closed | State::Opened { .. } => Err(Error::NotVerified),
        }
    }
}
