// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The device storage capability consumed by bundle verification.

use {
    crate::errors::Error,
    std::io::{Read, Seek, SeekFrom, Write},
};

/// A reader that supports seeking. Blanket-implemented; used for trait
/// objects borrowed from a [`Backend`].
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Device-side persistence consumed during verification: the trust anchor
/// and the installed-software manifest. Readers and writers are borrowed
/// for the duration of a single operation; the backend owns their
/// lifetime. Hook methods default to no-ops.
pub trait Backend {
    /// A reader over the persisted signed root metadata, reset to the
    /// beginning.
    fn root_metadata_reader(&mut self) -> Result<Box<dyn ReadSeek + '_>, Error>;

    /// Atomically replaces the persisted root metadata with the bytes
    /// `root` yields. A failure must leave the previous root intact.
    fn safely_persist_root_metadata(&mut self, root: &mut dyn Read) -> Result<(), Error>;

    /// Called before the on-device manifest is read.
    fn before_manifest_read(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// A reader over the persisted manifest, reset to the beginning, or
    /// `None` when no manifest has ever been persisted.
    fn manifest_reader(&mut self) -> Result<Option<Box<dyn ReadSeek + '_>>, Error>;

    /// Called before a new manifest is written.
    fn before_manifest_write(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// A writer accepting the bytes of a new manifest.
    fn manifest_writer(&mut self) -> Result<Box<dyn Write + '_>, Error>;

    /// Called after the manifest bytes are fully written; the backend
    /// seals the result.
    fn after_manifest_write(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl<B: Backend + ?Sized> Backend for &mut B {
    fn root_metadata_reader(&mut self) -> Result<Box<dyn ReadSeek + '_>, Error> {
        (**self).root_metadata_reader()
    }

    fn safely_persist_root_metadata(&mut self, root: &mut dyn Read) -> Result<(), Error> {
        (**self).safely_persist_root_metadata(root)
    }

    fn before_manifest_read(&mut self) -> Result<(), Error> {
        (**self).before_manifest_read()
    }

    fn manifest_reader(&mut self) -> Result<Option<Box<dyn ReadSeek + '_>>, Error> {
        (**self).manifest_reader()
    }

    fn before_manifest_write(&mut self) -> Result<(), Error> {
        (**self).before_manifest_write()
    }

    fn manifest_writer(&mut self) -> Result<Box<dyn Write + '_>, Error> {
        (**self).manifest_writer()
    }

    fn after_manifest_write(&mut self) -> Result<(), Error> {
        (**self).after_manifest_write()
    }
}

/// Reads the device manifest into memory, or `None` when the device has
/// never installed anything (first-ever update).
pub(crate) fn read_device_manifest<B: Backend + ?Sized>(
    backend: &mut B,
) -> Result<Option<Vec<u8>>, Error> {
    backend.before_manifest_read()?;
    let mut reader = match backend.manifest_reader()? {
        Some(reader) => reader,
        None => return Ok(None),
    };
    reader.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}
