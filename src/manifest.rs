// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The manifest: what a device knows about its installed targets.
//!
//! A manifest is a map of role name to targets metadata content. It can be
//! viewed directly out of a verified bundle (the metadata content of each
//! signed entry) or out of previously persisted manifest bytes. Export
//! copies the metadata content intervals verbatim; the framing around them
//! is new but the signed bytes are never re-encoded.

use {
    crate::{
        errors::Error,
        format,
        wire::{self, Interval, IntervalReader, Message},
        TOP_LEVEL_TARGETS_NAME,
    },
    std::io::{self, Read, Seek, Write},
};

/// A lazy view of a manifest backed by a seekable stream.
#[derive(Clone, Copy, Debug)]
pub struct Manifest {
    container: Message,
    entry_field: u32,
    // Bundle entries wrap the metadata content in a signed envelope;
    // persisted entries hold the content directly.
    wrapped: bool,
}

impl Manifest {
    /// Views the manifest synthesized from a bundle's targets metadata.
    pub(crate) fn from_bundle(bundle: Message) -> Self {
        Manifest {
            container: bundle,
            entry_field: format::BUNDLE_TARGETS_METADATA,
            wrapped: true,
        }
    }

    /// Views a previously persisted manifest occupying all of `source`.
    pub fn from_persisted<S: Read + Seek>(source: &mut S) -> Result<Self, Error> {
        let container = Message::from_source(source)?;
        Ok(Manifest {
            container,
            entry_field: format::MANIFEST_TARGETS_METADATA,
            wrapped: false,
        })
    }

    /// The manifest entries as (role name interval, targets metadata
    /// content) pairs, in stream order.
    pub(crate) fn entries<S: Read + Seek>(
        &self,
        source: &mut S,
    ) -> Result<Vec<(Interval, Message)>, Error> {
        let mut out = Vec::new();
        for entry in self.container.repeated(source, self.entry_field)? {
            let name = entry
                .bytes(source, format::MAP_KEY)?
                .ok_or(Error::Decode("manifest entry carries no name"))?;
            let value = entry
                .message(source, format::MAP_VALUE)?
                .ok_or(Error::Decode("manifest entry carries no metadata"))?;
            let metadata = if self.wrapped {
                value
                    .message(source, format::SIGNED_METADATA_SERIALIZED)?
                    .ok_or(Error::Missing("serialized targets metadata"))?
            } else {
                value
            };
            out.push((name, metadata));
        }
        Ok(out)
    }

    /// The version of the top-level `"targets"` metadata.
    pub fn version<S: Read + Seek>(&self, source: &mut S) -> Result<u32, Error> {
        for (name, metadata) in self.entries(source)? {
            if !wire::interval_eq(source, name, TOP_LEVEL_TARGETS_NAME.as_bytes())? {
                continue;
            }
            let common = metadata
                .message(source, format::TARGETS_COMMON_METADATA)?
                .ok_or(Error::Missing("targets common metadata"))?;
            return common
                .uint32(source, format::COMMON_VERSION)?
                .ok_or(Error::Missing("targets metadata version"));
        }
        Err(Error::Missing("top-level targets metadata"))
    }

    /// Every target file declared by any entry of the manifest.
    pub(crate) fn target_files<S: Read + Seek>(
        &self,
        source: &mut S,
    ) -> Result<Vec<Message>, Error> {
        let mut out = Vec::new();
        for (_name, metadata) in self.entries(source)? {
            out.extend(metadata.repeated(source, format::TARGETS_TARGET_FILES)?);
        }
        Ok(out)
    }

    /// Finds the target file record named `name`, searching every entry.
    pub fn target_file<S: Read + Seek>(
        &self,
        source: &mut S,
        name: &str,
    ) -> Result<Option<Message>, Error> {
        for target in self.target_files(source)? {
            let file_name = match target.bytes(source, format::TARGET_FILE_FILE_NAME)? {
                Some(interval) => interval,
                None => continue,
            };
            if wire::interval_eq(source, file_name, name.as_bytes())? {
                return Ok(Some(target));
            }
        }
        Ok(None)
    }

    /// Serializes the manifest to `out`, copying each metadata content
    /// interval byte for byte. Persisting and re-exporting is a fixed
    /// point.
    pub fn export<S: Read + Seek, W: Write + ?Sized>(
        &self,
        source: &mut S,
        out: &mut W,
    ) -> Result<(), Error> {
        for (name, metadata) in self.entries(source)? {
            let value = metadata.interval();
            // Key and value tags are a single byte each.
            let entry_len =
                1 + wire::varint_size(name.len) + name.len + 1 + wire::varint_size(value.len) + value.len;
            wire::write_len_header(out, format::MANIFEST_TARGETS_METADATA, entry_len)?;
            wire::write_len_header(out, format::MAP_KEY, name.len)?;
            io::copy(&mut IntervalReader::new(source, name), out)?;
            wire::write_len_header(out, format::MAP_VALUE, value.len)?;
            io::copy(&mut IntervalReader::new(source, value), out)?;
        }
        Ok(())
    }
}
