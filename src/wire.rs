// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tag-addressed, length-prefixed message decoding over a seekable reader.
//!
//! Decoded fields are exposed as [`Interval`] views (offset + length into
//! the underlying stream) rather than copies; callers hand the source
//! reader back in to materialize bytes. Signed metadata is hashed over the
//! exact interval it occupies in the stream, so nothing here ever
//! re-encodes a value.

use {
    crate::errors::Error,
    std::io::{self, Read, Seek, SeekFrom, Write},
};

const WIRE_VARINT: u32 = 0;
const WIRE_I64: u32 = 1;
const WIRE_LEN: u32 = 2;
const WIRE_I32: u32 = 5;

/// A byte range of the underlying stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    pub offset: u64,
    pub len: u64,
}

impl Interval {
    fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// A lazy view of one length-delimited message within the stream.
#[derive(Clone, Copy, Debug)]
pub struct Message {
    interval: Interval,
}

#[derive(Clone, Copy, Debug)]
enum FieldValue {
    Varint(u64),
    Len(Interval),
    // 64-bit and 32-bit scalar fields are tolerated and skipped; nothing in
    // the bundle schema uses them.
    Fixed,
}

/// Walks the fields of a message interval. Holds only positions, so nested
/// reads may freely move the source cursor between calls.
struct Fields {
    pos: u64,
    end: u64,
}

impl Fields {
    fn new(message: &Message) -> Self {
        Fields { pos: message.interval.offset, end: message.interval.end() }
    }

    fn next<S: Read + Seek>(
        &mut self,
        source: &mut S,
    ) -> Result<Option<(u32, FieldValue)>, Error> {
        if self.pos >= self.end {
            return Ok(None);
        }
        source.seek(SeekFrom::Start(self.pos))?;
        let mut remaining = self.end - self.pos;
        let key = read_varint(source, &mut remaining)?;
        if key >> 3 > u64::from(u32::MAX) {
            return Err(Error::Decode("field number out of range"));
        }
        let field = (key >> 3) as u32;
        if field == 0 {
            return Err(Error::Decode("zero field number"));
        }
        let value = match (key & 0x7) as u32 {
            WIRE_VARINT => FieldValue::Varint(read_varint(source, &mut remaining)?),
            WIRE_LEN => {
                let len = read_varint(source, &mut remaining)?;
                if len > remaining {
                    return Err(Error::Decode("field length exceeds message bounds"));
                }
                let offset = self.end - remaining;
                remaining -= len;
                FieldValue::Len(Interval { offset, len })
            }
            WIRE_I64 => {
                if remaining < 8 {
                    return Err(Error::Decode("truncated 64-bit field"));
                }
                remaining -= 8;
                FieldValue::Fixed
            }
            WIRE_I32 => {
                if remaining < 4 {
                    return Err(Error::Decode("truncated 32-bit field"));
                }
                remaining -= 4;
                FieldValue::Fixed
            }
            _ => return Err(Error::Decode("unsupported wire type")),
        };
        self.pos = self.end - remaining;
        Ok(Some((field, value)))
    }
}

impl Message {
    /// Binds a view over the whole of `source`, determined by seeking to
    /// its end.
    pub fn from_source<S: Read + Seek>(source: &mut S) -> Result<Self, Error> {
        let len = source.seek(SeekFrom::End(0))?;
        Ok(Message { interval: Interval { offset: 0, len } })
    }

    pub(crate) fn from_interval(interval: Interval) -> Self {
        Message { interval }
    }

    /// The exact byte range this message occupies. For signed metadata this
    /// is the signature preimage.
    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// First occurrence of a length-delimited `field`, as a nested message
    /// view.
    pub(crate) fn message<S: Read + Seek>(
        &self,
        source: &mut S,
        field: u32,
    ) -> Result<Option<Message>, Error> {
        Ok(self.bytes(source, field)?.map(Message::from_interval))
    }

    /// First occurrence of a length-delimited `field`, as a raw interval.
    pub(crate) fn bytes<S: Read + Seek>(
        &self,
        source: &mut S,
        field: u32,
    ) -> Result<Option<Interval>, Error> {
        let mut fields = Fields::new(self);
        while let Some((number, value)) = fields.next(source)? {
            if number != field {
                continue;
            }
            return match value {
                FieldValue::Len(interval) => Ok(Some(interval)),
                _ => Err(Error::Decode("expected a length-delimited field")),
            };
        }
        Ok(None)
    }

    /// First occurrence of a varint `field`, as u64.
    pub(crate) fn uint64<S: Read + Seek>(
        &self,
        source: &mut S,
        field: u32,
    ) -> Result<Option<u64>, Error> {
        let mut fields = Fields::new(self);
        while let Some((number, value)) = fields.next(source)? {
            if number != field {
                continue;
            }
            return match value {
                FieldValue::Varint(v) => Ok(Some(v)),
                _ => Err(Error::Decode("expected a varint field")),
            };
        }
        Ok(None)
    }

    /// First occurrence of a varint `field`, as u32.
    pub(crate) fn uint32<S: Read + Seek>(
        &self,
        source: &mut S,
        field: u32,
    ) -> Result<Option<u32>, Error> {
        match self.uint64(source, field)? {
            Some(v) => {
                u32::try_from(v).map(Some).map_err(|_| Error::Decode("varint exceeds u32"))
            }
            None => Ok(None),
        }
    }

    /// Every occurrence of a length-delimited `field`, in stream order.
    pub(crate) fn repeated<S: Read + Seek>(
        &self,
        source: &mut S,
        field: u32,
    ) -> Result<Vec<Message>, Error> {
        let mut out = Vec::new();
        let mut fields = Fields::new(self);
        while let Some((number, value)) = fields.next(source)? {
            if number != field {
                continue;
            }
            match value {
                FieldValue::Len(interval) => out.push(Message::from_interval(interval)),
                _ => return Err(Error::Decode("expected a length-delimited field")),
            }
        }
        Ok(out)
    }

    /// Looks up `key` in a map field (repeated entries keyed by field 1 with
    /// the value in field 2). Returns the value view, or `None` when the key
    /// is absent. A matching entry with no value field denotes an empty
    /// value.
    pub(crate) fn map_value<S: Read + Seek>(
        &self,
        source: &mut S,
        field: u32,
        key: &[u8],
    ) -> Result<Option<Message>, Error> {
        for entry in self.repeated(source, field)? {
            let entry_key = match entry.bytes(source, crate::format::MAP_KEY)? {
                Some(interval) => interval,
                None => continue,
            };
            if !interval_eq(source, entry_key, key)? {
                continue;
            }
            let value = match entry.bytes(source, crate::format::MAP_VALUE)? {
                Some(interval) => interval,
                None => Interval { offset: entry.interval.end(), len: 0 },
            };
            return Ok(Some(Message::from_interval(value)));
        }
        Ok(None)
    }

    /// Reads a string `field` into `buf` and returns the borrowed `&str`.
    /// Fails with `StringOverflow` when the field does not fit.
    pub(crate) fn str_into<'b, S: Read + Seek>(
        &self,
        source: &mut S,
        field: u32,
        buf: &'b mut [u8],
    ) -> Result<Option<&'b str>, Error> {
        let interval = match self.bytes(source, field)? {
            Some(interval) => interval,
            None => return Ok(None),
        };
        if interval.len > buf.len() as u64 {
            return Err(Error::StringOverflow { capacity: buf.len() });
        }
        let filled = &mut buf[..interval.len as usize];
        source.seek(SeekFrom::Start(interval.offset))?;
        fill(source, filled)?;
        std::str::from_utf8(filled).map(Some).map_err(|_| Error::Decode("string is not utf-8"))
    }
}

/// Reads an interval expected to hold exactly `N` bytes into a fixed
/// buffer. Any other size is a decoder-level inconsistency.
pub(crate) fn read_fixed<const N: usize, S: Read + Seek>(
    source: &mut S,
    interval: Interval,
) -> Result<[u8; N], Error> {
    if interval.len != N as u64 {
        return Err(Error::ByteLength { expected: N, actual: interval.len });
    }
    let mut buf = [0u8; N];
    source.seek(SeekFrom::Start(interval.offset))?;
    fill(source, &mut buf)?;
    Ok(buf)
}

/// Streaming comparison of an interval against `expected`, in 64-byte
/// chunks.
pub(crate) fn interval_eq<S: Read + Seek>(
    source: &mut S,
    interval: Interval,
    expected: &[u8],
) -> Result<bool, Error> {
    if interval.len != expected.len() as u64 {
        return Ok(false);
    }
    source.seek(SeekFrom::Start(interval.offset))?;
    let mut chunk = [0u8; 64];
    let mut compared = 0usize;
    while compared < expected.len() {
        let take = (expected.len() - compared).min(chunk.len());
        fill(source, &mut chunk[..take])?;
        if chunk[..take] != expected[compared..compared + take] {
            return Ok(false);
        }
        compared += take;
    }
    Ok(true)
}

fn fill<S: Read>(source: &mut S, buf: &mut [u8]) -> Result<(), Error> {
    source.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::ShortRead,
        _ => Error::Io(e),
    })
}

fn read_varint<S: Read>(source: &mut S, remaining: &mut u64) -> Result<u64, Error> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        if *remaining == 0 {
            return Err(Error::Decode("truncated varint"));
        }
        let mut byte = [0u8; 1];
        fill(source, &mut byte)?;
        *remaining -= 1;
        if shift == 63 && byte[0] > 1 {
            return Err(Error::Decode("varint exceeds 64 bits"));
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(Error::Decode("varint exceeds 64 bits"));
        }
    }
}

/// A bounded reader over one interval of the source, for streaming hashes
/// and payload reads. Re-seeks on every read, so interleaved cursor use is
/// safe.
#[derive(Debug)]
pub struct IntervalReader<'a, S: Read + Seek> {
    source: &'a mut S,
    interval: Interval,
    pos: u64,
}

impl<'a, S: Read + Seek> IntervalReader<'a, S> {
    pub(crate) fn new(source: &'a mut S, interval: Interval) -> Self {
        IntervalReader { source, interval, pos: 0 }
    }

    /// Total length of the underlying interval.
    pub fn len(&self) -> u64 {
        self.interval.len
    }

    pub fn is_empty(&self) -> bool {
        self.interval.len == 0
    }
}

impl<S: Read + Seek> Read for IntervalReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.interval.len - self.pos;
        if left == 0 || buf.is_empty() {
            return Ok(0);
        }
        let take = (left.min(buf.len() as u64)) as usize;
        self.source.seek(SeekFrom::Start(self.interval.offset + self.pos))?;
        let n = self.source.read(&mut buf[..take])?;
        self.pos += n as u64;
        Ok(n)
    }
}

// Encoding. Only the manifest exporter and test fixtures produce bytes;
// verification never does.

pub(crate) fn varint_size(value: u64) -> u64 {
    let bits = 64 - u64::from(value.leading_zeros()).min(63);
    (bits + 6) / 7
}

pub(crate) fn write_varint<W: Write + ?Sized>(out: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            return out.write_all(&[byte]);
        }
        out.write_all(&[byte | 0x80])?;
    }
}

pub(crate) fn write_tag<W: Write + ?Sized>(out: &mut W, field: u32, wire: u32) -> io::Result<()> {
    write_varint(out, u64::from(field) << 3 | u64::from(wire))
}

pub(crate) fn write_len_prefixed<W: Write + ?Sized>(
    out: &mut W,
    field: u32,
    payload: &[u8],
) -> io::Result<()> {
    write_tag(out, field, WIRE_LEN)?;
    write_varint(out, payload.len() as u64)?;
    out.write_all(payload)
}

pub(crate) fn write_uint<W: Write + ?Sized>(out: &mut W, field: u32, value: u64) -> io::Result<()> {
    write_tag(out, field, WIRE_VARINT)?;
    write_varint(out, value)
}

/// Begins a length-delimited field whose `payload_len` bytes the caller
/// writes next (used to frame interval copies without buffering them).
pub(crate) fn write_len_header<W: Write + ?Sized>(
    out: &mut W,
    field: u32,
    payload_len: u64,
) -> io::Result<()> {
    write_tag(out, field, WIRE_LEN)?;
    write_varint(out, payload_len)
}

#[cfg(test)]
mod tests {
    use {super::*, crate::errors::ErrorKind, assert_matches::assert_matches, std::io::Cursor};

    fn message(bytes: &[u8]) -> (Cursor<Vec<u8>>, Message) {
        let mut source = Cursor::new(bytes.to_vec());
        let message = Message::from_source(&mut source).unwrap();
        (source, message)
    }

    #[test]
    fn scalar_and_bytes_fields() {
        let mut bytes = vec![];
        write_uint(&mut bytes, 1, 300).unwrap();
        write_len_prefixed(&mut bytes, 2, b"abc").unwrap();
        let (mut source, msg) = message(&bytes);

        assert_eq!(msg.uint64(&mut source, 1).unwrap(), Some(300));
        assert_eq!(msg.uint32(&mut source, 1).unwrap(), Some(300));
        let interval = msg.bytes(&mut source, 2).unwrap().unwrap();
        assert_eq!(read_fixed::<3, _>(&mut source, interval).unwrap(), *b"abc");
        assert_eq!(msg.uint64(&mut source, 9).unwrap(), None);
    }

    #[test]
    fn nested_messages_are_views_into_the_stream() {
        let mut inner = vec![];
        write_uint(&mut inner, 1, 7).unwrap();
        let mut bytes = vec![];
        write_len_prefixed(&mut bytes, 3, &inner).unwrap();
        let (mut source, msg) = message(&bytes);

        let nested = msg.message(&mut source, 3).unwrap().unwrap();
        assert_eq!(nested.interval().len, inner.len() as u64);
        assert_eq!(nested.uint32(&mut source, 1).unwrap(), Some(7));
    }

    #[test]
    fn repeated_fields_in_stream_order() {
        let mut bytes = vec![];
        write_len_prefixed(&mut bytes, 2, b"one").unwrap();
        write_uint(&mut bytes, 5, 1).unwrap();
        write_len_prefixed(&mut bytes, 2, b"two").unwrap();
        let (mut source, msg) = message(&bytes);

        let entries = msg.repeated(&mut source, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(interval_eq(&mut source, entries[0].interval(), b"one").unwrap());
        assert!(interval_eq(&mut source, entries[1].interval(), b"two").unwrap());
    }

    #[test]
    fn map_lookup_by_key_bytes() {
        let mut entry_a = vec![];
        write_len_prefixed(&mut entry_a, 1, b"alpha").unwrap();
        write_len_prefixed(&mut entry_a, 2, b"AAAA").unwrap();
        let mut entry_b = vec![];
        write_len_prefixed(&mut entry_b, 1, b"beta").unwrap();
        write_len_prefixed(&mut entry_b, 2, b"BB").unwrap();
        let mut bytes = vec![];
        write_len_prefixed(&mut bytes, 4, &entry_a).unwrap();
        write_len_prefixed(&mut bytes, 4, &entry_b).unwrap();
        let (mut source, msg) = message(&bytes);

        let value = msg.map_value(&mut source, 4, b"beta").unwrap().unwrap();
        assert!(interval_eq(&mut source, value.interval(), b"BB").unwrap());
        assert_matches!(msg.map_value(&mut source, 4, b"gamma").unwrap(), None);
    }

    #[test]
    fn str_into_bounds_and_utf8() {
        let mut bytes = vec![];
        write_len_prefixed(&mut bytes, 1, "target".as_bytes()).unwrap();
        let (mut source, msg) = message(&bytes);

        let mut buf = [0u8; 16];
        assert_eq!(msg.str_into(&mut source, 1, &mut buf).unwrap(), Some("target"));

        let mut small = [0u8; 3];
        assert_matches!(
            msg.str_into(&mut source, 1, &mut small),
            Err(Error::StringOverflow { capacity: 3 })
        );
    }

    #[test]
    fn truncated_varint_is_a_decode_error() {
        let (mut source, msg) = message(&[0x08, 0x80]);
        let err = msg.uint64(&mut source, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn overlong_length_is_a_decode_error() {
        // Field 1, length-delimited, claims 100 bytes with 1 available.
        let (mut source, msg) = message(&[0x0a, 100, 0]);
        assert_matches!(msg.bytes(&mut source, 1), Err(Error::Decode(_)));
    }

    #[test]
    fn wrong_wire_type_is_a_decode_error() {
        let mut bytes = vec![];
        write_len_prefixed(&mut bytes, 1, b"xx").unwrap();
        let (mut source, msg) = message(&bytes);
        assert_matches!(msg.uint64(&mut source, 1), Err(Error::Decode(_)));
    }

    #[test]
    fn fixed_width_fields_are_skipped() {
        let mut bytes = vec![0x09];
        bytes.extend_from_slice(&[0u8; 8]); // field 1, 64-bit
        bytes.push(0x15);
        bytes.extend_from_slice(&[0u8; 4]); // field 2, 32-bit
        let mut tail = vec![];
        write_uint(&mut tail, 3, 9).unwrap();
        bytes.extend_from_slice(&tail);
        let (mut source, msg) = message(&bytes);
        assert_eq!(msg.uint32(&mut source, 3).unwrap(), Some(9));
    }

    #[test]
    fn read_fixed_rejects_other_sizes() {
        let mut bytes = vec![];
        write_len_prefixed(&mut bytes, 1, b"abcd").unwrap();
        let (mut source, msg) = message(&bytes);
        let interval = msg.bytes(&mut source, 1).unwrap().unwrap();
        assert_matches!(
            read_fixed::<32, _>(&mut source, interval),
            Err(Error::ByteLength { expected: 32, actual: 4 })
        );
    }

    #[test]
    fn interval_reader_is_bounded() {
        let mut bytes = vec![];
        write_len_prefixed(&mut bytes, 1, b"payload").unwrap();
        let (mut source, msg) = message(&bytes);
        let interval = msg.bytes(&mut source, 1).unwrap().unwrap();

        let mut reader = IntervalReader::new(&mut source, interval);
        assert_eq!(reader.len(), 7);
        let mut out = vec![];
        std::io::Read::read_to_end(&mut reader, &mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    proptest::proptest! {
        #[test]
        fn varint_round_trips(value: u64) {
            let mut encoded = vec![];
            write_varint(&mut encoded, value).unwrap();
            proptest::prop_assert_eq!(encoded.len() as u64, varint_size(value).max(1));
            let mut remaining = encoded.len() as u64;
            let mut cursor = Cursor::new(encoded);
            let decoded = read_varint(&mut cursor, &mut remaining).unwrap();
            proptest::prop_assert_eq!(decoded, value);
            proptest::prop_assert_eq!(remaining, 0);
        }
    }
}
