//! KLV packet headers, BER lengths and local-set decoding helpers.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::ul::{Ul, Umid, Uuid};

/// Maximum payload size materialized in one allocation (256 MB)
///
/// Clip-wrapped essence can legitimately be larger than this, but it is
/// never read as a whole; it is pulled one edit unit at a time.
pub const MAX_KLV_LENGTH: u64 = 256 * 1024 * 1024;

/// Bytes needed to start decoding a KLV header: key plus first length byte
pub const MIN_KLV_HEADER: usize = 17;

/// One KLV packet as seen by the engine
///
/// `offset` is relative to the start of the header partition (run-in
/// excluded). The payload is only present once it has been fetched.
#[derive(Debug, Clone, Default)]
pub struct KlvPacket {
    pub key: Ul,
    pub offset: u64,
    /// Payload size
    pub length: u64,
    /// Distance from the key to the first payload byte
    pub data_offset: u64,
    pub payload: Option<Bytes>,
    /// Bytes already consumed from this packet, 0 when untouched
    pub consumed: u64,
}

impl KlvPacket {
    /// Total encoded size: key, length field and payload.
    pub fn total_size(&self) -> u64 {
        self.data_offset.saturating_add(self.length)
    }

    /// Offset just past this packet.
    pub fn end_offset(&self) -> u64 {
        self.offset.saturating_add(self.total_size())
    }

    /// Offset of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        self.offset.saturating_add(self.data_offset)
    }

    /// The payload bytes, or an empty slice when not fetched.
    pub fn data(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or(&[])
    }

    /// Copy of the header without payload, suitable for storing.
    pub fn header_only(&self) -> Self {
        Self {
            payload: None,
            ..self.clone()
        }
    }
}

/// Size of the BER length field given its first byte.
pub fn ber_field_size(first: u8) -> Result<usize> {
    if first & 0x80 == 0 {
        return Ok(1);
    }
    let slen = (first & 0x7f) as usize;
    if slen > 8 {
        return Err(Error::malformed(
            0,
            format!("BER length-of-length {slen} exceeds 8"),
        ));
    }
    Ok(1 + slen)
}

/// Decode a BER length. Returns the length and the number of bytes used.
pub fn decode_ber_length(data: &[u8]) -> Result<(u64, usize)> {
    let first = *data.first().ok_or(Error::Truncated {
        offset: 0,
        needed: 1,
    })?;
    let size = ber_field_size(first)?;
    if size == 1 {
        return Ok((u64::from(first), 1));
    }
    if data.len() < size {
        return Err(Error::Truncated {
            offset: 0,
            needed: (size - data.len()) as u64,
        });
    }
    let length = data[1..size]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    Ok((length, size))
}

/// Parse a KLV header from the start of `data`, which was read at `offset`.
pub fn parse_header(data: &[u8], offset: u64) -> Result<KlvPacket> {
    if data.len() < MIN_KLV_HEADER {
        return Err(Error::Truncated {
            offset,
            needed: (MIN_KLV_HEADER - data.len()) as u64,
        });
    }
    let key = Ul::from_slice(&data[..16]).ok_or_else(|| Error::malformed(offset, "short key"))?;
    let (length, size) = decode_ber_length(&data[16..]).map_err(|e| match e {
        Error::Truncated { needed, .. } => Error::Truncated {
            offset: offset + 16,
            needed,
        },
        Error::Malformed { reason, .. } => Error::Malformed {
            offset: offset + 16,
            reason,
        },
        other => other,
    })?;

    Ok(KlvPacket {
        key,
        offset,
        length,
        data_offset: 16 + size as u64,
        payload: None,
        consumed: 0,
    })
}

/// Bounds-checked big-endian cursor over a payload
///
/// Every read reports `Malformed` with the absolute offset when the
/// payload is too short.
pub struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> FieldReader<'a> {
    /// Wrap `data`, whose first byte lives at absolute offset `base`.
    pub fn new(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                Error::malformed(
                    self.position(),
                    format!("need {n} bytes, {} left", self.remaining()),
                )
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(BigEndian::read_i64(self.take(8)?))
    }

    pub fn ul(&mut self) -> Result<Ul> {
        let raw = self.take(16)?;
        Ul::from_slice(raw).ok_or_else(|| Error::malformed(self.position(), "short UL"))
    }

    pub fn uuid(&mut self) -> Result<Uuid> {
        let raw = self.take(16)?;
        Uuid::from_slice(raw).ok_or_else(|| Error::malformed(self.position(), "short UUID"))
    }

    pub fn umid(&mut self) -> Result<Umid> {
        let raw = self.take(32)?;
        Umid::from_slice(raw).ok_or_else(|| Error::malformed(self.position(), "short UMID"))
    }

    /// Read a batch header (`u32 count`, `u32 item length`) and return the
    /// item slices. `item_len` must match the declared element size.
    pub fn batch(&mut self, item_len: usize) -> Result<Vec<&'a [u8]>> {
        let start = self.position();
        let count = self.u32()? as usize;
        let declared = self.u32()? as usize;
        if count == 0 {
            return Ok(Vec::new());
        }
        if declared != item_len || item_len == 0 {
            return Err(Error::malformed(
                start,
                format!("batch item length {declared}, expected {item_len}"),
            ));
        }
        let total = count
            .checked_mul(item_len)
            .filter(|t| *t <= self.remaining())
            .ok_or_else(|| Error::malformed(start, format!("batch of {count} items overruns")))?;
        let raw = self.take(total)?;
        Ok(raw.chunks_exact(item_len).collect())
    }
}

/// One item of a local set: 2-byte tag, 2-byte length, value
#[derive(Debug, Clone, Copy)]
pub struct LocalTag<'a> {
    pub tag: u16,
    pub value: &'a [u8],
    /// Absolute offset of the value
    pub offset: u64,
}

impl<'a> LocalTag<'a> {
    pub fn reader(&self) -> FieldReader<'a> {
        FieldReader::new(self.value, self.offset)
    }
}

/// Iterator over the tags of a local set
pub struct LocalSetIter<'a> {
    reader: FieldReader<'a>,
    failed: bool,
}

impl<'a> LocalSetIter<'a> {
    pub fn new(data: &'a [u8], base: u64) -> Self {
        Self {
            reader: FieldReader::new(data, base),
            failed: false,
        }
    }
}

impl<'a> LocalSetIter<'a> {
    fn read_tag(&mut self) -> Result<LocalTag<'a>> {
        let tag = self.reader.u16()?;
        let len = self.reader.u16()? as usize;
        let offset = self.reader.position();
        let value = self.reader.take(len)?;
        Ok(LocalTag { tag, value, offset })
    }
}

impl<'a> Iterator for LocalSetIter<'a> {
    type Item = Result<LocalTag<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.remaining() == 0 {
            return None;
        }
        let item = self.read_tag();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

/// Decode a UTF-16BE string, dropping trailing NULs.
pub fn utf16_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 16] {
        [
            0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x15, 0x01,
            0x05, 0x01,
        ]
    }

    #[test]
    fn test_ber_short_and_long_forms() {
        let mut short = key().to_vec();
        short.push(0x10);
        let klv = parse_header(&short, 0).unwrap();
        assert_eq!(klv.length, 16);
        assert_eq!(klv.data_offset, 17);

        let mut long = key().to_vec();
        long.extend_from_slice(&[0x81, 0x80]);
        let klv = parse_header(&long, 100).unwrap();
        assert_eq!(klv.length, 128);
        assert_eq!(klv.data_offset, 18);
        assert_eq!(klv.end_offset(), 100 + 18 + 128);

        let mut padded = key().to_vec();
        padded.extend_from_slice(&[0x83, 0x00, 0x00, 0x80]);
        let klv = parse_header(&padded, 0).unwrap();
        assert_eq!(klv.length, 128);
        assert_eq!(klv.data_offset, 20);
    }

    #[test]
    fn test_ber_length_of_length_limit() {
        let mut bad = key().to_vec();
        bad.push(0x89);
        bad.extend_from_slice(&[0; 9]);
        assert!(matches!(
            parse_header(&bad, 0),
            Err(Error::Malformed { offset: 16, .. })
        ));

        let mut max = key().to_vec();
        max.push(0x88);
        max.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0x01, 0x00]);
        assert_eq!(parse_header(&max, 0).unwrap().length, 256);
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            parse_header(&key(), 0),
            Err(Error::Truncated { needed: 1, .. })
        ));

        let mut partial = key().to_vec();
        partial.extend_from_slice(&[0x84, 0x00]);
        assert!(matches!(
            parse_header(&partial, 0),
            Err(Error::Truncated { needed: 3, .. })
        ));
    }

    #[test]
    fn test_field_reader_bounds() {
        let data = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02];
        let mut r = FieldReader::new(&data, 50);
        assert_eq!(r.u16().unwrap(), 1);
        assert_eq!(r.u32().unwrap(), 2);
        assert!(matches!(r.u8(), Err(Error::Malformed { offset: 56, .. })));
    }

    #[test]
    fn test_batch_rejects_overrun() {
        // claims 1000 items of 4 bytes with only 4 present
        let data = [0, 0, 0x03, 0xe8, 0, 0, 0, 4, 1, 2, 3, 4];
        let mut r = FieldReader::new(&data, 0);
        assert!(r.batch(4).is_err());

        let ok = [0, 0, 0, 2, 0, 0, 0, 2, 0xaa, 0xbb, 0xcc, 0xdd];
        let mut r = FieldReader::new(&ok, 0);
        let items = r.batch(2).unwrap();
        assert_eq!(items, vec![&[0xaa, 0xbb][..], &[0xcc, 0xdd][..]]);
    }

    #[test]
    fn test_local_set_iteration() {
        let data = [0x3c, 0x0a, 0x00, 0x02, 0xde, 0xad, 0x44, 0x02, 0x00, 0x00];
        let tags: Vec<_> = LocalSetIter::new(&data, 10)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].tag, 0x3c0a);
        assert_eq!(tags[0].value, &[0xde, 0xad]);
        assert_eq!(tags[0].offset, 14);
        assert!(tags[1].value.is_empty());

        let truncated = [0x3c, 0x0a, 0x00, 0x08, 0x00];
        let mut it = LocalSetIter::new(&truncated, 0);
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn test_utf16_string() {
        let data = [0x00, b'M', 0x00, b'X', 0x00, b'F', 0x00, 0x00];
        assert_eq!(utf16_string(&data), "MXF");
    }
}
