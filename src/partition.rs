//! Partition packs, the partition table and the random index pack.

use crate::error::{Error, Result};
use crate::klv::{FieldReader, KlvPacket};
use crate::primer::PrimerPack;
use crate::ul::{PartitionKind, Ul};

/// Fixed part of a partition pack body, before the essence container batch
const PARTITION_PACK_FIXED_SIZE: usize = 88;

/// Decoded partition pack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPack {
    pub kind: PartitionKind,
    pub closed: bool,
    pub complete: bool,
    pub major_version: u16,
    pub minor_version: u16,
    pub kag_size: u32,
    pub this_partition: u64,
    pub prev_partition: u64,
    pub footer_partition: u64,
    pub header_byte_count: u64,
    pub index_byte_count: u64,
    pub index_sid: u32,
    pub body_offset: u64,
    pub body_sid: u32,
    pub operational_pattern: Ul,
    pub essence_containers: Vec<Ul>,
}

impl PartitionPack {
    /// Parse a partition pack from its KLV packet. The payload must be filled.
    pub fn parse(klv: &KlvPacket) -> Result<Self> {
        let kind = PartitionKind::from_key(&klv.key)
            .ok_or_else(|| Error::malformed(klv.offset, "not a partition pack key"))?;
        let data = klv.data();
        if data.len() < PARTITION_PACK_FIXED_SIZE {
            return Err(Error::malformed(
                klv.offset,
                format!("partition pack too short: {} bytes", data.len()),
            ));
        }

        let status = klv.key.0[14];
        let mut r = FieldReader::new(data, klv.payload_offset());
        let major_version = r.u16()?;
        let minor_version = r.u16()?;
        let kag_size = r.u32()?;
        let this_partition = r.u64()?;
        let prev_partition = r.u64()?;
        let footer_partition = r.u64()?;
        let header_byte_count = r.u64()?;
        let index_byte_count = r.u64()?;
        let index_sid = r.u32()?;
        let body_offset = r.u64()?;
        let body_sid = r.u32()?;
        let operational_pattern = r.ul()?;

        let essence_containers = if r.remaining() >= 8 {
            r.batch(16)?
                .into_iter()
                .filter_map(Ul::from_slice)
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            kind,
            closed: matches!(status, 0x02 | 0x04),
            complete: matches!(status, 0x03 | 0x04),
            major_version,
            minor_version,
            kag_size,
            this_partition,
            prev_partition,
            footer_partition,
            header_byte_count,
            index_byte_count,
            index_sid,
            body_offset,
            body_sid,
            operational_pattern,
            essence_containers,
        })
    }

    /// Placeholder pack for a partition only known from the random index pack.
    pub fn stub(this_partition: u64, body_sid: u32) -> Self {
        Self {
            kind: PartitionKind::Body,
            closed: false,
            complete: false,
            major_version: 0,
            minor_version: 0,
            kag_size: 0,
            this_partition,
            prev_partition: 0,
            footer_partition: 0,
            header_byte_count: 0,
            index_byte_count: 0,
            index_sid: 0,
            body_offset: 0,
            body_sid,
            operational_pattern: Ul::default(),
            essence_containers: Vec::new(),
        }
    }
}

/// A partition together with what the engine learned about it
#[derive(Debug, Clone)]
pub struct Partition {
    pub pack: PartitionPack,
    /// False while the partition is only known from the random index pack
    pub parsed: bool,
    pub primer: Option<PrimerPack>,
    /// Start of essence relative to `this_partition`, 0 when unknown
    pub essence_container_offset: u64,
    /// Essence track carried alone in this partition
    pub single_track: Option<usize>,
    pub parsed_metadata: bool,
    /// The clip or custom wrapped KLV holding this partition's essence
    pub clip_klv: Option<KlvPacket>,
}

impl Partition {
    pub fn new(pack: PartitionPack) -> Self {
        Self {
            pack,
            parsed: true,
            primer: None,
            essence_container_offset: 0,
            single_track: None,
            parsed_metadata: false,
            clip_klv: None,
        }
    }

    pub fn stub(this_partition: u64, body_sid: u32) -> Self {
        Self {
            parsed: false,
            ..Self::new(PartitionPack::stub(this_partition, body_sid))
        }
    }

    pub fn this_partition(&self) -> u64 {
        self.pack.this_partition
    }

    pub fn body_sid(&self) -> u32 {
        self.pack.body_sid
    }

    /// Header-relative offset of the first essence byte.
    pub fn essence_start(&self) -> u64 {
        self.pack.this_partition + self.essence_container_offset
    }
}

/// Partitions sorted by `this_partition`
///
/// Adjacency is derived from position in the sequence; the packs'
/// `prev_partition` fields are rewritten from it after every insertion.
#[derive(Debug, Default)]
pub struct PartitionTable {
    partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn clear(&mut self) {
        self.partitions.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Partition> {
        self.partitions.iter_mut()
    }

    fn position(&self, this_partition: u64) -> std::result::Result<usize, usize> {
        self.partitions
            .binary_search_by_key(&this_partition, |p| p.pack.this_partition)
    }

    pub fn get(&self, this_partition: u64) -> Option<&Partition> {
        self.position(this_partition)
            .ok()
            .map(|i| &self.partitions[i])
    }

    pub fn get_mut(&mut self, this_partition: u64) -> Option<&mut Partition> {
        self.position(this_partition)
            .ok()
            .map(move |i| &mut self.partitions[i])
    }

    pub fn contains(&self, this_partition: u64) -> bool {
        self.position(this_partition).is_ok()
    }

    /// Insert a partition keeping the table sorted, then relink.
    ///
    /// An existing entry at the same offset is left untouched.
    pub fn insert(&mut self, partition: Partition) {
        if let Err(i) = self.position(partition.pack.this_partition) {
            self.partitions.insert(i, partition);
            self.relink();
        }
    }

    /// Rewrite `prev_partition` links from table order.
    pub fn relink(&mut self) {
        let mut prev = 0;
        for p in &mut self.partitions {
            p.pack.prev_partition = prev;
            prev = p.pack.this_partition;
        }
    }

    /// The partition preceding the one at `this_partition`.
    pub fn previous(&self, this_partition: u64) -> Option<&Partition> {
        match self.position(this_partition) {
            Ok(i) | Err(i) => i.checked_sub(1).map(|i| &self.partitions[i]),
        }
    }

    /// The partition containing the header-relative `offset`.
    pub fn containing(&self, offset: u64) -> Option<&Partition> {
        self.partitions
            .iter()
            .take_while(|p| p.pack.this_partition <= offset)
            .last()
    }

    pub fn last(&self) -> Option<&Partition> {
        self.partitions.last()
    }

    /// Find the partition holding `stream_offset` of the essence container
    /// `body_sid`.
    ///
    /// Picks the last partition of that body whose `body_offset` does not
    /// exceed the stream offset, and rejects the result when the offset would
    /// leak into the next, unrelated partition.
    pub fn for_stream_offset(&self, body_sid: u32, stream_offset: u64) -> Option<&Partition> {
        let mut found: Option<usize> = None;
        let mut next: Option<usize> = None;

        for (i, p) in self.partitions.iter().enumerate() {
            if next.is_none() && found.is_some() {
                next = Some(i);
            }
            if p.pack.body_sid != body_sid {
                continue;
            }
            if p.pack.body_offset > stream_offset {
                break;
            }
            found = Some(i);
            next = None;
        }

        let part = &self.partitions[found?];
        if stream_offset < part.pack.body_offset {
            return None;
        }

        if let Some(next) = next.map(|i| &self.partitions[i]) {
            let essence_size = next
                .pack
                .this_partition
                .saturating_sub(part.essence_start());
            let in_partition = stream_offset - part.pack.body_offset;
            if in_partition >= essence_size {
                tracing::warn!(
                    stream_offset,
                    body_sid,
                    next_body_sid = next.pack.body_sid,
                    "stream offset leaks into next unrelated partition"
                );
                return None;
            }
        }
        Some(part)
    }
}

/// One entry of the random index pack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RipEntry {
    pub body_sid: u32,
    /// Absolute file offset of the partition pack
    pub offset: u64,
}

/// Random index pack: the offsets of every partition in the file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RandomIndexPack {
    pub entries: Vec<RipEntry>,
}

impl RandomIndexPack {
    /// Parse the pack payload: `(body_sid, offset)` pairs and a trailing
    /// overall length.
    pub fn parse(klv: &KlvPacket) -> Result<Self> {
        let data = klv.data();
        if data.len() < 4 || (data.len() - 4) % 12 != 0 {
            return Err(Error::malformed(
                klv.offset,
                format!("invalid random index pack length {}", data.len()),
            ));
        }

        let mut r = FieldReader::new(&data[..data.len() - 4], klv.payload_offset());
        let mut entries = Vec::with_capacity((data.len() - 4) / 12);
        while r.remaining() > 0 {
            let body_sid = r.u32()?;
            let offset = r.u64()?;
            entries.push(RipEntry { body_sid, offset });
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(this: u64, body_sid: u32, body_offset: u64, eco: u64) -> Partition {
        let mut pack = PartitionPack::stub(this, body_sid);
        pack.body_offset = body_offset;
        let mut p = Partition::new(pack);
        p.essence_container_offset = eco;
        p
    }

    #[test]
    fn test_insert_keeps_sorted_and_relinks() {
        let mut table = PartitionTable::new();
        table.insert(body(5000, 1, 0, 0));
        table.insert(body(0, 0, 0, 0));
        table.insert(body(2000, 1, 0, 0));
        table.insert(body(2000, 7, 0, 0));

        let offsets: Vec<_> = table.iter().map(|p| p.this_partition()).collect();
        assert_eq!(offsets, vec![0, 2000, 5000]);
        assert_eq!(table.get(5000).unwrap().pack.prev_partition, 2000);
        assert_eq!(table.get(2000).unwrap().body_sid(), 1);
        assert_eq!(table.previous(5000).unwrap().this_partition(), 2000);
        assert!(table.previous(0).is_none());
        assert_eq!(table.containing(4999).unwrap().this_partition(), 2000);
    }

    #[test]
    fn test_stream_offset_lookup() {
        let mut table = PartitionTable::new();
        table.insert(body(0, 0, 0, 0));
        table.insert(body(1000, 1, 0, 100));
        table.insert(body(3000, 2, 0, 100));
        table.insert(body(4000, 1, 2500, 100));

        // inside the first body partition: 1000..3000 holds 1900 bytes of essence
        assert_eq!(table.for_stream_offset(1, 500).unwrap().this_partition(), 1000);
        // would leak into body 2
        assert!(table.for_stream_offset(1, 1950).is_none());
        // second partition of body 1 starts at stream offset 2500
        assert_eq!(table.for_stream_offset(1, 2600).unwrap().this_partition(), 4000);
        assert!(table.for_stream_offset(9, 0).is_none());
    }

    #[test]
    fn test_rip_parse() {
        let mut payload = Vec::new();
        for (sid, off) in [(0u32, 0u64), (1, 4096)] {
            payload.extend_from_slice(&sid.to_be_bytes());
            payload.extend_from_slice(&off.to_be_bytes());
        }
        payload.extend_from_slice(&(17u32 + 1 + 28).to_be_bytes());
        let klv = KlvPacket {
            length: payload.len() as u64,
            data_offset: 17,
            payload: Some(payload.into()),
            ..Default::default()
        };
        let rip = RandomIndexPack::parse(&klv).unwrap();
        assert_eq!(
            rip.entries,
            vec![
                RipEntry {
                    body_sid: 0,
                    offset: 0
                },
                RipEntry {
                    body_sid: 1,
                    offset: 4096
                }
            ]
        );
    }
}
