//! Primer pack: the per-partition local tag dictionary.

use std::collections::HashMap;

use crate::error::Result;
use crate::klv::{FieldReader, KlvPacket};
use crate::ul::Ul;

/// Local tag to universal label mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimerPack {
    /// Header-relative offset of the primer pack KLV
    pub offset: u64,
    pub mappings: HashMap<u16, Ul>,
}

impl PrimerPack {
    pub fn parse(klv: &KlvPacket) -> Result<Self> {
        let mut r = FieldReader::new(klv.data(), klv.payload_offset());
        let mut mappings = HashMap::new();
        for item in r.batch(18)? {
            let tag = u16::from_be_bytes([item[0], item[1]]);
            if let Some(ul) = Ul::from_slice(&item[2..]) {
                mappings.insert(tag, ul);
            }
        }
        Ok(Self {
            offset: klv.offset,
            mappings,
        })
    }

    /// Label registered for a local tag.
    pub fn resolve(&self, tag: u16) -> Option<&Ul> {
        self.mappings.get(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
