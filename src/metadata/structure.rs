//! Read-only snapshot of the resolved metadata tree

use std::fmt;

use super::sets::{ComponentKind, DescriptorKind, MetadataObject};
use super::MetadataStore;
use crate::ul::Uuid;

/// One set of the resolved metadata tree
///
/// Mirrors Preface → ContentStorage → Packages → Tracks → Sequences →
/// Components, with descriptors below their source packages. Detached from
/// the store, so it can be kept after the demuxer moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureNode {
    /// Set name, such as `MaterialPackage`
    pub name: &'static str,
    pub instance_uid: Uuid,
    /// Decoded fields, in a stable order
    pub fields: Vec<(&'static str, String)>,
    pub children: Vec<StructureNode>,
}

impl StructureNode {
    fn new(name: &'static str, instance_uid: Uuid) -> Self {
        Self {
            name,
            instance_uid,
            fields: Vec::new(),
            children: Vec::new(),
        }
    }

    fn field(&mut self, name: &'static str, value: impl ToString) {
        self.fields.push((name, value.to_string()));
    }

    /// Value of a field of this node.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first search for the first node with the given set name.
    pub fn find(&self, name: &str) -> Option<&StructureNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Number of nodes with the given set name in this subtree.
    pub fn count(&self, name: &str) -> usize {
        usize::from(self.name == name) + self.children.iter().map(|c| c.count(name)).sum::<usize>()
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}", "", self.name, indent = depth * 2)?;
        for (name, value) in &self.fields {
            writeln!(f, "{:indent$}{name}: {value}", "", indent = depth * 2 + 2)?;
        }
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for StructureNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

impl MetadataStore {
    /// Snapshot of the resolved tree, `None` until the Preface resolved.
    pub fn structure(&self) -> Option<StructureNode> {
        let uid = self.preface_uid()?;
        self.preface()?;
        Some(self.node(&uid))
    }

    fn node(&self, uid: &Uuid) -> StructureNode {
        let Some(entry) = self.entry(uid) else {
            return StructureNode::new("Missing", *uid);
        };
        let mut node = StructureNode::new(entry.object.name(), *uid);
        if !entry.generation_uid.is_zero() {
            node.field("generation_uid", entry.generation_uid);
        }

        let mut children: Vec<Uuid> = Vec::new();
        match &entry.object {
            MetadataObject::Preface(p) => {
                if !p.last_modified_date.is_unknown() {
                    node.field("last_modified_date", p.last_modified_date);
                }
                node.field("version", p.version);
                node.field("operational_pattern", p.operational_pattern);
                if let Some(pkg) = &p.primary_package {
                    node.field("primary_package", pkg);
                }
                for ec in &p.essence_containers {
                    node.field("essence_container", ec);
                }
                children.extend(&p.identifications);
                children.extend(p.content_storage);
            }
            MetadataObject::Identification(i) => {
                if let Some(company) = &i.company_name {
                    node.field("company_name", company);
                }
                if let Some(product) = &i.product_name {
                    node.field("product_name", product);
                }
                node.field("product_version", i.product_version);
                if let Some(platform) = &i.platform {
                    node.field("platform", platform);
                }
            }
            MetadataObject::ContentStorage(c) => {
                children.extend(&c.packages);
                children.extend(&c.essence_container_data);
            }
            MetadataObject::EssenceContainerData(e) => {
                node.field("linked_package_uid", e.linked_package_uid);
                node.field("body_sid", e.body_sid);
                node.field("index_sid", e.index_sid);
            }
            MetadataObject::Package(p) => {
                node.field("package_uid", p.package_uid);
                if let Some(name) = &p.name {
                    node.field("name", name);
                }
                children.extend(&p.tracks);
                children.extend(p.descriptor);
            }
            MetadataObject::Track(t) => {
                node.field("track_id", t.track_id);
                node.field("track_number", format!("{:#010x}", t.track_number));
                if let Some(name) = &t.name {
                    node.field("track_name", name);
                }
                node.field("track_type", t.track_type.as_str());
                if t.edit_rate.d != 0 {
                    node.field("edit_rate", t.edit_rate);
                    node.field("origin", t.origin);
                }
                children.extend(t.sequence);
            }
            MetadataObject::Sequence(s) => {
                node.field("data_definition", s.data_definition);
                node.field("duration", s.duration);
                children.extend(&s.components);
            }
            MetadataObject::Component(c) => {
                node.field("data_definition", c.data_definition);
                node.field("duration", c.duration);
                match &c.kind {
                    ComponentKind::SourceClip(clip) => {
                        node.field("start_position", clip.start_position);
                        node.field("source_package_id", clip.source_package_id);
                        node.field("source_track_id", clip.source_track_id);
                    }
                    ComponentKind::Timecode(tc) => {
                        node.field("rounded_timecode_base", tc.rounded_timecode_base);
                        node.field("start_timecode", tc.start_timecode);
                        node.field("drop_frame", tc.drop_frame);
                    }
                }
            }
            MetadataObject::Descriptor(d) => {
                node.field("linked_track_id", d.linked_track_id);
                node.field("sample_rate", d.sample_rate);
                node.field("container_duration", d.container_duration);
                node.field("essence_container", d.essence_container);
                match &d.kind {
                    DescriptorKind::Picture(p) => {
                        node.field("stored_width", p.stored_width);
                        node.field("stored_height", p.stored_height);
                        node.field("picture_essence_coding", p.picture_essence_coding);
                    }
                    DescriptorKind::Sound(s) => {
                        node.field("audio_sampling_rate", s.audio_sampling_rate);
                        node.field("channel_count", s.channel_count);
                        node.field("quantization_bits", s.quantization_bits);
                    }
                    DescriptorKind::Data {
                        data_essence_coding,
                    } => node.field("data_essence_coding", data_essence_coding),
                    DescriptorKind::Multiple {
                        sub_descriptors, ..
                    } => children.extend(sub_descriptors),
                    DescriptorKind::File => {}
                }
                children.extend(&d.locators);
            }
            MetadataObject::Locator(l) => node.field("value", &l.value),
        }

        node.children = children.iter().map(|c| self.node(c)).collect();
        node
    }
}
