//! OVF descriptor parsing.
//!
//! This module reads an OVF envelope and keeps the three collections the
//! converter needs: the file references, the disk section and the hardware
//! items of the first virtual system. Element and attribute names are matched
//! by local name, so `ovf:`, `rasd:` and default-namespace documents all parse
//! the same way.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ovf::resource::ResourceKind;

/// A file listed in the `References` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// The `ovf:id` of the file.
    pub id: String,
    /// The `ovf:href` of the file, relative to the descriptor.
    pub href: String,
}

/// A virtual disk listed in the `DiskSection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    /// The `ovf:diskId` of the disk.
    pub disk_id: String,
    /// The `ovf:fileRef` pointing into the `References` section.
    ///
    /// Blank disks carry no file reference.
    pub file_ref: Option<String>,
}

/// A virtual hardware item from the `VirtualHardwareSection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// The decoded `rasd:ResourceType`.
    pub kind: ResourceKind,
    pub instance_id: Option<String>,
    pub element_name: Option<String>,
    pub address: Option<String>,
    pub address_on_parent: Option<String>,
    pub host_resource: Option<String>,
    pub connection: Option<String>,
    pub resource_sub_type: Option<String>,
    pub virtual_quantity: Option<String>,
}

impl Item {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            instance_id: None,
            element_name: None,
            address: None,
            address_on_parent: None,
            host_resource: None,
            connection: None,
            resource_sub_type: None,
            virtual_quantity: None,
        }
    }

    /// Whether the item's `ElementName` mentions "scsi", ignoring case.
    pub fn is_named_scsi(&self) -> bool {
        self.element_name
            .as_deref()
            .map(|name| name.to_lowercase().contains("scsi"))
            .unwrap_or(false)
    }
}

/// A parsed OVF descriptor.
///
/// Built once per conversion and read-only afterwards. File and disk ids are
/// indexed at parse time so the reader can join them without rescanning.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub(crate) name: Option<String>,
    pub(crate) system_id: Option<String>,
    pub(crate) items: Vec<Item>,
    pub(crate) disks: Vec<DiskEntry>,
    pub(crate) files: Vec<FileEntry>,
    disk_index: HashMap<String, usize>,
    file_index: HashMap<String, usize>,
}

impl Descriptor {
    /// All hardware items, in document order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// All disk section entries, in document order.
    pub fn disk_entries(&self) -> &[DiskEntry] {
        &self.disks
    }

    /// All file references, in document order.
    pub fn file_entries(&self) -> &[FileEntry] {
        &self.files
    }

    /// Look up a disk entry by its `diskId`.
    pub fn disk_by_id(&self, disk_id: &str) -> Option<&DiskEntry> {
        self.disk_index.get(disk_id).map(|&i| &self.disks[i])
    }

    /// Look up a file reference by its `id`.
    pub fn file_by_id(&self, file_id: &str) -> Option<&FileEntry> {
        self.file_index.get(file_id).map(|&i| &self.files[i])
    }
}

/// Parse an OVF descriptor file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not well-formed XML, has no
/// `VirtualHardwareSection`, or contains duplicate file or disk ids.
pub fn parse_descriptor(path: &Path) -> Result<Descriptor> {
    let content = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
    parse_descriptor_str(&content)
}

/// Parse OVF descriptor content from a string.
pub fn parse_descriptor_str(xml: &str) -> Result<Descriptor> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut builder = DescriptorBuilder::default();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                let tag = local_name(e);
                builder.open(&tag, &stack, e)?;
                stack.push(tag);
                text.clear();
            }
            Event::Empty(ref e) => {
                let tag = local_name(e);
                builder.open(&tag, &stack, e)?;
                stack.push(tag);
                builder.close(&mut stack, "")?;
            }
            Event::Text(ref t) => {
                let value = t.unescape().map_err(|e| Error::xml(e.to_string()))?;
                text.push_str(&value);
            }
            Event::CData(ref c) => {
                text.push_str(&String::from_utf8_lossy(c));
            }
            Event::End(_) => {
                builder.close(&mut stack, text.trim())?;
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    builder.finish()
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Find an attribute by local name, so `ovf:id` and `id` both match.
fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| Error::xml(e.to_string()))?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::xml(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required_attribute(e: &BytesStart<'_>, element: &str, name: &str) -> Result<String> {
    attribute(e, name)?.ok_or_else(|| Error::missing(format!("{}@{}", element, name)))
}

fn is_item_tag(tag: &str) -> bool {
    matches!(tag, "Item" | "StorageItem" | "EthernetPortItem")
}

/// Item fields collected while inside an `Item` element.
#[derive(Default)]
struct PendingItem {
    fields: HashMap<String, String>,
}

#[derive(Default)]
struct DescriptorBuilder {
    name: Option<String>,
    system_id: Option<String>,
    items: Vec<Item>,
    disks: Vec<DiskEntry>,
    files: Vec<FileEntry>,
    /// Stack depth of the first `VirtualSystem`, while it is open.
    system_depth: Option<usize>,
    systems_seen: usize,
    /// Stack depth of the first hardware section, while it is open.
    hardware_depth: Option<usize>,
    hardware_seen: bool,
    pending: Option<PendingItem>,
}

impl DescriptorBuilder {
    fn in_first_system(&self) -> bool {
        self.system_depth.is_some()
    }

    /// Handle an opening (or empty) element. `stack` holds its ancestors.
    fn open(&mut self, tag: &str, stack: &[String], e: &BytesStart<'_>) -> Result<()> {
        let parent = stack.last().map(String::as_str).unwrap_or("");

        match tag {
            "File" if parent == "References" => {
                let id = required_attribute(e, "References/File", "id")?;
                let href = required_attribute(e, "References/File", "href")?;
                debug!(id = %id, href = %href, "file reference");
                self.files.push(FileEntry { id, href });
            }
            "Disk" if parent == "DiskSection" => {
                let disk_id = required_attribute(e, "DiskSection/Disk", "diskId")?;
                let file_ref = attribute(e, "fileRef")?;
                debug!(disk_id = %disk_id, file_ref = ?file_ref, "disk entry");
                self.disks.push(DiskEntry { disk_id, file_ref });
            }
            "VirtualSystem" => {
                self.systems_seen += 1;
                if self.systems_seen == 1 {
                    self.system_depth = Some(stack.len());
                    self.system_id = attribute(e, "id")?;
                }
            }
            "VirtualHardwareSection" if self.in_first_system() && !self.hardware_seen => {
                self.hardware_seen = true;
                self.hardware_depth = Some(stack.len());
            }
            t if is_item_tag(t)
                && parent == "VirtualHardwareSection"
                && self.hardware_depth == Some(stack.len() - 1) =>
            {
                self.pending = Some(PendingItem::default());
            }
            _ => {}
        }

        Ok(())
    }

    /// Handle a closing element. The element is popped off `stack`.
    fn close(&mut self, stack: &mut Vec<String>, text: &str) -> Result<()> {
        let tag = stack
            .pop()
            .ok_or_else(|| Error::xml("unbalanced end tag"))?;
        let parent = stack.last().map(String::as_str).unwrap_or("");
        let depth = stack.len();

        if is_item_tag(&tag) && self.pending.is_some() && self.hardware_depth == Some(depth - 1) {
            if let Some(pending) = self.pending.take() {
                let item = finish_item(pending)?;
                debug!(kind = %item.kind, instance_id = ?item.instance_id, "hardware item");
                self.items.push(item);
            }
            return Ok(());
        }

        if let Some(pending) = self.pending.as_mut() {
            if is_item_tag(parent) {
                pending.fields.insert(tag, text.to_string());
            }
            return Ok(());
        }

        match tag.as_str() {
            "Name" if parent == "VirtualSystem" && self.system_depth == Some(depth - 1) => {
                if !text.is_empty() {
                    self.name = Some(text.to_string());
                }
            }
            "VirtualHardwareSection" if self.hardware_depth == Some(depth) => {
                self.hardware_depth = None;
            }
            "VirtualSystem" if self.system_depth == Some(depth) => {
                self.system_depth = None;
            }
            _ => {}
        }

        Ok(())
    }

    fn finish(self) -> Result<Descriptor> {
        if !self.hardware_seen {
            return Err(Error::missing("VirtualSystem/VirtualHardwareSection"));
        }

        let file_index = build_index(
            self.files.iter().map(|f| f.id.as_str()),
            "References/File",
        )?;
        let disk_index = build_index(
            self.disks.iter().map(|d| d.disk_id.as_str()),
            "DiskSection/Disk",
        )?;

        // Disk items are addressed by instance id when mapping; duplicates
        // would make the mapping ambiguous.
        let disk_item_ids = self
            .items
            .iter()
            .filter(|item| item.kind == ResourceKind::Disk)
            .filter_map(|item| item.instance_id.as_deref());
        build_index(disk_item_ids, "disk Item InstanceID")?;

        Ok(Descriptor {
            name: self.name,
            system_id: self.system_id,
            items: self.items,
            disks: self.disks,
            files: self.files,
            disk_index,
            file_index,
        })
    }
}

fn finish_item(pending: PendingItem) -> Result<Item> {
    let mut fields = pending.fields;
    let raw_type = fields
        .remove("ResourceType")
        .ok_or_else(|| Error::missing("Item/ResourceType"))?;
    let code = raw_type
        .trim()
        .parse::<u16>()
        .map_err(|_| Error::invalid_value("ResourceType", raw_type.as_str()))?;

    let mut item = Item::new(ResourceKind::from_code(code));
    let mut take = |name: &str| fields.remove(name).filter(|v| !v.is_empty());
    item.instance_id = take("InstanceID");
    item.element_name = take("ElementName");
    item.address = take("Address");
    item.address_on_parent = take("AddressOnParent");
    item.host_resource = take("HostResource");
    item.connection = take("Connection");
    item.resource_sub_type = take("ResourceSubType");
    item.virtual_quantity = take("VirtualQuantity");
    Ok(item)
}

fn build_index<'a>(
    ids: impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for (position, id) in ids.enumerate() {
        *counts.entry(id).or_default() += 1;
        index.entry(id.to_string()).or_insert(position);
    }

    if let Some((id, count)) = counts.into_iter().find(|(_, count)| *count > 1) {
        return Err(Error::ambiguous(format!("{}[@id='{}']", what, id), count));
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope xmlns="http://schemas.dmtf.org/ovf/envelope/1"
          xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1"
          xmlns:rasd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData">
  <References>
    <File ovf:id="f1" ovf:href="disk1.img"/>
  </References>
  <DiskSection>
    <Info>Virtual disks</Info>
    <Disk ovf:diskId="d1" ovf:fileRef="f1" ovf:capacity="1073741824"/>
  </DiskSection>
  <VirtualSystem ovf:id="vm1">
    <Info>A virtual machine</Info>
    <Name>vm1</Name>
    <VirtualHardwareSection>
      <Info>Virtual hardware</Info>
      <Item>
        <rasd:ElementName>1 virtual CPU</rasd:ElementName>
        <rasd:InstanceID>1</rasd:InstanceID>
        <rasd:ResourceType>3</rasd:ResourceType>
        <rasd:VirtualQuantity>2</rasd:VirtualQuantity>
      </Item>
    </VirtualHardwareSection>
  </VirtualSystem>
</Envelope>"#;

    #[test]
    fn test_parse_collections() {
        let descriptor = parse_descriptor_str(MINIMAL).unwrap();
        assert_eq!(descriptor.file_entries().len(), 1);
        assert_eq!(descriptor.disk_entries().len(), 1);
        assert_eq!(descriptor.items().len(), 1);
        assert_eq!(descriptor.name.as_deref(), Some("vm1"));
        assert_eq!(descriptor.system_id.as_deref(), Some("vm1"));
    }

    #[test]
    fn test_item_fields() {
        let descriptor = parse_descriptor_str(MINIMAL).unwrap();
        let item = &descriptor.items()[0];
        assert_eq!(item.kind, ResourceKind::Processor);
        assert_eq!(item.instance_id.as_deref(), Some("1"));
        assert_eq!(item.virtual_quantity.as_deref(), Some("2"));
        assert_eq!(item.element_name.as_deref(), Some("1 virtual CPU"));
        assert_eq!(item.host_resource, None);
    }

    #[test]
    fn test_indices() {
        let descriptor = parse_descriptor_str(MINIMAL).unwrap();
        let disk = descriptor.disk_by_id("d1").unwrap();
        assert_eq!(disk.file_ref.as_deref(), Some("f1"));
        assert_eq!(descriptor.file_by_id("f1").unwrap().href, "disk1.img");
        assert!(descriptor.file_by_id("f2").is_none());
    }

    #[test]
    fn test_missing_hardware_section() {
        let xml = r#"<Envelope><VirtualSystem id="x"><Name>x</Name></VirtualSystem></Envelope>"#;
        let err = parse_descriptor_str(xml).unwrap_err();
        assert!(matches!(err, Error::MissingElement { .. }));
    }

    #[test]
    fn test_duplicate_file_ids() {
        let xml = r#"<Envelope>
            <References><File id="f1" href="a.img"/><File id="f1" href="b.img"/></References>
            <VirtualSystem id="x"><VirtualHardwareSection/></VirtualSystem>
        </Envelope>"#;
        let err = parse_descriptor_str(xml).unwrap_err();
        assert!(matches!(err, Error::AmbiguousElement { count: 2, .. }));
    }

    #[test]
    fn test_item_without_resource_type() {
        let xml = r#"<Envelope><VirtualSystem id="x"><VirtualHardwareSection>
            <Item><InstanceID>1</InstanceID></Item>
        </VirtualHardwareSection></VirtualSystem></Envelope>"#;
        let err = parse_descriptor_str(xml).unwrap_err();
        assert!(matches!(err, Error::MissingElement { .. }));
    }

    #[test]
    fn test_non_numeric_resource_type() {
        let xml = r#"<Envelope><VirtualSystem id="x"><VirtualHardwareSection>
            <Item><ResourceType>cpu</ResourceType></Item>
        </VirtualHardwareSection></VirtualSystem></Envelope>"#;
        let err = parse_descriptor_str(xml).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[test]
    fn test_only_first_virtual_system_is_read() {
        let xml = r#"<Envelope><VirtualSystemCollection>
            <VirtualSystem id="first"><Name>first</Name><VirtualHardwareSection>
                <Item><ResourceType>3</ResourceType><VirtualQuantity>1</VirtualQuantity></Item>
            </VirtualHardwareSection></VirtualSystem>
            <VirtualSystem id="second"><Name>second</Name><VirtualHardwareSection>
                <Item><ResourceType>3</ResourceType><VirtualQuantity>8</VirtualQuantity></Item>
            </VirtualHardwareSection></VirtualSystem>
        </VirtualSystemCollection></Envelope>"#;
        let descriptor = parse_descriptor_str(xml).unwrap();
        assert_eq!(descriptor.name.as_deref(), Some("first"));
        assert_eq!(descriptor.items().len(), 1);
        assert_eq!(descriptor.items()[0].virtual_quantity.as_deref(), Some("1"));
    }

    #[test]
    fn test_malformed_xml() {
        let xml = "<Envelope><VirtualSystem></Envelope>";
        assert!(parse_descriptor_str(xml).is_err());
    }

    #[test]
    fn test_is_named_scsi() {
        let mut item = Item::new(ResourceKind::ScsiController);
        assert!(!item.is_named_scsi());
        item.element_name = Some("SCSI Controller 0".to_string());
        assert!(item.is_named_scsi());
        item.element_name = Some("Controller 1".to_string());
        assert!(!item.is_named_scsi());
    }
}
