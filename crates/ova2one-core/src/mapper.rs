//! Resource mapping.
//!
//! Joins the descriptor's disk items with the images registered for the
//! conversion and assembles the [`VmDescriptor`] handed to the template
//! renderer.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};
use crate::ovf::{Capacity, Descriptor, Nic, ResourceKind, DISK_HOST_RESOURCE_PREFIX};
use crate::registrar::ImageRecord;

/// The bus a disk is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusFamily {
    Scsi,
    Ide,
}

impl BusFamily {
    /// Device name prefix for disks on this bus.
    pub fn prefix(self) -> &'static str {
        match self {
            BusFamily::Scsi => "sd",
            BusFamily::Ide => "hd",
        }
    }
}

impl fmt::Display for BusFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusFamily::Scsi => write!(f, "scsi"),
            BusFamily::Ide => write!(f, "ide"),
        }
    }
}

/// Device slot letter for an address-on-parent offset: 0 is 'a', 25 is 'z'.
pub fn slot_letter(offset: u32) -> Option<char> {
    if offset < 26 {
        char::from_u32('a' as u32 + offset)
    } else {
        None
    }
}

/// A disk item placed on a bus, before its image is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSlot {
    pub instance_id: String,
    pub bus: BusFamily,
    pub slot: char,
    /// The disk section id the item's `HostResource` points at.
    pub disk_id: String,
}

impl DiskSlot {
    /// Target device name, e.g. "sda" or "hdb".
    pub fn target(&self) -> String {
        format!("{}{}", self.bus.prefix(), self.slot)
    }
}

/// A disk item resolved to a registered image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskAssignment {
    pub instance_id: String,
    pub bus: BusFamily,
    pub slot: char,
    pub image_id: String,
}

impl DiskAssignment {
    /// Target device name, e.g. "sda" or "hdb".
    pub fn target(&self) -> String {
        format!("{}{}", self.bus.prefix(), self.slot)
    }
}

impl Descriptor {
    /// Place every disk item on its bus and slot.
    ///
    /// A disk is on the SCSI bus when its instance id is one of
    /// [`Descriptor::scsi_instance_ids`], otherwise on IDE. Two disks landing
    /// on the same target is an error.
    pub fn disk_slots(&self) -> Result<Vec<DiskSlot>> {
        let scsi_ids = self.scsi_instance_ids()?;
        let mut slots = Vec::new();
        let mut targets: HashMap<String, String> = HashMap::new();

        for item in self.items_of(ResourceKind::Disk) {
            let instance_id = item
                .instance_id
                .clone()
                .ok_or_else(|| Error::missing("disk: InstanceID"))?;
            let slot = disk_slot_letter(item.address_on_parent.as_deref(), &instance_id)?;
            let host_resource = item.host_resource.as_deref().ok_or_else(|| {
                Error::missing(format!("disk {}: HostResource", instance_id))
            })?;
            let disk_id = host_resource
                .strip_prefix(DISK_HOST_RESOURCE_PREFIX)
                .unwrap_or(host_resource)
                .to_string();
            let bus = bus_family(&scsi_ids, &instance_id);

            let disk_slot = DiskSlot {
                instance_id,
                bus,
                slot,
                disk_id,
            };
            let target = disk_slot.target();
            if let Some(first) = targets.insert(target.clone(), disk_slot.instance_id.clone()) {
                return Err(Error::DeviceSlotConflict {
                    target,
                    first,
                    second: disk_slot.instance_id,
                });
            }

            debug!(instance_id = %disk_slot.instance_id, target = %target, "disk slot");
            slots.push(disk_slot);
        }

        Ok(slots)
    }

    /// Resolve every disk item to a registered image.
    ///
    /// The item's `HostResource` is followed to its disk entry, the disk's
    /// `fileRef` to its file, and the file's `href` to the image registered
    /// under that name.
    pub fn disks(&self, images: &[ImageRecord]) -> Result<Vec<DiskAssignment>> {
        self.disk_slots()?
            .into_iter()
            .map(|slot| {
                let image_id = self.image_for_disk(&slot.disk_id, images)?;
                Ok(DiskAssignment {
                    instance_id: slot.instance_id,
                    bus: slot.bus,
                    slot: slot.slot,
                    image_id: image_id.to_string(),
                })
            })
            .collect()
    }

    fn image_for_disk<'a>(&self, disk_id: &str, images: &'a [ImageRecord]) -> Result<&'a str> {
        let disk = self.disk_by_id(disk_id).ok_or_else(|| {
            Error::unresolved(format!("no disk with id '{}' in the disk section", disk_id))
        })?;
        let file_ref = disk
            .file_ref
            .as_deref()
            .ok_or_else(|| Error::unresolved(format!("disk '{}' has no fileRef", disk_id)))?;
        let file = self.file_by_id(file_ref).ok_or_else(|| {
            Error::unresolved(format!(
                "disk '{}' references unknown file '{}'",
                disk_id, file_ref
            ))
        })?;
        images
            .iter()
            .find(|image| image.file_name == file.href)
            .map(|image| image.image_id.as_str())
            .ok_or_else(|| {
                Error::unresolved(format!("no image registered for file '{}'", file.href))
            })
    }
}

fn bus_family(scsi_ids: &BTreeSet<String>, instance_id: &str) -> BusFamily {
    if scsi_ids.contains(instance_id) {
        BusFamily::Scsi
    } else {
        BusFamily::Ide
    }
}

fn disk_slot_letter(address_on_parent: Option<&str>, instance_id: &str) -> Result<char> {
    let raw = address_on_parent.ok_or_else(|| {
        Error::missing(format!("disk {}: AddressOnParent", instance_id))
    })?;
    raw.trim()
        .parse::<u32>()
        .ok()
        .and_then(slot_letter)
        .ok_or_else(|| Error::invalid_value("AddressOnParent", raw))
}

/// Everything the template needs about one virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmDescriptor {
    pub name: String,
    pub capacity: Capacity,
    pub disks: Vec<DiskAssignment>,
    pub nics: Vec<Nic>,
    /// The complete `RAW=[...]` section.
    pub raw: String,
}

/// Build the [`VmDescriptor`] for a descriptor and its registered images.
pub fn map_vm(descriptor: &Descriptor, images: &[ImageRecord]) -> Result<VmDescriptor> {
    Ok(VmDescriptor {
        name: descriptor.name()?.to_string(),
        capacity: descriptor.capacity()?,
        disks: descriptor.disks(images)?,
        nics: descriptor.nics()?,
        raw: descriptor.raw_controller_block()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ovf::parse_descriptor_str;

    fn descriptor(items: &str) -> Descriptor {
        let xml = format!(
            r#"<Envelope>
  <References><File id="f1" href="disk1.img"/><File id="f2" href="disk2.img"/></References>
  <DiskSection><Disk diskId="d1" fileRef="f1"/><Disk diskId="d2" fileRef="f2"/></DiskSection>
  <VirtualSystem id="vm1"><Name>vm1</Name><VirtualHardwareSection>
    <Item><ResourceType>3</ResourceType><VirtualQuantity>2</VirtualQuantity></Item>
    <Item><ResourceType>4</ResourceType><VirtualQuantity>1024</VirtualQuantity></Item>
    {}
  </VirtualHardwareSection></VirtualSystem>
</Envelope>"#,
            items
        );
        parse_descriptor_str(&xml).unwrap()
    }

    fn disk_item(instance_id: &str, address_on_parent: &str, host_resource: &str) -> String {
        format!(
            "<Item><ResourceType>17</ResourceType><InstanceID>{}</InstanceID>\
             <AddressOnParent>{}</AddressOnParent><HostResource>{}</HostResource></Item>",
            instance_id, address_on_parent, host_resource
        )
    }

    fn images() -> Vec<ImageRecord> {
        vec![
            ImageRecord {
                file_name: "disk2.img".to_string(),
                image_id: "img-43".to_string(),
            },
            ImageRecord {
                file_name: "disk1.img".to_string(),
                image_id: "img-42".to_string(),
            },
        ]
    }

    #[test]
    fn test_slot_letter() {
        assert_eq!(slot_letter(0), Some('a'));
        assert_eq!(slot_letter(1), Some('b'));
        assert_eq!(slot_letter(25), Some('z'));
        assert_eq!(slot_letter(26), None);
    }

    #[test]
    fn test_bus_prefix() {
        assert_eq!(BusFamily::Scsi.prefix(), "sd");
        assert_eq!(BusFamily::Ide.prefix(), "hd");
        assert_eq!(BusFamily::Scsi.to_string(), "scsi");
    }

    #[test]
    fn test_transitive_image_resolution() {
        let descriptor = descriptor(&disk_item("i1", "0", "ovf:/disk/d1"));
        let disks = descriptor.disks(&images()).unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].image_id, "img-42");
        assert_eq!(disks[0].target(), "hda");
        assert_eq!(disks[0].bus, BusFamily::Ide);
    }

    #[test]
    fn test_scsi_bus_from_controller_instance_id() {
        let items = [
            "<Item><ResourceType>6</ResourceType><InstanceID>i1</InstanceID><Address>0</Address></Item>"
                .to_string(),
            disk_item("i1", "1", "ovf:/disk/d1"),
        ]
        .concat();
        let descriptor = descriptor(&items);
        let disks = descriptor.disks(&images()).unwrap();
        assert_eq!(disks[0].bus, BusFamily::Scsi);
        assert_eq!(disks[0].target(), "sdb");
    }

    #[test]
    fn test_unknown_disk_id_is_unresolved() {
        let descriptor = descriptor(&disk_item("i1", "0", "ovf:/disk/d9"));
        assert!(matches!(
            descriptor.disks(&images()),
            Err(Error::UnresolvedImage { .. })
        ));
    }

    #[test]
    fn test_missing_image_record_is_unresolved() {
        let descriptor = descriptor(&disk_item("i1", "0", "ovf:/disk/d1"));
        let only_second = vec![ImageRecord {
            file_name: "disk2.img".to_string(),
            image_id: "img-43".to_string(),
        }];
        assert!(matches!(
            descriptor.disks(&only_second),
            Err(Error::UnresolvedImage { .. })
        ));
    }

    #[test]
    fn test_slot_conflict() {
        let items = [
            disk_item("i1", "0", "ovf:/disk/d1"),
            disk_item("i2", "0", "ovf:/disk/d2"),
        ]
        .concat();
        let descriptor = descriptor(&items);
        match descriptor.disk_slots() {
            Err(Error::DeviceSlotConflict {
                target,
                first,
                second,
            }) => {
                assert_eq!(target, "hda");
                assert_eq!(first, "i1");
                assert_eq!(second, "i2");
            }
            other => panic!("expected DeviceSlotConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_address_past_z() {
        let descriptor = descriptor(&disk_item("i1", "26", "ovf:/disk/d1"));
        assert!(matches!(
            descriptor.disk_slots(),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_address_on_parent() {
        let xml = "<Item><ResourceType>17</ResourceType><InstanceID>i1</InstanceID>\
                   <HostResource>ovf:/disk/d1</HostResource></Item>";
        let descriptor = descriptor(xml);
        assert!(matches!(
            descriptor.disk_slots(),
            Err(Error::MissingElement { .. })
        ));
    }

    #[test]
    fn test_map_vm() {
        let items = [
            disk_item("i1", "0", "ovf:/disk/d1"),
            disk_item("i2", "1", "ovf:/disk/d2"),
            "<Item><ResourceType>10</ResourceType><Connection>public</Connection></Item>".to_string(),
        ]
        .concat();
        let vm = map_vm(&descriptor(&items), &images()).unwrap();
        assert_eq!(vm.name, "vm1");
        assert_eq!(vm.capacity.cpu, "2");
        assert_eq!(vm.capacity.memory, "1024");
        assert_eq!(vm.disks.len(), 2);
        assert_eq!(vm.disks[1].image_id, "img-43");
        assert_eq!(vm.disks[1].target(), "hdb");
        assert_eq!(vm.nics.len(), 1);
        assert_eq!(vm.raw, "RAW=[DATA=\"\"]");
    }
}
