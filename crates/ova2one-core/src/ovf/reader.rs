//! Read-only queries over a parsed [`Descriptor`].
//!
//! Every query either returns a value or fails with
//! [`Error::MissingElement`]/[`Error::AmbiguousElement`] naming what was
//! asked for. Queries that legitimately match nothing (no nics, no CD-ROMs)
//! return empty collections instead.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::ovf::descriptor::{Descriptor, Item};
use crate::ovf::resource::ResourceKind;
use crate::quoting::{is_decimal, quote};

/// Prefix of a disk item's `HostResource` that points into the disk section.
pub const DISK_HOST_RESOURCE_PREFIX: &str = "ovf:/disk/";

/// CPU and memory of the virtual system, as written in the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capacity {
    /// Number of virtual CPUs.
    pub cpu: String,
    /// Memory quantity.
    pub memory: String,
}

/// A network adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nic {
    /// The network the adapter is connected to.
    pub network: String,
    /// The adapter model, when the descriptor names one.
    pub model: Option<String>,
}

/// A storage controller that goes into the RAW section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controller {
    pub instance_id: String,
    pub address: String,
    pub model: Option<String>,
}

impl Descriptor {
    /// Iterate over the hardware items of one kind, in document order.
    pub fn items_of(&self, kind: ResourceKind) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(move |item| item.kind == kind)
    }

    /// The virtual machine name.
    ///
    /// Uses the virtual system's `Name`, falling back to its `ovf:id`.
    pub fn name(&self) -> Result<&str> {
        self.name
            .as_deref()
            .or(self.system_id.as_deref())
            .ok_or_else(|| Error::missing("name"))
    }

    /// The CPU count and memory size.
    ///
    /// Exactly one processor item and one memory item must be present.
    pub fn capacity(&self) -> Result<Capacity> {
        let cpu = self.single_quantity(ResourceKind::Processor, "capacity: cpu")?;
        let memory = self.single_quantity(ResourceKind::Memory, "capacity: memory")?;
        Ok(Capacity { cpu, memory })
    }

    fn single_quantity(&self, kind: ResourceKind, query: &str) -> Result<String> {
        let matches: Vec<&Item> = self.items_of(kind).collect();
        match matches.as_slice() {
            [] => Err(Error::missing(query)),
            [item] => {
                let quantity = item
                    .virtual_quantity
                    .as_deref()
                    .ok_or_else(|| Error::missing(format!("{}: VirtualQuantity", query)))?;
                if !is_decimal(quantity) {
                    return Err(Error::invalid_value(format!("{}: VirtualQuantity", query), quantity));
                }
                Ok(quantity.to_string())
            }
            many => Err(Error::ambiguous(query, many.len())),
        }
    }

    /// File names of every disk in the disk section, in order.
    ///
    /// Each disk's `fileRef` is joined against the file references.
    pub fn disk_file_names(&self) -> Result<Vec<String>> {
        self.disks
            .iter()
            .map(|disk| {
                let file_ref = disk.file_ref.as_deref().ok_or_else(|| {
                    Error::unresolved(format!("disk '{}' has no fileRef", disk.disk_id))
                })?;
                let file = self.file_by_id(file_ref).ok_or_else(|| {
                    Error::unresolved(format!(
                        "disk '{}' references unknown file '{}'",
                        disk.disk_id, file_ref
                    ))
                })?;
                Ok(file.href.clone())
            })
            .collect()
    }

    /// Instance ids of the addressable SCSI controllers.
    ///
    /// Controllers whose `ElementName` contains "scsi" (any case) are left
    /// out; only the remaining controller instances count as SCSI buses.
    pub fn scsi_instance_ids(&self) -> Result<BTreeSet<String>> {
        self.scsi_controller_items()
            .map(|item| {
                item.instance_id
                    .clone()
                    .ok_or_else(|| Error::missing("scsi controller: InstanceID"))
            })
            .collect()
    }

    fn scsi_controller_items(&self) -> impl Iterator<Item = &Item> {
        self.items_of(ResourceKind::ScsiController)
            .filter(|item| !item.is_named_scsi())
    }

    /// The network adapters, in document order.
    pub fn nics(&self) -> Result<Vec<Nic>> {
        self.items_of(ResourceKind::EthernetAdapter)
            .map(|item| {
                let network = item.connection.clone().ok_or_else(|| {
                    Error::missing(format!(
                        "nic {}: Connection",
                        item.instance_id.as_deref().unwrap_or("?")
                    ))
                })?;
                Ok(Nic {
                    network,
                    model: item.resource_sub_type.clone(),
                })
            })
            .collect()
    }

    /// The SCSI controllers that go into the RAW section.
    pub fn controllers(&self) -> Result<Vec<Controller>> {
        self.scsi_controller_items()
            .map(|item| {
                let instance_id = item
                    .instance_id
                    .clone()
                    .ok_or_else(|| Error::missing("scsi controller: InstanceID"))?;
                let address = item.address.clone().ok_or_else(|| {
                    Error::missing(format!("scsi controller {}: Address", instance_id))
                })?;
                Ok(Controller {
                    instance_id,
                    address,
                    model: item.resource_sub_type.clone(),
                })
            })
            .collect()
    }

    /// The controller declarations wrapped as a `RAW=[DATA="..."]` section.
    pub fn raw_controller_block(&self) -> Result<String> {
        let data: String = self
            .controllers()?
            .iter()
            .map(controller_declaration)
            .collect();
        Ok(format!("RAW=[DATA={}]", quote(&data)))
    }

    /// Instance ids of the CD-ROM drives.
    ///
    /// CD-ROMs are reported but never mapped into the template.
    pub fn cdroms(&self) -> Vec<String> {
        self.items_of(ResourceKind::CdRom)
            .filter_map(|item| item.instance_id.clone())
            .collect()
    }
}

fn controller_declaration(controller: &Controller) -> String {
    let mut decl = format!(
        "<devices><controller type='scsi' index='{}'",
        quick_xml::escape::escape(controller.address.as_str())
    );
    if let Some(model) = &controller.model {
        decl.push_str(&format!(" model='{}'", quick_xml::escape::escape(model.as_str())));
    }
    decl.push_str("/></devices>");
    decl
}
