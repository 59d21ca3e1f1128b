//! OVF descriptor handling.
//!
//! This module parses OVF descriptors and answers the questions the
//! converter asks about them: name, capacity, disks, nics and controllers.

pub mod descriptor;
pub mod reader;
pub mod resource;

pub use descriptor::{parse_descriptor, parse_descriptor_str, Descriptor, DiskEntry, FileEntry, Item};
pub use reader::{Capacity, Controller, Nic, DISK_HOST_RESOURCE_PREFIX};
pub use resource::ResourceKind;
