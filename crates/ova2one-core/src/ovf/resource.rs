//! Resource type codes carried by OVF hardware items.

use std::fmt;

/// The kind of a virtual hardware item, decoded from its `ResourceType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Virtual CPUs (code 3).
    Processor,
    /// Memory (code 4).
    Memory,
    /// SCSI storage controller (code 6).
    ScsiController,
    /// Ethernet adapter (code 10).
    EthernetAdapter,
    /// CD-ROM drive (code 15).
    CdRom,
    /// Disk drive (code 17).
    Disk,
    /// Any other resource type.
    Other(u16),
}

impl ResourceKind {
    /// Decode a numeric resource type code.
    pub fn from_code(code: u16) -> Self {
        match code {
            3 => ResourceKind::Processor,
            4 => ResourceKind::Memory,
            6 => ResourceKind::ScsiController,
            10 => ResourceKind::EthernetAdapter,
            15 => ResourceKind::CdRom,
            17 => ResourceKind::Disk,
            other => ResourceKind::Other(other),
        }
    }

    /// The numeric resource type code.
    pub fn code(self) -> u16 {
        match self {
            ResourceKind::Processor => 3,
            ResourceKind::Memory => 4,
            ResourceKind::ScsiController => 6,
            ResourceKind::EthernetAdapter => 10,
            ResourceKind::CdRom => 15,
            ResourceKind::Disk => 17,
            ResourceKind::Other(code) => code,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Processor => write!(f, "cpu"),
            ResourceKind::Memory => write!(f, "memory"),
            ResourceKind::ScsiController => write!(f, "scsi controller"),
            ResourceKind::EthernetAdapter => write!(f, "ethernet adapter"),
            ResourceKind::CdRom => write!(f, "cdrom"),
            ResourceKind::Disk => write!(f, "disk"),
            ResourceKind::Other(code) => write!(f, "resource type {}", code),
        }
    }
}
