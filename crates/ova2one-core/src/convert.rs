//! Conversion orchestrator for OVA to OpenNebula template conversion.
//!
//! This module coordinates the full conversion:
//! 1. Extract the OVA (or use a bare `.ovf` in place)
//! 2. Parse the OVF descriptor
//! 3. Register every disk file as an image on the platform
//! 4. Map disk items to registered images
//! 5. Render the VM template
//!
//! Any failure aborts the whole conversion. Images registered before a later
//! failure are not removed.
//!
//! # Example
//!
//! ```no_run
//! use ova2one_core::convert::convert_ova;
//! use ova2one_core::config::ConvertOptions;
//! use ova2one_core::platform::DryRunPlatform;
//! use std::path::Path;
//!
//! let mut platform = DryRunPlatform::new();
//! let conversion = convert_ova(
//!     Path::new("/path/to/appliance.ova"),
//!     &mut platform,
//!     &ConvertOptions::default(),
//!     None,
//! )
//! .unwrap();
//! println!("{}", conversion.template);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::ConvertOptions;
use crate::error::{Error, Result};
use crate::mapper::{map_vm, BusFamily};
use crate::ova;
use crate::ovf::{parse_descriptor, parse_descriptor_str, Capacity, Controller, Descriptor, Nic};
use crate::platform::Platform;
use crate::registrar::{register_images, ImageRecord};
use crate::template;

/// Phase of a conversion. Phases are entered in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPhase {
    /// The package has been extracted.
    Unpacked,
    /// The descriptor has been parsed.
    Parsed,
    /// Every disk file has been registered as an image.
    ImagesRegistered,
    /// Every disk item has been resolved to an image.
    Mapped,
    /// The template has been rendered.
    Rendered,
}

impl fmt::Display for ConversionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionPhase::Unpacked => write!(f, "Unpacked"),
            ConversionPhase::Parsed => write!(f, "Parsed"),
            ConversionPhase::ImagesRegistered => write!(f, "ImagesRegistered"),
            ConversionPhase::Mapped => write!(f, "Mapped"),
            ConversionPhase::Rendered => write!(f, "Rendered"),
        }
    }
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(ConversionPhase) + Send>;

/// The result of a successful conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    /// The rendered VM template.
    pub template: String,
    /// The images registered for the VM's disks.
    pub images: Vec<ImageRecord>,
    /// Where the descriptor was read from.
    pub descriptor_path: PathBuf,
}

/// Locate the descriptor for an input, extracting it when it is an OVA.
fn locate_descriptor(input: &Path, options: &ConvertOptions) -> Result<PathBuf> {
    if ova::is_descriptor(input) {
        if !input.is_file() {
            return Err(Error::io(
                std::io::Error::new(std::io::ErrorKind::NotFound, "descriptor not found"),
                input,
            ));
        }
        return Ok(input.to_path_buf());
    }

    let dest = options.work_dir_for(input);
    info!(archive = %input.display(), dest = %dest.display(), "extracting OVA");
    let unpacked = ova::unpack(input, &dest)?;

    if options.verify_manifest {
        if let Some(manifest) = &unpacked.manifest {
            ova::verify_manifest(manifest)?;
        }
    }

    Ok(unpacked.descriptor)
}

/// Convert an OVA (or a bare OVF descriptor) into a VM template.
///
/// Disk images are registered on `platform` in descriptor order. The
/// template itself is returned, not submitted.
///
/// # Errors
///
/// Fails on the first error of any phase. When image registration fails
/// part-way, [`Error::Allocation`] lists the images already registered.
pub fn convert_ova<P: Platform + ?Sized>(
    input: &Path,
    platform: &mut P,
    options: &ConvertOptions,
    progress_callback: Option<ProgressCallback>,
) -> Result<Conversion> {
    let report = |phase: ConversionPhase| {
        info!(phase = %phase, "conversion phase");
        if let Some(ref callback) = progress_callback {
            callback(phase);
        }
    };

    let descriptor_path = locate_descriptor(input, options)?;
    report(ConversionPhase::Unpacked);

    let descriptor = parse_descriptor(&descriptor_path)?;
    // Resolve the file names now so broken disk references fail before any
    // image is allocated.
    let file_names = descriptor.disk_file_names()?;
    report(ConversionPhase::Parsed);

    let base_dir = descriptor_path
        .parent()
        .ok_or_else(|| Error::missing("descriptor directory"))?;
    let images = register_images(platform, base_dir, &file_names, options)?;
    report(ConversionPhase::ImagesRegistered);

    let vm = map_vm(&descriptor, &images)?;
    report(ConversionPhase::Mapped);

    let template = template::render(&vm)?;
    report(ConversionPhase::Rendered);

    Ok(Conversion {
        template,
        images,
        descriptor_path,
    })
}

/// Convert an OVA and register the resulting template on the platform.
///
/// Returns the conversion and the template identifier.
pub fn submit_ova<P: Platform + ?Sized>(
    input: &Path,
    platform: &mut P,
    options: &ConvertOptions,
    progress_callback: Option<ProgressCallback>,
) -> Result<(Conversion, String)> {
    let conversion = convert_ova(input, platform, options, progress_callback)?;
    let template_id = platform
        .submit_template(&conversion.template)
        .map_err(|e| Error::submit(e.to_string()))?;
    info!(template_id = %template_id, "submitted template");
    Ok((conversion, template_id))
}

/// A disk as it would be attached, without an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskDetail {
    pub instance_id: String,
    pub bus: BusFamily,
    pub target: String,
    /// The file backing the disk, when the references resolve.
    pub file_name: Option<String>,
}

/// Summary information about the VM in a package.
#[derive(Debug, Clone)]
pub struct OvfInfo {
    pub name: String,
    pub capacity: Capacity,
    pub disk_files: Vec<String>,
    pub disks: Vec<DiskDetail>,
    pub nics: Vec<Nic>,
    pub controllers: Vec<Controller>,
    pub cdroms: Vec<String>,
}

/// Get information about the VM in an OVA or OVF without converting it.
///
/// OVAs are read in place; nothing is extracted and nothing is registered.
pub fn get_ovf_info(input: &Path) -> Result<OvfInfo> {
    let descriptor = if ova::is_descriptor(input) {
        parse_descriptor(input)?
    } else {
        let (_, content) = ova::read_descriptor(input)?;
        parse_descriptor_str(&content)?
    };
    describe(&descriptor)
}

fn describe(descriptor: &Descriptor) -> Result<OvfInfo> {
    let disks = descriptor
        .disk_slots()?
        .into_iter()
        .map(|slot| {
            let file_name = descriptor
                .disk_by_id(&slot.disk_id)
                .and_then(|disk| disk.file_ref.as_deref())
                .and_then(|file_ref| descriptor.file_by_id(file_ref))
                .map(|file| file.href.clone());
            DiskDetail {
                target: slot.target(),
                instance_id: slot.instance_id,
                bus: slot.bus,
                file_name,
            }
        })
        .collect();

    Ok(OvfInfo {
        name: descriptor.name()?.to_string(),
        capacity: descriptor.capacity()?,
        disk_files: descriptor.disk_file_names()?,
        disks,
        nics: descriptor.nics()?,
        controllers: descriptor.controllers()?,
        cdroms: descriptor.cdroms(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_phase_display() {
        assert_eq!(format!("{}", ConversionPhase::Unpacked), "Unpacked");
        assert_eq!(format!("{}", ConversionPhase::Parsed), "Parsed");
        assert_eq!(
            format!("{}", ConversionPhase::ImagesRegistered),
            "ImagesRegistered"
        );
        assert_eq!(format!("{}", ConversionPhase::Mapped), "Mapped");
        assert_eq!(format!("{}", ConversionPhase::Rendered), "Rendered");
    }

    #[test]
    fn test_missing_ovf_input() {
        let mut platform = crate::platform::DryRunPlatform::new();
        let err = convert_ova(
            Path::new("/nonexistent/ova2one/vm.ovf"),
            &mut platform,
            &ConvertOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
