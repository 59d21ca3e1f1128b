//! ova2one Core Library
//!
//! This crate provides the core functionality for turning OVA packages into
//! OpenNebula VM templates.
//!
//! # Overview
//!
//! An OVA holds an OVF descriptor and the disk files it references. The
//! converter extracts the package, reads the descriptor's virtual hardware,
//! registers every disk file as an image on the platform and renders a VM
//! template that points at those images. The main entry point is
//! [`convert_ova`].
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`config`] - Conversion options and TOML loading
//! - [`ova`] - OVA extraction and manifest checks
//! - [`ovf`] - OVF descriptor parsing and queries
//! - [`platform`] - Platform clients (OpenNebula CLI, dry run)
//! - [`registrar`] - Disk image registration
//! - [`mapper`] - Disk-to-image mapping and the VM model
//! - [`template`] - Template rendering
//! - [`convert`] - Conversion orchestrator
//!
//! # Quick Start
//!
//! ```no_run
//! use ova2one_core::{convert_ova, ConvertOptions, DryRunPlatform};
//! use std::path::Path;
//!
//! let mut platform = DryRunPlatform::new();
//! let options = ConvertOptions::default();
//! let conversion = convert_ova(Path::new("/path/to/vm.ova"), &mut platform, &options, None).unwrap();
//! print!("{}", conversion.template);
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod mapper;
pub mod ova;
pub mod ovf;
pub mod platform;
mod quoting;
pub mod registrar;
pub mod template;

pub use error::{Error, Result};

// Re-export the conversion entry points for convenience
pub use convert::{
    convert_ova, get_ovf_info, submit_ova, Conversion, ConversionPhase, DiskDetail, OvfInfo,
    ProgressCallback,
};

pub use config::{ConvertOptions, DiskMaterialization, PlatformConfig};
pub use platform::{CliPlatform, DryRunPlatform, ImageRequest, Platform, PlatformError};
pub use registrar::ImageRecord;
