//! Image registration.
//!
//! Every disk file in the package becomes one image on the platform. Each
//! file gets its own directory (named after the file, without extension)
//! holding a link to or copy of the extracted file, and the platform is asked
//! to register that directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};

use crate::config::{ConvertOptions, DiskMaterialization};
use crate::error::{Error, Result};
use crate::platform::{ImageRequest, Platform};

/// A disk file registered as an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// The file name as referenced by the descriptor.
    pub file_name: String,
    /// The identifier the platform assigned.
    pub image_id: String,
}

/// Directory an image is registered from.
///
/// `disk1.vmdk` in `base_dir` maps to `base_dir/disk1`. Files without an
/// extension get a `.image` suffix so the directory never shadows the file.
pub fn image_dir(base_dir: &Path, file_name: &str) -> PathBuf {
    let file_path = base_dir.join(file_name);
    if file_path.extension().is_some() {
        file_path.with_extension("")
    } else {
        file_path.with_extension("image")
    }
}

/// Reject file references that could resolve outside the package directory.
///
/// Only plain relative paths are accepted: no root, no drive prefix, no `.`
/// or `..` components.
pub fn check_relative_href(file_name: &str) -> Result<()> {
    let path = Path::new(file_name);
    let plain = path.components().next().is_some()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(Error::invalid_value("File href", file_name))
    }
}

/// Check that every disk file is a plain relative path that exists under
/// `base_dir`, and that no two files share an image directory.
pub fn check_disk_files(base_dir: &Path, file_names: &[String]) -> Result<()> {
    let mut dirs: HashMap<PathBuf, &str> = HashMap::new();

    for file_name in file_names {
        check_relative_href(file_name)?;

        let path = base_dir.join(file_name);
        if !path.is_file() {
            return Err(Error::MissingDiskFile { path });
        }

        let dir = image_dir(base_dir, file_name);
        if let Some(other) = dirs.insert(dir.clone(), file_name.as_str()) {
            return Err(Error::invalid_value(
                "image directory",
                format!("{} (shared by '{}' and '{}')", dir.display(), other, file_name),
            ));
        }
    }
    Ok(())
}

/// Register every disk file with the platform, in order.
///
/// All files are checked before the first directory is made or image
/// allocated. An allocation failure stops registration; images allocated
/// before it stay on the platform and are listed in the returned
/// [`Error::Allocation`].
pub fn register_images<P: Platform + ?Sized>(
    platform: &mut P,
    base_dir: &Path,
    file_names: &[String],
    options: &ConvertOptions,
) -> Result<Vec<ImageRecord>> {
    check_disk_files(base_dir, file_names)?;

    let mut records: Vec<ImageRecord> = Vec::with_capacity(file_names.len());

    for file_name in file_names {
        let dir = image_dir(base_dir, file_name);
        materialize(&base_dir.join(file_name), &dir, options.disk_materialization)?;

        let request = ImageRequest {
            name: file_name.clone(),
            path: dir,
            datastore_id: options.datastore_id,
        };

        match platform.allocate_image(&request) {
            Ok(image_id) => {
                info!(file = %file_name, image_id = %image_id, "registered image");
                records.push(ImageRecord {
                    file_name: file_name.clone(),
                    image_id,
                });
            }
            Err(e) => {
                if !records.is_empty() {
                    let leaked: Vec<&str> = records.iter().map(|r| r.image_id.as_str()).collect();
                    warn!(images = ?leaked, "images registered before the failure are left in place");
                }
                return Err(Error::Allocation {
                    file_name: file_name.clone(),
                    message: e.to_string(),
                    registered: records,
                });
            }
        }
    }

    Ok(records)
}

/// Place `source` inside `dir`, replacing whatever was left there by an
/// earlier run.
fn materialize(source: &Path, dir: &Path, mode: DiskMaterialization) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::io(e, dir))?;

    let file_name = source
        .file_name()
        .ok_or_else(|| Error::MissingDiskFile {
            path: source.to_path_buf(),
        })?;
    let target = dir.join(file_name);

    if fs::symlink_metadata(&target).is_ok() {
        fs::remove_file(&target).map_err(|e| Error::io(e, &target))?;
    }

    match mode {
        DiskMaterialization::Symlink => link(source, &target),
        DiskMaterialization::Copy => fs::copy(source, &target)
            .map(|_| ())
            .map_err(|e| Error::io(e, &target)),
    }
}

#[cfg(unix)]
fn link(source: &Path, target: &Path) -> Result<()> {
    let source = fs::canonicalize(source).map_err(|e| Error::io(e, source))?;
    std::os::unix::fs::symlink(&source, target).map_err(|e| Error::io(e, target))
}

#[cfg(not(unix))]
fn link(source: &Path, target: &Path) -> Result<()> {
    fs::copy(source, target)
        .map(|_| ())
        .map_err(|e| Error::io(e, target))
}
