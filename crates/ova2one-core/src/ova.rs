//! OVA archive extraction.
//!
//! An OVA is a TAR archive (optionally gzip-compressed) holding one OVF
//! descriptor, the disk files it references and, usually, a manifest with
//! file checksums.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Leading bytes of a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The result of extracting an OVA.
#[derive(Debug, Clone)]
pub struct UnpackedOva {
    /// Path of the extracted OVF descriptor.
    pub descriptor: PathBuf,
    /// Every extracted regular file.
    pub files: Vec<PathBuf>,
    /// Path of the extracted manifest, if the archive had one.
    pub manifest: Option<PathBuf>,
}

/// Whether a path has the given extension, ignoring case.
fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Whether a path names an OVF descriptor.
pub fn is_descriptor(path: &Path) -> bool {
    has_extension(path, "ovf")
}

fn open_archive(path: &Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = File::open(path).map_err(|e| Error::io(e, path))?;
    let mut reader = BufReader::new(file);
    let is_gzip = reader
        .fill_buf()
        .map_err(|e| Error::io(e, path))?
        .starts_with(&GZIP_MAGIC);

    let stream: Box<dyn Read> = if is_gzip {
        debug!(path = %path.display(), "gzip-compressed archive");
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };
    Ok(tar::Archive::new(stream))
}

fn archive_error(path: &Path, e: io::Error) -> Error {
    Error::archive(format!("{}: {}", path.display(), e))
}

/// Extract an OVA into `dest`.
///
/// Entries that would land outside `dest` are skipped.
///
/// # Errors
///
/// Returns [`Error::Archive`] if the archive cannot be read or does not hold
/// exactly one `.ovf` descriptor.
pub fn unpack(archive_path: &Path, dest: &Path) -> Result<UnpackedOva> {
    fs::create_dir_all(dest).map_err(|e| Error::io(e, dest))?;

    let mut archive = open_archive(archive_path)?;
    let entries = archive
        .entries()
        .map_err(|e| archive_error(archive_path, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_error(archive_path, e))?;
        let relative = entry
            .path()
            .map_err(|e| archive_error(archive_path, e))?
            .into_owned();
        let is_file = entry.header().entry_type().is_file();

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| archive_error(archive_path, e))?;
        if !unpacked {
            warn!(entry = %relative.display(), "skipping archive entry outside the extraction directory");
            continue;
        }

        if is_file {
            debug!(entry = %relative.display(), "extracted");
            files.push(dest.join(relative));
        }
    }

    let mut descriptors = files.iter().filter(|p| is_descriptor(p));
    let descriptor = match (descriptors.next(), descriptors.next()) {
        (Some(descriptor), None) => descriptor.clone(),
        (None, _) => {
            return Err(Error::archive(format!(
                "{}: no .ovf descriptor in archive",
                archive_path.display()
            )))
        }
        (Some(_), Some(_)) => {
            return Err(Error::archive(format!(
                "{}: more than one .ovf descriptor in archive",
                archive_path.display()
            )))
        }
    };

    let manifest = files.iter().find(|p| has_extension(p, "mf")).cloned();

    Ok(UnpackedOva {
        descriptor,
        files,
        manifest,
    })
}

/// Read the OVF descriptor out of an OVA without extracting anything else.
///
/// Returns the descriptor's archive path and its content. Like [`unpack`],
/// the archive must hold exactly one `.ovf`, so every entry is scanned.
pub fn read_descriptor(archive_path: &Path) -> Result<(PathBuf, String)> {
    let mut archive = open_archive(archive_path)?;
    let entries = archive
        .entries()
        .map_err(|e| archive_error(archive_path, e))?;

    let mut found: Option<(PathBuf, String)> = None;
    for entry in entries {
        let mut entry = entry.map_err(|e| archive_error(archive_path, e))?;
        let path = entry
            .path()
            .map_err(|e| archive_error(archive_path, e))?
            .into_owned();
        if !entry.header().entry_type().is_file() || !is_descriptor(&path) {
            continue;
        }
        if found.is_some() {
            return Err(Error::archive(format!(
                "{}: more than one .ovf descriptor in archive",
                archive_path.display()
            )));
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| archive_error(archive_path, e))?;
        found = Some((path, content));
    }

    found.ok_or_else(|| {
        Error::archive(format!(
            "{}: no .ovf descriptor in archive",
            archive_path.display()
        ))
    })
}

/// One line of an OVA manifest: `SHA256(disk1.vmdk)= <hex digest>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub algorithm: String,
    pub file_name: String,
    pub digest: String,
}

/// Parse manifest content.
pub fn parse_manifest(content: &str) -> Result<Vec<ManifestEntry>> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let malformed = || Error::archive(format!("malformed manifest line: {}", line));
            let (algorithm, rest) = line.split_once('(').ok_or_else(malformed)?;
            let (file_name, digest) = rest.split_once(")=").ok_or_else(malformed)?;
            Ok(ManifestEntry {
                algorithm: algorithm.trim().to_uppercase(),
                file_name: file_name.to_string(),
                digest: digest.trim().to_lowercase(),
            })
        })
        .collect()
}

/// Compute the SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(e, path))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| Error::io(e, path))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check the files listed in a manifest against their digests.
///
/// File names are resolved relative to the manifest's directory. Only
/// SHA-256 entries are checked; other algorithms are skipped with a warning.
pub fn verify_manifest(manifest_path: &Path) -> Result<()> {
    let content = fs::read_to_string(manifest_path).map_err(|e| Error::io(e, manifest_path))?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    for entry in parse_manifest(&content)? {
        if entry.algorithm != "SHA256" {
            warn!(file = %entry.file_name, algorithm = %entry.algorithm, "skipping unsupported manifest digest");
            continue;
        }

        let path = base_dir.join(&entry.file_name);
        if !path.is_file() {
            return Err(Error::archive(format!(
                "manifest lists '{}' which is not in the archive",
                entry.file_name
            )));
        }

        let actual = sha256_file(&path)?;
        if actual != entry.digest {
            return Err(Error::archive(format!(
                "checksum mismatch for '{}': manifest has {}, file has {}",
                entry.file_name, entry.digest, actual
            )));
        }
        debug!(file = %entry.file_name, "manifest digest verified");
    }

    Ok(())
}
