//! Conversion configuration.
//!
//! Options are passed explicitly to the converter. They can be loaded from a
//! TOML file such as:
//!
//! ```toml
//! datastore_id = 100
//! work_dir = "/var/tmp/ova2one"
//! disk_materialization = "copy"
//!
//! [platform]
//! image_command = "/usr/bin/oneimage"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default OpenNebula datastore for registered images.
pub const DEFAULT_DATASTORE_ID: u32 = 1;

/// How a disk file is placed into its image directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskMaterialization {
    /// Symlink to the extracted file.
    #[default]
    Symlink,
    /// Copy the extracted file.
    Copy,
}

/// Commands used to talk to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    /// Command that registers images.
    pub image_command: String,
    /// Command that registers VM templates.
    pub template_command: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            image_command: "oneimage".to_string(),
            template_command: "onetemplate".to_string(),
        }
    }
}

/// Options for one conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertOptions {
    /// Datastore the disk images are registered in.
    pub datastore_id: u32,
    /// Directory the OVA is extracted into. Defaults to a directory next to
    /// the OVA named after it.
    pub work_dir: Option<PathBuf>,
    /// How disk files are placed into their image directories.
    pub disk_materialization: DiskMaterialization,
    /// Check extracted files against the OVA manifest, when there is one.
    pub verify_manifest: bool,
    pub platform: PlatformConfig,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            datastore_id: DEFAULT_DATASTORE_ID,
            work_dir: None,
            disk_materialization: DiskMaterialization::Symlink,
            verify_manifest: true,
            platform: PlatformConfig::default(),
        }
    }
}

impl ConvertOptions {
    /// Directory an OVA is extracted into.
    pub fn work_dir_for(&self, ova_path: &Path) -> PathBuf {
        match &self.work_dir {
            Some(dir) => dir.clone(),
            None => {
                let stem = ova_path
                    .file_stem()
                    .map(|s| s.to_os_string())
                    .unwrap_or_else(|| "ova".into());
                let parent = ova_path.parent().unwrap_or_else(|| Path::new("."));
                parent.join(stem)
            }
        }
    }
}

/// Load conversion options from a TOML file.
pub fn load(path: &Path) -> Result<ConvertOptions> {
    let content = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
    parse_str(&content)
}

/// Parse conversion options from TOML text.
pub fn parse_str(content: &str) -> Result<ConvertOptions> {
    toml::from_str(content).map_err(|e| Error::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConvertOptions::default();
        assert_eq!(options.datastore_id, 1);
        assert_eq!(options.work_dir, None);
        assert_eq!(options.disk_materialization, DiskMaterialization::Symlink);
        assert!(options.verify_manifest);
        assert_eq!(options.platform.image_command, "oneimage");
        assert_eq!(options.platform.template_command, "onetemplate");
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(parse_str("").unwrap(), ConvertOptions::default());
    }

    #[test]
    fn test_parse_full() {
        let options = parse_str(
            r#"
            datastore_id = 100
            work_dir = "/var/tmp/ova2one"
            disk_materialization = "copy"
            verify_manifest = false

            [platform]
            image_command = "/usr/bin/oneimage"
            "#,
        )
        .unwrap();
        assert_eq!(options.datastore_id, 100);
        assert_eq!(options.work_dir, Some(PathBuf::from("/var/tmp/ova2one")));
        assert_eq!(options.disk_materialization, DiskMaterialization::Copy);
        assert!(!options.verify_manifest);
        assert_eq!(options.platform.image_command, "/usr/bin/oneimage");
        assert_eq!(options.platform.template_command, "onetemplate");
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = parse_str("datastore = 3").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_work_dir_defaults_next_to_ova() {
        let options = ConvertOptions::default();
        assert_eq!(
            options.work_dir_for(Path::new("/data/appliance.ova")),
            PathBuf::from("/data/appliance")
        );
    }

    #[test]
    fn test_work_dir_override() {
        let options = ConvertOptions {
            work_dir: Some(PathBuf::from("/scratch")),
            ..ConvertOptions::default()
        };
        assert_eq!(
            options.work_dir_for(Path::new("/data/appliance.ova")),
            PathBuf::from("/scratch")
        );
    }
}
