//! Cloud platform clients.
//!
//! The converter only needs two things from the platform: allocating an
//! image for a disk file and registering the finished template. Both go
//! through the [`Platform`] trait so conversions can run against OpenNebula's
//! command-line tools or against the in-memory [`DryRunPlatform`].

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::config::PlatformConfig;
use crate::error::{Error, Result};

/// A request to register a disk file as an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Image name; the disk's file name in the package.
    pub name: String,
    /// Directory holding the disk file.
    pub path: PathBuf,
    /// Datastore to register the image in.
    pub datastore_id: u32,
}

impl ImageRequest {
    /// The image template describing this request.
    pub fn to_template(&self) -> String {
        format!("NAME={}\nPATH={}\n", self.name, self.path.display())
    }
}

/// Errors reported by a platform client.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The platform refused the request.
    #[error("{0}")]
    Rejected(String),

    /// The client could not run.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A cloud platform that can register images and templates.
pub trait Platform {
    /// Allocate an image and return its identifier.
    fn allocate_image(&mut self, request: &ImageRequest) -> std::result::Result<String, PlatformError>;

    /// Register a VM template and return its identifier.
    fn submit_template(&mut self, template: &str) -> std::result::Result<String, PlatformError>;
}

/// OpenNebula client driving the `oneimage` and `onetemplate` commands.
#[derive(Debug, Clone)]
pub struct CliPlatform {
    image_command: PathBuf,
    template_command: PathBuf,
}

impl CliPlatform {
    /// Create a client, resolving both commands on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientInit`] if either command cannot be found.
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        let resolve = |command: &str| {
            which::which(command).map_err(|e| {
                Error::client_init(format!("command '{}' not found: {}", command, e))
            })
        };

        Ok(Self {
            image_command: resolve(&config.image_command)?,
            template_command: resolve(&config.template_command)?,
        })
    }

    fn run(&self, command: &mut Command) -> std::result::Result<String, PlatformError> {
        debug!(command = ?command, "running platform command");
        let output = command.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!("command exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(PlatformError::Rejected(message));
        }

        parse_created_id(&stdout).ok_or_else(|| {
            PlatformError::Rejected(format!("unexpected output: {}", stdout.trim()))
        })
    }
}

impl Platform for CliPlatform {
    fn allocate_image(&mut self, request: &ImageRequest) -> std::result::Result<String, PlatformError> {
        let mut command = Command::new(&self.image_command);
        command
            .arg("create")
            .arg("--datastore")
            .arg(request.datastore_id.to_string())
            .arg("--name")
            .arg(&request.name)
            .arg("--path")
            .arg(&request.path);
        self.run(&mut command)
    }

    fn submit_template(&mut self, template: &str) -> std::result::Result<String, PlatformError> {
        // Removed when `file` drops, whether or not the command succeeds.
        let mut file = tempfile::Builder::new()
            .prefix("ova2one-")
            .suffix(".tmpl")
            .tempfile()?;
        file.write_all(template.as_bytes())?;
        file.flush()?;

        let mut command = Command::new(&self.template_command);
        command.arg("create").arg(file.path());
        self.run(&mut command)
    }
}

/// Extract the identifier from `ID: <n>` command output.
pub fn parse_created_id(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("ID:")?;
        let id = rest.trim();
        if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        }
    })
}

/// A platform that registers nothing and hands out sequential identifiers.
///
/// Every request is recorded so callers can inspect what a real conversion
/// would have allocated.
#[derive(Debug, Clone, Default)]
pub struct DryRunPlatform {
    next_id: u64,
    /// Image requests in the order they were made.
    pub images: Vec<ImageRequest>,
    /// Templates in the order they were submitted.
    pub templates: Vec<String>,
}

impl DryRunPlatform {
    /// Create a dry-run platform whose first identifier is 0.
    pub fn new() -> Self {
        Self::default()
    }

    fn take_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }
}

impl Platform for DryRunPlatform {
    fn allocate_image(&mut self, request: &ImageRequest) -> std::result::Result<String, PlatformError> {
        self.images.push(request.clone());
        Ok(self.take_id())
    }

    fn submit_template(&mut self, template: &str) -> std::result::Result<String, PlatformError> {
        self.templates.push(template.to_string());
        Ok(self.take_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_created_id() {
        assert_eq!(parse_created_id("ID: 42\n"), Some("42".to_string()));
        assert_eq!(
            parse_created_id("warning: something\nID: 7\n"),
            Some("7".to_string())
        );
        assert_eq!(parse_created_id("ID:\n"), None);
        assert_eq!(parse_created_id("created"), None);
    }

    #[test]
    fn test_image_request_template() {
        let request = ImageRequest {
            name: "disk1.vmdk".to_string(),
            path: PathBuf::from("/work/disk1"),
            datastore_id: 1,
        };
        assert_eq!(request.to_template(), "NAME=disk1.vmdk\nPATH=/work/disk1\n");
    }

    #[cfg(unix)]
    fn write_script(path: &std::path::Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, body).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_platform_submits_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("seen.tmpl");
        let seen_path = dir.path().join("seen.path");
        let tool = dir.path().join("onetemplate");
        write_script(
            &tool,
            &format!(
                "#!/bin/sh\ncp \"$2\" '{}'\necho \"$2\" > '{}'\necho 'ID: 5'\n",
                seen.display(),
                seen_path.display()
            ),
        );

        let config = PlatformConfig {
            image_command: tool.display().to_string(),
            template_command: tool.display().to_string(),
        };
        let mut platform = CliPlatform::new(&config).unwrap();
        let id = platform.submit_template("NAME=vm1\n").unwrap();

        assert_eq!(id, "5");
        assert_eq!(std::fs::read_to_string(&seen).unwrap(), "NAME=vm1\n");
        let used = std::fs::read_to_string(&seen_path).unwrap();
        assert!(!std::path::Path::new(used.trim()).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_cli_platform_rejected_command() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("oneimage");
        write_script(&tool, "#!/bin/sh\necho 'datastore full' >&2\nexit 1\n");

        let config = PlatformConfig {
            image_command: tool.display().to_string(),
            template_command: tool.display().to_string(),
        };
        let mut platform = CliPlatform::new(&config).unwrap();
        let request = ImageRequest {
            name: "disk1.vmdk".to_string(),
            path: PathBuf::from("/work/disk1"),
            datastore_id: 1,
        };
        match platform.allocate_image(&request) {
            Err(PlatformError::Rejected(message)) => assert_eq!(message, "datastore full"),
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_platform_missing_command() {
        let config = PlatformConfig {
            image_command: "/nonexistent/ova2one/oneimage".to_string(),
            template_command: "/nonexistent/ova2one/onetemplate".to_string(),
        };
        let err = CliPlatform::new(&config).unwrap_err();
        assert!(matches!(err, Error::ClientInit { .. }));
    }

    #[test]
    fn test_dry_run_ids_are_sequential() {
        let mut platform = DryRunPlatform::new();
        let request = ImageRequest {
            name: "a.vmdk".to_string(),
            path: PathBuf::from("/work/a"),
            datastore_id: 1,
        };
        assert_eq!(platform.allocate_image(&request).unwrap(), "0");
        assert_eq!(platform.allocate_image(&request).unwrap(), "1");
        assert_eq!(platform.submit_template("NAME=x\n").unwrap(), "2");
        assert_eq!(platform.images.len(), 2);
        assert_eq!(platform.templates, vec!["NAME=x\n".to_string()]);
    }
}
