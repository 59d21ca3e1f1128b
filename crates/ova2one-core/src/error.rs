//! Error types for the ova2one core library.

use std::path::PathBuf;

use crate::registrar::ImageRecord;

/// The main error type for conversion operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// The platform client could not be initialized.
    #[error("Couldn't initialize client: {message}")]
    ClientInit { message: String },

    /// The OVA archive could not be extracted.
    #[error("Archive error: {message}")]
    Archive { message: String },

    /// The descriptor is not well-formed XML.
    #[error("XML error: {message}")]
    Xml { message: String },

    /// A queried descriptor element has no match.
    #[error("Missing element: {query}")]
    MissingElement { query: String },

    /// A queried descriptor element matched more than once.
    #[error("Ambiguous element: {query} ({count} matches)")]
    AmbiguousElement { query: String, count: usize },

    /// A descriptor value could not be interpreted.
    #[error("Invalid value for {field}: '{value}'")]
    InvalidValue { field: String, value: String },

    /// A disk item could not be joined to a registered image.
    #[error("Unresolved image: {message}")]
    UnresolvedImage { message: String },

    /// Two disks map to the same device target.
    #[error("Device slot conflict: target '{target}' is used by items '{first}' and '{second}'")]
    DeviceSlotConflict {
        target: String,
        first: String,
        second: String,
    },

    /// A disk file referenced by the descriptor is not on disk.
    #[error("Disk file '{}' referenced by the descriptor does not exist", path.display())]
    MissingDiskFile { path: PathBuf },

    /// The platform rejected a storage object request.
    ///
    /// `registered` holds the images allocated before the failure; they are
    /// left on the platform.
    #[error("Couldn't allocate image for '{file_name}': {message}")]
    Allocation {
        file_name: String,
        message: String,
        registered: Vec<ImageRecord>,
    },

    /// The platform rejected the rendered template.
    #[error("Couldn't submit template: {message}")]
    Submit { message: String },

    /// A required field was empty at render time.
    #[error("Render error: {message}")]
    Render { message: String },

    /// The configuration file could not be loaded.
    #[error("Config error: {message}")]
    Config { message: String },
}

/// A specialized Result type for conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create a client initialization error.
    pub fn client_init(message: impl Into<String>) -> Self {
        Self::ClientInit {
            message: message.into(),
        }
    }

    /// Create an archive error.
    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    /// Create an XML error.
    pub fn xml(message: impl Into<String>) -> Self {
        Self::Xml {
            message: message.into(),
        }
    }

    /// Create a missing element error for the named query.
    pub fn missing(query: impl Into<String>) -> Self {
        Self::MissingElement {
            query: query.into(),
        }
    }

    /// Create an ambiguous element error for the named query.
    pub fn ambiguous(query: impl Into<String>, count: usize) -> Self {
        Self::AmbiguousElement {
            query: query.into(),
            count,
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an unresolved image error.
    pub fn unresolved(message: impl Into<String>) -> Self {
        Self::UnresolvedImage {
            message: message.into(),
        }
    }

    /// Create a submit error.
    pub fn submit(message: impl Into<String>) -> Self {
        Self::Submit {
            message: message.into(),
        }
    }

    /// Create a render error.
    pub fn render(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(source: quick_xml::Error) -> Self {
        Self::xml(source.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/path/to/vm.ovf");
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("/path/to/vm.ovf"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_simple(io_err);
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(!msg.contains("at '"));
    }

    #[test]
    fn test_missing_element_names_query() {
        let err = Error::missing("capacity: memory");
        assert_eq!(err.to_string(), "Missing element: capacity: memory");
    }

    #[test]
    fn test_ambiguous_element_reports_count() {
        let err = Error::ambiguous("capacity: cpu", 2);
        assert!(err.to_string().contains("capacity: cpu"));
        assert!(err.to_string().contains("2 matches"));
    }

    #[test]
    fn test_allocation_error() {
        let err = Error::Allocation {
            file_name: "disk2.vmdk".to_string(),
            message: "datastore full".to_string(),
            registered: Vec::new(),
        };
        assert!(err.to_string().contains("disk2.vmdk"));
        assert!(err.to_string().contains("datastore full"));
    }

    #[test]
    fn test_slot_conflict_error() {
        let err = Error::DeviceSlotConflict {
            target: "hda".to_string(),
            first: "5".to_string(),
            second: "6".to_string(),
        };
        assert!(err.to_string().contains("'hda'"));
    }

    #[test]
    fn test_client_init_error() {
        let err = Error::client_init("oneimage not found");
        assert!(err.to_string().contains("Couldn't initialize client"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { path: None, .. }));
    }
}
