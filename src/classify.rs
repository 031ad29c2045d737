//! Classification mapping for DEPOT.
//!
//! Every stored file lives under a three-level classification
//! (factory / group / identify) that maps to a directory path below the
//! storage root. Classification matching is case-insensitive: two
//! classifications equal up to ASCII case resolve to the same directory.

use std::path::{Path, PathBuf};

use crate::{DepotError, Result};

/// Maximum length for a display file name (in characters).
pub const MAX_FILE_NAME_LENGTH: usize = 100;

/// Maximum length for a single classification segment (in characters).
pub const MAX_SEGMENT_LENGTH: usize = 64;

/// Three-level classification tag for a stored file.
///
/// Any level may be empty; empty levels are skipped when building the
/// directory path, so `("F1", "", "")` maps to `{root}/F1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Factory level.
    pub factory: String,
    /// Group level.
    pub group: String,
    /// Identify level.
    pub identify: String,
}

impl Classification {
    /// Create a new classification.
    pub fn new(
        factory: impl Into<String>,
        group: impl Into<String>,
        identify: impl Into<String>,
    ) -> Self {
        Self {
            factory: factory.into(),
            group: group.into(),
            identify: identify.into(),
        }
    }

    /// The non-empty segments, in factory/group/identify order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        [
            self.factory.as_str(),
            self.group.as_str(),
            self.identify.as_str(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
    }

    /// Validate all non-empty segments.
    pub fn validate(&self) -> Result<()> {
        for segment in self.segments() {
            validate_segment(segment)?;
        }
        Ok(())
    }

    /// Resolve the absolute directory path for this classification.
    pub fn dir_path(&self, root: &Path) -> Result<PathBuf> {
        self.validate()?;
        let mut path = root.to_path_buf();
        for segment in self.segments() {
            path.push(segment);
        }
        Ok(path)
    }

    /// Case-normalized registry key for the resolved directory.
    ///
    /// Classifications that differ only in ASCII case produce the same key,
    /// so they share one group container.
    pub fn registry_key(&self, root: &Path) -> Result<String> {
        let path = self.dir_path(root)?;
        Ok(normalize_key(&path))
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.factory, self.group, self.identify)
    }
}

/// Case-normalized registry key for an arbitrary directory path.
pub fn normalize_key(path: &Path) -> String {
    path.to_string_lossy().to_uppercase()
}

/// Validate a classification segment.
///
/// Rejects path traversal and separator characters so a classification can
/// never escape the storage root.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.chars().count() > MAX_SEGMENT_LENGTH {
        return Err(DepotError::Validation(format!(
            "classification segment exceeds {MAX_SEGMENT_LENGTH} characters"
        )));
    }
    if segment == "." || segment == ".." {
        return Err(DepotError::Validation(
            "classification segment must not be a path traversal".to_string(),
        ));
    }
    if segment.contains(['/', '\\', ':']) || segment.contains('\0') {
        return Err(DepotError::Validation(format!(
            "classification segment contains invalid characters: {segment}"
        )));
    }
    Ok(())
}

/// Validate a display file name.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DepotError::Validation(
            "file name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_FILE_NAME_LENGTH {
        return Err(DepotError::Validation(format!(
            "file name exceeds {MAX_FILE_NAME_LENGTH} characters"
        )));
    }
    if name == "." || name == ".." {
        return Err(DepotError::Validation(
            "file name must not be a path traversal".to_string(),
        ));
    }
    if name.contains(['/', '\\', ':']) || name.contains('\0') {
        return Err(DepotError::Validation(format!(
            "file name contains invalid characters: {name}"
        )));
    }
    Ok(())
}
