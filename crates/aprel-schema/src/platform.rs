//! Platform identifiers and the archive formats they ship in.

use serde::{Deserialize, Serialize};

/// An operating-system/architecture combination the upstream agent ships a
/// distinct binary for (e.g. `linux-x64`, `macos`).
///
/// The special identifier [`Platform::ALL`] names the combined bundle. It is
/// synthesized by the build matrix and never derived from a release asset.
///
/// # Example
///
/// ```
/// use aprel_schema::Platform;
///
/// let p = Platform::from_asset_name("tool-2.9-linux-x64.tar.gz").unwrap();
/// assert_eq!(p.as_str(), "linux-x64");
/// assert!(Platform::all().is_all());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Platform(String);

/// Errors produced when constructing a [`Platform`].
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PlatformError {
    /// The identifier was empty.
    #[error("Empty platform identifier")]
    Empty,

    /// The identifier contained characters that cannot appear in a file name.
    #[error("Invalid platform identifier: {0}")]
    Invalid(String),
}

impl Platform {
    /// Identifier of the combined bundle.
    pub const ALL: &'static str = "all";

    /// Create a platform from an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Empty`] for an empty string and
    /// [`PlatformError::Invalid`] when the identifier contains path
    /// separators or whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, PlatformError> {
        let id = id.into();
        if id.is_empty() {
            return Err(PlatformError::Empty);
        }
        if id.contains(['/', '\\']) || id.chars().any(char::is_whitespace) {
            return Err(PlatformError::Invalid(id));
        }
        Ok(Self(id))
    }

    /// The combined "all platforms" bundle.
    pub fn all() -> Self {
        Self(Self::ALL.to_string())
    }

    /// Whether this is the synthesized combined bundle.
    pub fn is_all(&self) -> bool {
        self.0 == Self::ALL
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the platform from a release asset file name.
    ///
    /// Asset names follow `name-version-platform.ext`, where `name` may itself
    /// contain dashes. The extension must be a recognised [`ArchiveFormat`];
    /// the first dash-separated field starting with a digit is the version and
    /// everything after it is the platform. Returns `None` for non-archive
    /// assets, names without a version field, and assets claiming to be the
    /// synthesized [`Platform::ALL`] bundle.
    pub fn from_asset_name(file_name: &str) -> Option<Self> {
        let format = ArchiveFormat::from_name(file_name)?;
        let stem = &file_name[..file_name.len() - format.extension().len()];

        let fields: Vec<&str> = stem.split('-').collect();
        let version_idx = fields
            .iter()
            .position(|f| f.starts_with(|c: char| c.is_ascii_digit()))?;
        if version_idx == 0 {
            return None;
        }

        let platform = fields[version_idx + 1..].join("-");
        if platform == Self::ALL {
            return None;
        }
        Self::new(platform).ok()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Archive formats the upstream project publishes binaries in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Gzip-compressed tar archive (`.tar.gz`).
    #[serde(rename = "tar.gz")]
    TarGz,
    /// Zip archive (`.zip`).
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from a file name or URL. Only `.zip` and `.tar.gz`
    /// are recognised.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.ends_with(".tar.gz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    /// File extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::TarGz => ".tar.gz",
            Self::Zip => ".zip",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_short_asset_name() {
        let p = Platform::from_asset_name("tool-2.9-linux-x64.tar.gz").unwrap();
        assert_eq!(p.as_str(), "linux-x64");
    }

    #[test]
    fn test_platform_from_dashed_project_name() {
        let p = Platform::from_asset_name("async-profiler-2.8.3-linux-musl-x64.tar.gz").unwrap();
        assert_eq!(p.as_str(), "linux-musl-x64");

        let p = Platform::from_asset_name("async-profiler-2.8.3-macos.zip").unwrap();
        assert_eq!(p.as_str(), "macos");
    }

    #[test]
    fn test_non_archive_assets_are_ignored() {
        assert_eq!(Platform::from_asset_name("async-profiler-2.8.3-linux-x64.txt"), None);
        assert_eq!(Platform::from_asset_name("checksums.sha256"), None);
    }

    #[test]
    fn test_asset_without_platform_or_version() {
        assert_eq!(Platform::from_asset_name("tool-2.9.zip"), None);
        assert_eq!(Platform::from_asset_name("tool-linux.zip"), None);
        assert_eq!(Platform::from_asset_name("2.9-linux.zip"), None);
    }

    #[test]
    fn test_all_is_never_derived_from_assets() {
        assert_eq!(Platform::from_asset_name("tool-2.9-all.zip"), None);
        assert!(Platform::all().is_all());
        assert!(!Platform::new("macos").unwrap().is_all());
    }

    #[test]
    fn test_platform_validation() {
        assert_eq!(Platform::new(""), Err(PlatformError::Empty));
        assert!(matches!(Platform::new("linux/x64"), Err(PlatformError::Invalid(_))));
        assert!(matches!(Platform::new("linux x64"), Err(PlatformError::Invalid(_))));
    }

    #[test]
    fn test_archive_format_detection() {
        assert_eq!(ArchiveFormat::from_name("a.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("https://x/y/a.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_name("a.tar.xz"), None);
    }
}
