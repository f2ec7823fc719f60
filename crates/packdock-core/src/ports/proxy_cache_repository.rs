//! Proxy-cache record port.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RepositoryError;

/// What kind of file is cached for a package under proxy mode.
///
/// Only package-level manifests go stale (publishes change them); a
/// version-pinned manifest never changes after publish and is refreshed
/// only as a side effect of its package manifest refresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyFileType {
    /// The full package manifest (`package.json`).
    FullManifest,
    /// The abbreviated install manifest (`abbreviated.json`).
    AbbreviatedManifest,
    /// The manifest of one pinned version (`<version>/package.json`).
    VersionManifest(String),
}

impl ProxyFileType {
    /// Whether this is a package-level manifest that needs periodic refresh.
    #[must_use]
    pub const fn is_package_manifest(&self) -> bool {
        matches!(self, Self::FullManifest | Self::AbbreviatedManifest)
    }

    /// Relative file name under the package's cache directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        match self {
            Self::FullManifest => "package.json".to_string(),
            Self::AbbreviatedManifest => "abbreviated.json".to_string(),
            Self::VersionManifest(version) => format!("{version}/package.json"),
        }
    }
}

impl fmt::Display for ProxyFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl FromStr for ProxyFileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "package.json" => Ok(Self::FullManifest),
            "abbreviated.json" => Ok(Self::AbbreviatedManifest),
            other => match other.strip_suffix("/package.json") {
                Some(version) if !version.is_empty() => {
                    Ok(Self::VersionManifest(version.to_string()))
                }
                _ => Err(format!("unknown proxy file type: {other}")),
            },
        }
    }
}

/// One cached upstream file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProxyCacheEntry {
    pub fullname: String,
    pub file_type: ProxyFileType,
    pub file_path: String,
    pub updated_at: DateTime<Utc>,
}

/// Port for the proxy-cache record store.
#[async_trait]
pub trait ProxyCacheRepository: Send + Sync {
    /// Page through all cached files, oldest first.
    async fn list_cached_files(
        &self,
        page_size: usize,
        page_index: usize,
    ) -> Result<Vec<ProxyCacheEntry>, RepositoryError>;

    /// List all cached files of one package.
    async fn list_cached_files_for_package(
        &self,
        fullname: &str,
    ) -> Result<Vec<ProxyCacheEntry>, RepositoryError>;

    /// Insert or refresh a cache record (upsert on `(fullname, file_type)`).
    async fn save_cached_file(&self, entry: &ProxyCacheEntry) -> Result<(), RepositoryError>;

    /// Remove a cache record, e.g. after the upstream package disappeared.
    async fn remove_cached_file(
        &self,
        fullname: &str,
        file_type: &ProxyFileType,
    ) -> Result<(), RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_roundtrip() {
        for ft in [
            ProxyFileType::FullManifest,
            ProxyFileType::AbbreviatedManifest,
            ProxyFileType::VersionManifest("1.2.3".to_string()),
        ] {
            assert_eq!(ft.file_name().parse::<ProxyFileType>().unwrap(), ft);
        }
        assert!("tarball.tgz".parse::<ProxyFileType>().is_err());
        assert!("/package.json".parse::<ProxyFileType>().is_err());
    }

    #[test]
    fn only_package_manifests_need_refresh() {
        assert!(ProxyFileType::FullManifest.is_package_manifest());
        assert!(ProxyFileType::AbbreviatedManifest.is_package_manifest());
        assert!(!ProxyFileType::VersionManifest("1.0.0".to_string()).is_package_manifest());
    }
}
