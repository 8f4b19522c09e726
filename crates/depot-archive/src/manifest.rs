//! The embedded metadata manifest.

use depot_core::{
    version::{valid_package_name, valid_version},
    Dependency,
};
use depot_utils::hash::{digest_bytes, is_valid_digest};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

fn default_mode() -> u32 {
    0o644
}

/// One file shipped by the package payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the package root.
    pub path: String,

    pub size: u64,

    /// Unix permission bits.
    #[serde(default = "default_mode")]
    pub mode: u32,
}

/// The structured metadata every archive must embed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub architecture: String,

    /// Declared dependencies in textual constraint form, e.g. `glibc>=2.27`.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// blake3 digest of the uncompressed payload.
    pub payload_digest: String,

    /// Files contained in the payload.
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

fn valid_arch(arch: &str) -> bool {
    !arch.is_empty()
        && arch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn safe_relative_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\0')
        && path.split('/').all(|part| !part.is_empty() && part != "." && part != "..")
}

impl Manifest {
    /// Validates every declared field and returns the parsed dependency
    /// list.
    pub fn validate(&self) -> Result<Vec<Dependency>> {
        if !valid_package_name(&self.name) {
            return Err(ValidationError::InvalidName(self.name.clone()));
        }
        if !valid_version(&self.version) {
            return Err(ValidationError::InvalidVersion(self.version.clone()));
        }
        if !valid_arch(&self.architecture) {
            return Err(ValidationError::InvalidArch(self.architecture.clone()));
        }
        if !is_valid_digest(&self.payload_digest) {
            return Err(ValidationError::MalformedDigest(self.payload_digest.clone()));
        }

        let mut seen = std::collections::HashSet::new();
        for file in &self.files {
            if !safe_relative_path(&file.path) {
                return Err(ValidationError::UnsafePath(file.path.clone()));
            }
            if !seen.insert(file.path.as_str()) {
                return Err(ValidationError::DuplicateFile(file.path.clone()));
            }
        }

        self.dependencies
            .iter()
            .map(|dep| dep.parse().map_err(ValidationError::from))
            .collect()
    }

    /// Digest over the canonical encoding of the file list.
    ///
    /// Stored on the package record so the file manifest can be
    /// re-verified without re-reading the archive.
    pub fn files_digest(&self) -> String {
        let encoded = serde_json::to_vec(&self.files).unwrap_or_default();
        digest_bytes(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest {
            name: "curl".to_string(),
            version: "8.0.1-1".to_string(),
            architecture: "x86_64".to_string(),
            dependencies: vec!["glibc>=2.27".to_string(), "zlib".to_string()],
            payload_digest: "ab".repeat(32),
            files: vec![FileEntry {
                path: "usr/bin/curl".to_string(),
                size: 1024,
                mode: 0o755,
            }],
        }
    }

    #[test]
    fn test_validate_ok() {
        let deps = manifest().validate().unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "glibc");
    }

    #[test]
    fn test_validate_rejects_bad_name() {
        let mut m = manifest();
        m.name = "Curl!".to_string();
        assert!(matches!(
            m.validate(),
            Err(ValidationError::InvalidName(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_arch() {
        let mut m = manifest();
        m.architecture = "x86-64".to_string();
        assert!(matches!(
            m.validate(),
            Err(ValidationError::InvalidArch(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_dependency() {
        let mut m = manifest();
        m.dependencies.push("glibc>=".to_string());
        assert!(matches!(
            m.validate(),
            Err(ValidationError::Dependency(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unsafe_paths() {
        for path in ["/etc/passwd", "../escape", "a/../b", "a//b", ""] {
            let mut m = manifest();
            m.files[0].path = path.to_string();
            assert!(
                matches!(m.validate(), Err(ValidationError::UnsafePath(_))),
                "path `{path}` should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_duplicate_files() {
        let mut m = manifest();
        m.files.push(m.files[0].clone());
        assert!(matches!(
            m.validate(),
            Err(ValidationError::DuplicateFile(_))
        ));
    }

    #[test]
    fn test_files_digest_changes_with_content() {
        let m = manifest();
        let mut other = manifest();
        other.files[0].size = 2048;
        assert_ne!(m.files_digest(), other.files_digest());
    }
}
