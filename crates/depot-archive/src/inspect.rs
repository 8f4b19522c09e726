//! Archive inspection: from raw bytes to verified package metadata.

use depot_core::{Dependency, PackageId};
use depot_utils::hash::digest_bytes;
use tracing::trace;

use crate::{
    container::{decompress_payload, split_archive},
    error::{Result, ValidationError},
    manifest::{FileEntry, Manifest},
};

/// Everything inspection learns about a valid archive.
///
/// `digest` addresses the full archive bytes in the content store;
/// `manifest_digest` covers the file list; both end up on the
/// published package record.
#[derive(Clone, Debug)]
pub struct ArchiveInfo {
    pub id: PackageId,
    pub digest: String,
    pub manifest_digest: String,
    pub dependencies: Vec<Dependency>,
    pub files: Vec<FileEntry>,
}

/// Parses and fully validates a package archive.
///
/// A pure function of its input: no shared state is read or written.
/// The declared payload digest is checked against a fresh digest of the
/// decompressed payload, so a tampered or mislabeled payload cannot
/// reach the index.
pub fn inspect(bytes: &[u8]) -> Result<ArchiveInfo> {
    let raw = split_archive(bytes)?;
    let manifest: Manifest = serde_json::from_slice(raw.manifest_bytes)?;
    let dependencies = manifest.validate()?;

    let payload = decompress_payload(raw.payload)?;
    let actual = digest_bytes(&payload);
    if !actual.eq_ignore_ascii_case(&manifest.payload_digest) {
        return Err(ValidationError::DigestMismatch {
            expected: manifest.payload_digest,
            actual,
        });
    }

    let info = ArchiveInfo {
        id: PackageId::new(&manifest.name, &manifest.version, &manifest.architecture),
        digest: digest_bytes(bytes),
        manifest_digest: manifest.files_digest(),
        dependencies,
        files: manifest.files,
    };
    trace!(id = %info.id, digest = %info.digest, "inspected archive");
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::build_archive;

    fn valid_archive() -> Vec<u8> {
        let payload = b"file contents".to_vec();
        let manifest = Manifest {
            name: "curl".to_string(),
            version: "8.0.1-1".to_string(),
            architecture: "x86_64".to_string(),
            dependencies: vec!["glibc>=2.27".to_string()],
            payload_digest: digest_bytes(&payload),
            files: vec![FileEntry {
                path: "usr/bin/curl".to_string(),
                size: payload.len() as u64,
                mode: 0o755,
            }],
        };
        build_archive(&manifest, &payload).unwrap()
    }

    #[test]
    fn test_inspect_roundtrip() {
        let bytes = valid_archive();
        let info = inspect(&bytes).unwrap();

        assert_eq!(info.id, PackageId::new("curl", "8.0.1-1", "x86_64"));
        assert_eq!(info.digest, digest_bytes(&bytes));
        assert_eq!(info.dependencies.len(), 1);
        assert_eq!(info.dependencies[0].name, "glibc");
        assert_eq!(info.files.len(), 1);
    }

    #[test]
    fn test_inspect_is_deterministic() {
        let bytes = valid_archive();
        let first = inspect(&bytes).unwrap();
        let second = inspect(&bytes).unwrap();
        assert_eq!(first.digest, second.digest);
        assert_eq!(first.manifest_digest, second.manifest_digest);
    }

    #[test]
    fn test_inspect_rejects_digest_mismatch() {
        let payload = b"real payload".to_vec();
        let manifest = Manifest {
            name: "curl".to_string(),
            version: "8.0.1-1".to_string(),
            architecture: "x86_64".to_string(),
            dependencies: vec![],
            payload_digest: digest_bytes(b"different payload"),
            files: vec![],
        };
        let bytes = build_archive(&manifest, &payload).unwrap();

        assert!(matches!(
            inspect(&bytes),
            Err(ValidationError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_inspect_rejects_garbage() {
        assert!(matches!(
            inspect(b"not an archive"),
            Err(ValidationError::BadMagic)
        ));
    }

    #[test]
    fn test_inspect_rejects_manifest_garbage() {
        use crate::container::ARCHIVE_MAGIC;

        let manifest = b"{ not json";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&ARCHIVE_MAGIC);
        bytes.extend_from_slice(&(manifest.len() as u32).to_le_bytes());
        bytes.extend_from_slice(manifest);
        bytes.extend_from_slice(&0u64.to_le_bytes());

        assert!(matches!(
            inspect(&bytes),
            Err(ValidationError::ManifestSyntax(_))
        ));
    }

    #[test]
    fn test_inspect_rejects_bad_dependency() {
        let payload = b"payload".to_vec();
        let manifest = Manifest {
            name: "curl".to_string(),
            version: "8.0.1-1".to_string(),
            architecture: "x86_64".to_string(),
            dependencies: vec!["glibc>=".to_string()],
            payload_digest: digest_bytes(&payload),
            files: vec![],
        };
        let bytes = build_archive(&manifest, &payload).unwrap();

        assert!(matches!(
            inspect(&bytes),
            Err(ValidationError::Dependency(_))
        ));
    }
}
