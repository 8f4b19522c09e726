//! Error types for archive inspection.

use depot_core::DependencyError;
use miette::Diagnostic;
use thiserror::Error;

/// A defect found while parsing or validating a package archive.
///
/// Inspection never fails generically: every way an archive can be
/// malformed has its own variant so the submitter learns exactly what
/// to fix.
#[derive(Error, Diagnostic, Debug)]
pub enum ValidationError {
    #[error("Archive does not start with the expected magic bytes")]
    #[diagnostic(
        code(depot_archive::magic),
        help("Only depot package archives can be published")
    )]
    BadMagic,

    #[error("Archive is truncated while reading {0}")]
    #[diagnostic(code(depot_archive::truncated))]
    Truncated(&'static str),

    #[error("Archive manifest of {size} bytes exceeds the {limit} byte limit")]
    #[diagnostic(code(depot_archive::manifest_too_large))]
    ManifestTooLarge { size: u64, limit: u64 },

    #[error("Archive manifest is not valid JSON: {0}")]
    #[diagnostic(code(depot_archive::manifest_syntax))]
    ManifestSyntax(#[from] serde_json::Error),

    #[error("`{0}` is not a valid package name")]
    #[diagnostic(
        code(depot_archive::name),
        help("Names may contain lowercase letters, digits and `@ . _ + -`")
    )]
    InvalidName(String),

    #[error("`{0}` is not a valid package version")]
    #[diagnostic(code(depot_archive::version))]
    InvalidVersion(String),

    #[error("`{0}` is not a valid architecture")]
    #[diagnostic(code(depot_archive::architecture))]
    InvalidArch(String),

    #[error(transparent)]
    #[diagnostic(code(depot_archive::dependency))]
    Dependency(#[from] DependencyError),

    #[error("`{0}` is not a valid payload digest")]
    #[diagnostic(code(depot_archive::declared_digest))]
    MalformedDigest(String),

    #[error("File entry `{0}` escapes the package root")]
    #[diagnostic(
        code(depot_archive::unsafe_path),
        help("Manifest paths must be relative and must not contain `..`")
    )]
    UnsafePath(String),

    #[error("File entry `{0}` is listed more than once")]
    #[diagnostic(code(depot_archive::duplicate_file))]
    DuplicateFile(String),

    #[error("Failed to decompress archive payload: {source}")]
    #[diagnostic(code(depot_archive::payload))]
    PayloadDecode {
        #[source]
        source: std::io::Error,
    },

    #[error("Decompressed payload exceeds the {limit} byte limit")]
    #[diagnostic(code(depot_archive::payload_too_large))]
    PayloadTooLarge { limit: u64 },

    #[error("Declared payload digest `{expected}` does not match computed `{actual}`")]
    #[diagnostic(
        code(depot_archive::digest_mismatch),
        help("The payload was modified after the manifest was written, or the wrong digest was declared")
    )]
    DigestMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, ValidationError>;
