use std::path::Path;

use crate::error::{HashError, HashResult};

/// Length of a hex-encoded blake3 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Computes the blake3 digest of a byte slice.
///
/// Returns the digest as a lowercase hex-encoded string. This is the
/// canonical digest form used throughout depot: content-store keys,
/// archive payload digests and file-manifest digests are all produced
/// by this function.
///
/// # Example
///
/// ```
/// use depot_utils::hash::digest_bytes;
///
/// let digest = digest_bytes(b"hello world\n");
/// assert_eq!(digest.len(), 64);
/// ```
pub fn digest_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Computes the blake3 digest of a file.
///
/// The file is memory-mapped where possible, so large package archives
/// are hashed without being read into memory wholesale.
///
/// # Arguments
///
/// * `path` - The path to the file to digest.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be read.
pub fn digest_file<P: AsRef<Path>>(path: P) -> HashResult<String> {
    let path = path.as_ref();
    let mut hasher = blake3::Hasher::new();
    hasher.update_mmap(path).map_err(|err| {
        HashError::ReadFailed {
            path: path.to_path_buf(),
            source: err,
        }
    })?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Checks whether a string is a well-formed hex-encoded blake3 digest.
pub fn is_valid_digest(input: &str) -> bool {
    input.len() == DIGEST_HEX_LEN && input.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Verifies a byte slice against an expected digest.
///
/// The comparison is case-insensitive on the hex encoding.
///
/// # Errors
///
/// * [`HashError::InvalidDigest`] if `expected` is not a well-formed
///   digest string.
pub fn verify_bytes(bytes: &[u8], expected: &str) -> HashResult<bool> {
    if !is_valid_digest(expected) {
        return Err(HashError::InvalidDigest {
            input: expected.to_string(),
        });
    }
    Ok(digest_bytes(bytes).eq_ignore_ascii_case(expected))
}
