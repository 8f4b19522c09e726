//! The on-wire archive container.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic            8 bytes  "DPTARCH1"
//! manifest length  u32
//! manifest         JSON, `manifest length` bytes
//! payload length   u64
//! payload          zstd-compressed, `payload length` bytes
//! ```

use crate::{
    error::{Result, ValidationError},
    manifest::Manifest,
};

/// Magic bytes opening every depot package archive.
pub const ARCHIVE_MAGIC: [u8; 8] = *b"DPTARCH1";

/// Upper bound on the embedded manifest.
pub const MANIFEST_LIMIT: u64 = 1024 * 1024;

/// Upper bound on the decompressed payload.
pub const PAYLOAD_LIMIT: u64 = 1024 * 1024 * 1024;

const ZSTD_LEVEL: i32 = 3;

pub(crate) struct RawArchive<'a> {
    pub manifest_bytes: &'a [u8],
    pub payload: &'a [u8],
}

pub(crate) fn split_archive(bytes: &[u8]) -> Result<RawArchive<'_>> {
    let rest = bytes
        .strip_prefix(&ARCHIVE_MAGIC[..])
        .ok_or(ValidationError::BadMagic)?;

    let (len_bytes, rest) = rest
        .split_first_chunk::<4>()
        .ok_or(ValidationError::Truncated("manifest length"))?;
    let manifest_len = u32::from_le_bytes(*len_bytes) as u64;
    if manifest_len > MANIFEST_LIMIT {
        return Err(ValidationError::ManifestTooLarge {
            size: manifest_len,
            limit: MANIFEST_LIMIT,
        });
    }
    if (rest.len() as u64) < manifest_len {
        return Err(ValidationError::Truncated("manifest"));
    }
    let (manifest_bytes, rest) = rest.split_at(manifest_len as usize);

    let (len_bytes, rest) = rest
        .split_first_chunk::<8>()
        .ok_or(ValidationError::Truncated("payload length"))?;
    let payload_len = u64::from_le_bytes(*len_bytes);
    if rest.len() as u64 != payload_len {
        return Err(ValidationError::Truncated("payload"));
    }

    Ok(RawArchive {
        manifest_bytes,
        payload: rest,
    })
}

pub(crate) fn decompress_payload(payload: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;

    let decoder = zstd::Decoder::new(payload)
        .map_err(|source| ValidationError::PayloadDecode { source })?;

    let mut bytes = Vec::new();
    decoder
        .take(PAYLOAD_LIMIT + 1)
        .read_to_end(&mut bytes)
        .map_err(|source| ValidationError::PayloadDecode { source })?;

    if bytes.len() as u64 > PAYLOAD_LIMIT {
        return Err(ValidationError::PayloadTooLarge {
            limit: PAYLOAD_LIMIT,
        });
    }
    Ok(bytes)
}

/// Serializes a manifest and payload into archive bytes.
///
/// The manifest is written as declared; `inspect` is the arbiter of
/// whether its payload digest actually matches.
pub fn build_archive(manifest: &Manifest, payload: &[u8]) -> Result<Vec<u8>> {
    let manifest_bytes = serde_json::to_vec(manifest)?;
    let compressed = zstd::encode_all(payload, ZSTD_LEVEL)
        .map_err(|source| ValidationError::PayloadDecode { source })?;

    let mut bytes =
        Vec::with_capacity(ARCHIVE_MAGIC.len() + 12 + manifest_bytes.len() + compressed.len());
    bytes.extend_from_slice(&ARCHIVE_MAGIC);
    bytes.extend_from_slice(&(manifest_bytes.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&manifest_bytes);
    bytes.extend_from_slice(&(compressed.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&compressed);
    Ok(bytes)
}
