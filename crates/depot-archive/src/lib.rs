//! Package archive handling for the depot repository service.
//!
//! A depot archive is a small container: magic bytes, a JSON metadata
//! manifest and a zstd-compressed file payload. This crate is the sole
//! interpreter of that format. [`inspect`] turns untrusted archive
//! bytes into verified [`ArchiveInfo`] metadata or a precise
//! [`ValidationError`]; [`build_archive`] produces archives for repo
//! tooling and tests.

pub mod container;
pub mod error;
pub mod inspect;
pub mod manifest;

pub use container::{build_archive, ARCHIVE_MAGIC, MANIFEST_LIMIT, PAYLOAD_LIMIT};
pub use error::{Result, ValidationError};
pub use inspect::{inspect, ArchiveInfo};
pub use manifest::{FileEntry, Manifest};
