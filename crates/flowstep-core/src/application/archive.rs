//! Snapshot archives
//!
//! An archive is a gzip stream holding one JSON envelope around a
//! [`SnapshotRecord`]. It is written for offline post-mortem inspection and
//! never read back into a live session implicitly.

use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::application::snapshot::SnapshotRecord;
use crate::CoreError;

/// Format tag written into every archive
pub const ARCHIVE_FORMAT: &str = "flowstep-debug-info";

/// Current archive version
pub const ARCHIVE_VERSION: u32 = 1;

/// Conventional file extension
pub const ARCHIVE_EXTENSION: &str = "flowstep-debug";

/// Archive contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEnvelope {
    /// Always [`ARCHIVE_FORMAT`]
    pub format: String,
    /// Archive version
    pub version: u32,
    /// When the archive was written
    pub created_at: DateTime<Utc>,
    /// The captured session
    pub record: SnapshotRecord,
}

/// Compress a record into archive bytes
pub fn encode_archive(record: &SnapshotRecord, level: u32) -> Result<Vec<u8>, CoreError> {
    let envelope = ArchiveEnvelope {
        format: ARCHIVE_FORMAT.to_string(),
        version: ARCHIVE_VERSION,
        created_at: Utc::now(),
        record: record.clone(),
    };
    let json = serde_json::to_vec(&envelope)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Decompress archive bytes
pub fn decode_archive(bytes: &[u8]) -> Result<ArchiveEnvelope, CoreError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| CoreError::ArchiveError(format!("Not a snapshot archive: {}", e)))?;

    let envelope: ArchiveEnvelope = serde_json::from_slice(&json)?;
    if envelope.format != ARCHIVE_FORMAT {
        return Err(CoreError::ArchiveError(format!(
            "Unexpected archive format: {}",
            envelope.format
        )));
    }
    if envelope.version > ARCHIVE_VERSION {
        return Err(CoreError::ArchiveError(format!(
            "Unsupported archive version: {}",
            envelope.version
        )));
    }
    Ok(envelope)
}

/// Write a record to an archive file, creating parent directories
#[instrument(level = "debug", skip(record))]
pub fn export_archive(path: &Path, record: &SnapshotRecord, level: u32) -> Result<(), CoreError> {
    let bytes = encode_archive(record, level)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &bytes)?;
    debug!(bytes = bytes.len(), "Snapshot archive written");
    Ok(())
}

/// Read an archive file
#[instrument(level = "debug")]
pub fn import_archive(path: &Path) -> Result<ArchiveEnvelope, CoreError> {
    let bytes = std::fs::read(path)?;
    decode_archive(&bytes)
}
