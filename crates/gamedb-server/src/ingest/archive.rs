//! Splitting an uploaded zip into individual payloads
//!
//! Entries are read by walking the local file headers from the front of the
//! archive, so they come out in the order they were written and entries that
//! share a name are all kept. The central directory is only consulted to
//! validate the container and to size entries whose lengths trail their data
//! in a data descriptor.

use super::error::IngestError;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::{read::ZipFile, result::ZipError, ZipArchive};

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
const END_SIGNATURES: [u32; 3] = [
    0x0201_4b50, // central directory header
    0x0605_4b50, // end of central directory
    0x0606_4b50, // zip64 end of central directory
];

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path of the entry inside the archive
    pub name: String,
    pub content_type: &'static str,
    pub content: Bytes,
}

pub struct ArchiveSplitter {
    cursor: Cursor<Bytes>,
    archive: ZipArchive<Cursor<Bytes>>,
    /// Central directory index by local header offset
    by_offset: HashMap<u64, usize>,
    max_entry_bytes: u64,
    finished: bool,
}

impl std::fmt::Debug for ArchiveSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveSplitter")
            .field("position", &self.cursor.position())
            .field("max_entry_bytes", &self.max_entry_bytes)
            .field("finished", &self.finished)
            .finish()
    }
}

impl ArchiveSplitter {
    pub fn new(data: Bytes, max_entry_bytes: u64) -> Result<Self, IngestError> {
        let mut archive = ZipArchive::new(Cursor::new(data.clone())).map_err(malformed)?;

        let mut by_offset = HashMap::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index).map_err(malformed)?;
            by_offset.insert(file.header_start(), index);
        }

        let mut cursor = Cursor::new(data);
        let first = by_offset.keys().min().copied();
        if let Some(offset) = first {
            cursor.set_position(offset);
        }

        Ok(Self {
            cursor,
            archive,
            by_offset,
            max_entry_bytes,
            finished: first.is_none(),
        })
    }

    fn peek_signature(&self, position: u64) -> Option<u32> {
        let data = self.cursor.get_ref();
        let start = usize::try_from(position).ok()?;
        let bytes = data.get(start..start.checked_add(4)?)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads the entry whose local header starts at the cursor. `Ok(None)`
    /// means the entry was a directory and was skipped.
    fn read_next(&mut self) -> Result<Option<ArchiveEntry>, IngestError> {
        let start = self.cursor.position();
        let limit = self.max_entry_bytes;

        let reason = match zip::read::read_zipfile_from_stream(&mut self.cursor) {
            Ok(Some(file)) => return entry_from_file(file, limit),
            Ok(None) => {
                return Err(IngestError::MalformedArchive(format!(
                    "expected a local file header at offset {}",
                    start
                )))
            },
            Err(ZipError::UnsupportedArchive(reason)) => reason,
            Err(e) => return Err(malformed(e)),
        };

        // Sizes live in a trailing data descriptor; take them from the
        // central directory record for this header instead.
        let index = *self.by_offset.get(&start).ok_or_else(|| {
            IngestError::MalformedArchive(format!("entry at offset {}: {}", start, reason))
        })?;
        let file = self.archive.by_index(index).map_err(malformed)?;
        let data_end = file.data_start().saturating_add(file.compressed_size());
        let entry = entry_from_file(file, limit)?;

        let next_header = self.skip_data_descriptor(data_end)?;
        self.cursor.set_position(next_header);
        Ok(entry)
    }

    /// Position of the header following a data descriptor written at `at`
    fn skip_data_descriptor(&self, at: u64) -> Result<u64, IngestError> {
        let body = match self.peek_signature(at) {
            Some(DATA_DESCRIPTOR_SIGNATURE) => at + 4,
            _ => at,
        };
        // crc32, then 32-bit or zip64 sizes
        [body + 12, body + 20]
            .into_iter()
            .find(|next| {
                self.peek_signature(*next)
                    .is_some_and(|sig| sig == LOCAL_HEADER_SIGNATURE || END_SIGNATURES.contains(&sig))
            })
            .ok_or_else(|| {
                IngestError::MalformedArchive(format!("unreadable data descriptor at offset {}", at))
            })
    }
}

impl Iterator for ArchiveSplitter {
    type Item = Result<ArchiveEntry, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let position = self.cursor.position();
            match self.peek_signature(position) {
                Some(LOCAL_HEADER_SIGNATURE) => {},
                Some(sig) if END_SIGNATURES.contains(&sig) => {
                    self.finished = true;
                    return None;
                },
                _ => {
                    self.finished = true;
                    return Some(Err(IngestError::MalformedArchive(format!(
                        "no file header at offset {}",
                        position
                    ))));
                },
            }

            match self.read_next() {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                },
            }
        }
        None
    }
}

fn entry_from_file(file: ZipFile<'_>, limit: u64) -> Result<Option<ArchiveEntry>, IngestError> {
    if file.is_dir() {
        debug!(entry = file.name(), "Skipping directory entry");
        return Ok(None);
    }
    let name = file.name().to_string();

    let mut content = Vec::with_capacity(file.size().min(limit) as usize);
    file.take(limit.saturating_add(1))
        .read_to_end(&mut content)
        .map_err(|e| IngestError::MalformedArchive(format!("{}: {}", name, e)))?;

    if content.len() as u64 > limit {
        return Err(IngestError::PayloadTooLarge { name, limit });
    }

    Ok(Some(ArchiveEntry {
        content_type: content_type_for(&name),
        name,
        content: Bytes::from(content),
    }))
}

fn malformed(err: ZipError) -> IngestError {
    IngestError::MalformedArchive(err.to_string())
}

fn content_type_for(name: &str) -> &'static str {
    if name.to_ascii_lowercase().ends_with(".json") {
        JSON_CONTENT_TYPE
    } else {
        OCTET_STREAM_CONTENT_TYPE
    }
}
