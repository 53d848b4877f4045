//! Index entries and page files.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub(crate) const INDEX_DIR: &str = "index";
pub(crate) const DATA_DIR: &str = "data";

/// Size of one index entry on disk.
pub const INDEX_ENTRY_SIZE: u64 = 32;

/// Location and checksum of one stored entry.
///
/// Layout (little-endian): data page (u64), offset in page (u32), length (u32),
/// enqueue time in microseconds (i64), CRC32 of the entry (u32), reserved (u32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub data_page: u64,
    pub offset: u32,
    pub len: u32,
    pub timestamp_micros: i64,
    pub checksum: u32,
}

impl IndexEntry {
    pub fn to_bytes(self) -> [u8; INDEX_ENTRY_SIZE as usize] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&self.data_page.to_le_bytes());
        buf[8..12].copy_from_slice(&self.offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.timestamp_micros.to_le_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; INDEX_ENTRY_SIZE as usize]) -> Self {
        let mut u64_at = [0u8; 8];
        let mut u32_at = [0u8; 4];

        u64_at.copy_from_slice(&buf[0..8]);
        let data_page = u64::from_le_bytes(u64_at);
        u32_at.copy_from_slice(&buf[8..12]);
        let offset = u32::from_le_bytes(u32_at);
        u32_at.copy_from_slice(&buf[12..16]);
        let len = u32::from_le_bytes(u32_at);
        u64_at.copy_from_slice(&buf[16..24]);
        let timestamp_micros = i64::from_le_bytes(u64_at);
        u32_at.copy_from_slice(&buf[24..28]);
        let checksum = u32::from_le_bytes(u32_at);

        Self {
            data_page,
            offset,
            len,
            timestamp_micros,
            checksum,
        }
    }

    /// Offset just past this entry in its data page.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.len as u64
    }
}

pub(crate) fn page_file_name(page: u64) -> String {
    format!("page-{}.dat", page)
}

pub(crate) fn index_page_path(dir: &Path, page: u64) -> PathBuf {
    dir.join(INDEX_DIR).join(page_file_name(page))
}

pub(crate) fn data_page_path(dir: &Path, page: u64) -> PathBuf {
    dir.join(DATA_DIR).join(page_file_name(page))
}

fn parse_page_number(name: &str) -> Option<u64> {
    name.strip_prefix("page-")?.strip_suffix(".dat")?.parse().ok()
}

/// Page files in a page directory as `(page number, size in bytes)`.
pub(crate) fn list_pages(dir: &Path) -> io::Result<Vec<(u64, u64)>> {
    let mut pages = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(page) = entry.file_name().to_str().and_then(parse_page_number) else {
            continue;
        };
        pages.push((page, entry.metadata()?.len()));
    }
    pages.sort_unstable();
    Ok(pages)
}

/// Read exactly `len` bytes at `offset`.
pub(crate) fn read_at(path: &Path, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}
