//! Disk-backed, page-based append log.
//!
//! ```text
//! <dir>/
//!   lock                 exclusive lock for the lifetime of the handle
//!   meta/meta.dat        head + tail index (16 bytes)
//!   front/front.dat      front index (8 bytes)
//!   index/page-N.dat     fixed 32 byte entries, index_page_size / 32 per page
//!   data/page-N.dat      entry bytes, at most data_page_size per page
//! ```
//!
//! Indexes only grow. `tail <= front <= head`: entries in `[front, head)` are
//! unread, entries in `[tail, front)` are consumed but their pages have not been
//! compacted yet.

mod meta;
mod page;
mod queue;

use chrono::{DateTime, Utc};

use crate::error::StoreError;

pub use meta::METADATA_SIZE;
pub use page::INDEX_ENTRY_SIZE;
pub use queue::PageQueue;

/// Default size of a data page.
pub const DEFAULT_DATA_PAGE_SIZE: u64 = 1024 * 1024;

/// Default size of an index page, matching the data page / entry size ratio.
pub const DEFAULT_INDEX_PAGE_SIZE: u64 = DEFAULT_DATA_PAGE_SIZE / INDEX_ENTRY_SIZE;

/// Page geometry of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
    /// Maximum bytes per data page; also the largest storable entry.
    pub data_page_size: u64,
    /// Bytes per index page, a multiple of [`INDEX_ENTRY_SIZE`].
    pub index_page_size: u64,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            data_page_size: DEFAULT_DATA_PAGE_SIZE,
            index_page_size: DEFAULT_INDEX_PAGE_SIZE,
        }
    }
}

impl PageOptions {
    pub fn entries_per_index_page(&self) -> u64 {
        (self.index_page_size / INDEX_ENTRY_SIZE).max(1)
    }

    /// Smallest footprint able to hold one entry: header, one index page and
    /// one data page.
    pub fn minimum_footprint(&self) -> u64 {
        METADATA_SIZE + self.index_page_size + self.data_page_size
    }

    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        if self.data_page_size == 0 || self.data_page_size > u32::MAX as u64 {
            return Err(StoreError::InvalidMetadata(format!(
                "data page size {} out of range",
                self.data_page_size
            )));
        }
        if self.index_page_size < INDEX_ENTRY_SIZE || self.index_page_size % INDEX_ENTRY_SIZE != 0 {
            return Err(StoreError::InvalidMetadata(format!(
                "index page size {} is not a multiple of {}",
                self.index_page_size, INDEX_ENTRY_SIZE
            )));
        }
        Ok(())
    }
}

/// Snapshot of a queue's occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    /// Unread entries.
    pub entries: u64,
    pub head: u64,
    pub front: u64,
    pub tail: u64,
    pub meta_bytes: u64,
    pub index_bytes: u64,
    pub data_bytes: u64,
    /// When the oldest unread entry was written.
    pub oldest_entry_at: Option<DateTime<Utc>>,
}

impl StoreStatus {
    pub fn disk_size(&self) -> u64 {
        self.meta_bytes + self.index_bytes + self.data_bytes
    }
}

/// What a compaction removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactStats {
    pub index_pages: u64,
    pub data_pages: u64,
    pub bytes: u64,
}
