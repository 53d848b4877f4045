//! The page queue itself.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::FileExt;

use crate::error::{StoreError, StoreResult};
use crate::store::meta::{METADATA_SIZE, Metadata};
use crate::store::page::{
    DATA_DIR, INDEX_DIR, INDEX_ENTRY_SIZE, IndexEntry, data_page_path, index_page_path,
    list_pages, read_at,
};
use crate::store::{CompactStats, PageOptions, StoreStatus};

const LOCK_FILE: &str = "lock";

/// Persistent FIFO of byte entries.
///
/// Entries are appended to data pages of at most `data_page_size` bytes and
/// located through fixed-size index entries grouped into index pages. Reading
/// only moves the front; space comes back when [`compact`](PageQueue::compact)
/// deletes pages that lie entirely before it.
///
/// Not safe for concurrent use; callers wrap it in a lock.
pub struct PageQueue {
    dir: PathBuf,
    options: PageOptions,
    meta: Metadata,
    // Held for the exclusive directory lock.
    _lock: File,
    write_page: u64,
    write_offset: u64,
    data_writer: Option<File>,
    index_writer: Option<(u64, File)>,
}

impl PageQueue {
    /// Open the queue in `dir`, creating it if needed.
    pub fn open(dir: impl AsRef<Path>, options: PageOptions) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        options.validate()?;

        for sub in ["meta", "front", INDEX_DIR, DATA_DIR] {
            fs::create_dir_all(dir.join(sub))?;
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(dir));
        }

        let meta = Metadata::open(&dir)?;

        let mut queue = Self {
            dir,
            options,
            meta,
            _lock: lock,
            write_page: 0,
            write_offset: 0,
            data_writer: None,
            index_writer: None,
        };
        queue.recover_write_position()?;

        tracing::debug!(
            "Opened page queue at {} with {} entries",
            queue.dir.display(),
            queue.len()
        );
        Ok(queue)
    }

    /// Append an entry, returning its index.
    pub fn enqueue(&mut self, bytes: &[u8]) -> StoreResult<u64> {
        let len = bytes.len() as u64;
        if len > self.options.data_page_size {
            return Err(StoreError::EntryTooLarge {
                size: len,
                page_size: self.options.data_page_size,
            });
        }

        if self.write_offset + len > self.options.data_page_size {
            self.write_page += 1;
            self.write_offset = 0;
            self.data_writer = None;
        }

        let file = match self.data_writer.take() {
            Some(file) => file,
            None => open_page(&data_page_path(&self.dir, self.write_page))?,
        };
        let file = self.data_writer.insert(file);
        file.seek(SeekFrom::Start(self.write_offset))?;
        file.write_all(bytes)?;

        let index = self.meta.head;
        let entry = IndexEntry {
            data_page: self.write_page,
            offset: self.write_offset as u32,
            len: len as u32,
            timestamp_micros: Utc::now().timestamp_micros(),
            checksum: crc32fast::hash(bytes),
        };
        self.write_index_entry(index, entry)?;

        self.meta.set_head(index + 1)?;
        self.write_offset += len;
        Ok(index)
    }

    /// The oldest unread entry, if any.
    ///
    /// Returns [`StoreError::Corrupted`] when the entry cannot be read back
    /// intact; the entry stays at the front until skipped.
    pub fn peek(&self) -> StoreResult<Option<Vec<u8>>> {
        if self.is_empty() {
            return Ok(None);
        }
        let index = self.meta.front;
        let entry = self.read_index_entry(index)?;
        self.read_data(index, &entry).map(Some)
    }

    /// Remove up to `count` entries from the front without reading them.
    pub fn skip(&mut self, count: u64) -> StoreResult<u64> {
        let skipped = count.min(self.len());
        if skipped > 0 {
            self.meta.set_front(self.meta.front + skipped)?;
        }
        Ok(skipped)
    }

    /// Remove and return the oldest entry.
    ///
    /// A corrupted entry is removed as well and reported as an error.
    pub fn dequeue(&mut self) -> StoreResult<Option<Vec<u8>>> {
        match self.peek() {
            Ok(Some(bytes)) => {
                self.skip(1)?;
                Ok(Some(bytes))
            }
            Ok(None) => Ok(None),
            Err(err @ StoreError::Corrupted { .. }) => {
                self.skip(1)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.meta.front >= self.meta.head
    }

    /// Number of unread entries.
    pub fn len(&self) -> u64 {
        self.meta.head - self.meta.front
    }

    /// Delete pages that hold nothing but already-removed entries.
    ///
    /// The pages of the newest entry are always kept, since they carry the
    /// write position across restarts.
    pub fn compact(&mut self) -> StoreResult<CompactStats> {
        let mut stats = CompactStats::default();
        if self.meta.head == 0 {
            return Ok(stats);
        }

        let keep = self.meta.front.min(self.meta.head - 1);
        let keep_index_page = keep / self.options.entries_per_index_page();
        let keep_data_page = match self.read_index_entry(keep) {
            Ok(entry) => Some(entry.data_page),
            Err(StoreError::Corrupted { index, reason }) => {
                tracing::warn!(
                    "Keeping data pages of {}: entry {} unreadable: {}",
                    self.dir.display(),
                    index,
                    reason
                );
                None
            }
            Err(err) => return Err(err),
        };

        for (page, size) in list_pages(&self.dir.join(INDEX_DIR))? {
            if page < keep_index_page {
                remove_page(&index_page_path(&self.dir, page))?;
                stats.index_pages += 1;
                stats.bytes += size;
            }
        }
        if let Some(keep_data_page) = keep_data_page {
            for (page, size) in list_pages(&self.dir.join(DATA_DIR))? {
                if page < keep_data_page {
                    remove_page(&data_page_path(&self.dir, page))?;
                    stats.data_pages += 1;
                    stats.bytes += size;
                }
            }
        }

        if keep != self.meta.tail {
            self.meta.set_tail(keep)?;
        }
        Ok(stats)
    }

    /// Entry counts and on-disk footprint.
    pub fn status(&self) -> StoreStatus {
        let index_bytes = page_bytes(&self.dir.join(INDEX_DIR));
        let data_bytes = page_bytes(&self.dir.join(DATA_DIR));
        let oldest_entry_at = if self.is_empty() {
            None
        } else {
            self.read_index_entry(self.meta.front)
                .ok()
                .and_then(|entry| DateTime::<Utc>::from_timestamp_micros(entry.timestamp_micros))
        };

        StoreStatus {
            entries: self.len(),
            head: self.meta.head,
            front: self.meta.front,
            tail: self.meta.tail,
            meta_bytes: METADATA_SIZE,
            index_bytes,
            data_bytes,
            oldest_entry_at,
        }
    }

    /// Total bytes on disk.
    pub fn disk_size(&self) -> u64 {
        self.status().disk_size()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flush everything to disk and release the directory lock.
    pub fn close(self) -> StoreResult<()> {
        self.meta.sync()?;
        if let Some(file) = &self.data_writer {
            file.sync_all()?;
        }
        if let Some((_, file)) = &self.index_writer {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Restore the append position from the newest readable entry and cut off
    /// anything written after it by an interrupted enqueue.
    ///
    /// Unread entries at the end that cannot be read back (an index slot or
    /// data that never reached the disk) are dropped by moving `head` back.
    fn recover_write_position(&mut self) -> StoreResult<()> {
        let recorded = self.meta.head;
        let mut head = recorded;
        let mut last = None;
        while head > self.meta.front {
            let index = head - 1;
            let readable = self
                .read_index_entry(index)
                .and_then(|entry| self.read_data(index, &entry).map(|_| entry));
            match readable {
                Ok(entry) => {
                    last = Some(entry);
                    break;
                }
                Err(StoreError::Corrupted { reason, .. }) => {
                    tracing::warn!(
                        "Dropping unreadable entry {} at the end of {}: {}",
                        index,
                        self.dir.display(),
                        reason
                    );
                    head = index;
                }
                Err(e) => return Err(e),
            }
        }
        if last.is_none() && head > 0 {
            // Already consumed, so only its position matters.
            last = self.read_index_entry(head - 1).ok();
        }

        if head != recorded {
            tracing::warn!(
                "Rolled back head of {} from {} to {}",
                self.dir.display(),
                recorded,
                head
            );
            self.meta.set_head(head)?;
            self.meta.sync()?;
        }

        match last {
            Some(entry) => {
                self.write_page = entry.data_page;
                self.write_offset = entry.end();
            }
            None if head == 0 => {}
            None => {
                // Position lost with the entry; continue on a fresh page.
                self.write_page = list_pages(&self.dir.join(DATA_DIR))?
                    .last()
                    .map_or(0, |(page, _)| page + 1);
                self.write_offset = 0;
            }
        }

        truncate_if_longer(
            &data_page_path(&self.dir, self.write_page),
            self.write_offset,
        )?;
        // An enqueue that rolled over before crashing leaves a page past the end.
        for (page, _) in list_pages(&self.dir.join(DATA_DIR))? {
            if page > self.write_page {
                tracing::warn!("Removing stray data page {} in {}", page, self.dir.display());
                remove_page(&data_page_path(&self.dir, page))?;
            }
        }

        let per_page = self.options.entries_per_index_page();
        let head_page = head / per_page;
        truncate_if_longer(
            &index_page_path(&self.dir, head_page),
            (head % per_page) * INDEX_ENTRY_SIZE,
        )?;
        for (page, _) in list_pages(&self.dir.join(INDEX_DIR))? {
            if page > head_page {
                remove_page(&index_page_path(&self.dir, page))?;
            }
        }
        Ok(())
    }

    fn write_index_entry(&mut self, index: u64, entry: IndexEntry) -> StoreResult<()> {
        let per_page = self.options.entries_per_index_page();
        let page = index / per_page;
        let slot = index % per_page;

        if !matches!(self.index_writer, Some((current, _)) if current == page) {
            let file = open_page(&index_page_path(&self.dir, page))?;
            self.index_writer = Some((page, file));
        }
        if let Some((_, file)) = self.index_writer.as_mut() {
            file.seek(SeekFrom::Start(slot * INDEX_ENTRY_SIZE))?;
            file.write_all(&entry.to_bytes())?;
        }
        Ok(())
    }

    fn read_index_entry(&self, index: u64) -> StoreResult<IndexEntry> {
        let per_page = self.options.entries_per_index_page();
        let path = index_page_path(&self.dir, index / per_page);
        let raw = read_at(
            &path,
            (index % per_page) * INDEX_ENTRY_SIZE,
            INDEX_ENTRY_SIZE as usize,
        )
        .map_err(|e| corrupted_or_io(index, "index entry", e))?;

        let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];
        buf.copy_from_slice(&raw);
        Ok(IndexEntry::from_bytes(&buf))
    }

    fn read_data(&self, index: u64, entry: &IndexEntry) -> StoreResult<Vec<u8>> {
        if entry.end() > self.options.data_page_size {
            return Err(StoreError::Corrupted {
                index,
                reason: format!(
                    "entry spans past the page end ({} > {})",
                    entry.end(),
                    self.options.data_page_size
                ),
            });
        }

        let path = data_page_path(&self.dir, entry.data_page);
        let bytes = read_at(&path, entry.offset as u64, entry.len as usize)
            .map_err(|e| corrupted_or_io(index, "data", e))?;

        let checksum = crc32fast::hash(&bytes);
        if checksum != entry.checksum {
            return Err(StoreError::Corrupted {
                index,
                reason: format!(
                    "checksum mismatch: stored {:#010x}, computed {:#010x}",
                    entry.checksum, checksum
                ),
            });
        }
        Ok(bytes)
    }
}

impl std::fmt::Debug for PageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageQueue")
            .field("dir", &self.dir)
            .field("head", &self.meta.head)
            .field("front", &self.meta.front)
            .field("tail", &self.meta.tail)
            .finish()
    }
}

fn open_page(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

fn remove_page(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn truncate_if_longer(path: &Path, len: u64) -> io::Result<()> {
    let file = match OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() > len {
        tracing::warn!("Truncating torn write in {} to {} bytes", path.display(), len);
        file.set_len(len)?;
    }
    Ok(())
}

fn page_bytes(dir: &Path) -> u64 {
    match list_pages(dir) {
        Ok(pages) => pages.iter().map(|(_, size)| size).sum(),
        Err(e) => {
            tracing::error!("Failed to list pages in {}: {}", dir.display(), e);
            0
        }
    }
}

/// A missing page or a short read means the entry is gone for good; any
/// other I/O failure may be transient.
fn corrupted_or_io(index: u64, what: &str, err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::UnexpectedEof => StoreError::Corrupted {
            index,
            reason: format!("{} unreadable: {}", what, err),
        },
        _ => StoreError::Io(err),
    }
}
