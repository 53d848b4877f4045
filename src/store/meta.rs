//! Queue metadata header.
//!
//! Two small files make up the header: `meta/meta.dat` holds the head and tail
//! indexes and `front/front.dat` holds the front index, all little-endian u64.
//! The front moves on every read, so it lives in its own file to keep the
//! write path and read path from rewriting the same bytes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{StoreError, StoreResult};

pub(crate) const META_FILE: &str = "meta/meta.dat";
pub(crate) const FRONT_FILE: &str = "front/front.dat";

const META_LEN: u64 = 16;
const FRONT_LEN: u64 = 8;

/// Total size of the header on disk.
pub const METADATA_SIZE: u64 = META_LEN + FRONT_LEN;

pub(crate) struct Metadata {
    meta: File,
    front_file: File,
    /// Next index to write.
    pub head: u64,
    /// Lowest index whose pages are still on disk.
    pub tail: u64,
    /// Next index to read.
    pub front: u64,
}

impl Metadata {
    pub fn open(dir: &Path) -> StoreResult<Self> {
        let mut meta = open_sized(&dir.join(META_FILE), META_LEN)?;
        let mut front_file = open_sized(&dir.join(FRONT_FILE), FRONT_LEN)?;

        let mut buf = [0u8; META_LEN as usize];
        meta.seek(SeekFrom::Start(0))?;
        meta.read_exact(&mut buf)?;
        let head = u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default());
        let tail = u64::from_le_bytes(buf[8..16].try_into().unwrap_or_default());

        let mut buf = [0u8; FRONT_LEN as usize];
        front_file.seek(SeekFrom::Start(0))?;
        front_file.read_exact(&mut buf)?;
        let front = u64::from_le_bytes(buf);

        if !(tail <= front && front <= head) {
            return Err(StoreError::InvalidMetadata(format!(
                "expected tail <= front <= head, got tail={} front={} head={}",
                tail, front, head
            )));
        }

        Ok(Self {
            meta,
            front_file,
            head,
            tail,
            front,
        })
    }

    pub fn set_head(&mut self, head: u64) -> StoreResult<()> {
        self.head = head;
        self.write_meta()
    }

    pub fn set_tail(&mut self, tail: u64) -> StoreResult<()> {
        self.tail = tail;
        self.write_meta()
    }

    pub fn set_front(&mut self, front: u64) -> StoreResult<()> {
        self.front = front;
        self.front_file.seek(SeekFrom::Start(0))?;
        self.front_file.write_all(&front.to_le_bytes())?;
        Ok(())
    }

    pub fn sync(&self) -> StoreResult<()> {
        self.meta.sync_all()?;
        self.front_file.sync_all()?;
        Ok(())
    }

    fn write_meta(&mut self) -> StoreResult<()> {
        let mut buf = [0u8; META_LEN as usize];
        buf[0..8].copy_from_slice(&self.head.to_le_bytes());
        buf[8..16].copy_from_slice(&self.tail.to_le_bytes());
        self.meta.seek(SeekFrom::Start(0))?;
        self.meta.write_all(&buf)?;
        Ok(())
    }
}

/// Open a fixed-size header file, zero-filling it when new.
fn open_sized(path: &Path, len: u64) -> StoreResult<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    let actual = file.metadata()?.len();
    if actual == 0 {
        file.write_all(&vec![0u8; len as usize])?;
    } else if actual != len {
        return Err(StoreError::InvalidMetadata(format!(
            "{} is {} bytes, expected {}",
            path.display(),
            actual,
            len
        )));
    }
    Ok(file)
}
