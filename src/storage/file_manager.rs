//! # File Manager
//!
//! Block-addressed I/O for the database file. The file manager bijectively
//! maps a [`PageId`] to a fixed byte offset and manages reuse of freed
//! page ids through an on-disk free list.
//!
//! ## File Header (64 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------------
//! 0       4     magic 0x4D494E49 ("MINI")
//! 4       4     version (1)
//! 8       4     page_count
//! 12      4     free_count (live free-list entries)
//! 16      48    reserved
//! ```
//!
//! The free list occupies a fixed 4096-byte area right after the header
//! (1024 entries of 4 bytes). Because the area never grows, the offset of
//! page `p` is always `64 + 4096 + p * 4096`; freeing and reallocating
//! pages never perturbs any other page's offset.
//!
//! ## Allocation
//!
//! `allocate_page` pops the most recently freed id if the free list is
//! nonempty, otherwise extends the file by one page. Either way the new
//! slot is overwritten with an initialized empty page image and the
//! header is rewritten before the id is returned, so a crash between
//! allocation and first use leaves a well-formed file.
//!
//! ## Thread Safety
//!
//! No internal lock. The file manager is owned by the buffer pool and
//! called under the pool mutex, or single-threaded during startup.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::warn;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{
    FILE_HEADER_SIZE, FILE_MAGIC, FILE_VERSION, FREE_LIST_AREA_SIZE, MAX_FREE_LIST_ENTRIES,
    PAGE_SIZE,
};
use crate::error::{Error, Result};
use crate::storage::{Page, PageId};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct FileHeader {
    magic: u32,
    version: u32,
    page_count: u32,
    free_count: u32,
    reserved: [u8; 48],
}

impl FileHeader {
    fn new(page_count: u32, free_count: u32) -> Self {
        Self {
            magic: FILE_MAGIC,
            version: FILE_VERSION,
            page_count,
            free_count,
            reserved: [0; 48],
        }
    }
}

pub struct FileManager {
    path: PathBuf,
    file: File,
    page_count: u32,
    free_pages: Vec<PageId>,
}

impl FileManager {
    /// Open an existing database file (validating magic and version) or
    /// create and initialize a new one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut manager = Self {
            path,
            file,
            page_count: 0,
            free_pages: Vec::new(),
        };

        if existed {
            manager.read_header()?;
        } else {
            manager.write_header()?;
        }

        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn free_page_count(&self) -> usize {
        self.free_pages.len()
    }

    fn page_offset(page_id: PageId) -> u64 {
        (FILE_HEADER_SIZE + FREE_LIST_AREA_SIZE) as u64 + u64::from(page_id) * PAGE_SIZE as u64
    }

    fn read_header(&mut self) -> Result<()> {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|_| Error::BadFormat)?;

        let header = FileHeader::read_from_bytes(&buf).map_err(|_| Error::BadFormat)?;
        if header.magic != FILE_MAGIC {
            return Err(Error::BadFormat);
        }
        if header.version != FILE_VERSION {
            return Err(Error::UnsupportedVersion(header.version));
        }

        self.page_count = header.page_count;

        self.free_pages.clear();
        let free_count = (header.free_count as usize).min(MAX_FREE_LIST_ENTRIES);
        if free_count > 0 {
            let mut free_buf = vec![0u8; free_count * 4];
            self.file.seek(SeekFrom::Start(FILE_HEADER_SIZE as u64))?;
            self.file.read_exact(&mut free_buf).map_err(|_| Error::BadFormat)?;
            for chunk in free_buf.chunks_exact(4) {
                self.free_pages
                    .push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }

        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let header = FileHeader::new(self.page_count, self.free_pages.len() as u32);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(header.as_bytes())?;

        self.file.seek(SeekFrom::Start(FILE_HEADER_SIZE as u64))?;
        let mut free_buf = Vec::with_capacity(self.free_pages.len() * 4);
        for page_id in &self.free_pages {
            free_buf.extend_from_slice(&page_id.to_le_bytes());
        }
        self.file.write_all(&free_buf)?;
        self.file.flush()?;
        Ok(())
    }

    /// Reserve a page id, writing an initialized empty page image at its
    /// slot and persisting the header before returning.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = match self.free_pages.pop() {
            Some(reused) => reused,
            None => {
                let next = self.page_count;
                self.page_count += 1;
                next
            }
        };

        self.write_page(page_id, &Page::new(page_id))?;
        self.write_header()?;
        Ok(page_id)
    }

    /// Return a page id to the free list. Content is not erased. A full
    /// free list leaks the id rather than growing the fixed area.
    pub fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        if page_id >= self.page_count {
            return Ok(());
        }
        if self.free_pages.len() >= MAX_FREE_LIST_ENTRIES {
            warn!(
                "free list full ({} entries); leaking page {}",
                MAX_FREE_LIST_ENTRIES, page_id
            );
            return Ok(());
        }
        self.free_pages.push(page_id);
        self.write_header()
    }

    /// Read and parse a page, validating its checksum.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        if page_id >= self.page_count {
            return Err(Error::ShortRead(page_id, 0, PAGE_SIZE));
        }

        let mut buf = [0u8; PAGE_SIZE];
        self.file.seek(SeekFrom::Start(Self::page_offset(page_id)))?;
        let mut read = 0;
        while read < PAGE_SIZE {
            match self.file.read(&mut buf[read..]) {
                Ok(0) => return Err(Error::ShortRead(page_id, read, PAGE_SIZE)),
                Ok(n) => read += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Page::verify_checksum(page_id, &buf)?;
        let mut page = Page::deserialize(&buf)?;
        page.set_page_id(page_id);
        Ok(page)
    }

    /// Serialize and write a page image. The write reaches the OS before
    /// returning; durability syncs are driven by `flush`.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        if page_id > self.page_count {
            return Err(Error::ShortWrite(page_id));
        }

        let mut buf = [0u8; PAGE_SIZE];
        page.serialize(&mut buf);
        self.file.seek(SeekFrom::Start(Self::page_offset(page_id)))?;
        self.file.write_all(&buf)?;
        self.file.flush()?;
        Ok(())
    }

    /// Rewrite the header and free list, then sync file data to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.write_header()?;
        self.file.sync_data()?;
        Ok(())
    }
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("path", &self.path)
            .field("page_count", &self.page_count)
            .field("free_pages", &self.free_pages.len())
            .finish()
    }
}
