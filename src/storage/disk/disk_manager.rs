use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual page I/O against the database file.
/// Page `i` lives at byte offset `i * PAGE_SIZE`.
pub struct DiskManager {
    db_file: Mutex<Option<File>>,
}

impl DiskManager {
    /// Open (or create) the database file at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(Some(file)),
        })
    }

    /// Read a page from disk. A page that was allocated but never written
    /// reads back as zeroes.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;

        let mut file_guard = self.db_file.lock();
        let file = file_guard
            .as_mut()
            .ok_or_else(|| DiskManagerError::IoError(shut_down_error()))?;

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            // Past EOF: fresh page, all zeroes
            page.data.fill(0);
            page.page_id = page_id;
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut page.data)?;
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = page.page_id as u64 * PAGE_SIZE as u64;

        let mut file_guard = self.db_file.lock();
        let file = file_guard
            .as_mut()
            .ok_or_else(|| DiskManagerError::IoError(shut_down_error()))?;

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Close the underlying file; further I/O fails.
    pub fn shut_down(&self) {
        self.db_file.lock().take();
    }
}

fn shut_down_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "disk manager is shut down")
}
