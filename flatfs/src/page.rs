use std::fmt;

use log::debug;

use crate::alloc::FreeList;
use crate::fs::{FsError, Result, PAGE_SIZE, TOTAL_PAGES};

/// Index of a data page in the global pool.
pub type PageNumber = u32;

/// The in-memory copy of every data page plus the list of those not owned by a file.
#[derive(Clone, PartialEq)]
pub struct PageStore {
    data: Vec<u8>,
    free: FreeList,
}

impl PageStore {
    pub fn new() -> Self {
        Self {
            data: vec![0; TOTAL_PAGES * PAGE_SIZE],
            free: FreeList::new(TOTAL_PAGES),
        }
    }

    /// Rebuilds a store from a persisted free list and the raw page region.
    pub fn from_parts(free: FreeList, data: Vec<u8>) -> Result<Self> {
        if data.len() != TOTAL_PAGES * PAGE_SIZE || free.capacity() != TOTAL_PAGES {
            return Err(FsError::InvalidImage("page region has the wrong size".into()));
        }
        Ok(Self { data, free })
    }

    pub fn allocate(&mut self) -> Option<PageNumber> {
        let page = self.free.allocate()?;
        debug!("allocated page {}", page);
        Some(page)
    }

    /// Returns the page to the pool. Its bytes are left as they are; every writer
    /// overwrites whatever it later reads back.
    pub fn free(&mut self, page: PageNumber) {
        debug!("released page {}", page);
        self.free.free(page);
    }

    pub fn free_count(&self) -> usize {
        self.free.free_count()
    }

    pub fn used_count(&self) -> usize {
        self.free.used_count()
    }

    pub fn page(&self, page: PageNumber) -> &[u8] {
        let start = page as usize * PAGE_SIZE;
        &self.data[start..start + PAGE_SIZE]
    }

    pub fn page_mut(&mut self, page: PageNumber) -> &mut [u8] {
        let start = page as usize * PAGE_SIZE;
        &mut self.data[start..start + PAGE_SIZE]
    }

    /// Copies a whole page onto another one.
    pub fn copy_page(&mut self, from: PageNumber, to: PageNumber) {
        let start = from as usize * PAGE_SIZE;
        self.data
            .copy_within(start..start + PAGE_SIZE, to as usize * PAGE_SIZE);
    }

    pub fn free_list(&self) -> &FreeList {
        &self.free
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for PageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageStore")
            .field("used", &self.used_count())
            .field("free", &self.free_count())
            .finish()
    }
}

impl Default for PageStore {
    fn default() -> Self {
        Self::new()
    }
}
