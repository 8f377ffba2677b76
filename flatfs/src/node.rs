use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::alloc::FreeList;
use crate::fs::{FsError, Result, MAX_FILES, MAX_FILE_PAGES, MAX_PATH_LENGTH, TOTAL_PAGES};
use crate::page::PageNumber;
use crate::perm::Permissions;

/// Index of an inode slot. The root directory is always inode 0.
pub type InodeNumber = u32;

pub const ROOT_INODE: InodeNumber = 0;

/// Seconds since the Unix epoch, the resolution every inode timestamp uses.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// The type of file object an inode describes, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

impl FileKind {
    /// The on-disk type tag.
    fn tag(self) -> u8 {
        match self {
            FileKind::Regular => 1,
            FileKind::Directory => 2,
            FileKind::Symlink => 3,
        }
    }
}

/// Kind-specific inode payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeKind {
    /// Direct references to at most `MAX_FILE_PAGES` data pages, in file order.
    Regular { pages: Vec<PageNumber> },
    /// Children live in the global directory table, not in the inode.
    Directory,
    /// The absolute path the link points at.
    Symlink { target: String },
}

/// Metadata of one filesystem object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub number: InodeNumber,
    /// Content length for files, target length for symlinks, and the accumulated
    /// size of the entries naming a directory as their parent.
    pub size: u64,
    pub kind: InodeKind,
    pub permissions: Permissions,
    /// Number of directory entries referring to this inode.
    pub link_count: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

impl Inode {
    /// A fresh inode with every timestamp set to now and a single link.
    pub fn new(number: InodeNumber, kind: InodeKind, permissions: Permissions) -> Self {
        let size = match &kind {
            InodeKind::Symlink { target } => target.len() as u64,
            _ => 0,
        };
        let stamp = now();
        Self {
            number,
            size,
            kind,
            permissions,
            link_count: 1,
            atime: stamp,
            mtime: stamp,
            ctime: stamp,
        }
    }

    pub fn file_kind(&self) -> FileKind {
        match self.kind {
            InodeKind::Regular { .. } => FileKind::Regular,
            InodeKind::Directory => FileKind::Directory,
            InodeKind::Symlink { .. } => FileKind::Symlink,
        }
    }

    /// Data pages of a regular file; empty for every other kind.
    pub fn pages(&self) -> &[PageNumber] {
        match &self.kind {
            InodeKind::Regular { pages } => pages,
            _ => &[],
        }
    }

    pub fn symlink_target(&self) -> Option<&str> {
        match &self.kind {
            InodeKind::Symlink { target } => Some(target),
            _ => None,
        }
    }

    pub fn touch_modified(&mut self) {
        let stamp = now();
        self.mtime = stamp;
        self.atime = stamp;
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
/// The fixed-size on-disk layout of an inode slot. A free slot stores -1 as its
/// number and nothing else of interest.
pub struct InodeRecord {
    number: i32,
    /// 1 regular, 2 directory, 3 symlink.
    kind: u8,
    permissions: u8,
    _reserved: [u8; 2],
    link_count: u32,
    page_count: u32,
    size: u64,
    atime: u64,
    mtime: u64,
    ctime: u64,
    pages: [u32; MAX_FILE_PAGES],
    /// NUL padded symlink target.
    target: [u8; MAX_PATH_LENGTH],
}

pub const INODE_RECORD_SIZE: usize = std::mem::size_of::<InodeRecord>();

impl InodeRecord {
    fn free() -> Self {
        let mut record = Self::new_zeroed();
        record.number = -1;
        record
    }

    fn encode(slot: Option<&Inode>) -> Self {
        let inode = match slot {
            Some(inode) => inode,
            None => return Self::free(),
        };
        let mut record = Self::new_zeroed();
        record.number = inode.number as i32;
        record.kind = inode.file_kind().tag();
        record.permissions = inode.permissions.bits();
        record.link_count = inode.link_count;
        record.size = inode.size;
        record.atime = inode.atime;
        record.mtime = inode.mtime;
        record.ctime = inode.ctime;
        match &inode.kind {
            InodeKind::Regular { pages } => {
                record.page_count = pages.len() as u32;
                record.pages[..pages.len()].copy_from_slice(pages);
            }
            InodeKind::Symlink { target } => {
                record.target[..target.len()].copy_from_slice(target.as_bytes());
            }
            InodeKind::Directory => (),
        }
        record
    }

    fn decode(&self, slot: usize) -> Result<Option<Inode>> {
        if self.number == -1 {
            return Ok(None);
        }
        let corrupt = |what: &str| {
            FsError::InvalidImage(format!("inode slot {} has {}", slot, what))
        };
        if self.number as usize != slot {
            return Err(corrupt("a mismatched number"));
        }
        let kind = match self.kind {
            1 => {
                let count = self.page_count as usize;
                if count > MAX_FILE_PAGES {
                    return Err(corrupt("too many pages"));
                }
                if self.pages[..count].iter().any(|&page| page as usize >= TOTAL_PAGES) {
                    return Err(corrupt("a page number past the pool"));
                }
                InodeKind::Regular {
                    pages: self.pages[..count].to_vec(),
                }
            }
            2 => InodeKind::Directory,
            3 => {
                let len = self
                    .target
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(MAX_PATH_LENGTH);
                let target = std::str::from_utf8(&self.target[..len])
                    .map_err(|_| corrupt("a non UTF-8 symlink target"))?;
                InodeKind::Symlink {
                    target: target.to_string(),
                }
            }
            _ => return Err(corrupt("an unknown type tag")),
        };
        Ok(Some(Inode {
            number: slot as InodeNumber,
            size: self.size,
            kind,
            permissions: Permissions::from_bits(self.permissions)
                .map_err(|_| corrupt("unknown permission bits"))?,
            link_count: self.link_count,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }))
    }
}

/// Fixed pool of `MAX_FILES` inode slots.
#[derive(Debug, Clone, PartialEq)]
pub struct InodeTable {
    slots: Vec<Option<Inode>>,
    free: FreeList,
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; MAX_FILES],
            free: FreeList::new(MAX_FILES),
        }
    }

    /// Takes the head of the free list and initialises it as a brand new inode.
    pub fn allocate(&mut self, kind: InodeKind, permissions: Permissions) -> Option<InodeNumber> {
        let number = self.free.allocate()?;
        debug!("allocated inode {} as {:?}", number, kind);
        self.slots[number as usize] = Some(Inode::new(number, kind, permissions));
        Some(number)
    }

    /// Returns the slot to the free list. Page release is the caller's job, and so is
    /// making sure no directory entry still refers to it.
    pub fn free(&mut self, number: InodeNumber) {
        debug!("released inode {}", number);
        self.slots[number as usize] = None;
        self.free.free(number);
    }

    pub fn get(&self, number: InodeNumber) -> Result<&Inode> {
        self.slots
            .get(number as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| FsError::NotFound(format!("inode {}", number)))
    }

    pub fn get_mut(&mut self, number: InodeNumber) -> Result<&mut Inode> {
        self.slots
            .get_mut(number as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| FsError::NotFound(format!("inode {}", number)))
    }

    pub fn free_count(&self) -> usize {
        self.free.free_count()
    }

    pub fn used_count(&self) -> usize {
        self.free.used_count()
    }

    pub const fn encoded_len() -> usize {
        FreeList::encoded_len(MAX_FILES) + MAX_FILES * INODE_RECORD_SIZE
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        self.free.encode(out);
        for slot in &self.slots {
            out.extend_from_slice(InodeRecord::encode(slot.as_ref()).as_bytes());
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::encoded_len() {
            return Err(FsError::InvalidImage("inode region has the wrong size".into()));
        }
        let (list, records) = buf.split_at(FreeList::encoded_len(MAX_FILES));
        let free = FreeList::decode(list, MAX_FILES)
            .ok_or_else(|| FsError::InvalidImage("corrupt inode free list".into()))?;

        let mut slots = Vec::with_capacity(MAX_FILES);
        for (slot, raw) in records.chunks_exact(INODE_RECORD_SIZE).enumerate() {
            let record = InodeRecord::read_from(raw)
                .ok_or_else(|| FsError::InvalidImage("truncated inode record".into()))?;
            let inode = record.decode(slot)?;
            if inode.is_some() != free.is_used(slot as u32) {
                return Err(FsError::InvalidImage(format!(
                    "inode slot {} disagrees with the free list",
                    slot
                )));
            }
            slots.push(inode);
        }
        Ok(Self { slots, free })
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
