use std::collections::HashMap;

use log::{debug, trace};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::fs::{FsError, Resource, Result, MAX_FILENAME_LENGTH, MAX_FILES};
use crate::node::{now, InodeNumber};
use crate::sb::SuperBlock;

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
/// On-disk layout of one directory table slot. A free slot stores -1 in both
/// inode fields.
pub struct DirEntryRecord {
    /// NUL padded.
    name: [u8; MAX_FILENAME_LENGTH],
    inode: i32,
    parent: i32,
}

/// Size accounted to a directory for every entry naming it as parent.
pub const DIRENT_SIZE: u64 = std::mem::size_of::<DirEntryRecord>() as u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inode: InodeNumber,
    pub parent: InodeNumber,
}

impl DirEntryRecord {
    fn encode(slot: Option<&DirEntry>) -> Self {
        let mut record = Self::new_zeroed();
        match slot {
            Some(entry) => {
                record.name[..entry.name.len()].copy_from_slice(entry.name.as_bytes());
                record.inode = entry.inode as i32;
                record.parent = entry.parent as i32;
            }
            None => {
                record.inode = -1;
                record.parent = -1;
            }
        }
        record
    }

    fn decode(&self, slot: usize) -> Result<Option<DirEntry>> {
        if self.inode == -1 {
            return Ok(None);
        }
        let out_of_range = |n: i32| n < 0 || n as usize >= MAX_FILES;
        if out_of_range(self.inode) || out_of_range(self.parent) {
            return Err(FsError::InvalidImage(format!(
                "directory slot {} points outside the inode table",
                slot
            )));
        }
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_FILENAME_LENGTH);
        let name = std::str::from_utf8(&self.name[..len]).map_err(|_| {
            FsError::InvalidImage(format!("directory slot {} has a non UTF-8 name", slot))
        })?;
        Ok(Some(DirEntry {
            name: name.to_string(),
            inode: self.inode as InodeNumber,
            parent: self.parent as InodeNumber,
        }))
    }
}

/// The single table holding every directory entry of the filesystem.
///
/// The slot array is the canonical, persisted form. Lookups by (parent, name) go
/// through an index rebuilt whenever the table is decoded.
#[derive(Debug, Clone)]
pub struct DirectoryTable {
    slots: Vec<Option<DirEntry>>,
    index: HashMap<(InodeNumber, String), usize>,
}

impl PartialEq for DirectoryTable {
    fn eq(&self, other: &Self) -> bool {
        self.slots == other.slots
    }
}

impl DirectoryTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; MAX_FILES],
            index: HashMap::new(),
        }
    }

    /// Inode named `name` inside `parent`.
    pub fn find(&self, parent: InodeNumber, name: &str) -> Option<InodeNumber> {
        self.index
            .get(&(parent, name.to_string()))
            .and_then(|&slot| self.slots[slot].as_ref())
            .map(|entry| entry.inode)
    }

    /// Stores the entry in the first free slot, returning that slot, or `None` when
    /// the table is full.
    pub fn insert(&mut self, parent: InodeNumber, name: &str, inode: InodeNumber) -> Option<usize> {
        let slot = self.slots.iter().position(Option::is_none)?;
        trace!("dirent slot {}: {}/{} -> {}", slot, parent, name, inode);
        self.slots[slot] = Some(DirEntry {
            name: name.to_string(),
            inode,
            parent,
        });
        self.index.insert((parent, name.to_string()), slot);
        Some(slot)
    }

    /// Clears the matching slot and hands back what it held.
    pub fn erase(&mut self, parent: InodeNumber, name: &str) -> Option<DirEntry> {
        let slot = self.index.remove(&(parent, name.to_string()))?;
        trace!("dirent slot {} cleared", slot);
        self.slots[slot].take()
    }

    /// Points an existing entry at another inode. Returns false when the entry does
    /// not exist.
    pub fn repoint(&mut self, parent: InodeNumber, name: &str, inode: InodeNumber) -> bool {
        match self.index.get(&(parent, name.to_string())) {
            Some(&slot) => match self.slots[slot].as_mut() {
                Some(entry) => {
                    entry.inode = inode;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Every entry whose parent is `parent`, in slot order.
    pub fn children(&self, parent: InodeNumber) -> impl Iterator<Item = &DirEntry> + '_ {
        self.slots
            .iter()
            .flatten()
            .filter(move |entry| entry.parent == parent)
    }

    pub fn count_children(&self, parent: InodeNumber) -> usize {
        self.children(parent).count()
    }

    /// Drops every entry listed under `parent`, "." and ".." included.
    pub fn clear_children(&mut self, parent: InodeNumber) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(entry) if entry.parent == parent) {
                if let Some(entry) = slot.take() {
                    self.index.remove(&(entry.parent, entry.name));
                }
            }
        }
    }

    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    pub fn encoded_len() -> usize {
        MAX_FILES * DIRENT_SIZE as usize
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        for slot in &self.slots {
            out.extend_from_slice(DirEntryRecord::encode(slot.as_ref()).as_bytes());
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::encoded_len() {
            return Err(FsError::InvalidImage(
                "directory region has the wrong size".into(),
            ));
        }
        let mut table = Self::new();
        for (slot, raw) in buf.chunks_exact(DIRENT_SIZE as usize).enumerate() {
            let record = DirEntryRecord::read_from(raw)
                .ok_or_else(|| FsError::InvalidImage("truncated directory record".into()))?;
            if let Some(entry) = record.decode(slot)? {
                table
                    .index
                    .insert((entry.parent, entry.name.clone()), slot);
                table.slots[slot] = Some(entry);
            }
        }
        Ok(table)
    }
}

impl Default for DirectoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SuperBlock {
    /// Records `name` in `parent` and accounts one entry to the parent's size.
    pub fn add_entry(
        &mut self,
        parent: InodeNumber,
        name: &str,
        target: InodeNumber,
    ) -> Result<()> {
        if self.entries.insert(parent, name, target).is_none() {
            debug!("directory table full, cannot add {}", name);
            return Err(FsError::ResourceExhausted(Resource::DirectoryEntries));
        }
        let dir = self.inodes.get_mut(parent)?;
        dir.size += DIRENT_SIZE;
        dir.mtime = now();
        Ok(())
    }

    /// Forgets `name` in `parent`. Absent entries are ignored.
    pub fn remove_entry(&mut self, name: &str, parent: InodeNumber) -> Result<()> {
        if self.entries.erase(parent, name).is_none() {
            return Ok(());
        }
        let dir = self.inodes.get_mut(parent)?;
        dir.size = dir.size.saturating_sub(DIRENT_SIZE);
        dir.mtime = now();
        Ok(())
    }

    /// Removes every entry of a directory being destroyed. Its own size is not
    /// adjusted since the inode goes away with them.
    pub fn clear_directory(&mut self, dir: InodeNumber) {
        self.entries.clear_children(dir);
    }
}
