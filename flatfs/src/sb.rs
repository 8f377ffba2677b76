use log::{debug, info};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::alloc::FreeList;
use crate::entry::DirectoryTable;
use crate::fs::{
    FsError, Resource, Result, MAX_FILENAME_LENGTH, MAX_FILES, MAX_FILE_PAGES, MAX_PATH_LENGTH,
    PAGE_SIZE, TOTAL_PAGES,
};
use crate::io::{BlockStorage, BLOCK_SIZE};
use crate::node::{InodeKind, InodeNumber, InodeTable, ROOT_INODE};
use crate::page::PageStore;
use crate::perm::{Permission, Permissions};

const IMAGE_MAGIC: [u8; 4] = *b"FLFS";
const IMAGE_VERSION: u32 = 1;

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq, Eq)]
/// First bytes of every image. Mounting compares each field against the compiled
/// geometry, so an image only opens with the constants it was formatted with.
struct ImageHeader {
    magic: [u8; 4],
    version: u32,
    max_files: u32,
    max_filename_length: u32,
    max_path_length: u32,
    page_size: u32,
    max_file_pages: u32,
    total_pages: u32,
    metadata_blocks: u32,
    reserved: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<ImageHeader>();

impl ImageHeader {
    fn current() -> Self {
        Self {
            magic: IMAGE_MAGIC,
            version: IMAGE_VERSION,
            max_files: MAX_FILES as u32,
            max_filename_length: MAX_FILENAME_LENGTH as u32,
            max_path_length: MAX_PATH_LENGTH as u32,
            page_size: PAGE_SIZE as u32,
            max_file_pages: MAX_FILE_PAGES as u32,
            total_pages: TOTAL_PAGES as u32,
            metadata_blocks: SuperBlock::metadata_blocks() as u32,
            reserved: 0,
        }
    }

    fn validate(buf: &[u8]) -> Result<()> {
        let header = ImageHeader::read_from_prefix(buf)
            .ok_or_else(|| FsError::InvalidImage("image is too short for a header".into()))?;
        if header.magic != IMAGE_MAGIC {
            return Err(FsError::InvalidImage("not a formatted image".into()));
        }
        if header != Self::current() {
            return Err(FsError::InvalidImage(format!(
                "image geometry {:?} does not match this build",
                header
            )));
        }
        Ok(())
    }
}

/// Everything that makes up a filesystem: the inode table, the directory table and
/// the page pool, each carrying its own free list. It is loaded and stored as a unit.
///
/// # Layout
/// ============================================================================================
/// | Header | Inode free list | Inodes | Page free list | Directory table | pad | Page blocks |
/// ============================================================================================
#[derive(Debug, Clone, PartialEq)]
pub struct SuperBlock {
    pub inodes: InodeTable,
    pub entries: DirectoryTable,
    pub pages: PageStore,
}

impl SuperBlock {
    /// A filesystem holding nothing but the root directory.
    pub fn format() -> Result<Self> {
        let mut sb = Self {
            inodes: InodeTable::new(),
            entries: DirectoryTable::new(),
            pages: PageStore::new(),
        };
        let root = sb
            .inodes
            .allocate(InodeKind::Directory, Permissions::all())
            .ok_or(FsError::ResourceExhausted(Resource::Inodes))?;
        debug_assert_eq!(root, ROOT_INODE);
        sb.add_entry(root, ".", root)?;
        sb.add_entry(root, "..", root)?;
        Ok(sb)
    }

    fn metadata_len() -> usize {
        HEADER_SIZE
            + InodeTable::encoded_len()
            + FreeList::encoded_len(TOTAL_PAGES)
            + DirectoryTable::encoded_len()
    }

    /// Blocks in front of the first page block.
    pub fn metadata_blocks() -> usize {
        (Self::metadata_len() + BLOCK_SIZE - 1) / BLOCK_SIZE
    }

    /// Size of a complete image in blocks; every page takes exactly one block.
    pub fn image_blocks() -> usize {
        Self::metadata_blocks() + TOTAL_PAGES * PAGE_SIZE / BLOCK_SIZE
    }

    /// Serializes everything but the page contents, padded to whole blocks.
    pub fn encode_metadata(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::metadata_blocks() * BLOCK_SIZE);
        out.extend_from_slice(ImageHeader::current().as_bytes());
        self.inodes.encode(&mut out);
        self.pages.free_list().encode(&mut out);
        self.entries.encode(&mut out);
        out.resize(Self::metadata_blocks() * BLOCK_SIZE, 0);
        out
    }

    /// Inverse of `encode_metadata` plus the raw page region.
    pub fn decode(metadata: &[u8], page_data: Vec<u8>) -> Result<Self> {
        if metadata.len() < Self::metadata_len() {
            return Err(FsError::InvalidImage("metadata region is truncated".into()));
        }
        ImageHeader::validate(metadata)?;

        let rest = &metadata[HEADER_SIZE..];
        let (inode_region, rest) = rest.split_at(InodeTable::encoded_len());
        let (page_list_region, rest) = rest.split_at(FreeList::encoded_len(TOTAL_PAGES));
        let entry_region = &rest[..DirectoryTable::encoded_len()];

        let inodes = InodeTable::decode(inode_region)?;
        let page_list = FreeList::decode(page_list_region, TOTAL_PAGES)
            .ok_or_else(|| FsError::InvalidImage("corrupt page free list".into()))?;
        let entries = DirectoryTable::decode(entry_region)?;
        let pages = PageStore::from_parts(page_list, page_data)?;

        Ok(Self {
            inodes,
            entries,
            pages,
        })
    }

    /// Stores the whole filesystem, metadata first.
    pub fn write_to<T: BlockStorage>(&self, dev: &mut T) -> Result<()> {
        // TODO: track dirty pages so a save only rewrites what the command touched.
        dev.write_blocks(0, &self.encode_metadata())?;
        dev.write_blocks(Self::metadata_blocks(), self.pages.data())?;
        Ok(())
    }

    pub fn read_from<T: BlockStorage>(dev: &mut T) -> Result<Self> {
        if dev.block_count() < Self::image_blocks() {
            return Err(FsError::InvalidImage(format!(
                "device holds {} blocks, an image needs {}",
                dev.block_count(),
                Self::image_blocks()
            )));
        }
        let mut metadata = vec![0; Self::metadata_blocks() * BLOCK_SIZE];
        dev.read_blocks(0, &mut metadata)?;
        // Reject foreign media before pulling in the page region.
        ImageHeader::validate(&metadata)?;
        let mut page_data = vec![0; TOTAL_PAGES * PAGE_SIZE];
        dev.read_blocks(Self::metadata_blocks(), &mut page_data)?;
        Self::decode(&metadata, page_data)
    }

    /// Allocates a directory under `parent`, complete with its "." and ".." entries.
    /// All three directory slots are checked for before anything changes.
    pub fn make_directory(&mut self, parent: InodeNumber, name: &str) -> Result<InodeNumber> {
        if self.entries.free_slots() < 3 {
            return Err(FsError::ResourceExhausted(Resource::DirectoryEntries));
        }
        let dir = self
            .inodes
            .allocate(InodeKind::Directory, Permissions::all())
            .ok_or(FsError::ResourceExhausted(Resource::Inodes))?;
        self.add_entry(parent, name, dir)?;
        self.add_entry(dir, ".", dir)?;
        self.add_entry(dir, "..", parent)?;
        info!("created directory {} as inode {}", name, dir);
        Ok(dir)
    }

    /// Allocates an empty regular file under `parent`.
    pub fn make_file(&mut self, parent: InodeNumber, name: &str) -> Result<InodeNumber> {
        self.make_node(
            parent,
            name,
            InodeKind::Regular { pages: Vec::new() },
            Permission::Read | Permission::Write,
        )
    }

    /// Allocates an inode of any kind and names it in `parent`.
    pub fn make_node(
        &mut self,
        parent: InodeNumber,
        name: &str,
        kind: InodeKind,
        permissions: Permissions,
    ) -> Result<InodeNumber> {
        if self.entries.free_slots() == 0 {
            return Err(FsError::ResourceExhausted(Resource::DirectoryEntries));
        }
        let node = self
            .inodes
            .allocate(kind, permissions)
            .ok_or(FsError::ResourceExhausted(Resource::Inodes))?;
        self.add_entry(parent, name, node)?;
        Ok(node)
    }

    /// Frees the inode and any pages it owns, whatever its link count.
    pub fn release_inode(&mut self, node: InodeNumber) -> Result<()> {
        let pages = self.inodes.get(node)?.pages().to_vec();
        for page in pages {
            self.pages.free(page);
        }
        self.inodes.free(node);
        Ok(())
    }

    /// Drops one link to a regular file, releasing it when none remain. Returns the
    /// links left.
    pub fn unlink_file(&mut self, node: InodeNumber) -> Result<u32> {
        let inode = self.inodes.get_mut(node)?;
        inode.link_count = inode.link_count.saturating_sub(1);
        let remaining = inode.link_count;
        if remaining == 0 {
            debug!("last link to inode {} gone", node);
            self.release_inode(node)?;
        }
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::DIRENT_SIZE;
    use crate::io::FileBlockEmulatorBuilder;
    use crate::node::FileKind;

    #[test]
    fn header_is_packed() {
        assert_eq!(HEADER_SIZE, 40);
    }

    #[test]
    fn format_creates_only_the_root() {
        let sb = SuperBlock::format().unwrap();
        let root = sb.inodes.get(ROOT_INODE).unwrap();

        assert_eq!(root.file_kind(), FileKind::Directory);
        assert_eq!(root.permissions, Permissions::all());
        assert_eq!(root.size, 2 * DIRENT_SIZE);
        assert_eq!(sb.entries.find(ROOT_INODE, "."), Some(ROOT_INODE));
        assert_eq!(sb.entries.find(ROOT_INODE, ".."), Some(ROOT_INODE));
        assert_eq!(sb.inodes.used_count(), 1);
        assert_eq!(sb.pages.used_count(), 0);
    }

    #[test]
    fn new_directories_hold_dot_entries() {
        let mut sb = SuperBlock::format().unwrap();
        let dir = sb.make_directory(ROOT_INODE, "d").unwrap();

        assert_eq!(sb.entries.count_children(dir), 2);
        assert_eq!(sb.entries.find(dir, ".."), Some(ROOT_INODE));
        assert_eq!(sb.inodes.get(dir).unwrap().size, 2 * DIRENT_SIZE);
        assert_eq!(sb.inodes.get(ROOT_INODE).unwrap().size, 3 * DIRENT_SIZE);
    }

    #[test]
    fn running_out_of_inodes_is_reported() {
        let mut sb = SuperBlock::format().unwrap();
        let dir = sb.make_directory(ROOT_INODE, "d").unwrap();
        for i in 0..MAX_FILES - 2 {
            sb.inodes
                .allocate(InodeKind::Directory, Permissions::all())
                .unwrap_or_else(|| panic!("inode {} unavailable", i));
        }
        match sb.make_file(dir, "f") {
            Err(FsError::ResourceExhausted(Resource::Inodes)) => (),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(sb.entries.find(dir, "f"), None);
    }

    #[test]
    fn full_directory_table_is_reported_before_allocating() {
        let mut sb = SuperBlock::format().unwrap();
        while sb.entries.free_slots() > 2 {
            let name = format!("n{}", sb.entries.free_slots());
            sb.entries.insert(ROOT_INODE, &name, ROOT_INODE);
        }
        let used = sb.inodes.used_count();
        assert!(matches!(
            sb.make_directory(ROOT_INODE, "d"),
            Err(FsError::ResourceExhausted(Resource::DirectoryEntries))
        ));
        assert_eq!(sb.inodes.used_count(), used);
    }

    #[test]
    fn unlinking_releases_pages_with_the_last_link() {
        let mut sb = SuperBlock::format().unwrap();
        let file = sb.make_file(ROOT_INODE, "f").unwrap();
        let page = sb.pages.allocate().unwrap();
        sb.inodes.get_mut(file).unwrap().kind = InodeKind::Regular { pages: vec![page] };
        sb.inodes.get_mut(file).unwrap().link_count = 2;

        assert_eq!(sb.unlink_file(file).unwrap(), 1);
        assert_eq!(sb.pages.used_count(), 1);
        assert_eq!(sb.unlink_file(file).unwrap(), 0);
        assert_eq!(sb.pages.used_count(), 0);
        assert!(sb.inodes.get(file).is_err());
    }

    #[test]
    fn metadata_round_trips_byte_for_byte() {
        let mut sb = SuperBlock::format().unwrap();
        let dir = sb.make_directory(ROOT_INODE, "docs").unwrap();
        let file = sb.make_file(dir, "notes").unwrap();
        let page = sb.pages.allocate().unwrap();
        sb.pages.page_mut(page)[..5].copy_from_slice(b"hello");
        let inode = sb.inodes.get_mut(file).unwrap();
        inode.kind = InodeKind::Regular { pages: vec![page] };
        inode.size = 5;

        let metadata = sb.encode_metadata();
        assert_eq!(metadata.len() % BLOCK_SIZE, 0);
        let decoded = SuperBlock::decode(&metadata, sb.pages.data().to_vec()).unwrap();
        assert_eq!(decoded, sb);
        assert_eq!(decoded.encode_metadata(), metadata);
    }

    #[test]
    fn zeroed_metadata_is_not_an_image() {
        let metadata = vec![0; SuperBlock::metadata_blocks() * BLOCK_SIZE];
        match SuperBlock::decode(&metadata, vec![0; TOTAL_PAGES * PAGE_SIZE]) {
            Err(FsError::InvalidImage(_)) => (),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn foreign_geometry_is_rejected() {
        let sb = SuperBlock::format().unwrap();
        let mut metadata = sb.encode_metadata();
        // max_files lives right after the magic and version.
        metadata[8..12].copy_from_slice(&7_u32.to_ne_bytes());
        assert!(matches!(
            SuperBlock::decode(&metadata, sb.pages.data().to_vec()),
            Err(FsError::InvalidImage(_))
        ));
    }

    #[test]
    fn superblock_survives_a_device_round_trip() {
        let mut dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(SuperBlock::image_blocks())
            .build()
            .unwrap();
        let mut sb = SuperBlock::format().unwrap();
        sb.make_directory(ROOT_INODE, "a").unwrap();
        sb.write_to(&mut dev).unwrap();

        assert_eq!(SuperBlock::read_from(&mut dev).unwrap(), sb);
    }

    #[test]
    fn undersized_devices_are_rejected() {
        let mut dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(4)
            .build()
            .unwrap();
        assert!(matches!(
            SuperBlock::read_from(&mut dev),
            Err(FsError::InvalidImage(_))
        ));
    }
}
