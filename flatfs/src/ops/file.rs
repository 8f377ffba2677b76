use log::{debug, info};

use super::{reject_dot_entries, validate_name};
use crate::fs::{FlatFs, FsError, Resource, Result, MAX_FILE_PAGES, PAGE_SIZE};
use crate::io::BlockStorage;
use crate::node::{now, FileKind, InodeKind, InodeNumber};
use crate::page::PageNumber;
use crate::path::{join, normalize};
use crate::perm::Access;
use crate::sb::SuperBlock;

fn pages_for(len: usize) -> usize {
    (len + PAGE_SIZE - 1) / PAGE_SIZE
}

impl SuperBlock {
    /// `touch`: an empty rw- file.
    pub fn create_file(&mut self, cwd: &str, path: &str) -> Result<InodeNumber> {
        let at = self.locate(cwd, path)?;
        if normalize(&at.full) == "/" {
            return Err(FsError::AlreadyExists("/".into()));
        }
        validate_name(&at.name)?;
        self.require_directory(at.parent, Access::ReadWrite, &at.full)?;
        self.ensure_absent(at.parent, &at.name, &at.full)?;

        let file = self.make_file(at.parent, &at.name)?;
        info!("created file {} as inode {}", at.full, file);
        Ok(file)
    }

    /// `rm`: drops one name of a regular file. Returns the links still pointing at it.
    pub fn delete_file(&mut self, cwd: &str, path: &str) -> Result<u32> {
        let file = self.resolve(cwd, path)?;
        let at = self.locate(cwd, path)?;
        reject_dot_entries(&at.name)?;
        if self.kind_of(file)? != FileKind::Regular {
            return Err(FsError::NotAFile(at.full));
        }
        self.require_directory(at.parent, Access::ReadWrite, &at.full)?;

        self.remove_entry(&at.name, at.parent)?;
        let remaining = self.unlink_file(file)?;
        info!("removed {} ({} links left)", at.full, remaining);
        Ok(remaining)
    }

    /// Where a file named by `src` ends up for `dst`: inside `dst` when that is a
    /// directory, otherwise at `dst` itself. A bare name stays in the source directory.
    fn destination(
        &self,
        cwd: &str,
        src_parent: InodeNumber,
        src_name: &str,
        dst: &str,
    ) -> Result<(InodeNumber, String)> {
        match self.resolve(cwd, dst) {
            Ok(node) => {
                if self.kind_of(node)? == FileKind::Directory {
                    return Ok((node, src_name.to_string()));
                }
            }
            Err(FsError::NotFound(_)) => (),
            Err(e) => return Err(e),
        }
        let at = self.locate(cwd, dst)?;
        validate_name(&at.name)?;
        if dst.contains('/') {
            Ok((at.parent, at.name))
        } else {
            Ok((src_parent, at.name))
        }
    }

    /// `mv` for regular files: a rename inside the source directory, or a move to
    /// another one. A bare `dst` name renames within the source directory even when
    /// the session sits elsewhere.
    pub fn move_file(&mut self, cwd: &str, src: &str, dst: &str) -> Result<()> {
        let file = self.resolve(cwd, src)?;
        let from = self.locate(cwd, src)?;
        reject_dot_entries(&from.name)?;
        self.require_file(file, Access::Read, &from.full)?;

        let (dst_parent, dst_name) = self.destination(cwd, from.parent, &from.name, dst)?;
        self.require_directory(from.parent, Access::Write, &from.full)?;
        if dst_parent != from.parent {
            self.require_directory(dst_parent, Access::Write, dst)?;
        }
        self.ensure_absent(dst_parent, &dst_name, dst)?;

        self.remove_entry(&from.name, from.parent)?;
        self.add_entry(dst_parent, &dst_name, file)?;
        self.inodes.get_mut(file)?.touch_modified();
        info!("moved {} to {}", from.full, join(cwd, dst)?);
        Ok(())
    }

    /// `cp`: a new inode with freshly allocated pages holding the same bytes.
    /// Nothing of the copy survives a failure.
    pub fn copy_file(&mut self, cwd: &str, src: &str, dst: &str) -> Result<InodeNumber> {
        let source = self.resolve(cwd, src)?;
        let from = self.locate(cwd, src)?;
        self.require_file(source, Access::Read, &from.full)?;

        let (dst_parent, dst_name) = self.destination(cwd, from.parent, &from.name, dst)?;
        self.require_directory(dst_parent, Access::ReadWrite, dst)?;
        self.ensure_absent(dst_parent, &dst_name, dst)?;
        if self.entries.free_slots() == 0 {
            return Err(FsError::ResourceExhausted(Resource::DirectoryEntries));
        }

        let original = self.inodes.get(source)?;
        let (size, permissions, pages) =
            (original.size, original.permissions, original.pages().to_vec());
        let copy = self
            .inodes
            .allocate(InodeKind::Regular { pages: Vec::new() }, permissions)
            .ok_or(FsError::ResourceExhausted(Resource::Inodes))?;

        let mut copied: Vec<PageNumber> = Vec::with_capacity(pages.len());
        for &page in &pages {
            match self.pages.allocate() {
                Some(fresh) => {
                    self.pages.copy_page(page, fresh);
                    copied.push(fresh);
                }
                None => {
                    debug!("page pool ran dry copying {}", from.full);
                    for fresh in copied {
                        self.pages.free(fresh);
                    }
                    self.inodes.free(copy);
                    return Err(FsError::ResourceExhausted(Resource::Pages));
                }
            }
        }
        let inode = self.inodes.get_mut(copy)?;
        inode.kind = InodeKind::Regular { pages: copied };
        inode.size = size;
        if let Err(e) = self.add_entry(dst_parent, &dst_name, copy) {
            self.release_inode(copy)?;
            return Err(e);
        }
        info!("copied {} to inode {}", from.full, copy);
        Ok(copy)
    }

    /// Replaces the whole content of a file. When the page pool runs out halfway the
    /// file is left empty.
    pub fn write_file(&mut self, cwd: &str, path: &str, data: &[u8]) -> Result<()> {
        let file = self.follow(self.resolve(cwd, path)?)?;
        let full = join(cwd, path)?;
        self.require_file(file, Access::ReadWrite, &full)?;
        let needed = pages_for(data.len());
        if needed > MAX_FILE_PAGES {
            return Err(FsError::ResourceExhausted(Resource::FilePages));
        }

        let old = self.inodes.get(file)?.pages().to_vec();
        for page in old {
            self.pages.free(page);
        }
        let inode = self.inodes.get_mut(file)?;
        inode.kind = InodeKind::Regular { pages: Vec::new() };
        inode.size = 0;
        inode.touch_modified();

        let mut fresh: Vec<PageNumber> = Vec::with_capacity(needed);
        for chunk in data.chunks(PAGE_SIZE) {
            let page = match self.pages.allocate() {
                Some(page) => page,
                None => {
                    debug!("page pool ran dry writing {}, file left empty", full);
                    for page in fresh {
                        self.pages.free(page);
                    }
                    return Err(FsError::ResourceExhausted(Resource::Pages));
                }
            };
            self.pages.page_mut(page)[..chunk.len()].copy_from_slice(chunk);
            fresh.push(page);
        }

        let inode = self.inodes.get_mut(file)?;
        inode.kind = InodeKind::Regular { pages: fresh };
        inode.size = data.len() as u64;
        info!("wrote {} bytes to {}", data.len(), full);
        Ok(())
    }

    /// Adds `data` after the current end of a file, topping up its last page first.
    /// Both page limits are checked before anything is written.
    pub fn append_to_file(&mut self, cwd: &str, path: &str, data: &[u8]) -> Result<()> {
        let file = self.follow(self.resolve(cwd, path)?)?;
        let full = join(cwd, path)?;
        self.require_file(file, Access::Write, &full)?;

        let inode = self.inodes.get(file)?;
        let size = inode.size as usize;
        let mut pages = inode.pages().to_vec();
        let tail_used = size % PAGE_SIZE;
        let room = if tail_used == 0 { 0 } else { PAGE_SIZE - tail_used };
        let (top_up, rest) = data.split_at(room.min(data.len()));
        let extra = pages_for(rest.len());
        if pages.len() + extra > MAX_FILE_PAGES {
            return Err(FsError::ResourceExhausted(Resource::FilePages));
        }
        if extra > self.pages.free_count() {
            return Err(FsError::ResourceExhausted(Resource::Pages));
        }

        if let Some(&last) = pages.last() {
            if !top_up.is_empty() {
                self.pages.page_mut(last)[tail_used..tail_used + top_up.len()]
                    .copy_from_slice(top_up);
            }
        }
        for chunk in rest.chunks(PAGE_SIZE) {
            let page = self
                .pages
                .allocate()
                .ok_or(FsError::ResourceExhausted(Resource::Pages))?;
            self.pages.page_mut(page)[..chunk.len()].copy_from_slice(chunk);
            pages.push(page);
        }

        let inode = self.inodes.get_mut(file)?;
        inode.kind = InodeKind::Regular { pages };
        inode.size += data.len() as u64;
        inode.touch_modified();
        info!("appended {} bytes to {}", data.len(), full);
        Ok(())
    }

    /// Resolves a readable regular file through any symlinks and stamps its access
    /// time.
    fn open_for_read(&mut self, cwd: &str, path: &str) -> Result<InodeNumber> {
        let file = self.follow(self.resolve(cwd, path)?)?;
        self.require_file(file, Access::Read, &join(cwd, path)?)?;
        self.inodes.get_mut(file)?.atime = now();
        Ok(file)
    }

    /// Content of a file gathered page by page.
    fn contents(&self, file: InodeNumber) -> Result<Vec<u8>> {
        let inode = self.inodes.get(file)?;
        let mut remaining = inode.size as usize;
        let mut out = Vec::with_capacity(remaining);
        for &page in inode.pages() {
            let take = remaining.min(PAGE_SIZE);
            out.extend_from_slice(&self.pages.page(page)[..take]);
            remaining -= take;
        }
        Ok(out)
    }

    /// `cat`.
    pub fn read_file(&mut self, cwd: &str, path: &str) -> Result<Vec<u8>> {
        let file = self.open_for_read(cwd, path)?;
        self.contents(file)
    }

    /// Everything up to and including the `lines`-th newline.
    pub fn head(&mut self, cwd: &str, path: &str, lines: usize) -> Result<Vec<u8>> {
        let file = self.open_for_read(cwd, path)?;
        let content = self.contents(file)?;
        if lines == 0 {
            return Ok(Vec::new());
        }
        let end = content
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == b'\n')
            .nth(lines - 1)
            .map_or(content.len(), |(at, _)| at + 1);
        Ok(content[..end].to_vec())
    }

    /// Everything after newline number `total - lines`, where `total` counts every
    /// newline in the file.
    pub fn tail(&mut self, cwd: &str, path: &str, lines: usize) -> Result<Vec<u8>> {
        let file = self.open_for_read(cwd, path)?;
        let content = self.contents(file)?;
        let total = content.iter().filter(|&&b| b == b'\n').count();
        let skip = total.saturating_sub(lines);
        if skip == 0 {
            return Ok(content);
        }
        let start = content
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == b'\n')
            .nth(skip - 1)
            .map_or(content.len(), |(at, _)| at + 1);
        Ok(content[start..].to_vec())
    }
}

impl<T: BlockStorage> FlatFs<T> {
    pub fn create_file(&mut self, path: &str) -> Result<()> {
        self.transact(|sb, cwd| sb.create_file(cwd, path)).map(drop)
    }

    /// Returns how many names still refer to the file afterwards.
    pub fn delete_file(&mut self, path: &str) -> Result<u32> {
        self.transact(|sb, cwd| sb.delete_file(cwd, path))
    }

    pub fn move_file(&mut self, src: &str, dst: &str) -> Result<()> {
        self.transact(|sb, cwd| sb.move_file(cwd, src, dst))
    }

    pub fn copy_file(&mut self, src: &str, dst: &str) -> Result<()> {
        self.transact(|sb, cwd| sb.copy_file(cwd, src, dst)).map(drop)
    }

    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.transact(|sb, cwd| sb.write_file(cwd, path, data))
    }

    pub fn append_to_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.transact(|sb, cwd| sb.append_to_file(cwd, path, data))
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        self.transact(|sb, cwd| sb.read_file(cwd, path))
    }

    pub fn head(&mut self, path: &str, lines: usize) -> Result<Vec<u8>> {
        self.transact(|sb, cwd| sb.head(cwd, path, lines))
    }

    pub fn tail(&mut self, path: &str, lines: usize) -> Result<Vec<u8>> {
        self.transact(|sb, cwd| sb.tail(cwd, path, lines))
    }
}
