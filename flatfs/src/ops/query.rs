use std::collections::HashSet;

use log::info;

use crate::fs::{FlatFs, Result};
use crate::io::BlockStorage;
use crate::node::{now, FileKind, InodeNumber};
use crate::path::absolute;
use crate::perm::{self, Access, Permissions};
use crate::sb::SuperBlock;

/// What `stat` reports about one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub inode: InodeNumber,
    pub kind: FileKind,
    pub size: u64,
    pub permissions: Permissions,
    pub link_count: u32,
    pub page_count: usize,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    /// Stored target for symlinks.
    pub target: Option<String>,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub name: String,
    pub inode: InodeNumber,
    pub kind: FileKind,
}

impl DirListing {
    /// Names starting with '.' are hidden from plain listings.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

/// One line of a `tree` drawing, in depth-first order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRow {
    /// 0 for the direct children of the walked directory.
    pub depth: usize,
    pub name: String,
    pub inode: InodeNumber,
    pub kind: FileKind,
    pub target: Option<String>,
    /// Whether this is the last child of its directory.
    pub last: bool,
}

impl SuperBlock {
    /// `chmod` with a descriptor such as `rw-`.
    pub fn change_permissions(&mut self, cwd: &str, path: &str, descriptor: &str) -> Result<()> {
        let node = self.resolve(cwd, path)?;
        let permissions = perm::parse(descriptor)?;
        let inode = self.inodes.get_mut(node)?;
        inode.permissions = permissions;
        inode.mtime = now();
        info!("{} is now {}", path, perm::describe(permissions));
        Ok(())
    }

    pub fn show_permissions(&mut self, cwd: &str, path: &str) -> Result<(FileKind, Permissions)> {
        let node = self.resolve(cwd, path)?;
        let inode = self.inodes.get_mut(node)?;
        inode.atime = now();
        Ok((inode.file_kind(), inode.permissions))
    }

    /// Metadata of the object `path` names, symlinks included rather than followed.
    pub fn stat(&self, cwd: &str, path: &str) -> Result<Metadata> {
        let node = self.resolve(cwd, path)?;
        let inode = self.inodes.get(node)?;
        Ok(Metadata {
            inode: node,
            kind: inode.file_kind(),
            size: inode.size,
            permissions: inode.permissions,
            link_count: inode.link_count,
            page_count: inode.pages().len(),
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
            target: inode.symlink_target().map(str::to_string),
        })
    }

    /// Entries of a readable directory in table order, "." and ".." included.
    pub fn list_directory(&self, cwd: &str, path: &str) -> Result<Vec<DirListing>> {
        let dir = self.follow(self.resolve(cwd, path)?)?;
        self.require_directory(dir, Access::Read, &absolute(cwd, path)?)?;
        self.entries
            .children(dir)
            .map(|entry| {
                Ok(DirListing {
                    name: entry.name.clone(),
                    inode: entry.inode,
                    kind: self.kind_of(entry.inode)?,
                })
            })
            .collect()
    }

    /// Visible entries below `path`, depth first with siblings sorted by name. Each
    /// directory is entered at most once.
    pub fn tree(&self, cwd: &str, path: &str) -> Result<Vec<TreeRow>> {
        let top = self.follow(self.resolve(cwd, path)?)?;
        self.require_directory(top, Access::Read, &absolute(cwd, path)?)?;

        let mut rows = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(top);
        let mut stack = self.visible_children(top, 0)?;
        stack.reverse();
        while let Some(row) = stack.pop() {
            let descend = row.kind == FileKind::Directory && visited.insert(row.inode);
            let (node, depth) = (row.inode, row.depth);
            rows.push(row);
            if descend {
                let mut below = self.visible_children(node, depth + 1)?;
                below.reverse();
                stack.extend(below);
            }
        }
        Ok(rows)
    }

    fn visible_children(&self, dir: InodeNumber, depth: usize) -> Result<Vec<TreeRow>> {
        let mut entries: Vec<_> = self
            .entries
            .children(dir)
            .filter(|entry| !entry.name.starts_with('.'))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let count = entries.len();
        entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let inode = self.inodes.get(entry.inode)?;
                Ok(TreeRow {
                    depth,
                    name: entry.name.clone(),
                    inode: entry.inode,
                    kind: inode.file_kind(),
                    target: inode.symlink_target().map(str::to_string),
                    last: i + 1 == count,
                })
            })
            .collect()
    }
}

impl<T: BlockStorage> FlatFs<T> {
    pub fn change_permissions(&mut self, path: &str, descriptor: &str) -> Result<()> {
        self.transact(|sb, cwd| sb.change_permissions(cwd, path, descriptor))
    }

    pub fn show_permissions(&mut self, path: &str) -> Result<(FileKind, Permissions)> {
        self.transact(|sb, cwd| sb.show_permissions(cwd, path))
    }

    pub fn stat(&mut self, path: &str) -> Result<Metadata> {
        self.inspect(|sb, cwd| sb.stat(cwd, path))
    }

    pub fn list_directory(&mut self, path: &str) -> Result<Vec<DirListing>> {
        self.inspect(|sb, cwd| sb.list_directory(cwd, path))
    }

    pub fn tree(&mut self, path: &str) -> Result<Vec<TreeRow>> {
        self.inspect(|sb, cwd| sb.tree(cwd, path))
    }
}
