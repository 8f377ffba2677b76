use std::collections::HashSet;
use std::io::Write;

use log::{debug, info};

use super::{reject_dot_entries, validate_name};
use crate::fs::{FlatFs, FsError, Result, MAX_FILES};
use crate::io::BlockStorage;
use crate::node::{now, FileKind, InodeNumber, ROOT_INODE};
use crate::path::{absolute, normalize};
use crate::perm::Access;
use crate::sb::SuperBlock;

/// Asks on the terminal before a recursive removal; only "yes" agrees.
pub fn confirm_on_stdin(path: &str) -> bool {
    print!("remove {} and everything below it? (yes/no) ", path);
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer).is_ok() && answer.trim() == "yes"
}

impl SuperBlock {
    /// `mkdir`: an empty rwx directory holding "." and "..".
    pub fn create_directory(&mut self, cwd: &str, path: &str) -> Result<InodeNumber> {
        let at = self.locate(cwd, path)?;
        if normalize(&at.full) == "/" {
            return Err(FsError::AlreadyExists("/".into()));
        }
        validate_name(&at.name)?;
        self.require_directory(at.parent, Access::ReadWrite, &at.full)?;
        self.ensure_absent(at.parent, &at.name, &at.full)?;

        self.make_directory(at.parent, &at.name)
    }

    /// Shared checks of both directory removals: not the root, not a dot entry, a
    /// directory, and a parent granting read and write.
    fn directory_for_removal(
        &self,
        cwd: &str,
        path: &str,
    ) -> Result<(InodeNumber, InodeNumber, String)> {
        if absolute(cwd, path)? == "/" {
            return Err(FsError::InvalidArgument("cannot remove the root directory".into()));
        }
        let dir = self.resolve(cwd, path)?;
        let at = self.locate(cwd, path)?;
        reject_dot_entries(&at.name)?;
        if self.kind_of(dir)? != FileKind::Directory {
            return Err(FsError::NotADirectory(at.full));
        }
        self.require_directory(at.parent, Access::ReadWrite, &at.full)?;
        Ok((dir, at.parent, at.name))
    }

    /// `rmdir`: only directories holding nothing but "." and "..".
    pub fn delete_directory(&mut self, cwd: &str, path: &str) -> Result<()> {
        let (dir, parent, name) = self.directory_for_removal(cwd, path)?;
        if self.entries.count_children(dir) != 2 {
            return Err(FsError::NotEmpty(path.to_string()));
        }

        self.clear_directory(dir);
        self.remove_entry(&name, parent)?;
        self.release_inode(dir)?;
        info!("removed directory {}", path);
        Ok(())
    }

    /// `rm -rf`: removes a directory and everything below it once `confirm` agrees.
    pub fn delete_directory_force(
        &mut self,
        cwd: &str,
        path: &str,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Result<()> {
        let (dir, parent, name) = self.directory_for_removal(cwd, path)?;
        if !confirm(&absolute(cwd, path)?) {
            return Err(FsError::Cancelled);
        }

        self.remove_subtree(dir)?;
        self.remove_entry(&name, parent)?;
        info!("removed directory tree {}", path);
        Ok(())
    }

    /// Empties and frees `top` and every directory below it. Regular files lose one
    /// link per entry found, so hard links from outside the subtree keep them alive.
    fn remove_subtree(&mut self, top: InodeNumber) -> Result<()> {
        let mut stack = vec![top];
        let mut visited = HashSet::new();
        while let Some(dir) = stack.pop() {
            if !visited.insert(dir) {
                continue;
            }
            let children: Vec<InodeNumber> = self
                .entries
                .children(dir)
                .filter(|entry| entry.name != "." && entry.name != "..")
                .map(|entry| entry.inode)
                .collect();
            for child in children {
                match self.kind_of(child)? {
                    FileKind::Directory => stack.push(child),
                    FileKind::Regular => {
                        self.unlink_file(child)?;
                    }
                    FileKind::Symlink => self.release_inode(child)?,
                }
            }
            self.clear_directory(dir);
            self.release_inode(dir)?;
            debug!("freed directory inode {}", dir);
        }
        Ok(())
    }

    /// Whether `node` is `ancestor` or lies somewhere below it, following ".." up to
    /// the root.
    fn is_within(&self, node: InodeNumber, ancestor: InodeNumber) -> bool {
        let mut current = node;
        for _ in 0..MAX_FILES {
            if current == ancestor {
                return true;
            }
            if current == ROOT_INODE {
                return false;
            }
            match self.entries.find(current, "..") {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    /// `mvdir`: re-parents a directory. `dst` names the new location and must be free.
    pub fn move_directory(&mut self, cwd: &str, src: &str, dst: &str) -> Result<()> {
        if absolute(cwd, src)? == "/" {
            return Err(FsError::InvalidArgument("cannot move the root directory".into()));
        }
        let dir = self.resolve(cwd, src)?;
        let from = self.locate(cwd, src)?;
        reject_dot_entries(&from.name)?;
        if self.kind_of(dir)? != FileKind::Directory {
            return Err(FsError::NotADirectory(from.full));
        }

        let to = self.locate(cwd, dst)?;
        let (dst_parent, dst_name) = (to.parent, to.name);
        validate_name(&dst_name)?;
        reject_dot_entries(&dst_name)?;
        self.require_directory(from.parent, Access::Write, &from.full)?;
        self.require_directory(dst_parent, Access::Write, dst)?;
        self.ensure_absent(dst_parent, &dst_name, dst)?;
        if self.is_within(dst_parent, dir) {
            return Err(FsError::Cycle(format!("{} into {}", from.full, dst)));
        }

        self.remove_entry(&from.name, from.parent)?;
        self.add_entry(dst_parent, &dst_name, dir)?;
        self.entries.repoint(dir, "..", dst_parent);
        info!("moved directory {} to {}", from.full, dst);
        Ok(())
    }

    /// `cd`: the normalised path the session moves to. A symlink leads to the path it
    /// stores.
    pub fn change_directory(&mut self, cwd: &str, path: &str) -> Result<String> {
        let node = self.resolve(cwd, path)?;
        let (dir, target) = self.follow_path(node)?;
        let destination = match target {
            Some(target) => normalize(&target),
            None => absolute(cwd, path)?,
        };
        self.require_directory(dir, Access::ReadExecute, &destination)?;
        self.inodes.get_mut(dir)?.atime = now();
        Ok(destination)
    }

    /// `du`: bytes accounted to a directory, its entries and everything below it.
    pub fn disk_usage(&self, cwd: &str, path: &str) -> Result<u64> {
        let top = self.resolve(cwd, path)?;
        self.require_directory(top, Access::Read, &absolute(cwd, path)?)?;

        let mut total = 0;
        let mut stack = vec![top];
        let mut visited = HashSet::new();
        while let Some(dir) = stack.pop() {
            if !visited.insert(dir) {
                continue;
            }
            total += self.inodes.get(dir)?.size;
            for entry in self.entries.children(dir) {
                if entry.name == "." || entry.name == ".." {
                    continue;
                }
                let child = self.inodes.get(entry.inode)?;
                match child.file_kind() {
                    FileKind::Directory => stack.push(entry.inode),
                    FileKind::Regular | FileKind::Symlink => total += child.size,
                }
            }
        }
        Ok(total)
    }
}

impl<T: BlockStorage> FlatFs<T> {
    pub fn create_directory(&mut self, path: &str) -> Result<()> {
        self.transact(|sb, cwd| sb.create_directory(cwd, path)).map(drop)
    }

    pub fn delete_directory(&mut self, path: &str) -> Result<()> {
        self.transact(|sb, cwd| sb.delete_directory(cwd, path))
    }

    /// Pass [`confirm_on_stdin`] for the interactive prompt.
    pub fn delete_directory_force(
        &mut self,
        path: &str,
        confirm: impl FnOnce(&str) -> bool,
    ) -> Result<()> {
        self.transact(|sb, cwd| sb.delete_directory_force(cwd, path, confirm))
    }

    pub fn move_directory(&mut self, src: &str, dst: &str) -> Result<()> {
        self.transact(|sb, cwd| sb.move_directory(cwd, src, dst))
    }

    pub fn cd(&mut self, path: &str) -> Result<()> {
        let destination = self.transact(|sb, cwd| sb.change_directory(cwd, path))?;
        self.set_cwd(destination);
        Ok(())
    }

    pub fn disk_usage(&mut self, path: &str) -> Result<u64> {
        self.inspect(|sb, cwd| sb.disk_usage(cwd, path))
    }
}
