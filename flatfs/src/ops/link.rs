use log::{debug, info};

use super::{reject_dot_entries, validate_name};
use crate::fs::{FlatFs, FsError, Result, MAX_SYMLINK_HOPS};
use crate::io::BlockStorage;
use crate::node::{FileKind, InodeKind, InodeNumber};
use crate::path::join;
use crate::perm::{Access, Permission};
use crate::sb::SuperBlock;

impl SuperBlock {
    /// Follows `node` through symlinks until it names something else.
    pub fn follow(&self, node: InodeNumber) -> Result<InodeNumber> {
        self.follow_path(node).map(|(target, _)| target)
    }

    /// Like `follow`, also handing back the last stored target path when at least one
    /// symlink was crossed.
    pub(crate) fn follow_path(&self, node: InodeNumber) -> Result<(InodeNumber, Option<String>)> {
        let mut current = node;
        let mut last_target = None;
        for _ in 0..MAX_SYMLINK_HOPS {
            let target = match self.inodes.get(current)?.symlink_target() {
                Some(target) => target.to_string(),
                None => return Ok((current, last_target)),
            };
            current = self
                .resolve("/", &target)
                .map_err(|_| FsError::NotFound(target.clone()))?;
            last_target = Some(target);
        }
        if self.kind_of(current)? == FileKind::Symlink {
            debug!("gave up after {} symlink hops", MAX_SYMLINK_HOPS);
            return Err(FsError::TooManyLinks);
        }
        Ok((current, last_target))
    }

    /// `link`: another name for a regular file.
    pub fn link(&mut self, cwd: &str, src: &str, dst: &str) -> Result<()> {
        let file = self.resolve(cwd, src)?;
        if self.kind_of(file)? != FileKind::Regular {
            return Err(FsError::NotAFile(join(cwd, src)?));
        }
        let at = self.locate(cwd, dst)?;
        validate_name(&at.name)?;
        self.require_directory(at.parent, Access::Write, &at.full)?;
        self.ensure_absent(at.parent, &at.name, &at.full)?;

        self.add_entry(at.parent, &at.name, file)?;
        let inode = self.inodes.get_mut(file)?;
        inode.link_count += 1;
        inode.touch_modified();
        info!("linked {} to inode {} ({} links)", at.full, file, inode.link_count);
        Ok(())
    }

    /// `symlink`: a link storing the absolute, unnormalised form of `target`, which
    /// has to exist now.
    pub fn symlink(&mut self, cwd: &str, target: &str, link: &str) -> Result<InodeNumber> {
        self.resolve(cwd, target)?;
        let stored = join(cwd, target)?;
        let at = self.locate(cwd, link)?;
        validate_name(&at.name)?;
        self.require_directory(at.parent, Access::Write, &at.full)?;
        self.ensure_absent(at.parent, &at.name, &at.full)?;

        let node = self.make_node(
            at.parent,
            &at.name,
            InodeKind::Symlink { target: stored },
            Permission::Read | Permission::Write,
        )?;
        info!("created symlink {} as inode {}", at.full, node);
        Ok(node)
    }

    /// `unlink`: removes a symbolic link, never what it points at.
    pub fn unlink(&mut self, cwd: &str, path: &str) -> Result<()> {
        let node = self.resolve(cwd, path)?;
        let at = self.locate(cwd, path)?;
        reject_dot_entries(&at.name)?;
        if self.kind_of(node)? != FileKind::Symlink {
            return Err(FsError::NotASymlink(at.full));
        }
        self.require_directory(at.parent, Access::Write, &at.full)?;

        self.remove_entry(&at.name, at.parent)?;
        self.release_inode(node)?;
        info!("removed symlink {}", at.full);
        Ok(())
    }

    /// `readlink`.
    pub fn read_link(&self, cwd: &str, path: &str) -> Result<String> {
        let node = self.resolve(cwd, path)?;
        self.inodes
            .get(node)?
            .symlink_target()
            .map(str::to_string)
            .ok_or_else(|| FsError::NotASymlink(path.to_string()))
    }
}

impl<T: BlockStorage> FlatFs<T> {
    pub fn link(&mut self, src: &str, dst: &str) -> Result<()> {
        self.transact(|sb, cwd| sb.link(cwd, src, dst))
    }

    pub fn symlink(&mut self, target: &str, link: &str) -> Result<()> {
        self.transact(|sb, cwd| sb.symlink(cwd, target, link)).map(drop)
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        self.transact(|sb, cwd| sb.unlink(cwd, path))
    }

    pub fn read_link(&mut self, path: &str) -> Result<String> {
        self.inspect(|sb, cwd| sb.read_link(cwd, path))
    }
}
