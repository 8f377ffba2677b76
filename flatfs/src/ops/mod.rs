//! The user-visible commands.
//!
//! Every command is a `SuperBlock` method taking the working directory explicitly,
//! with a `FlatFs` wrapper that runs it between a load and a save of the image.
//! Each one checks existence and type, then permissions, then collisions, and only
//! then mutates.

mod dir;
mod file;
mod link;
mod query;

pub use dir::confirm_on_stdin;
pub use query::{DirListing, Metadata, TreeRow};

use crate::fs::{FsError, Result, MAX_FILENAME_LENGTH};
use crate::node::{FileKind, InodeNumber};
use crate::path::{join, last_component};
use crate::perm::{check_directory, check_file, Access};
use crate::sb::SuperBlock;

/// A name that can be stored in a directory entry.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FsError::InvalidArgument("empty name".into()));
    }
    if name.len() >= MAX_FILENAME_LENGTH {
        return Err(FsError::InvalidArgument(format!(
            "name longer than {} bytes",
            MAX_FILENAME_LENGTH - 1
        )));
    }
    Ok(())
}

/// "." and ".." are bookkeeping entries and never the subject of a removal or move.
fn reject_dot_entries(name: &str) -> Result<()> {
    if name == "." || name == ".." {
        return Err(FsError::InvalidArgument(format!(
            "refusing to operate on '{}'",
            name
        )));
    }
    Ok(())
}

/// Where a path points: the containing directory, the entry name and, when it
/// exists, the inode.
struct Location {
    full: String,
    parent: InodeNumber,
    name: String,
}

impl SuperBlock {
    fn kind_of(&self, node: InodeNumber) -> Result<FileKind> {
        Ok(self.inodes.get(node)?.file_kind())
    }

    /// Splits `path` into its parent directory and final name. The parent must exist.
    fn locate(&self, cwd: &str, path: &str) -> Result<Location> {
        let full = join(cwd, path)?;
        let name = last_component(&full).to_string();
        let parent = self.resolve_parent(cwd, path)?;
        Ok(Location { full, parent, name })
    }

    fn require_directory(&self, node: InodeNumber, access: Access, path: &str) -> Result<()> {
        let inode = self.inodes.get(node)?;
        if inode.file_kind() != FileKind::Directory {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        if !check_directory(inode, access) {
            return Err(FsError::PermissionDenied(path.to_string()));
        }
        Ok(())
    }

    fn require_file(&self, node: InodeNumber, access: Access, path: &str) -> Result<()> {
        let inode = self.inodes.get(node)?;
        if inode.file_kind() != FileKind::Regular {
            return Err(FsError::NotAFile(path.to_string()));
        }
        if !check_file(inode, access) {
            return Err(FsError::PermissionDenied(path.to_string()));
        }
        Ok(())
    }

    fn ensure_absent(&self, parent: InodeNumber, name: &str, path: &str) -> Result<()> {
        match self.entries.find(parent, name) {
            Some(_) => Err(FsError::AlreadyExists(path.to_string())),
            None => Ok(()),
        }
    }
}
