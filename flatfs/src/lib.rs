//! A virtual filesystem kept in a single fixed-size image: an inode table, one flat
//! directory table shared by every directory, and a pool of 4 KiB pages, driven
//! through Unix-like commands on [`FlatFs`].

mod alloc;
mod entry;
mod fs;
pub mod io;
mod node;
mod ops;
mod page;
mod path;
mod perm;
mod sb;

pub use crate::entry::{DirEntry, DIRENT_SIZE};
pub use crate::fs::{
    FlatFs, FsError, Resource, Result, DEFAULT_IMAGE, MAX_FILENAME_LENGTH, MAX_FILES,
    MAX_FILE_PAGES, MAX_PATH_LENGTH, MAX_SYMLINK_HOPS, PAGE_SIZE, TOTAL_PAGES,
};
pub use crate::node::{FileKind, InodeNumber, ROOT_INODE};
pub use crate::ops::{confirm_on_stdin, DirListing, Metadata, TreeRow};
pub use crate::page::PageNumber;
pub use crate::path::{absolute, last_component};
pub use crate::perm::{
    describe as describe_permissions, parse as parse_permissions, Access, Permission, Permissions,
};
pub use crate::sb::SuperBlock;
