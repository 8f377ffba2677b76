use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;

use log::{debug, info};
use thiserror::Error;

use crate::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use crate::sb::SuperBlock;

/// Inode slots, and also directory table slots.
pub const MAX_FILES: usize = 500;
/// Bytes reserved for a name, terminator included.
pub const MAX_FILENAME_LENGTH: usize = 256;
/// Bytes reserved for a path, terminator included.
pub const MAX_PATH_LENGTH: usize = 1024;
pub const PAGE_SIZE: usize = 4096;
/// Direct page references per regular file, which caps a file at 40 KiB.
pub const MAX_FILE_PAGES: usize = 10;
pub const TOTAL_PAGES: usize = MAX_FILES * MAX_FILE_PAGES;
pub const MAX_SYMLINK_HOPS: usize = 10;
/// Image file used when the caller does not name one.
pub const DEFAULT_IMAGE: &str = "virtual_disk.dat";

/// A pool that can run dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Inodes,
    Pages,
    DirectoryEntries,
    /// The per-file page limit rather than the shared pool.
    FilePages,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Resource::Inodes => "no free inodes",
            Resource::Pages => "no free pages",
            Resource::DirectoryEntries => "directory table is full",
            Resource::FilePages => "file would exceed its page limit",
        };
        f.write_str(what)
    }
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("not a regular file: {0}")]
    NotAFile(String),
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),
    #[error("{0}")]
    ResourceExhausted(Resource),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("too many levels of symbolic links")]
    TooManyLinks,
    #[error("cannot move a directory into itself: {0}")]
    Cycle(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid filesystem image: {0}")]
    InvalidImage(String),
    #[error("image i/o failed")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// A mounted filesystem image plus the session's working directory.
///
/// The device is the source of truth: every command reloads the image, runs against
/// the in-memory copy and writes the result back.
pub struct FlatFs<T: BlockStorage> {
    dev: T,
    super_block: SuperBlock,
    cwd: String,
}

impl<T: BlockStorage> FlatFs<T> {
    /// Writes a fresh filesystem onto the device, replacing whatever it held.
    pub fn create(mut dev: T) -> Result<Self> {
        let super_block = SuperBlock::format()?;
        super_block.write_to(&mut dev)?;
        dev.sync_disk()?;
        info!("formatted a {} block image", SuperBlock::image_blocks());

        Ok(FlatFs {
            dev,
            super_block,
            cwd: "/".to_string(),
        })
    }

    /// Mounts the filesystem already present on the device.
    pub fn open(mut dev: T) -> Result<Self> {
        let super_block = SuperBlock::read_from(&mut dev)?;
        info!(
            "mounted image with {} inodes in use",
            super_block.inodes.used_count()
        );

        Ok(FlatFs {
            dev,
            super_block,
            cwd: "/".to_string(),
        })
    }

    /// Wipes the image back to an empty root directory.
    pub fn format(&mut self) -> Result<()> {
        self.super_block = SuperBlock::format()?;
        self.super_block.write_to(&mut self.dev)?;
        self.dev.sync_disk()?;
        self.cwd = "/".to_string();
        info!("reformatted image");
        Ok(())
    }

    pub fn pwd(&self) -> &str {
        &self.cwd
    }

    pub(crate) fn set_cwd(&mut self, cwd: String) {
        self.cwd = cwd;
    }

    /// The state as of the last command.
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// Gives the device back, e.g. to reopen it.
    pub fn into_device(self) -> T {
        self.dev
    }

    /// Runs a mutating command between a load and a save. The save happens even when
    /// the command fails so that partial cleanup is kept.
    pub(crate) fn transact<R>(
        &mut self,
        command: impl FnOnce(&mut SuperBlock, &str) -> Result<R>,
    ) -> Result<R> {
        self.super_block = SuperBlock::read_from(&mut self.dev)?;
        let result = command(&mut self.super_block, &self.cwd);
        if let Err(e) = &result {
            debug!("command failed: {}", e);
        }
        self.super_block.write_to(&mut self.dev)?;
        result
    }

    /// Runs a read-only query against freshly loaded state.
    pub(crate) fn inspect<R>(
        &mut self,
        query: impl FnOnce(&SuperBlock, &str) -> Result<R>,
    ) -> Result<R> {
        self.super_block = SuperBlock::read_from(&mut self.dev)?;
        query(&self.super_block, &self.cwd)
    }
}

impl FlatFs<FileBlockEmulator> {
    /// Creates or truncates the image file at `path` and formats it.
    pub fn format_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;
        let dev = FileBlockEmulatorBuilder::from(file)
            .with_block_count(SuperBlock::image_blocks())
            .build()?;
        info!("creating image at {}", path.as_ref().display());
        Self::create(dev)
    }

    /// Mounts the image file at `path`. A missing file is NotFound and a file that is
    /// too small to hold an image is InvalidImage.
    pub fn mount_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FsError::NotFound(path.display().to_string()));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let required = (SuperBlock::image_blocks() * crate::io::BLOCK_SIZE) as u64;
        if file.metadata()?.len() < required {
            return Err(FsError::InvalidImage(format!(
                "{} is smaller than an image",
                path.display()
            )));
        }
        let dev = FileBlockEmulatorBuilder::from(file)
            .with_block_count(SuperBlock::image_blocks())
            .clear_medium(false)
            .build()?;
        Self::open(dev)
    }

    /// Mounts the image at `path`, formatting a new one when no file exists there.
    /// Sessions usually pass [`DEFAULT_IMAGE`].
    pub fn open_or_format<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::mount_path(path)
        } else {
            Self::format_path(path)
        }
    }
}
