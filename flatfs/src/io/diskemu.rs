use super::block::{BlockNumber, BlockStorage, BLOCK_SIZE};
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use log::trace;

/// Emulates block disk storage in userspace using a plain file as the medium.
/// The file is a fixed-size image holding exactly `block_count` blocks.
pub struct FileBlockEmulator {
    fd: File,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, blocknr: BlockNumber, nblocks: usize) -> std::io::Result<()> {
        if blocknr + nblocks > self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "blocks {}..{} out of range for a {} block medium",
                    blocknr,
                    blocknr + nblocks,
                    self.block_count
                ),
            ));
        }
        Ok(())
    }

    fn seek_to(&mut self, blocknr: BlockNumber) -> std::io::Result<()> {
        self.fd
            .seek(SeekFrom::Start((blocknr * BLOCK_SIZE) as u64))?;
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return error if the file does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        FileBlockEmulatorBuilder::from(file)
            .with_block_count(nblocks)
            .clear_medium(false)
            .build()
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        if buf.len() != BLOCK_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer must hold exactly one block",
            ));
        }
        self.read_blocks(blocknr, buf)
    }

    /// Writes shorter than a block leave the tail of the block untouched.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        if buf.len() > BLOCK_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer exceeds the block size",
            ));
        }
        self.write_blocks(blocknr, buf)
    }

    fn read_blocks(&mut self, start: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(start, (buf.len() + BLOCK_SIZE - 1) / BLOCK_SIZE)?;
        trace!("reading {} bytes from block {}", buf.len(), start);
        self.seek_to(start)?;
        self.fd.read_exact(buf)
    }

    fn write_blocks(&mut self, start: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(start, (buf.len() + BLOCK_SIZE - 1) / BLOCK_SIZE)?;
        trace!("writing {} bytes at block {}", buf.len(), start);
        self.seek_to(start)?;
        self.fd.write_all(buf)
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_count: usize,
    clear_medium: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            block_count: 0,
            clear_medium: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Whether `build` zeroes the medium. Defaults to true; set it to false to reopen
    /// an image that already holds a filesystem.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor used and, unless told
    /// otherwise, does destructive things to prepare the file for use.
    pub fn build(self) -> std::io::Result<FileBlockEmulator> {
        if self.block_count == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "a medium needs at least one block",
            ));
        }
        let required = (self.block_count * BLOCK_SIZE) as u64;
        if self.clear_medium {
            // Truncating to zero first drops any stale content so the whole medium
            // reads back as zeroes.
            self.fd.set_len(0)?;
            self.fd.set_len(required)?;
        } else if self.fd.metadata()?.len() < required {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "medium is smaller than the requested block count",
            ));
        }

        Ok(FileBlockEmulator {
            fd: self.fd,
            block_count: self.block_count,
        })
    }
}
