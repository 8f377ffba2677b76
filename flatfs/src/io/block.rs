use std::path::Path;

/// Size in bytes of a single addressable block of the backing medium. One data
/// page of the filesystem occupies exactly one block.
pub const BLOCK_SIZE: usize = 4096;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// A fixed-size medium addressed in `BLOCK_SIZE` units. The filesystem image is
/// read and written through this trait only, so tests and tools can swap in any
/// storage that honours block boundaries.
pub trait BlockStorage {
    /// Opens an existing medium at the specified path. This method does not validate
    /// the stored image, it is up to the filesystem to check the header on mount.
    fn open_disk<P: AsRef<Path>>(path: P, nblocks: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;

    /// The number of blocks the medium holds.
    fn block_count(&self) -> usize;

    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or into a buffer that is not exactly
    /// one block long, will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;

    /// Writes provided buffer into the specified block number.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range, or a buffer longer than one block,
    /// will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;

    /// Reads `buf.len() / BLOCK_SIZE` consecutive blocks starting at `start`.
    fn read_blocks(&mut self, start: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        for (i, chunk) in buf.chunks_mut(BLOCK_SIZE).enumerate() {
            self.read_block(start + i, chunk)?;
        }
        Ok(())
    }

    /// Writes `buf` over consecutive blocks starting at `start`.
    fn write_blocks(&mut self, start: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        for (i, chunk) in buf.chunks(BLOCK_SIZE).enumerate() {
            self.write_block(start + i, chunk)?;
        }
        Ok(())
    }

    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}
