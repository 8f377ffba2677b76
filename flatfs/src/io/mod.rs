mod block;
mod diskemu;

pub use block::{BlockNumber, BlockStorage, BLOCK_SIZE};
pub use diskemu::{FileBlockEmulator, FileBlockEmulatorBuilder};
