//! a small block filesystem whose small files and directories live inside their inode
mod fs;
pub mod mkfs;
pub mod utils;
pub use fs::*;
