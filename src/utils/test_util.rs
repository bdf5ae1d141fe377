//! a fresh filesystem in memory for unit tests
use crate::{
    fs::MyFS,
    mkfs::{mkfs_in_memory, MkfsOptions},
};

/// route `log` output to the test harness, once per process
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// one group of 512 byte blocks with inline data on
pub(crate) fn test_options() -> MkfsOptions {
    MkfsOptions::default()
}

pub(crate) fn new_test_fs() -> MyFS {
    new_test_fs_with(&test_options())
}

pub(crate) fn new_test_fs_with(options: &MkfsOptions) -> MyFS {
    init_logger();
    let image = mkfs_in_memory(options).unwrap();
    MyFS::from_image(image).unwrap()
}
