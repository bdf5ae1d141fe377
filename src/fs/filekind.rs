use serde::{Deserialize, Serialize};

/// an enum to describe the type of a file
#[derive(Serialize, Deserialize, Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// an regular file
    RegularFile,
    /// a directory
    Directory,
    /// a symbolic link
    SymbolicLink,
    /// Unknown
    #[default]
    Unknown,
}

/// `file_type` byte stored in a directory entry
impl From<FileKind> for u8 {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Unknown => 0,
            FileKind::RegularFile => 1,
            FileKind::Directory => 2,
            FileKind::SymbolicLink => 7,
        }
    }
}

impl From<u8> for FileKind {
    fn from(file_type: u8) -> Self {
        match file_type {
            1 => FileKind::RegularFile,
            2 => FileKind::Directory,
            7 => FileKind::SymbolicLink,
            _ => FileKind::Unknown,
        }
    }
}

impl FileKind {
    /// the `S_IFMT` bits for this kind
    pub fn mode_bits(self) -> u16 {
        match self {
            FileKind::RegularFile | FileKind::Unknown => libc::S_IFREG as u16,
            FileKind::Directory => libc::S_IFDIR as u16,
            FileKind::SymbolicLink => libc::S_IFLNK as u16,
        }
    }

    /// only regular files and directories may keep their content inside the inode
    pub fn may_inline(self) -> bool {
        matches!(self, FileKind::RegularFile | FileKind::Directory)
    }
}
