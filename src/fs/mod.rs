//! A minimal external collaborator built on top of [`StoragePool`](crate::pool::StoragePool):
//! a growable file table at the low end of the pool's virtual address space, file
//! data blocks allocated from the high end downward. Out of scope per this crate's
//! hard-parts analysis: directories, permissions, deletion/truncation,
//! defragmentation — this module only implements the pool-client interface needed to
//! write and read whole files.

pub mod file_table;
pub mod filesystem;

pub use file_table::{FileEntry, FileTable};
pub use filesystem::FileSystem;

use crate::pool::PoolError;

quick_error! {
    /// Errors from the filesystem layer.
    #[derive(Debug, Clone, PartialEq)]
    pub enum FsError {
        /// A pool-level operation failed.
        Pool(err: PoolError) {
            display("{}", err)
            from()
        }
        /// The file table and the file data regions would overlap.
        FilesystemFull {
            display("file table and file data regions would overlap")
        }
        /// `read_file` for a filename with no table entry.
        FileNotFound(name: String) {
            display("no such file: {}", name)
        }
        /// A filename longer than 255 bytes, exceeding the on-disk
        /// filename-length ceiling.
        FilenameTooLong(len: usize) {
            display("filename length {} exceeds the 255 byte limit", len)
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
