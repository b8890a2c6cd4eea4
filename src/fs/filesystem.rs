//! [`FileSystem`]: a pool client that lays a growable file table at the low end of
//! the pool's address space and file data at the high end, growing toward each
//! other.

use crate::{fs::{file_table::FileEntry, FileTable, FsError, FsResult},
            log::Logger,
            pool::StoragePool};

/// Blocks zeroed at construction so an empty file table decodes cleanly (a 4-byte
/// zero length prefix, then nothing).
const RESERVED_HEADER_BLOCKS: usize = 4;

/// A minimal file store built on a [`StoragePool`]: `write_file`/`read_file`
/// against whole-file byte buffers, with the file table and file data kept in
/// disjoint, growing-toward-each-other regions of the pool's virtual address
/// space.
#[derive(Debug)]
pub struct FileSystem {
    pool: StoragePool,
}

impl FileSystem {
    /// Wrap `pool`, zero-initializing its first four blocks so the initial file
    /// table (length-prefix zero, no entries) reads back empty.
    pub fn new(pool: StoragePool) -> FsResult<Self> {
        let mut fs = FileSystem { pool };
        let zero_len = fs.pool.get_block_size() * RESERVED_HEADER_BLOCKS;
        fs.pool.write_virtual_blocks(0, &vec![0u8; zero_len])?;
        Ok(fs)
    }

    pub fn pool(&self) -> &StoragePool { &self.pool }

    pub fn pool_mut(&mut self) -> &mut StoragePool { &mut self.pool }

    fn read_file_table(&mut self) -> FsResult<FileTable> {
        let len_bytes = self.pool.read_virtual_blocks_byte_count(0, 4, None)?;
        let table_len =
            u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        let framed = self.pool.read_virtual_blocks_byte_count(0, table_len + 4, None)?;
        Ok(FileTable::decode(&framed[4..]))
    }

    /// Write `table` to block 0, prefixed by its 4-byte big-endian length. Fails if
    /// doing so would reach at or past the lowest block any file in the table
    /// currently on disk already occupies — i.e. the table and data regions would
    /// overlap.
    fn write_file_table(&mut self, table: &FileTable) -> FsResult<()> {
        let old_frontier = self.read_file_table()?.lowest_used_block(self.pool.get_num_blocks());
        let encoded = table.encode();
        if encoded.len() + 4 > old_frontier {
            return Err(FsError::FilesystemFull);
        }
        let mut framed = (encoded.len() as u32).to_be_bytes().to_vec();
        framed.extend(encoded);
        self.pool.write_virtual_blocks(0, &framed)?;
        Ok(())
    }

    /// Write a whole file. Data blocks are allocated starting just below the
    /// current frontier (the lowest block referenced by any existing file, or the
    /// top of the pool if none) and descending. Fails with `FilesystemFull` if the
    /// required blocks would collide with blocks a file already owns, or if the
    /// updated table would grow past the new frontier.
    pub fn write_file(&mut self, filename: &str, data: &[u8]) -> FsResult<()> {
        if filename.len() > 255 {
            return Err(FsError::FilenameTooLong(filename.len()));
        }

        let mut table = self.read_file_table()?;
        let frontier = table.lowest_used_block(self.pool.get_num_blocks());
        let used = table.used_blocks();
        let needed = self.pool.bytes2block_count(data.len());
        let block_size = self.pool.get_block_size();

        let mut blocks = Vec::with_capacity(needed);
        for k in 0..needed {
            let block = frontier.checked_sub(k + 1).ok_or(FsError::FilesystemFull)?;
            if used.contains(&block) {
                return Err(FsError::FilesystemFull);
            }
            blocks.push(block);
        }

        for (i, &block) in blocks.iter().enumerate() {
            let start = i * block_size;
            let end = (start + block_size).min(data.len());
            let mut chunk = data[start..end].to_vec();
            chunk.resize(block_size, 0u8);
            self.pool.write_virtual_block(block, &chunk)?;
        }

        debug!(Logger::global(), "filesystem wrote file"; "filename" => filename, "blocks" => needed);
        table.insert(filename, FileEntry { size: data.len() as u32, blocks: blocks.iter().map(|&b| b as u32).collect() });
        self.write_file_table(&table)
    }

    /// Read a whole file back, truncated to its recorded byte length (the last
    /// data block may be zero-padded past it).
    pub fn read_file(&mut self, filename: &str) -> FsResult<Vec<u8>> {
        let table = self.read_file_table()?;
        let entry = table.get(filename).ok_or_else(|| FsError::FileNotFound(filename.to_string()))?.clone();
        let mut out = Vec::with_capacity(entry.size as usize);
        for &block in &entry.blocks {
            out.extend(self.pool.read_virtual_block(block as usize, None)?);
        }
        out.truncate(entry.size as usize);
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{physical::PhysicalDevice, Device};

    fn online_pd(name: &str, size: usize, bs: usize) -> Box<dyn Device> {
        let mut pd = PhysicalDevice::new(name, size, bs);
        pd.attempt_bring_online();
        Box::new(pd)
    }

    fn small_fs(size: usize, bs: usize) -> FileSystem {
        let pool = StoragePool::new("pool0", vec![online_pd("pd0", size, bs)]).unwrap();
        FileSystem::new(pool).unwrap()
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut fs = small_fs(2048, 16);
        fs.write_file("file1", b"Hello World!").unwrap();
        assert_eq!(fs.read_file("file1").unwrap(), b"Hello World!");
    }

    #[test]
    fn multiple_files_round_trip() {
        let mut fs = small_fs(2048, 16);
        fs.write_file("file1", b"Hello World!").unwrap();
        fs.write_file("file2", b"Hello World again!").unwrap();
        fs.write_file("file3", b"Hello World a third time!").unwrap();
        assert_eq!(fs.read_file("file1").unwrap(), b"Hello World!");
        assert_eq!(fs.read_file("file2").unwrap(), b"Hello World again!");
        assert_eq!(fs.read_file("file3").unwrap(), b"Hello World a third time!");
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut fs = small_fs(2048, 16);
        assert_eq!(fs.read_file("nope"), Err(FsError::FileNotFound("nope".to_string())));
    }

    #[test]
    fn filename_over_255_bytes_is_rejected() {
        let mut fs = small_fs(2048, 16);
        let long_name = "a".repeat(256);
        assert_eq!(fs.write_file(&long_name, b"x"), Err(FsError::FilenameTooLong(256)));
    }

    #[test]
    fn running_out_of_space_returns_filesystem_full() {
        // The table's byte size eventually outgrows the shrinking block-number
        // frontier no matter how large the pool, since every write narrows it.
        let mut fs = small_fs(2048, 16);
        let mut last_err = None;
        for i in 0..64 {
            if let Err(e) = fs.write_file(&format!("f{}", i), b"x") {
                last_err = Some(e);
                break;
            }
        }
        assert_eq!(last_err, Some(FsError::FilesystemFull));
    }
}
