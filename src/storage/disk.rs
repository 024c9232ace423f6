//! Raw block I/O on table files
//!
//! One file per table, `<dir>/<table>.tbl`, addressed in fixed-size blocks.
//! Reads past the end of a file return zero-filled blocks; writes past the
//! end grow the file.

use super::BlockId;
use crate::{Result, StorageError};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Extension of table files
pub const TABLE_FILE_EXT: &str = "tbl";

pub struct DiskManager {
    dir: PathBuf,
    block_size: usize,
    /// Open handles by table name
    files: Mutex<AHashMap<String, File>>,
}

impl DiskManager {
    /// Open the data directory, creating it if needed
    pub fn new<P: AsRef<Path>>(dir: P, block_size: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            block_size,
            files: Mutex::new(AHashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn path_for(&self, file: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", file, TABLE_FILE_EXT))
    }

    pub fn exists(&self, file: &str) -> bool {
        self.path_for(file).exists()
    }

    /// Create an empty table file. Fails if it already exists.
    pub fn create(&self, file: &str) -> Result<()> {
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(self.path_for(file))
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => StorageError::TableExists(file.to_string()),
                _ => StorageError::Io(e),
            })?;
        self.files.lock().insert(file.to_string(), handle);
        Ok(())
    }

    /// Names of all table files in the directory
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TABLE_FILE_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn with_file<T>(&self, file: &str, f: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        let mut files = self.files.lock();
        if !files.contains_key(file) {
            let handle = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(self.path_for(file))?;
            files.insert(file.to_string(), handle);
        }
        match files.get_mut(file) {
            Some(handle) => f(handle),
            None => Err(StorageError::TableNotFound(file.to_string())),
        }
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.block_size {
            return Err(StorageError::InvalidArgument(format!(
                "buffer of {} bytes, block size is {}",
                len, self.block_size
            )));
        }
        Ok(())
    }

    /// Read block `block` of `file` into `buf`. Missing files and blocks past
    /// the end of the file read as zeros.
    pub fn read_block(&self, file: &str, block: BlockId, buf: &mut [u8]) -> Result<()> {
        self.check_len(buf.len())?;
        if !self.files.lock().contains_key(file) && !self.exists(file) {
            buf.fill(0);
            return Ok(());
        }
        let offset = block * self.block_size as u64;
        self.with_file(file, |handle| {
            let len = handle.metadata()?.len();
            if offset >= len {
                buf.fill(0);
                return Ok(());
            }
            handle.seek(SeekFrom::Start(offset))?;
            let mut filled = 0;
            while filled < buf.len() {
                let n = handle.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf[filled..].fill(0);
            Ok(())
        })
    }

    /// Write a full block image
    pub fn write_block(&self, file: &str, block: BlockId, data: &[u8]) -> Result<()> {
        self.check_len(data.len())?;
        let offset = block * self.block_size as u64;
        self.with_file(file, |handle| {
            handle.seek(SeekFrom::Start(offset))?;
            handle.write_all(data)?;
            Ok(())
        })
    }

    /// Number of whole blocks currently in the file
    pub fn block_count(&self, file: &str) -> Result<u64> {
        if !self.files.lock().contains_key(file) && !self.exists(file) {
            return Ok(0);
        }
        self.with_file(file, |handle| {
            Ok(handle.metadata()?.len() / self.block_size as u64)
        })
    }

    /// Grow the file with zero blocks until it holds at least `blocks` blocks
    pub fn grow_to(&self, file: &str, blocks: u64) -> Result<()> {
        let wanted = blocks * self.block_size as u64;
        self.with_file(file, |handle| {
            if handle.metadata()?.len() < wanted {
                handle.set_len(wanted)?;
            }
            Ok(())
        })
    }

    pub fn sync(&self, file: &str) -> Result<()> {
        if let Some(handle) = self.files.lock().get(file) {
            handle.sync_data()?;
        }
        Ok(())
    }

    pub fn sync_all(&self) -> Result<()> {
        for handle in self.files.lock().values() {
            handle.sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_write_blocks() {
        let temp_dir = TempDir::new().unwrap();
        let disk = DiskManager::new(temp_dir.path(), 512).unwrap();
        disk.create("t").unwrap();

        let data = vec![7u8; 512];
        disk.write_block("t", 3, &data).unwrap();
        assert_eq!(disk.block_count("t").unwrap(), 4);

        let mut buf = vec![1u8; 512];
        disk.read_block("t", 3, &mut buf).unwrap();
        assert_eq!(buf, data);

        // Hole before block 3 reads as zeros
        disk.read_block("t", 1, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_read_past_end_is_zeroed() {
        let temp_dir = TempDir::new().unwrap();
        let disk = DiskManager::new(temp_dir.path(), 512).unwrap();

        let mut buf = vec![9u8; 512];
        disk.read_block("missing", 0, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
        assert_eq!(disk.block_count("missing").unwrap(), 0);
        assert!(!disk.exists("missing"));

        disk.create("t").unwrap();
        buf.fill(9);
        disk.read_block("t", 100, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_create_twice_and_grow() {
        let temp_dir = TempDir::new().unwrap();
        let disk = DiskManager::new(temp_dir.path(), 512).unwrap();
        disk.create("t").unwrap();
        assert!(matches!(disk.create("t"), Err(StorageError::TableExists(_))));

        disk.grow_to("t", 6).unwrap();
        assert_eq!(disk.block_count("t").unwrap(), 6);
        disk.grow_to("t", 2).unwrap();
        assert_eq!(disk.block_count("t").unwrap(), 6);
        assert_eq!(disk.list_files().unwrap(), vec!["t".to_string()]);
    }

    #[test]
    fn test_wrong_buffer_size() {
        let temp_dir = TempDir::new().unwrap();
        let disk = DiskManager::new(temp_dir.path(), 512).unwrap();
        let mut buf = vec![0u8; 100];
        assert!(disk.read_block("t", 0, &mut buf).is_err());
        assert!(disk.write_block("t", 0, &buf).is_err());
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let disk = DiskManager::new(temp_dir.path(), 512).unwrap();
            disk.write_block("t", 0, &[42u8; 512]).unwrap();
            disk.sync_all().unwrap();
        }
        let disk = DiskManager::new(temp_dir.path(), 512).unwrap();
        let mut buf = vec![0u8; 512];
        disk.read_block("t", 0, &mut buf).unwrap();
        assert_eq!(buf, vec![42u8; 512]);
    }
}
