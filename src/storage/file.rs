use std::fs::{File, OpenOptions};
use std::os::unix::prelude::FileExt;
use std::path::PathBuf;

use crate::common::{BlockId, BLOCK_SZ};
use crate::error::{DbError, Result};
use crate::storage::page::Block;

/// An ordered collection of fixed-size blocks keyed by 1-based block id,
/// stored as consecutive records in a single file (`<name>.db` inside the
/// data directory). Block `n` lives at byte offset `(n - 1) * BLOCK_SZ`;
/// the number of allocated blocks is derived from the file length.
pub struct PagedFile {
    name: String,
    path: PathBuf,
    file: Option<File>,
    last: BlockId,
}

impl PagedFile {
    pub fn new(data_dir: impl Into<PathBuf>, name: &str) -> Self {
        let path = data_dir.into().join(format!("{}.db", name));
        Self {
            name: name.to_owned(),
            path,
            file: None,
            last: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates the backing file, failing if it already exists.
    pub fn create(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&self.path)
            .map_err(|e| DbError::storage(format!("failed to create file {}", self.name), e))?;
        self.file = Some(file);
        self.last = 0;
        Ok(())
    }

    /// Opens the backing file. A no-op when already open. `last` is read
    /// back from the file length.
    pub fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| DbError::storage(format!("failed to open file {}", self.name), e))?;
        let size = file
            .metadata()
            .map_err(|e| DbError::storage(format!("failed to read size of {}", self.name), e))?
            .len();
        if size % BLOCK_SZ as u64 != 0 {
            return Err(DbError::storage(
                format!(
                    "file {} is not a whole number of {} byte blocks",
                    self.name, BLOCK_SZ
                ),
                std::io::Error::from(std::io::ErrorKind::InvalidData),
            ));
        }
        self.last = (size / BLOCK_SZ as u64) as BlockId;
        self.file = Some(file);
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Closes the store and removes the underlying file.
    pub fn remove(&mut self) -> Result<()> {
        self.close();
        std::fs::remove_file(&self.path)
            .map_err(|e| DbError::storage(format!("failed to remove file {}", self.name), e))
    }

    /// Hands out the next block id. The block exists on disk once it is
    /// first written.
    pub fn allocate(&mut self) -> BlockId {
        self.last += 1;
        self.last
    }

    pub fn read_block(&self, block_id: BlockId) -> Result<Block> {
        let file = self.handle()?;
        let mut data = [0u8; BLOCK_SZ];
        let offset = (block_id as u64 - 1) * BLOCK_SZ as u64;
        file.read_exact_at(&mut data, offset).map_err(|e| {
            DbError::storage(
                format!("failed to read block {} of {}", block_id, self.name),
                e,
            )
        })?;
        Ok(Block::from_bytes(block_id, data))
    }

    pub fn write_block(&self, block: &Block) -> Result<()> {
        let file = self.handle()?;
        let offset = (block.id() as u64 - 1) * BLOCK_SZ as u64;
        file.write_all_at(block.data(), offset).map_err(|e| {
            DbError::storage(
                format!("failed to write block {} of {}", block.id(), self.name),
                e,
            )
        })
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        1..=self.last
    }

    pub fn last_block_id(&self) -> BlockId {
        self.last
    }

    fn handle(&self) -> Result<&File> {
        self.file.as_ref().ok_or_else(|| {
            DbError::storage(
                format!("file {} is closed", self.name),
                std::io::Error::from(std::io::ErrorKind::NotConnected),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::PagedFile;
    use crate::storage::page::Block;

    #[test]
    fn blocks_round_trip_through_the_file() {
        let dir = tempdir().unwrap();
        let mut file = PagedFile::new(dir.path(), "blocks");
        file.create().unwrap();

        let id = file.allocate();
        assert_eq!(id, 1);
        let mut block = Block::new(id);
        block.data_mut()[0] = 42;
        block.data_mut()[4095] = 7;
        file.write_block(&block).unwrap();

        let read = file.read_block(id).unwrap();
        assert_eq!(read.data()[0], 42);
        assert_eq!(read.data()[4095], 7);
    }

    #[test]
    fn reopening_recovers_the_block_count() {
        let dir = tempdir().unwrap();
        let mut file = PagedFile::new(dir.path(), "blocks");
        file.create().unwrap();
        for _ in 0..3 {
            let id = file.allocate();
            file.write_block(&Block::new(id)).unwrap();
        }
        file.close();

        let mut reopened = PagedFile::new(dir.path(), "blocks");
        reopened.open().unwrap();
        assert_eq!(reopened.last_block_id(), 3);
        assert_eq!(reopened.block_ids().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn create_refuses_an_existing_file() {
        let dir = tempdir().unwrap();
        let mut file = PagedFile::new(dir.path(), "blocks");
        file.create().unwrap();

        let mut duplicate = PagedFile::new(dir.path(), "blocks");
        assert!(duplicate.create().is_err());
    }

    #[test]
    fn remove_deletes_the_backing_file() {
        let dir = tempdir().unwrap();
        let mut file = PagedFile::new(dir.path(), "blocks");
        file.create().unwrap();
        file.remove().unwrap();

        let mut reopened = PagedFile::new(dir.path(), "blocks");
        assert!(reopened.open().is_err());
    }
}
