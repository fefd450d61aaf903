use std::path::PathBuf;

use log::debug;

use crate::common::BlockId;
use crate::error::Result;
use crate::storage::file::PagedFile;
use crate::storage::page::{Block, SlottedPage};

/// An append-oriented file of slotted pages. Thin layer over [`PagedFile`]
/// that formats every block as a [`SlottedPage`].
pub struct HeapFile {
    file: PagedFile,
}

impl HeapFile {
    pub fn new(data_dir: impl Into<PathBuf>, name: &str) -> Self {
        Self {
            file: PagedFile::new(data_dir, name),
        }
    }

    pub fn name(&self) -> &str {
        self.file.name()
    }

    /// Creates the backing store exclusively and allocates an empty first
    /// page.
    pub fn create(&mut self) -> Result<()> {
        self.file.create()?;
        self.get_new()?;
        Ok(())
    }

    pub fn open(&mut self) -> Result<()> {
        self.file.open()
    }

    pub fn close(&mut self) {
        self.file.close()
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_closed()
    }

    /// Closes the store and removes the underlying file.
    pub fn remove(&mut self) -> Result<()> {
        self.file.remove()
    }

    /// Allocates the next block, formats it as an empty page, writes it
    /// out and reads it back.
    pub fn get_new(&mut self) -> Result<SlottedPage> {
        let block_id = self.file.allocate();
        let page = SlottedPage::init(Block::new(block_id));
        self.file.write_block(page.block())?;
        debug!("allocated block {} of {}", block_id, self.file.name());
        let block = self.file.read_block(block_id)?;
        Ok(SlottedPage::open(block))
    }

    pub fn get(&self, block_id: BlockId) -> Result<SlottedPage> {
        Ok(SlottedPage::open(self.file.read_block(block_id)?))
    }

    /// Writes a modified page back under its block id.
    pub fn put(&self, page: &SlottedPage) -> Result<()> {
        self.file.write_block(page.block())
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        self.file.block_ids()
    }

    pub fn last_block_id(&self) -> BlockId {
        self.file.last_block_id()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::HeapFile;

    #[test]
    fn create_allocates_the_first_page() {
        let dir = tempdir().unwrap();
        let mut file = HeapFile::new(dir.path(), "heap");
        file.create().unwrap();
        assert_eq!(file.last_block_id(), 1);
        assert_eq!(file.get(1).unwrap().ids(), Vec::<u16>::new());
    }

    #[test]
    fn records_survive_write_and_reopen() {
        let dir = tempdir().unwrap();
        let mut file = HeapFile::new(dir.path(), "heap");
        file.create().unwrap();

        let mut page = file.get(1).unwrap();
        let id = page.add(b"persisted").unwrap();
        file.put(&page).unwrap();
        file.close();

        let mut reopened = HeapFile::new(dir.path(), "heap");
        reopened.open().unwrap();
        assert_eq!(reopened.last_block_id(), 1);
        assert_eq!(reopened.get(1).unwrap().get(id).unwrap(), b"persisted");
    }

    #[test]
    fn block_ids_enumerates_all_pages_in_order() {
        let dir = tempdir().unwrap();
        let mut file = HeapFile::new(dir.path(), "heap");
        file.create().unwrap();
        file.get_new().unwrap();
        file.get_new().unwrap();
        assert_eq!(file.block_ids().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
