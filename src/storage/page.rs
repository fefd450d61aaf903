use crate::common::{BlockId, RecordId, BLOCK_SZ};
use crate::error::{DbError, Result};

const HEADER_SIZE: u16 = 4;

/// A fixed-size byte buffer, the unit of store I/O.
#[derive(Clone)]
pub struct Block {
    id: BlockId,
    data: [u8; BLOCK_SZ],
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            data: [0u8; BLOCK_SZ],
        }
    }

    pub fn from_bytes(id: BlockId, data: [u8; BLOCK_SZ]) -> Self {
        Self { id, data }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn data(&self) -> &[u8; BLOCK_SZ] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; BLOCK_SZ] {
        &mut self.data
    }
}

/// A block interpreted as a directory of variable-length records, modeled
/// after the slotted-page layout of Database System Concepts, fig 10-9.
///
/// Record ids are handed out sequentially starting at 1. Each record has a
/// 4-byte slot at a fixed offset from the start of the block:
///   bytes 0..2   number of records
///   bytes 2..4   offset to the end of free space
///   bytes 4*id .. 4*id+2    size of record `id`
///   bytes 4*id+2 .. 4*id+4  offset of record `id` (0 marks a tombstone)
/// Record data grows down from the top of the block.
pub struct SlottedPage {
    block: Block,
    num_records: u16,
    end_free: u16,
}

impl SlottedPage {
    /// Formats a blank block as an empty page.
    pub fn init(mut block: Block) -> Self {
        let num_records = 0;
        let end_free = (BLOCK_SZ - 1) as u16;
        put_n(&mut block.data, 0, num_records);
        put_n(&mut block.data, 2, end_free);
        Self {
            block,
            num_records,
            end_free,
        }
    }

    /// Interprets an already-formatted block.
    pub fn open(block: Block) -> Self {
        let num_records = get_n(&block.data, 0);
        let end_free = get_n(&block.data, 2);
        Self {
            block,
            num_records,
            end_free,
        }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn block_id(&self) -> BlockId {
        self.block.id
    }

    /// Adds a new record. Returns its id, which stays stable for the life
    /// of the page.
    pub fn add(&mut self, data: &[u8]) -> Result<RecordId> {
        if !self.has_room(data.len() + HEADER_SIZE as usize) {
            return Err(DbError::NoRoom);
        }
        let size = data.len() as u16;
        self.num_records += 1;
        let id = self.num_records;
        self.end_free -= size;
        let loc = self.end_free + 1;
        self.write_page_header();
        self.write_slot(id, size, loc);
        self.block.data[loc as usize..(loc + size) as usize].copy_from_slice(data);
        Ok(id)
    }

    /// Returns the record's bytes, borrowed from the page, or `None` for a
    /// tombstone or an id that was never issued.
    pub fn get(&self, id: RecordId) -> Option<&[u8]> {
        if id == 0 || id > self.num_records {
            return None;
        }
        let (size, loc) = self.slot(id);
        if loc == 0 {
            return None;
        }
        Some(&self.block.data[loc as usize..(loc + size) as usize])
    }

    /// Replaces the record's bytes. A shrinking put compacts the freed gap;
    /// a growing put slides the region below the record leftward to make
    /// room, failing with `NoRoom` when the extra bytes do not fit.
    pub fn put(&mut self, id: RecordId, data: &[u8]) -> Result<()> {
        if id == 0 || id > self.num_records {
            return Err(DbError::relation(format!("no record with id {}", id)));
        }
        let (old_size, loc) = self.slot(id);
        if loc == 0 {
            return Err(DbError::relation(format!("record {} has been deleted", id)));
        }
        let new_size = data.len() as u16;
        if new_size > old_size {
            let extra = new_size - old_size;
            if !self.has_room(extra as usize) {
                return Err(DbError::NoRoom);
            }
            self.slide(loc, loc - extra);
            let start = (loc - extra) as usize;
            self.block.data[start..start + data.len()].copy_from_slice(data);
        } else {
            self.block.data[loc as usize..loc as usize + data.len()].copy_from_slice(data);
            self.slide(loc + new_size, loc + old_size);
        }
        let (_, new_loc) = self.slot(id);
        self.write_slot(id, new_size, new_loc);
        Ok(())
    }

    /// Tombstones the record and compacts its space. The id is never
    /// reissued, so later record ids keep their meaning.
    pub fn del(&mut self, id: RecordId) {
        if id == 0 || id > self.num_records {
            return;
        }
        let (size, loc) = self.slot(id);
        if loc == 0 {
            return;
        }
        self.write_slot(id, 0, 0);
        self.slide(loc, loc + size);
    }

    /// Ids of all live records, ascending.
    pub fn ids(&self) -> Vec<RecordId> {
        (1..=self.num_records)
            .filter(|id| self.slot(*id).1 != 0)
            .collect()
    }

    pub fn num_records(&self) -> u16 {
        self.num_records
    }

    pub fn end_free(&self) -> u16 {
        self.end_free
    }

    fn has_room(&self, size: usize) -> bool {
        let available =
            self.end_free as i32 - i32::from(HEADER_SIZE) * (self.num_records as i32 + 1);
        size as i32 <= available
    }

    /// Compaction primitive. Slides the byte region between the free space
    /// and `start` by `end - start` and fixes up every slot whose record
    /// moved. A negative shift (end < start) makes room, a positive one
    /// reclaims it; the caller guarantees room for a negative shift.
    fn slide(&mut self, start: u16, end: u16) {
        let shift = end as i32 - start as i32;
        if shift == 0 {
            return;
        }

        let lo = self.end_free as usize + 1;
        let len = start as usize - lo;
        let dst = (lo as i32 + shift) as usize;
        self.block.data.copy_within(lo..lo + len, dst);

        for id in self.ids() {
            let (size, loc) = self.slot(id);
            if loc <= start {
                self.write_slot(id, size, (loc as i32 + shift) as u16);
            }
        }
        self.end_free = (self.end_free as i32 + shift) as u16;
        self.write_page_header();
    }

    fn slot(&self, id: RecordId) -> (u16, u16) {
        let size = get_n(&self.block.data, 4 * id as usize);
        let loc = get_n(&self.block.data, 4 * id as usize + 2);
        (size, loc)
    }

    fn write_slot(&mut self, id: RecordId, size: u16, loc: u16) {
        put_n(&mut self.block.data, 4 * id as usize, size);
        put_n(&mut self.block.data, 4 * id as usize + 2, loc);
    }

    fn write_page_header(&mut self) {
        put_n(&mut self.block.data, 0, self.num_records);
        put_n(&mut self.block.data, 2, self.end_free);
    }
}

fn get_n(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn put_n(data: &mut [u8], offset: usize, n: u16) {
    data[offset..offset + 2].copy_from_slice(&n.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::{Block, SlottedPage, HEADER_SIZE};
    use crate::common::BLOCK_SZ;
    use crate::error::DbError;

    fn empty_page() -> SlottedPage {
        SlottedPage::init(Block::new(1))
    }

    #[test]
    fn add_assigns_sequential_ids() {
        let mut page = empty_page();
        assert_eq!(page.add(b"Hello").unwrap(), 1);
        assert_eq!(page.add(b"Wow").unwrap(), 2);
        assert_eq!(page.get(1).unwrap(), b"Hello");
        assert_eq!(page.get(2).unwrap(), b"Wow");
        assert_eq!(page.ids(), vec![1, 2]);
    }

    #[test]
    fn del_leaves_a_tombstone_and_keeps_other_records() {
        let mut page = empty_page();
        page.add(b"Hello").unwrap();
        page.add(b"Wow").unwrap();
        page.del(1);

        assert_eq!(page.ids(), vec![2]);
        assert!(page.get(1).is_none());
        assert_eq!(page.get(2).unwrap(), b"Wow");

        // the tombstoned id is never reused
        assert_eq!(page.add(b"George").unwrap(), 3);
        assert_eq!(page.get(3).unwrap(), b"George");
    }

    #[test]
    fn growing_put_relocates_without_clobbering_neighbours() {
        let mut page = empty_page();
        page.add(b"Hello").unwrap();
        page.add(b"Wow").unwrap();

        page.put(1, b"Goodbye!").unwrap();
        assert_eq!(page.get(1).unwrap(), b"Goodbye!");
        assert_eq!(page.get(2).unwrap(), b"Wow");
    }

    #[test]
    fn shrinking_put_compacts_the_gap() {
        let mut page = empty_page();
        page.add(b"a long record here").unwrap();
        page.add(b"tail").unwrap();
        let free_before = page.end_free();

        page.put(1, b"short").unwrap();
        assert_eq!(page.get(1).unwrap(), b"short");
        assert_eq!(page.get(2).unwrap(), b"tail");
        assert!(page.end_free() > free_before);
    }

    #[test]
    fn header_and_data_never_overlap() {
        let mut page = empty_page();
        let mut ops = 0;
        while page.add(&[7u8; 16]).is_ok() {
            ops += 1;
        }
        assert!(ops > 0);
        assert!(page.end_free() as i32 >= 4 * (page.num_records() as i32 + 1) - 1);
    }

    #[test]
    fn add_fails_with_no_room_when_full() {
        let mut page = empty_page();
        let big = vec![1u8; BLOCK_SZ - HEADER_SIZE as usize * 2 - 1];
        page.add(&big).unwrap();
        assert!(matches!(page.add(b"x"), Err(DbError::NoRoom)));
    }

    #[test]
    fn page_survives_serialization_round_trip() {
        let mut page = empty_page();
        page.add(b"one").unwrap();
        page.add(b"two").unwrap();
        page.del(1);
        page.add(b"three").unwrap();

        let reopened = SlottedPage::open(page.block().clone());
        assert_eq!(reopened.ids(), vec![2, 3]);
        assert_eq!(reopened.get(2).unwrap(), b"two");
        assert_eq!(reopened.get(3).unwrap(), b"three");
    }

    #[test]
    fn interleaved_ops_return_last_written_bytes() {
        let mut page = empty_page();
        let mut live: Vec<(u16, Vec<u8>)> = Vec::new();
        for i in 0..40u8 {
            let data = vec![i; (i as usize % 17) + 1];
            let id = page.add(&data).unwrap();
            live.push((id, data));
        }
        // shrink every third record, grow every fifth, delete every seventh
        let snapshot = live.clone();
        for (i, (id, data)) in snapshot.iter().enumerate() {
            if i % 7 == 0 {
                page.del(*id);
                live.retain(|(lid, _)| lid != id);
            } else if i % 5 == 0 {
                let mut grown = data.clone();
                grown.extend_from_slice(b"grown");
                page.put(*id, &grown).unwrap();
                live.iter_mut().find(|(lid, _)| lid == id).unwrap().1 = grown;
            } else if i % 3 == 0 {
                let shrunk = vec![data[0]];
                page.put(*id, &shrunk).unwrap();
                live.iter_mut().find(|(lid, _)| lid == id).unwrap().1 = shrunk;
            }
        }
        for (id, data) in &live {
            assert_eq!(page.get(*id).unwrap(), data.as_slice(), "record {}", id);
        }
        assert_eq!(
            page.ids(),
            live.iter().map(|(id, _)| *id).collect::<Vec<_>>()
        );
    }
}
