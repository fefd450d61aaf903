use std::cmp::Ordering;
use std::path::PathBuf;

use log::debug;

use crate::common::{BlockId, Handle, RecordId, BLOCK_SZ};
use crate::error::{DbError, Result};
use crate::row::value::{DataType, Value};
use crate::row::Row;
use crate::storage::file::PagedFile;
use crate::storage::page::Block;
use crate::storage::relation::HeapRelation;

const STAT_BLOCK: BlockId = 1;
const LEAF_TAG: u8 = 1;
const INTERIOR_TAG: u8 = 2;

/// A key is the indexed columns of one row, in index column order. The
/// profile guarantees both sides of a comparison carry the same kinds.
type Key = Vec<Value>;

fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    for (left, right) in a.iter().zip(b) {
        let ord = match (left, right) {
            (Value::Int(l), Value::Int(r)) => l.cmp(r),
            (Value::Text(l), Value::Text(r)) => l.cmp(r),
            (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
            _ => unreachable!(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Result of a recursive insert: either the child absorbed the entry, or
/// it split and hands the new right sibling and its boundary key upward.
enum Insertion {
    None,
    Split { new_block_id: BlockId, boundary: Key },
}

struct Stat {
    root_id: BlockId,
    height: u32,
}

#[derive(Clone)]
struct LeafEntry {
    key: Key,
    handle: Handle,
}

#[derive(Clone)]
struct InteriorEntry {
    key: Key,
    child: BlockId,
}

enum Node {
    Leaf {
        /// forward pointer to the next leaf, 0 for the rightmost
        next: BlockId,
        entries: Vec<LeafEntry>,
    },
    Interior {
        /// child for keys below every partition key
        first: BlockId,
        entries: Vec<InteriorEntry>,
    },
}

/// A unique B+Tree over one or more columns of a heap relation, persisted
/// in its own paged file named `<table>-<index>`. Block 1 holds the stat
/// record (root id, height, key profile); `height == 1` means the root is
/// a leaf. Values are row handles into the base relation.
pub struct BTreeIndex {
    relation: HeapRelation,
    name: String,
    key_columns: Vec<String>,
    key_profile: Vec<DataType>,
    file: PagedFile,
    stat: Option<Stat>,
}

impl BTreeIndex {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        relation: HeapRelation,
        name: &str,
        key_columns: Vec<String>,
        unique: bool,
    ) -> Result<Self> {
        if !unique {
            return Err(DbError::relation("BTree index must have unique key"));
        }
        let mut key_profile = Vec::with_capacity(key_columns.len());
        for column in &key_columns {
            let attribute = relation.attribute_of(column).ok_or_else(|| {
                DbError::relation(format!(
                    "no column {} in table {} to index",
                    column,
                    relation.name()
                ))
            })?;
            match attribute {
                DataType::Int | DataType::Text => key_profile.push(attribute),
                other => {
                    return Err(DbError::relation(format!(
                        "cannot index a {} column",
                        other
                    )))
                }
            }
        }
        let file_name = format!("{}-{}", relation.name(), name);
        let file = PagedFile::new(data_dir, &file_name);
        Ok(Self {
            relation,
            name: name.to_owned(),
            key_columns,
            key_profile,
            file,
            stat: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Creates the index file with an empty leaf root, then indexes every
    /// row already in the base relation.
    pub fn create(&mut self) -> Result<()> {
        self.file.create()?;
        let stat_id = self.file.allocate();
        debug_assert_eq!(stat_id, STAT_BLOCK);
        let root_id = self.file.allocate();
        self.write_node(
            root_id,
            &Node::Leaf {
                next: 0,
                entries: Vec::new(),
            },
        )?;
        self.stat = Some(Stat { root_id, height: 1 });
        self.save_stat()?;

        let handles = self.relation.select()?;
        for handle in handles {
            self.insert(handle)?;
        }
        Ok(())
    }

    pub fn open(&mut self) -> Result<()> {
        if self.stat.is_some() {
            return Ok(());
        }
        self.file.open()?;
        let block = self.file.read_block(STAT_BLOCK)?;
        self.stat = Some(decode_stat(block.data())?);
        Ok(())
    }

    pub fn close(&mut self) {
        self.file.close();
        self.stat = None;
    }

    /// Removes the backing file. The index is unusable afterwards.
    pub fn drop_index(&mut self) -> Result<()> {
        self.file.remove()
    }

    /// Finds the handle stored under the key formed by projecting `key_row`
    /// to the indexed columns. A unique index yields at most one match.
    pub fn lookup(&mut self, key_row: &Row) -> Result<Vec<Handle>> {
        self.open()?;
        let key = self.key_of(key_row)?;
        let stat = self.stat.as_ref().expect("index is open");
        let mut node_id = stat.root_id;
        let mut height = stat.height;
        loop {
            let node = self.read_node(node_id)?;
            match node {
                Node::Leaf { entries, .. } => {
                    debug_assert_eq!(height, 1);
                    return Ok(
                        match entries
                            .binary_search_by(|entry| compare_keys(&entry.key, &key))
                        {
                            Ok(pos) => vec![entries[pos].handle],
                            Err(_) => Vec::new(),
                        },
                    );
                }
                Node::Interior { first, entries } => {
                    node_id = find_child(first, &entries, &key);
                    height -= 1;
                }
            }
        }
    }

    /// Not implemented; lookups are exact-match only.
    pub fn range(&mut self, _min: &Row, _max: &Row) -> Result<Vec<Handle>> {
        Err(DbError::NotImplemented("BTree range query"))
    }

    /// Indexes the row at `handle`, which must already be in the base
    /// relation. Splits propagate upward; a split of the root grows the
    /// tree by one level.
    pub fn insert(&mut self, handle: Handle) -> Result<()> {
        self.open()?;
        let row = self.relation.project(handle)?;
        let key = self.key_of(&row)?;
        let stat = self.stat.as_ref().expect("index is open");
        let (root_id, height) = (stat.root_id, stat.height);

        if let Insertion::Split {
            new_block_id,
            boundary,
        } = self.insert_into(root_id, height, key, handle)?
        {
            let new_root_id = self.file.allocate();
            self.write_node(
                new_root_id,
                &Node::Interior {
                    first: root_id,
                    entries: vec![InteriorEntry {
                        key: boundary,
                        child: new_block_id,
                    }],
                },
            )?;
            let stat = self.stat.as_mut().expect("index is open");
            stat.root_id = new_root_id;
            stat.height += 1;
            let height = stat.height;
            self.save_stat()?;
            debug!(
                "index {}: new root {} at height {}",
                self.name, new_root_id, height
            );
        }
        Ok(())
    }

    /// Unindexes the row at `handle`. The entry is removed from its leaf;
    /// leaves are never merged, so the tree only shrinks on drop.
    pub fn del(&mut self, handle: Handle) -> Result<()> {
        self.open()?;
        let row = self.relation.project(handle)?;
        let key = self.key_of(&row)?;
        let stat = self.stat.as_ref().expect("index is open");
        let mut node_id = stat.root_id;
        let mut height = stat.height;
        while height > 1 {
            match self.read_node(node_id)? {
                Node::Interior { first, entries } => {
                    node_id = find_child(first, &entries, &key);
                    height -= 1;
                }
                Node::Leaf { .. } => unreachable!(),
            }
        }
        if let Node::Leaf { next, mut entries } = self.read_node(node_id)? {
            if let Ok(pos) = entries.binary_search_by(|entry| compare_keys(&entry.key, &key)) {
                if entries[pos].handle == handle {
                    entries.remove(pos);
                    self.write_node(node_id, &Node::Leaf { next, entries })?;
                }
            }
        }
        Ok(())
    }

    fn insert_into(
        &mut self,
        node_id: BlockId,
        height: u32,
        key: Key,
        handle: Handle,
    ) -> Result<Insertion> {
        match self.read_node(node_id)? {
            Node::Leaf { next, mut entries } => {
                debug_assert_eq!(height, 1);
                let pos = match entries
                    .binary_search_by(|entry| compare_keys(&entry.key, &key))
                {
                    Ok(_) => {
                        return Err(DbError::relation(format!(
                            "duplicate key in unique index {}",
                            self.name
                        )))
                    }
                    Err(pos) => pos,
                };
                entries.insert(pos, LeafEntry { key, handle });

                if leaf_size(&entries) <= BLOCK_SZ {
                    self.write_node(node_id, &Node::Leaf { next, entries })?;
                    return Ok(Insertion::None);
                }
                if entries.len() < 2 {
                    // a single entry that overflows a block can never be stored
                    return Err(DbError::TooLarge);
                }

                // split in half; the new right sibling takes the upper keys
                let right_entries = entries.split_off(entries.len() / 2);
                let boundary = right_entries[0].key.clone();
                let new_block_id = self.file.allocate();
                self.write_node(
                    new_block_id,
                    &Node::Leaf {
                        next,
                        entries: right_entries,
                    },
                )?;
                self.write_node(
                    node_id,
                    &Node::Leaf {
                        next: new_block_id,
                        entries,
                    },
                )?;
                debug!("index {}: split leaf {} -> {}", self.name, node_id, new_block_id);
                Ok(Insertion::Split {
                    new_block_id,
                    boundary,
                })
            }
            Node::Interior { first, mut entries } => {
                let child = find_child(first, &entries, &key);
                let insertion = self.insert_into(child, height - 1, key, handle)?;
                let (split_id, boundary) = match insertion {
                    Insertion::None => return Ok(Insertion::None),
                    Insertion::Split {
                        new_block_id,
                        boundary,
                    } => (new_block_id, boundary),
                };

                let pos = entries
                    .binary_search_by(|entry| compare_keys(&entry.key, &boundary))
                    .unwrap_err();
                entries.insert(
                    pos,
                    InteriorEntry {
                        key: boundary,
                        child: split_id,
                    },
                );

                if interior_size(&entries) <= BLOCK_SZ {
                    self.write_node(node_id, &Node::Interior { first, entries })?;
                    return Ok(Insertion::None);
                }

                // the middle key moves up; its child seeds the new sibling
                let mid = entries.len() / 2;
                let mut right_entries = entries.split_off(mid);
                let promoted = right_entries.remove(0);
                let new_block_id = self.file.allocate();
                self.write_node(
                    new_block_id,
                    &Node::Interior {
                        first: promoted.child,
                        entries: right_entries,
                    },
                )?;
                self.write_node(node_id, &Node::Interior { first, entries })?;
                debug!(
                    "index {}: split interior {} -> {}",
                    self.name, node_id, new_block_id
                );
                Ok(Insertion::Split {
                    new_block_id,
                    boundary: promoted.key,
                })
            }
        }
    }

    /// Projects a row to the indexed columns, in index order.
    fn key_of(&self, row: &Row) -> Result<Key> {
        let mut key = Vec::with_capacity(self.key_columns.len());
        for (column, attribute) in self.key_columns.iter().zip(&self.key_profile) {
            let value = row.get(column).ok_or_else(|| {
                DbError::exec(format!("key is missing indexed column {}", column))
            })?;
            if value.data_type() != *attribute {
                return Err(DbError::exec(format!(
                    "key value for column {} is not of type {}",
                    column, attribute
                )));
            }
            key.push(value.clone());
        }
        Ok(key)
    }

    fn read_node(&self, block_id: BlockId) -> Result<Node> {
        let block = self.file.read_block(block_id)?;
        decode_node(block.data(), &self.key_profile)
    }

    fn write_node(&mut self, block_id: BlockId, node: &Node) -> Result<()> {
        let mut block = Block::new(block_id);
        encode_node(node, block.data_mut());
        self.file.write_block(&block)
    }

    fn save_stat(&mut self) -> Result<()> {
        let stat = self.stat.as_ref().expect("index is open");
        let mut block = Block::new(STAT_BLOCK);
        encode_stat(stat, &self.key_profile, block.data_mut());
        self.file.write_block(&block)
    }
}

fn find_child(first: BlockId, entries: &[InteriorEntry], key: &[Value]) -> BlockId {
    // follow the entry with the largest key <= target, or the node's
    // leading pointer when the target sorts below every partition key
    let pos = entries.partition_point(|entry| compare_keys(&entry.key, key) != Ordering::Greater);
    if pos == 0 {
        first
    } else {
        entries[pos - 1].child
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let val = self.data[self.pos];
        self.pos += 1;
        val
    }

    fn u16(&mut self) -> u16 {
        let val = u16::from_be_bytes(self.data[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        val
    }

    fn u32(&mut self) -> u32 {
        let val = u32::from_be_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        val
    }

    fn bytes(&mut self, len: usize) -> &'a [u8] {
        let val = &self.data[self.pos..self.pos + len];
        self.pos += len;
        val
    }
}

fn encode_key(key: &[Value], out: &mut Vec<u8>) {
    for value in key {
        match value {
            // flip the sign bit so unsigned byte order matches signed order
            Value::Int(val) => out.extend_from_slice(&((*val as u32) ^ 0x8000_0000).to_be_bytes()),
            Value::Text(val) => {
                out.extend_from_slice(&(val.len() as u16).to_be_bytes());
                out.extend_from_slice(val.as_bytes());
            }
            Value::Bool(_) => unreachable!(),
        }
    }
}

fn decode_key(cursor: &mut Cursor, key_profile: &[DataType]) -> Key {
    key_profile
        .iter()
        .map(|attribute| match attribute {
            DataType::Int => Value::Int((cursor.u32() ^ 0x8000_0000) as i32),
            DataType::Text => {
                let len = cursor.u16() as usize;
                Value::Text(String::from_utf8_lossy(cursor.bytes(len)).into_owned())
            }
            _ => unreachable!(),
        })
        .collect()
}

fn key_size(key: &[Value]) -> usize {
    key.iter()
        .map(|value| match value {
            Value::Int(_) => 4,
            Value::Text(val) => 2 + val.len(),
            Value::Bool(_) => unreachable!(),
        })
        .sum()
}

// node layout: tag, next/first pointer, count, then the entries
fn leaf_size(entries: &[LeafEntry]) -> usize {
    7 + entries
        .iter()
        .map(|entry| key_size(&entry.key) + 6)
        .sum::<usize>()
}

fn interior_size(entries: &[InteriorEntry]) -> usize {
    7 + entries
        .iter()
        .map(|entry| key_size(&entry.key) + 4)
        .sum::<usize>()
}

fn encode_node(node: &Node, out: &mut [u8; BLOCK_SZ]) {
    let mut bytes = Vec::with_capacity(BLOCK_SZ);
    match node {
        Node::Leaf { next, entries } => {
            bytes.push(LEAF_TAG);
            bytes.extend_from_slice(&next.to_be_bytes());
            bytes.extend_from_slice(&(entries.len() as u16).to_be_bytes());
            for entry in entries {
                encode_key(&entry.key, &mut bytes);
                let (block_id, record_id) = entry.handle;
                bytes.extend_from_slice(&block_id.to_be_bytes());
                bytes.extend_from_slice(&record_id.to_be_bytes());
            }
        }
        Node::Interior { first, entries } => {
            bytes.push(INTERIOR_TAG);
            bytes.extend_from_slice(&first.to_be_bytes());
            bytes.extend_from_slice(&(entries.len() as u16).to_be_bytes());
            for entry in entries {
                encode_key(&entry.key, &mut bytes);
                bytes.extend_from_slice(&entry.child.to_be_bytes());
            }
        }
    }
    out[..bytes.len()].copy_from_slice(&bytes);
}

fn decode_node(data: &[u8; BLOCK_SZ], key_profile: &[DataType]) -> Result<Node> {
    let mut cursor = Cursor::new(data);
    match cursor.u8() {
        LEAF_TAG => {
            let next = cursor.u32();
            let count = cursor.u16();
            let entries = (0..count)
                .map(|_| {
                    let key = decode_key(&mut cursor, key_profile);
                    let block_id = cursor.u32();
                    let record_id = cursor.u16() as RecordId;
                    LeafEntry {
                        key,
                        handle: (block_id, record_id),
                    }
                })
                .collect();
            Ok(Node::Leaf { next, entries })
        }
        INTERIOR_TAG => {
            let first = cursor.u32();
            let count = cursor.u16();
            let entries = (0..count)
                .map(|_| {
                    let key = decode_key(&mut cursor, key_profile);
                    let child = cursor.u32();
                    InteriorEntry { key, child }
                })
                .collect();
            Ok(Node::Interior { first, entries })
        }
        tag => Err(DbError::relation(format!(
            "unknown BTree node tag {}",
            tag
        ))),
    }
}

fn encode_stat(stat: &Stat, key_profile: &[DataType], out: &mut [u8; BLOCK_SZ]) {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&stat.root_id.to_be_bytes());
    bytes.extend_from_slice(&stat.height.to_be_bytes());
    bytes.extend_from_slice(&(key_profile.len() as u16).to_be_bytes());
    for attribute in key_profile {
        bytes.push(match attribute {
            DataType::Int => 1,
            DataType::Text => 2,
            _ => unreachable!(),
        });
    }
    out[..bytes.len()].copy_from_slice(&bytes);
}

fn decode_stat(data: &[u8; BLOCK_SZ]) -> Result<Stat> {
    let mut cursor = Cursor::new(data);
    let root_id = cursor.u32();
    let height = cursor.u32();
    if root_id == 0 || height == 0 {
        return Err(DbError::relation("BTree stat block is corrupt"));
    }
    // the profile tail is validated but the in-memory profile from the
    // catalog stays authoritative
    let profile_len = cursor.u16();
    for _ in 0..profile_len {
        match cursor.u8() {
            1 | 2 => (),
            tag => {
                return Err(DbError::relation(format!(
                    "unknown key profile tag {}",
                    tag
                )))
            }
        }
    }
    Ok(Stat { root_id, height })
}
