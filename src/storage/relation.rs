use std::path::PathBuf;

use crate::common::{Handle, BLOCK_SZ};
use crate::error::{DbError, Result};
use crate::row::value::{DataType, Value};
use crate::row::Row;
use crate::storage::heap_file::HeapFile;

/// Row-level access over a heap file: marshals typed rows into records and
/// back, appends with page overflow handling, and scans.
pub struct HeapRelation {
    name: String,
    column_names: Vec<String>,
    column_attributes: Vec<DataType>,
    file: HeapFile,
}

impl HeapRelation {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        name: &str,
        column_names: Vec<String>,
        column_attributes: Vec<DataType>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            column_names,
            column_attributes,
            file: HeapFile::new(data_dir, name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column_attributes(&self) -> &[DataType] {
        &self.column_attributes
    }

    pub fn attribute_of(&self, column: &str) -> Option<DataType> {
        self.column_names
            .iter()
            .position(|name| name == column)
            .map(|idx| self.column_attributes[idx])
    }

    pub fn create(&mut self) -> Result<()> {
        self.file.create()
    }

    pub fn create_if_not_exists(&mut self) -> Result<()> {
        if self.open().is_ok() {
            return Ok(());
        }
        self.create()
    }

    pub fn open(&mut self) -> Result<()> {
        self.file.open()
    }

    pub fn close(&mut self) {
        self.file.close()
    }

    /// Closes the relation and removes its backing file. The relation is
    /// unusable afterwards.
    pub fn drop_relation(&mut self) -> Result<()> {
        self.file.remove()
    }

    /// Validates and appends a row. Returns the handle of the new record.
    pub fn insert(&mut self, row: &Row) -> Result<Handle> {
        self.open()?;
        let full_row = self.validate(row)?;
        self.append(&full_row)
    }

    /// Reserved.
    pub fn update(&mut self, _handle: Handle, _new_values: &Row) -> Result<()> {
        Err(DbError::NotImplemented("UPDATE"))
    }

    pub fn del(&mut self, handle: Handle) -> Result<()> {
        self.open()?;
        let (block_id, record_id) = handle;
        let mut page = self.file.get(block_id)?;
        page.del(record_id);
        self.file.put(&page)
    }

    /// Handles of every live row.
    pub fn select(&mut self) -> Result<Vec<Handle>> {
        self.open()?;
        let mut handles = Vec::new();
        for block_id in self.file.block_ids() {
            let page = self.file.get(block_id)?;
            for record_id in page.ids() {
                handles.push((block_id, record_id));
            }
        }
        Ok(handles)
    }

    /// Handles of rows matching an equality conjunction: every column bound
    /// in `filter` must compare equal.
    pub fn select_where(&mut self, filter: &Row) -> Result<Vec<Handle>> {
        self.open()?;
        let mut handles = Vec::new();
        for block_id in self.file.block_ids() {
            let page = self.file.get(block_id)?;
            for record_id in page.ids() {
                let data = page.get(record_id).expect("live record id");
                let row = self.unmarshal(data)?;
                if filter.iter().all(|(column, value)| row.get(column) == Some(value)) {
                    handles.push((block_id, record_id));
                }
            }
        }
        Ok(handles)
    }

    /// Reads the full row a handle points at.
    pub fn project(&mut self, handle: Handle) -> Result<Row> {
        self.open()?;
        let (block_id, record_id) = handle;
        let page = self.file.get(block_id)?;
        let data = page.get(record_id).ok_or_else(|| {
            DbError::relation(format!(
                "no record {} in block {} of {}",
                record_id, block_id, self.name
            ))
        })?;
        self.unmarshal(data)
    }

    /// Reads a row projected to the named columns. An empty name list
    /// means all columns.
    pub fn project_columns(&mut self, handle: Handle, column_names: &[String]) -> Result<Row> {
        let row = self.project(handle)?;
        if column_names.is_empty() {
            return Ok(row);
        }
        let mut projected = Row::new();
        for column in column_names {
            let value = row.get(column).ok_or_else(|| {
                DbError::exec(format!("unknown column {} in {}", column, self.name))
            })?;
            projected.set(column, value.clone());
        }
        Ok(projected)
    }

    /// Checks a row against the declared columns: every column present and
    /// of the declared kind. Returns the row reordered to declared order.
    pub fn validate(&self, row: &Row) -> Result<Row> {
        let mut full_row = Row::new();
        for (column, attribute) in self.column_names.iter().zip(&self.column_attributes) {
            let value = row.get(column).ok_or_else(|| {
                DbError::relation("don't know how to handle NULLs, defaults, etc.")
            })?;
            if !matches!(
                attribute,
                DataType::Int | DataType::Text | DataType::Boolean
            ) {
                return Err(DbError::relation(
                    "only know how to marshal INT, TEXT, and BOOLEAN",
                ));
            }
            if value.data_type() != *attribute {
                return Err(DbError::relation(format!(
                    "value for column {} is not of type {}",
                    column, attribute
                )));
            }
            full_row.set(column, value.clone());
        }
        Ok(full_row)
    }

    /// Serializes a row: columns in declared order, `INT` as 4 bytes
    /// little-endian, `TEXT` as a u16 length then raw bytes, `BOOLEAN` as
    /// one byte.
    pub fn marshal(&self, row: &Row) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for (column, attribute) in self.column_names.iter().zip(&self.column_attributes) {
            let value = row
                .get(column)
                .ok_or_else(|| DbError::relation(format!("missing column {}", column)))?;
            match attribute {
                DataType::Int => bytes.extend_from_slice(&value.as_i32().to_le_bytes()),
                DataType::Text => {
                    let text = value.as_str().as_bytes();
                    if text.len() > u16::MAX as usize {
                        return Err(DbError::TooLarge);
                    }
                    bytes.extend_from_slice(&(text.len() as u16).to_le_bytes());
                    bytes.extend_from_slice(text);
                }
                DataType::Boolean => bytes.push(value.as_bool() as u8),
                DataType::Double => {
                    return Err(DbError::relation(
                        "only know how to marshal INT, TEXT, and BOOLEAN",
                    ))
                }
            }
        }
        if bytes.len() > BLOCK_SZ {
            return Err(DbError::TooLarge);
        }
        Ok(bytes)
    }

    /// Inverse of [`marshal`](Self::marshal).
    pub fn unmarshal(&self, bytes: &[u8]) -> Result<Row> {
        let mut row = Row::new();
        let mut offset = 0usize;
        for (column, attribute) in self.column_names.iter().zip(&self.column_attributes) {
            let value = match attribute {
                DataType::Int => {
                    let raw: [u8; 4] = bytes
                        .get(offset..offset + 4)
                        .and_then(|s| s.try_into().ok())
                        .ok_or_else(|| self.corrupt(column))?;
                    offset += 4;
                    Value::Int(i32::from_le_bytes(raw))
                }
                DataType::Text => {
                    let raw: [u8; 2] = bytes
                        .get(offset..offset + 2)
                        .and_then(|s| s.try_into().ok())
                        .ok_or_else(|| self.corrupt(column))?;
                    offset += 2;
                    let len = u16::from_le_bytes(raw) as usize;
                    let text = bytes
                        .get(offset..offset + len)
                        .ok_or_else(|| self.corrupt(column))?;
                    offset += len;
                    Value::Text(String::from_utf8_lossy(text).into_owned())
                }
                DataType::Boolean => {
                    let byte = bytes.get(offset).ok_or_else(|| self.corrupt(column))?;
                    offset += 1;
                    Value::Bool(*byte != 0)
                }
                DataType::Double => {
                    return Err(DbError::relation(
                        "only know how to marshal INT, TEXT, and BOOLEAN",
                    ))
                }
            };
            row.set(column, value);
        }
        Ok(row)
    }

    fn corrupt(&self, column: &str) -> DbError {
        DbError::relation(format!(
            "record in {} is truncated at column {}",
            self.name, column
        ))
    }

    /// Appends a validated row: tries the last page, allocates a fresh one
    /// on `NoRoom`. A row that does not fit in a fresh page is `TooLarge`.
    fn append(&mut self, row: &Row) -> Result<Handle> {
        let data = self.marshal(row)?;
        let mut page = self.file.get(self.file.last_block_id())?;
        let record_id = match page.add(&data) {
            Ok(record_id) => record_id,
            Err(DbError::NoRoom) => {
                page = self.file.get_new()?;
                match page.add(&data) {
                    Ok(record_id) => record_id,
                    Err(DbError::NoRoom) => return Err(DbError::TooLarge),
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };
        self.file.put(&page)?;
        Ok((self.file.last_block_id(), record_id))
    }
}

#[cfg(test)]
mod tests {
    use rand::distributions::{Alphanumeric, DistString};
    use rand::Rng;
    use tempfile::tempdir;

    use super::HeapRelation;
    use crate::error::DbError;
    use crate::row::value::DataType;
    use crate::row::Row;

    fn test_relation(dir: &std::path::Path) -> HeapRelation {
        HeapRelation::new(
            dir,
            "things",
            vec!["id".to_owned(), "data".to_owned()],
            vec![DataType::Int, DataType::Text],
        )
    }

    #[test]
    fn rows_round_trip_through_marshalling() {
        let dir = tempdir().unwrap();
        let relation = test_relation(dir.path());

        let row = Row::new().with("id", 12).with("data", "Hello!");
        let bytes = relation.marshal(&row).unwrap();
        assert_eq!(relation.unmarshal(&bytes).unwrap(), row);
    }

    #[test]
    fn insert_select_project() {
        let dir = tempdir().unwrap();
        let mut relation = test_relation(dir.path());
        relation.create().unwrap();

        let row = Row::new().with("id", 12).with("data", "Hello!");
        let handle = relation.insert(&row).unwrap();

        let handles = relation.select().unwrap();
        assert_eq!(handles, vec![handle]);
        assert_eq!(relation.project(handle).unwrap(), row);

        let projected = relation
            .project_columns(handle, &["data".to_owned()])
            .unwrap();
        assert_eq!(projected, Row::new().with("data", "Hello!"));
    }

    #[test]
    fn validate_rejects_missing_columns_and_wrong_kinds() {
        let dir = tempdir().unwrap();
        let relation = test_relation(dir.path());

        let missing = Row::new().with("id", 1);
        assert!(matches!(
            relation.validate(&missing),
            Err(DbError::Relation(_))
        ));

        let wrong_kind = Row::new().with("id", "oops").with("data", "x");
        assert!(matches!(
            relation.validate(&wrong_kind),
            Err(DbError::Relation(_))
        ));
    }

    #[test]
    fn insert_spills_to_new_pages() {
        let dir = tempdir().unwrap();
        let mut relation = test_relation(dir.path());
        relation.create().unwrap();

        let mut rng = rand::thread_rng();
        let mut rows = Vec::new();
        for i in 0..200 {
            let len = rng.gen_range(20..80);
            let text = Alphanumeric.sample_string(&mut rng, len);
            let row = Row::new().with("id", i).with("data", text.as_str());
            relation.insert(&row).unwrap();
            rows.push(row);
        }

        let handles = relation.select().unwrap();
        assert_eq!(handles.len(), rows.len());
        for (handle, expected) in handles.iter().zip(&rows) {
            assert_eq!(&relation.project(*handle).unwrap(), expected);
        }
        // 200 rows of 26..86 bytes cannot fit in one 4 KiB page
        assert!(handles.iter().any(|(block_id, _)| *block_id > 1));
    }

    #[test]
    fn select_where_filters_by_equality_conjunction() {
        let dir = tempdir().unwrap();
        let mut relation = test_relation(dir.path());
        relation.create().unwrap();

        relation
            .insert(&Row::new().with("id", 1).with("data", "one"))
            .unwrap();
        let two = relation
            .insert(&Row::new().with("id", 2).with("data", "two"))
            .unwrap();
        relation
            .insert(&Row::new().with("id", 2).with("data", "deux"))
            .unwrap();

        let filter = Row::new().with("id", 2).with("data", "two");
        assert_eq!(relation.select_where(&filter).unwrap(), vec![two]);

        let no_match = Row::new().with("id", 99).with("data", "nine");
        assert!(relation.select_where(&no_match).unwrap().is_empty());
    }

    #[test]
    fn deleted_rows_disappear_from_scans() {
        let dir = tempdir().unwrap();
        let mut relation = test_relation(dir.path());
        relation.create().unwrap();

        let first = relation
            .insert(&Row::new().with("id", 1).with("data", "one"))
            .unwrap();
        let second = relation
            .insert(&Row::new().with("id", 2).with("data", "two"))
            .unwrap();

        relation.del(first).unwrap();
        assert_eq!(relation.select().unwrap(), vec![second]);
        assert!(relation.project(first).is_err());
    }

    #[test]
    fn oversized_rows_fail_with_too_large() {
        let dir = tempdir().unwrap();
        let mut relation = test_relation(dir.path());
        relation.create().unwrap();

        let huge = "x".repeat(5000);
        let row = Row::new().with("id", 1).with("data", huge.as_str());
        assert!(matches!(relation.insert(&row), Err(DbError::TooLarge)));
    }

    #[test]
    fn update_is_not_implemented() {
        let dir = tempdir().unwrap();
        let mut relation = test_relation(dir.path());
        relation.create().unwrap();
        let handle = relation
            .insert(&Row::new().with("id", 1).with("data", "one"))
            .unwrap();
        assert!(matches!(
            relation.update(handle, &Row::new()),
            Err(DbError::NotImplemented(_))
        ));
    }
}
