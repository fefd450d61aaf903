use std::path::{Path, PathBuf};

use dashmap::DashMap;
use lazy_static::lazy_static;

use crate::error::{DbError, Result};
use crate::index::btree::BTreeIndex;
use crate::row::value::{DataType, Value};
use crate::row::Row;
use crate::storage::relation::HeapRelation;

pub const TABLES_TABLE_NAME: &str = "_tables";
pub const COLUMNS_TABLE_NAME: &str = "_columns";
pub const INDICES_TABLE_NAME: &str = "_indices";

/// The self-describing schema relations, hidden from user-facing listings.
pub const SCHEMA_TABLES: [&str; 3] = [TABLES_TABLE_NAME, COLUMNS_TABLE_NAME, INDICES_TABLE_NAME];

/// Ordered column list of a relation, as stored in `_columns`.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    pub column_names: Vec<String>,
    pub column_attributes: Vec<DataType>,
}

impl TableSchema {
    fn of(columns: &[(&str, DataType)]) -> Self {
        Self {
            column_names: columns.iter().map(|(name, _)| (*name).to_owned()).collect(),
            column_attributes: columns.iter().map(|(_, attribute)| *attribute).collect(),
        }
    }
}

/// Definition of a secondary index, as stored in `_indices`.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexDef {
    pub key_columns: Vec<String>,
    pub index_type: String,
    pub unique: bool,
}

lazy_static! {
    static ref TABLES_SCHEMA: TableSchema = TableSchema::of(&[("table_name", DataType::Text)]);
    static ref COLUMNS_SCHEMA: TableSchema = TableSchema::of(&[
        ("table_name", DataType::Text),
        ("column_name", DataType::Text),
        ("data_type", DataType::Text),
    ]);
    static ref INDICES_SCHEMA: TableSchema = TableSchema::of(&[
        ("table_name", DataType::Text),
        ("index_name", DataType::Text),
        ("seq_in_index", DataType::Int),
        ("column_name", DataType::Text),
        ("index_type", DataType::Text),
        ("is_unique", DataType::Boolean),
    ]);
}

/// The schema relations `_tables`, `_columns` and `_indices`, bootstrapped
/// on top of the heap engine. Their own schemas are const data; the rows
/// describing them are inserted on first use, so the catalog describes
/// itself. Looked-up schemas and index definitions are cached for the life
/// of the process.
pub struct Catalog {
    data_dir: PathBuf,
    tables: HeapRelation,
    columns: HeapRelation,
    indices: HeapRelation,
    schemas: DashMap<String, TableSchema>,
    index_defs: DashMap<(String, String), IndexDef>,
}

impl Catalog {
    /// Opens the schema relations, creating and self-describing them when
    /// absent.
    pub fn bootstrap(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let mut this = Self {
            tables: schema_relation(&data_dir, TABLES_TABLE_NAME, &TABLES_SCHEMA),
            columns: schema_relation(&data_dir, COLUMNS_TABLE_NAME, &COLUMNS_SCHEMA),
            indices: schema_relation(&data_dir, INDICES_TABLE_NAME, &INDICES_SCHEMA),
            schemas: DashMap::new(),
            index_defs: DashMap::new(),
            data_dir,
        };

        this.tables.create_if_not_exists()?;
        this.columns.create_if_not_exists()?;
        this.indices.create_if_not_exists()?;

        for (name, schema) in [
            (TABLES_TABLE_NAME, &*TABLES_SCHEMA),
            (COLUMNS_TABLE_NAME, &*COLUMNS_SCHEMA),
            (INDICES_TABLE_NAME, &*INDICES_SCHEMA),
        ] {
            this.describe_schema_table(name, schema)?;
            this.schemas.insert(name.to_owned(), schema.clone());
        }

        Ok(this)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tables(&mut self) -> &mut HeapRelation {
        &mut self.tables
    }

    pub fn columns(&mut self) -> &mut HeapRelation {
        &mut self.columns
    }

    pub fn indices(&mut self) -> &mut HeapRelation {
        &mut self.indices
    }

    pub fn table_exists(&mut self, table_name: &str) -> Result<bool> {
        let filter = Row::new().with("table_name", table_name);
        Ok(!self.tables.select_where(&filter)?.is_empty())
    }

    /// Builds a relation for a table from its `_columns` rows. The schema
    /// is cached by name.
    pub fn get_table(&mut self, table_name: &str) -> Result<HeapRelation> {
        if let Some(schema) = self.schemas.get(table_name) {
            return Ok(HeapRelation::new(
                &self.data_dir,
                table_name,
                schema.column_names.clone(),
                schema.column_attributes.clone(),
            ));
        }

        let filter = Row::new().with("table_name", table_name);
        let handles = self.columns.select_where(&filter)?;
        if handles.is_empty() {
            return Err(DbError::relation(format!(
                "table {} does not exist",
                table_name
            )));
        }

        let mut column_names = Vec::with_capacity(handles.len());
        let mut column_attributes = Vec::with_capacity(handles.len());
        for handle in handles {
            let row = self.columns.project(handle)?;
            column_names.push(row.get("column_name").expect("catalog row").as_str().to_owned());
            column_attributes.push(row.get("data_type").expect("catalog row").as_str().parse()?);
        }

        let schema = TableSchema {
            column_names: column_names.clone(),
            column_attributes: column_attributes.clone(),
        };
        self.schemas.insert(table_name.to_owned(), schema);
        Ok(HeapRelation::new(
            &self.data_dir,
            table_name,
            column_names,
            column_attributes,
        ))
    }

    /// Distinct index names on a table, in catalog order.
    pub fn get_index_names(&mut self, table_name: &str) -> Result<Vec<String>> {
        let filter = Row::new().with("table_name", table_name);
        let mut names: Vec<String> = Vec::new();
        for handle in self.indices.select_where(&filter)? {
            let row = self.indices.project(handle)?;
            let name = row.get("index_name").expect("catalog row").as_str();
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_owned());
            }
        }
        Ok(names)
    }

    /// Reconstructs an index from its `_indices` rows (key columns ordered
    /// by `seq_in_index`). The definition is cached by `(table, index)`.
    pub fn get_index(&mut self, table_name: &str, index_name: &str) -> Result<BTreeIndex> {
        let cached = self
            .index_defs
            .get(&(table_name.to_owned(), index_name.to_owned()))
            .map(|def| def.clone());
        let def = match cached {
            Some(def) => def,
            None => {
                let def = self.load_index_def(table_name, index_name)?;
                self.index_defs
                    .insert((table_name.to_owned(), index_name.to_owned()), def.clone());
                def
            }
        };

        if def.index_type != "BTREE" {
            return Err(DbError::NotImplemented("HASH index"));
        }
        let relation = self.get_table(table_name)?;
        BTreeIndex::new(
            &self.data_dir,
            relation,
            index_name,
            def.key_columns,
            def.unique,
        )
    }

    pub fn index_exists(&mut self, table_name: &str, index_name: &str) -> Result<bool> {
        let filter = Row::new()
            .with("table_name", table_name)
            .with("index_name", index_name);
        Ok(!self.indices.select_where(&filter)?.is_empty())
    }

    /// Drops a table's cached schema. Used when the table is dropped or a
    /// failed CREATE is compensated.
    pub fn invalidate_table(&self, table_name: &str) {
        self.schemas.remove(table_name);
        self.index_defs.retain(|key, _| key.0 != table_name);
    }

    pub fn invalidate_index(&self, table_name: &str, index_name: &str) {
        self.index_defs
            .remove(&(table_name.to_owned(), index_name.to_owned()));
    }

    fn load_index_def(&mut self, table_name: &str, index_name: &str) -> Result<IndexDef> {
        let filter = Row::new()
            .with("table_name", table_name)
            .with("index_name", index_name);
        let handles = self.indices.select_where(&filter)?;
        if handles.is_empty() {
            return Err(DbError::relation(format!(
                "no index {} on table {}",
                index_name, table_name
            )));
        }

        let mut keyed_columns = Vec::with_capacity(handles.len());
        let mut index_type = String::new();
        let mut unique = false;
        for handle in handles {
            let row = self.indices.project(handle)?;
            keyed_columns.push((
                row.get("seq_in_index").expect("catalog row").as_i32(),
                row.get("column_name").expect("catalog row").as_str().to_owned(),
            ));
            index_type = row.get("index_type").expect("catalog row").as_str().to_owned();
            unique = row.get("is_unique").expect("catalog row").as_bool();
        }
        keyed_columns.sort_by_key(|(seq, _)| *seq);

        Ok(IndexDef {
            key_columns: keyed_columns.into_iter().map(|(_, column)| column).collect(),
            index_type,
            unique,
        })
    }

    /// Inserts the rows describing a schema table into `_tables` and
    /// `_columns`, unless they are already there.
    fn describe_schema_table(&mut self, name: &str, schema: &TableSchema) -> Result<()> {
        let filter = Row::new().with("table_name", name);
        if self.tables.select_where(&filter)?.is_empty() {
            self.tables
                .insert(&Row::new().with("table_name", name))?;
        }
        if self.columns.select_where(&filter)?.is_empty() {
            for (column, attribute) in schema
                .column_names
                .iter()
                .zip(&schema.column_attributes)
            {
                let row = Row::new()
                    .with("table_name", name)
                    .with("column_name", column.as_str())
                    .with("data_type", Value::Text(attribute.to_string()));
                self.columns.insert(&row)?;
            }
        }
        Ok(())
    }
}

fn schema_relation(data_dir: &Path, name: &str, schema: &TableSchema) -> HeapRelation {
    HeapRelation::new(
        data_dir,
        name,
        schema.column_names.clone(),
        schema.column_attributes.clone(),
    )
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{Catalog, COLUMNS_TABLE_NAME, TABLES_TABLE_NAME};
    use crate::error::DbError;
    use crate::row::value::{DataType, Value};
    use crate::row::Row;

    #[test]
    fn bootstrap_describes_itself() {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::bootstrap(dir.path()).unwrap();

        let handles = catalog.tables().select().unwrap();
        let mut names = Vec::new();
        for handle in handles {
            let row = catalog.tables().project(handle).unwrap();
            names.push(row.get("table_name").unwrap().as_str().to_owned());
        }
        assert_eq!(names, vec!["_tables", "_columns", "_indices"]);

        let tables = catalog.get_table(TABLES_TABLE_NAME).unwrap();
        assert_eq!(tables.column_names(), &["table_name".to_owned()]);
        let columns = catalog.get_table(COLUMNS_TABLE_NAME).unwrap();
        assert_eq!(columns.column_attributes(), &[DataType::Text; 3]);
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let dir = tempdir().unwrap();
        {
            let _ = Catalog::bootstrap(dir.path()).unwrap();
        }
        let mut catalog = Catalog::bootstrap(dir.path()).unwrap();
        assert_eq!(catalog.tables().select().unwrap().len(), 3);
        let filter = Row::new().with("table_name", TABLES_TABLE_NAME);
        assert_eq!(catalog.columns().select_where(&filter).unwrap().len(), 1);
    }

    #[test]
    fn get_table_reads_user_schemas_from_columns() {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::bootstrap(dir.path()).unwrap();

        catalog
            .tables()
            .insert(&Row::new().with("table_name", "foo"))
            .unwrap();
        for (column, data_type) in [("id", "INT"), ("data", "TEXT")] {
            catalog
                .columns()
                .insert(
                    &Row::new()
                        .with("table_name", "foo")
                        .with("column_name", column)
                        .with("data_type", data_type),
                )
                .unwrap();
        }

        let foo = catalog.get_table("foo").unwrap();
        assert_eq!(foo.column_names(), &["id".to_owned(), "data".to_owned()]);
        assert_eq!(
            foo.column_attributes(),
            &[DataType::Int, DataType::Text]
        );
    }

    #[test]
    fn missing_table_is_a_relation_error() {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::bootstrap(dir.path()).unwrap();
        assert!(matches!(
            catalog.get_table("nope"),
            Err(DbError::Relation(_))
        ));
    }

    #[test]
    fn index_definitions_are_ordered_by_seq_in_index() {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::bootstrap(dir.path()).unwrap();

        catalog
            .tables()
            .insert(&Row::new().with("table_name", "foo"))
            .unwrap();
        for (column, data_type) in [("a", "INT"), ("b", "INT")] {
            catalog
                .columns()
                .insert(
                    &Row::new()
                        .with("table_name", "foo")
                        .with("column_name", column)
                        .with("data_type", data_type),
                )
                .unwrap();
        }
        // inserted out of order on purpose
        for (seq, column) in [(2, "a"), (1, "b")] {
            catalog
                .indices()
                .insert(
                    &Row::new()
                        .with("table_name", "foo")
                        .with("index_name", "fx")
                        .with("seq_in_index", seq)
                        .with("column_name", column)
                        .with("index_type", "BTREE")
                        .with("is_unique", Value::Bool(true)),
                )
                .unwrap();
        }

        assert_eq!(catalog.get_index_names("foo").unwrap(), vec!["fx"]);
        let index = catalog.get_index("foo", "fx").unwrap();
        assert_eq!(index.key_columns(), &["b".to_owned(), "a".to_owned()]);
    }

    #[test]
    fn missing_index_is_a_relation_error() {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::bootstrap(dir.path()).unwrap();
        assert!(matches!(
            catalog.get_index("foo", "fx"),
            Err(DbError::Relation(_))
        ));
    }
}
