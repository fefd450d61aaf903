use std::fmt::{self, Display};
use std::path::PathBuf;

use log::warn;

use crate::catalog::{Catalog, SCHEMA_TABLES};
use crate::common::Handle;
use crate::error::{DbError, Result};
use crate::parser::ast::{BinaryOperator, ColumnDefinition, Expr, Projection, Statement};
use crate::plan::EvalPlan;
use crate::row::value::{DataType, Value};
use crate::row::Row;
use crate::storage::relation::HeapRelation;

/// What a statement executes to: an optional result set plus a one-line
/// message. Rendering is the shell format: header, ruled separator, one
/// line per row, message last.
pub struct QueryResult {
    pub column_names: Option<Vec<String>>,
    pub column_attributes: Option<Vec<DataType>>,
    pub rows: Option<Vec<Row>>,
    pub message: String,
}

impl QueryResult {
    fn message_only(message: impl Into<String>) -> Self {
        Self {
            column_names: None,
            column_attributes: None,
            rows: None,
            message: message.into(),
        }
    }

    fn with_rows(
        column_names: Vec<String>,
        column_attributes: Vec<DataType>,
        rows: Vec<Row>,
    ) -> Self {
        let message = format!("successfully returned {} rows", rows.len());
        Self {
            column_names: Some(column_names),
            column_attributes: Some(column_attributes),
            rows: Some(rows),
            message,
        }
    }
}

impl Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(column_names) = &self.column_names {
            for column_name in column_names {
                write!(f, "{} ", column_name)?;
            }
            writeln!(f)?;
            write!(f, "+")?;
            for _ in column_names {
                write!(f, "----------+")?;
            }
            writeln!(f)?;
            for row in self.rows.iter().flatten() {
                for column_name in column_names {
                    match row.get(column_name) {
                        Some(value) => write!(f, "{} ", value)?,
                        None => write!(f, "??? ")?,
                    }
                }
                writeln!(f)?;
            }
        }
        write!(f, "{}", self.message)
    }
}

fn plural(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

/// Owns the catalog and dispatches parsed statements: DDL maintains the
/// schema relations and index files, DML keeps secondary indices
/// consistent with base tables, SELECT runs a plan.
pub struct Engine {
    catalog: Catalog,
}

impl Engine {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            catalog: Catalog::bootstrap(data_dir)?,
        })
    }

    pub fn execute(&mut self, statement: Statement) -> Result<QueryResult> {
        match statement {
            Statement::CreateTable {
                name,
                if_not_exists,
                columns,
            } => self.create_table(&name, if_not_exists, columns),
            Statement::CreateIndex {
                name,
                table,
                columns,
                index_type,
            } => self.create_index(&name, &table, columns, &index_type),
            Statement::DropTable { name } => self.drop_table(&name),
            Statement::DropIndex { name, table } => self.drop_index(&name, &table),
            Statement::ShowTables => self.show_tables(),
            Statement::ShowColumns { table } => self.show_columns(&table),
            Statement::ShowIndex { table } => self.show_index(&table),
            Statement::Insert {
                table,
                columns,
                values,
            } => self.insert(&table, columns, values),
            Statement::Delete { table, filter } => self.delete(&table, filter),
            Statement::Select {
                projections,
                table,
                filter,
            } => self.select(projections, &table, filter),
        }
    }

    fn create_table(
        &mut self,
        name: &str,
        if_not_exists: bool,
        columns: Vec<ColumnDefinition>,
    ) -> Result<QueryResult> {
        for column in &columns {
            if !matches!(column.data_type, DataType::Int | DataType::Text) {
                return Err(DbError::NotImplemented("DOUBLE columns"));
            }
            if columns
                .iter()
                .filter(|other| other.name == column.name)
                .count()
                > 1
            {
                return Err(DbError::relation(format!(
                    "duplicate column {} in table {}",
                    column.name, name
                )));
            }
        }
        if self.catalog.table_exists(name)? {
            if if_not_exists {
                return Ok(QueryResult::message_only(format!(
                    "table {} already exists",
                    name
                )));
            }
            return Err(DbError::relation(format!("table {} already exists", name)));
        }

        let table_handle = self
            .catalog
            .tables()
            .insert(&Row::new().with("table_name", name))?;
        match self.create_table_body(name, &columns) {
            Ok(()) => Ok(QueryResult::message_only(format!("created {}", name))),
            Err(e) => {
                if self.catalog.tables().del(table_handle).is_err() {
                    warn!("could not undo _tables row for {}", name);
                }
                Err(e)
            }
        }
    }

    fn create_table_body(&mut self, name: &str, columns: &[ColumnDefinition]) -> Result<()> {
        let mut column_handles = Vec::new();
        let result = (|| {
            for column in columns {
                let row = Row::new()
                    .with("table_name", name)
                    .with("column_name", column.name.as_str())
                    .with("data_type", Value::Text(column.data_type.to_string()));
                column_handles.push(self.catalog.columns().insert(&row)?);
            }
            let mut table = self.catalog.get_table(name)?;
            table.create()
        })();

        if let Err(e) = result {
            for handle in column_handles {
                if self.catalog.columns().del(handle).is_err() {
                    warn!("could not undo _columns row for {}", name);
                }
            }
            self.catalog.invalidate_table(name);
            return Err(e);
        }
        Ok(())
    }

    fn create_index(
        &mut self,
        name: &str,
        table: &str,
        columns: Vec<String>,
        index_type: &str,
    ) -> Result<QueryResult> {
        if index_type != "BTREE" {
            return Err(DbError::NotImplemented("HASH index"));
        }
        if !self.catalog.table_exists(table)? {
            return Err(DbError::relation(format!("table {} does not exist", table)));
        }
        if self.catalog.index_exists(table, name)? {
            return Err(DbError::relation(format!(
                "duplicate index {} on table {}",
                name, table
            )));
        }

        let mut index_handles = Vec::new();
        let result = (|| {
            for (seq, column) in columns.iter().enumerate() {
                let row = Row::new()
                    .with("table_name", table)
                    .with("index_name", name)
                    .with("seq_in_index", seq as i32 + 1)
                    .with("column_name", column.as_str())
                    .with("index_type", index_type)
                    .with("is_unique", Value::Bool(index_type == "BTREE"));
                index_handles.push(self.catalog.indices().insert(&row)?);
            }
            let mut index = self.catalog.get_index(table, name)?;
            index.create()
        })();

        if let Err(e) = result {
            for handle in index_handles {
                if self.catalog.indices().del(handle).is_err() {
                    warn!("could not undo _indices row for {}", name);
                }
            }
            self.catalog.invalidate_index(table, name);
            return Err(e);
        }
        Ok(QueryResult::message_only(format!("created index {}", name)))
    }

    fn drop_table(&mut self, name: &str) -> Result<QueryResult> {
        if SCHEMA_TABLES.contains(&name) {
            return Err(DbError::relation("cannot drop a schema table"));
        }
        let mut table = self.catalog.get_table(name)?;

        for index_name in self.catalog.get_index_names(name)? {
            let mut index = self.catalog.get_index(name, &index_name)?;
            index.drop_index()?;
            self.catalog.invalidate_index(name, &index_name);
        }
        let index_filter = Row::new().with("table_name", name);
        for handle in self.catalog.indices().select_where(&index_filter)? {
            self.catalog.indices().del(handle)?;
        }

        let column_filter = Row::new().with("table_name", name);
        for handle in self.catalog.columns().select_where(&column_filter)? {
            self.catalog.columns().del(handle)?;
        }

        table.drop_relation()?;

        let table_filter = Row::new().with("table_name", name);
        for handle in self.catalog.tables().select_where(&table_filter)? {
            self.catalog.tables().del(handle)?;
        }
        self.catalog.invalidate_table(name);

        Ok(QueryResult::message_only(format!("dropped {}", name)))
    }

    fn drop_index(&mut self, name: &str, table: &str) -> Result<QueryResult> {
        if !self.catalog.index_exists(table, name)? {
            return Err(DbError::relation(format!(
                "no index {} on table {}",
                name, table
            )));
        }
        let mut index = self.catalog.get_index(table, name)?;
        index.drop_index()?;

        let filter = Row::new()
            .with("table_name", table)
            .with("index_name", name);
        for handle in self.catalog.indices().select_where(&filter)? {
            self.catalog.indices().del(handle)?;
        }
        self.catalog.invalidate_index(table, name);

        Ok(QueryResult::message_only(format!(
            "dropped index {} from {}",
            name, table
        )))
    }

    fn show_tables(&mut self) -> Result<QueryResult> {
        let column_names = vec!["table_name".to_owned()];
        let mut rows = Vec::new();
        for handle in self.catalog.tables().select()? {
            let row = self.catalog.tables().project(handle)?;
            let table_name = row.get("table_name").expect("catalog row").as_str();
            if !SCHEMA_TABLES.contains(&table_name) {
                rows.push(row);
            }
        }
        Ok(QueryResult::with_rows(
            column_names,
            vec![DataType::Text],
            rows,
        ))
    }

    fn show_columns(&mut self, table: &str) -> Result<QueryResult> {
        let column_names = vec![
            "table_name".to_owned(),
            "column_name".to_owned(),
            "data_type".to_owned(),
        ];
        let filter = Row::new().with("table_name", table);
        let mut rows = Vec::new();
        for handle in self.catalog.columns().select_where(&filter)? {
            rows.push(self.catalog.columns().project(handle)?);
        }
        Ok(QueryResult::with_rows(
            column_names,
            vec![DataType::Text; 3],
            rows,
        ))
    }

    fn show_index(&mut self, table: &str) -> Result<QueryResult> {
        let column_names = vec![
            "table_name".to_owned(),
            "index_name".to_owned(),
            "seq_in_index".to_owned(),
            "column_name".to_owned(),
            "index_type".to_owned(),
            "is_unique".to_owned(),
        ];
        let column_attributes = vec![
            DataType::Text,
            DataType::Text,
            DataType::Int,
            DataType::Text,
            DataType::Text,
            DataType::Boolean,
        ];
        let filter = Row::new().with("table_name", table);
        let mut rows = Vec::new();
        for handle in self.catalog.indices().select_where(&filter)? {
            rows.push(self.catalog.indices().project(handle)?);
        }
        Ok(QueryResult::with_rows(column_names, column_attributes, rows))
    }

    fn insert(
        &mut self,
        table: &str,
        columns: Option<Vec<String>>,
        values: Vec<Expr>,
    ) -> Result<QueryResult> {
        let mut relation = self.catalog.get_table(table)?;
        let target_columns = match columns {
            Some(columns) => {
                for column in &columns {
                    if relation.attribute_of(column).is_none() {
                        return Err(DbError::exec(format!(
                            "unknown column {} in table {}",
                            column, table
                        )));
                    }
                }
                columns
            }
            None => relation.column_names().to_vec(),
        };
        if target_columns.len() != values.len() {
            return Err(DbError::exec(format!(
                "{} columns but {} values",
                target_columns.len(),
                values.len()
            )));
        }

        let mut row = Row::new();
        for (column, expr) in target_columns.iter().zip(values) {
            row.set(column, literal_value(expr)?);
        }
        let handle = relation.insert(&row)?;

        let index_names = self.catalog.get_index_names(table)?;
        let mut touched = Vec::new();
        for index_name in &index_names {
            let mut index = self.catalog.get_index(table, index_name)?;
            if let Err(e) = index.insert(handle) {
                // unwind: drop the entry from every index already written,
                // then the base row, and surface the original error
                for mut index in touched {
                    undo_index_insert(&mut index, handle, table);
                }
                if relation.del(handle).is_err() {
                    warn!("could not undo row insert into {}", table);
                }
                return Err(e);
            }
            touched.push(index);
        }

        let mut message = format!("successfully inserted 1 row into {}", table);
        if !index_names.is_empty() {
            message = format!(
                "{} and {}",
                message,
                plural(index_names.len(), "index", "indices")
            );
        }
        Ok(QueryResult::message_only(message))
    }

    fn delete(&mut self, table: &str, filter: Option<Expr>) -> Result<QueryResult> {
        let relation = self.catalog.get_table(table)?;
        let plan = build_scan_plan(relation, filter)?;
        let mut plan = plan.optimize(&mut self.catalog)?;
        let index_names = self.catalog.get_index_names(table)?;

        let (relation, handles) = plan.pipeline()?;
        for index_name in &index_names {
            let mut index = self.catalog.get_index(table, index_name)?;
            for handle in &handles {
                index.del(*handle)?;
            }
        }
        for handle in &handles {
            relation.del(*handle)?;
        }

        Ok(QueryResult::message_only(format!(
            "successfully deleted {} from {} and {}",
            plural(handles.len(), "row", "rows"),
            table,
            plural(index_names.len(), "index", "indices")
        )))
    }

    fn select(
        &mut self,
        projections: Vec<Projection>,
        table: &str,
        filter: Option<Expr>,
    ) -> Result<QueryResult> {
        let relation = self.catalog.get_table(table)?;

        let mut column_names = Vec::new();
        for projection in projections {
            match projection {
                Projection::Wildcard => {
                    column_names.extend(relation.column_names().iter().cloned())
                }
                Projection::Column(column) => {
                    if relation.attribute_of(&column).is_none() {
                        return Err(DbError::exec(format!(
                            "unknown column {} in table {}",
                            column, table
                        )));
                    }
                    column_names.push(column);
                }
            }
        }
        let column_attributes = column_names
            .iter()
            .map(|column| relation.attribute_of(column).expect("checked column"))
            .collect();

        let scan = build_scan_plan(relation, filter)?;
        let plan = EvalPlan::Project {
            columns: column_names.clone(),
            child: Box::new(scan),
        };
        let mut plan = plan.optimize(&mut self.catalog)?;
        let rows = plan.evaluate()?;

        Ok(QueryResult::with_rows(
            column_names,
            column_attributes,
            rows,
        ))
    }

}

/// A table scan with the WHERE conjunction, if any, layered on top.
fn build_scan_plan(relation: HeapRelation, filter: Option<Expr>) -> Result<EvalPlan> {
    match filter {
        Some(expr) => {
            let filter = extract_conjunction(&expr, &relation)?;
            Ok(EvalPlan::Select {
                filter,
                child: Box::new(EvalPlan::TableScan { relation }),
            })
        }
        None => Ok(EvalPlan::TableScan { relation }),
    }
}

fn undo_index_insert(index: &mut crate::index::btree::BTreeIndex, handle: Handle, table: &str) {
    if index.del(handle).is_err() {
        warn!(
            "could not undo index entry in {} for a row of {}",
            index.name(),
            table
        );
    }
}

/// Converts a literal expression to a typed value. Only `INT` and `TEXT`
/// literals are insertable.
fn literal_value(expr: Expr) -> Result<Value> {
    match expr {
        Expr::Number(number) => number
            .parse::<i32>()
            .map(Value::Int)
            .map_err(|_| DbError::exec(format!("number {} is out of range", number))),
        Expr::String(text) => Ok(Value::Text(text)),
        other => Err(DbError::exec(format!(
            "unsupported literal {:?}, only INT and TEXT values can be inserted",
            other
        ))),
    }
}

/// Flattens a WHERE tree into an equality conjunction: `column = literal`
/// joined by AND, nothing else. Duplicate columns collapse, last writer
/// wins.
fn extract_conjunction(expr: &Expr, relation: &HeapRelation) -> Result<Row> {
    let mut filter = Row::new();
    merge_conjunction(expr, relation, &mut filter)?;
    Ok(filter)
}

fn merge_conjunction(expr: &Expr, relation: &HeapRelation, filter: &mut Row) -> Result<()> {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            merge_conjunction(left, relation, filter)?;
            merge_conjunction(right, relation, filter)
        }
        Expr::Binary {
            left,
            op: BinaryOperator::Eq,
            right,
        } => {
            let column = match left.as_ref() {
                Expr::Identifier(column) => column,
                _ => {
                    return Err(DbError::exec(
                        "unsupported predicate, expected a column on the left of =",
                    ))
                }
            };
            let attribute = relation.attribute_of(column).ok_or_else(|| {
                DbError::exec(format!(
                    "unknown column {} in table {}",
                    column,
                    relation.name()
                ))
            })?;
            let value = match right.as_ref() {
                Expr::Number(number) => number
                    .parse::<i32>()
                    .map(Value::Int)
                    .map_err(|_| DbError::exec(format!("number {} is out of range", number)))?,
                Expr::String(text) => Value::Text(text.clone()),
                Expr::Boolean(b) => Value::Bool(*b),
                _ => {
                    return Err(DbError::exec(
                        "unsupported predicate, expected a literal on the right of =",
                    ))
                }
            };
            if value.data_type() != attribute {
                return Err(DbError::exec(format!(
                    "value for column {} is not of type {}",
                    column, attribute
                )));
            }
            filter.set(column, value);
            Ok(())
        }
        _ => Err(DbError::exec(
            "unsupported predicate, only column = literal comparisons joined by AND are supported",
        )),
    }
}
