//! Ad-hoc drivers behind the shell's `test` and `test2` commands.

use std::path::Path;

use crate::error::{DbError, Result};
use crate::executor::Engine;
use crate::index::btree::BTreeIndex;
use crate::parser::parse_sql;
use crate::row::value::DataType;
use crate::row::Row;
use crate::storage::page::{Block, SlottedPage};
use crate::storage::relation::HeapRelation;

fn check(ok: bool, what: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(DbError::exec(format!("self test failed: {}", what)))
    }
}

/// Storage self-test: slotted page operations, then a heap table
/// create/insert/select/project round trip.
pub fn test_storage(data_dir: &Path) -> Result<()> {
    let mut page = SlottedPage::init(Block::new(1));
    check(page.add(b"Hello")? == 1, "first record id")?;
    check(page.add(b"Wow")? == 2, "second record id")?;
    check(page.get(2) == Some(b"Wow".as_slice()), "get second record")?;
    page.put(1, b"Goodbye")?;
    check(page.get(1) == Some(b"Goodbye".as_slice()), "put first record")?;
    check(page.get(2) == Some(b"Wow".as_slice()), "second record after put")?;
    page.del(1);
    check(page.ids() == vec![2], "ids after delete")?;
    check(page.add(b"George")? == 3, "id after delete")?;
    println!("slotted page ok");

    let columns = vec!["a".to_owned(), "b".to_owned()];
    let attributes = vec![DataType::Int, DataType::Text];
    let mut table = HeapRelation::new(data_dir, "_test_create_drop", columns.clone(), attributes.clone());
    table.create()?;
    println!("create ok");
    table.drop_relation()?;
    println!("drop ok");

    let mut table = HeapRelation::new(data_dir, "_test_data", columns, attributes);
    table.create_if_not_exists()?;
    println!("create_if_not_exists ok");

    let row = Row::new().with("a", 12).with("b", "Hello!");
    table.insert(&row)?;
    println!("insert ok");
    let handles = table.select()?;
    println!("select ok {}", handles.len());
    let result = table.project(handles[0])?;
    check(result == row, "projected row")?;
    println!("project ok");
    table.drop_relation()?;

    Ok(())
}

/// End-to-end suite: the SQL scenarios, then a bulk B+Tree build over
/// 100,002 rows with point lookups.
pub fn test_queries(engine: &mut Engine, data_dir: &Path) -> Result<()> {
    // leftovers from an interrupted run
    let _ = run(engine, "DROP TABLE foo");

    expect_message(engine, "CREATE TABLE foo (id INT, data TEXT)", "created foo")?;
    expect_rows(engine, "SHOW TABLES", 1)?;
    expect_message(
        engine,
        "INSERT INTO foo (id, data) VALUES (1, \"one\")",
        "successfully inserted 1 row into foo",
    )?;
    expect_rows(engine, "SELECT * FROM foo", 1)?;
    expect_message(engine, "CREATE INDEX fx ON foo (id)", "created index fx")?;
    expect_rows(engine, "SHOW INDEX FROM foo", 1)?;
    for statement in [
        "INSERT INTO foo (id, data) VALUES (2, \"Two\")",
        "INSERT INTO foo (id, data) VALUES (3, \"Three\")",
        "INSERT INTO foo (id, data) VALUES (99, \"wowzers\")",
    ] {
        run(engine, statement)?;
    }
    expect_rows(engine, "SELECT * FROM foo WHERE id=3", 1)?;
    expect_rows(engine, "SELECT * FROM foo WHERE id=99 AND data=\"nine\"", 0)?;
    expect_message(
        engine,
        "DELETE FROM foo WHERE id=1",
        "successfully deleted 1 row from foo and 1 index",
    )?;
    expect_rows(engine, "SELECT * FROM foo", 3)?;
    expect_message(engine, "DROP TABLE foo", "dropped foo")?;
    expect_rows(engine, "SHOW TABLES", 0)?;
    expect_rows(engine, "SHOW INDEX FROM foo", 0)?;
    println!("sql scenarios ok");

    test_btree(data_dir)?;
    println!("btree ok");
    Ok(())
}

fn test_btree(data_dir: &Path) -> Result<()> {
    let columns = vec!["a".to_owned(), "b".to_owned()];
    let attributes = vec![DataType::Int, DataType::Int];
    let mut table = HeapRelation::new(data_dir, "_test_btree", columns.clone(), attributes.clone());
    table.create()?;

    let result = (|| {
        table.insert(&Row::new().with("a", 12).with("b", 99))?;
        table.insert(&Row::new().with("a", 88).with("b", 101))?;
        for i in 0..100_000 {
            table.insert(&Row::new().with("a", i + 100).with("b", -i))?;
        }

        let base = HeapRelation::new(data_dir, "_test_btree", columns.clone(), attributes.clone());
        let mut index = BTreeIndex::new(data_dir, base, "fooindex", vec!["a".to_owned()], true)?;
        index.create()?;

        let result = (|| {
            let found = index.lookup(&Row::new().with("a", 12))?;
            check(found.len() == 1, "first lookup")?;
            check(
                table.project(found[0])? == Row::new().with("a", 12).with("b", 99),
                "first lookup row",
            )?;
            let found = index.lookup(&Row::new().with("a", 88))?;
            check(found.len() == 1, "second lookup")?;
            check(index.lookup(&Row::new().with("a", 6))?.is_empty(), "third lookup")?;

            for i in 0..1000 {
                let found = index.lookup(&Row::new().with("a", i + 100))?;
                check(found.len() == 1, "bulk lookup")?;
                let row = table.project(found[0])?;
                check(
                    row == Row::new().with("a", i + 100).with("b", -i),
                    "bulk lookup row",
                )?;
            }
            Ok(())
        })();
        let _ = index.drop_index();
        result
    })();
    let _ = table.drop_relation();
    result
}

fn run(engine: &mut Engine, sql: &str) -> Result<crate::executor::QueryResult> {
    engine.execute(parse_sql(sql)?)
}

fn expect_message(engine: &mut Engine, sql: &str, expected: &str) -> Result<()> {
    let result = run(engine, sql)?;
    check(
        result.message == expected,
        &format!("{} => {:?}, expected {:?}", sql, result.message, expected),
    )
}

fn expect_rows(engine: &mut Engine, sql: &str, expected: usize) -> Result<()> {
    let result = run(engine, sql)?;
    let count = result.rows.as_ref().map(Vec::len).unwrap_or(0);
    check(
        count == expected,
        &format!("{} => {} rows, expected {}", sql, count, expected),
    )
}
