mod catalog;
mod common;
mod error;
mod executor;
mod index;
mod parser;
mod plan;
mod row;
mod selftest;
mod storage;

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use executor::Engine;
use parser::parse_sql;

#[derive(Parser)]
struct Config {
    /// Directory where data is stored
    data: String,
}

fn main() {
    env_logger::init();

    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(&config) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(config: &Config) -> Result<()> {
    let mut engine = Engine::new(&config.data)
        .with_context(|| format!("failed to open database in {}", config.data))?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        print!("SQL> ");
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            // end of input
            break;
        }
        let statement = line.trim();
        if statement.is_empty() {
            continue;
        }

        match statement {
            "quit" => break,
            "test" => match selftest::test_storage(Path::new(&config.data)) {
                Ok(()) => println!("storage test ok"),
                Err(e) => println!("storage test failed: {}", e),
            },
            "test2" | "test queries" => {
                match selftest::test_queries(&mut engine, Path::new(&config.data)) {
                    Ok(()) => println!("query test ok"),
                    Err(e) => println!("query test failed: {}", e),
                }
            }
            sql => match parse_sql(sql).and_then(|statement| engine.execute(statement)) {
                Ok(result) => println!("{}", result),
                Err(e) => println!("Error: {}", e),
            },
        }
    }

    Ok(())
}
