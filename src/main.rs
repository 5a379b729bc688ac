//! quartzdb shell - execute statements against a database file

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use quartzdb::access::value::Value;
use quartzdb::database::Database;
use quartzdb::executor::ResultSet;
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Embedded relational storage engine shell
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file (created when absent)
    file: PathBuf,

    /// Statements to run instead of starting the interactive shell
    #[arg(short, long)]
    execute: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let db = Database::open(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;

    if !args.execute.is_empty() {
        for statement in &args.execute {
            run_statement(&db, statement);
        }
        db.close().context("failed to close the database")?;
        return Ok(());
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("quartzdb> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case(".quit") || line.eq_ignore_ascii_case(".exit") {
            break;
        }
        run_statement(&db, line);
    }

    db.close().context("failed to close the database")?;
    Ok(())
}

fn run_statement(db: &Database, statement: &str) {
    let is_query = statement
        .trim_start()
        .to_ascii_uppercase()
        .starts_with("SELECT");

    let no_params: [Value; 0] = [];
    if is_query {
        match db.select(statement, &no_params) {
            Ok(rows) => print_rows(&rows),
            Err(e) => eprintln!("error: {e}"),
        }
    } else {
        match db.execute(statement, &no_params) {
            Ok(n) => println!("ok ({n} row(s) affected)"),
            Err(e) => eprintln!("error: {e}"),
        }
    }
}

fn print_rows(rows: &ResultSet) {
    if rows.is_empty() {
        println!("(no rows)");
        return;
    }
    println!("{}", rows.columns.join(" | "));
    for row in rows.iter() {
        let rendered: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
        println!("{}", rendered.join(" | "));
    }
    println!("({} row(s))", rows.len());
}
