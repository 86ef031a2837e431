use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::db::get_connection;
use crate::error::Result;
use crate::fmt::format_bytes;
use crate::settings::load_settings;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();

    println!("Data dir:   {}", settings.data_dir);
    println!("Database:   {}", db_path.display());

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `tally init` to set up.");
        return Ok(());
    }

    let size = std::fs::metadata(&db_path)?.len();
    println!("DB size:    {}", format_bytes(size));

    let conn = get_connection(&db_path)?;
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    let transactions = count("SELECT count(*) FROM transactions")?;
    let by_ai = count("SELECT count(*) FROM classifications WHERE status = 'classified_by_ai'")?;
    let by_user = count("SELECT count(*) FROM classifications WHERE status = 'user_modified'")?;
    let waiting = transactions - by_ai - by_user;
    let rules = count("SELECT count(*) FROM rules WHERE is_active = 1")?;
    let directions = count("SELECT count(*) FROM merchant_directions")?;

    let mut table = Table::new();
    table.set_header(vec!["", "Count"]);
    table.add_row(vec![Cell::new("Transactions"), Cell::new(transactions)]);
    table.add_row(vec![Cell::new("Accepted suggestions"), Cell::new(by_ai)]);
    table.add_row(vec![Cell::new("Chosen by hand"), Cell::new(by_user)]);
    table.add_row(vec![
        Cell::new("Waiting for review"),
        Cell::new(if waiting > 0 {
            waiting.to_string().yellow().to_string()
        } else {
            waiting.to_string().green().to_string()
        }),
    ]);
    table.add_row(vec![Cell::new("Active rules"), Cell::new(rules)]);
    table.add_row(vec![Cell::new("Known merchant directions"), Cell::new(directions)]);
    println!();
    println!("{table}");
    Ok(())
}
