use comfy_table::{Cell, Table};

use crate::db::{add_rule, get_connection, get_rules, init_db};
use crate::error::Result;
use crate::settings::load_settings;

pub fn add(pattern: &str, category: &str, match_type: &str, priority: i64) -> Result<()> {
    let conn = get_connection(&load_settings().db_path())?;
    init_db(&conn)?;
    add_rule(&conn, pattern, category, match_type, priority)?;
    println!("Added rule: '{pattern}' \u{2192} {category}");
    Ok(())
}

pub fn list() -> Result<()> {
    let conn = get_connection(&load_settings().db_path())?;
    init_db(&conn)?;
    let rules = get_rules(&conn)?;
    if rules.is_empty() {
        println!("No rules yet. Add one with: tally rules add <pattern> --category <name>");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Pattern", "Type", "Category", "Priority", "Hits"]);
    for rule in rules {
        table.add_row(vec![
            Cell::new(rule.id.map(|id| id.to_string()).unwrap_or_default()),
            Cell::new(rule.pattern),
            Cell::new(rule.match_type),
            Cell::new(rule.category),
            Cell::new(rule.priority),
            Cell::new(rule.hit_count),
        ]);
    }
    println!("Rules\n{table}");
    Ok(())
}
