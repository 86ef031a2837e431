use std::path::Path;

use chrono::{DateTime, Local};
use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, TallyError};
use crate::models::{Category, Classification, ClassificationStatus, Direction, Rule, Transaction};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    category_type TEXT NOT NULL,
    description TEXT,
    is_active INTEGER DEFAULT 1
);

CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    import_date TEXT DEFAULT (datetime('now')),
    record_count INTEGER,
    date_range_start TEXT,
    date_range_end TEXT,
    checksum TEXT
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    merchant TEXT NOT NULL,
    amount REAL NOT NULL,
    import_id INTEGER,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (import_id) REFERENCES imports(id)
);

CREATE TABLE IF NOT EXISTS classifications (
    transaction_id INTEGER PRIMARY KEY,
    category TEXT NOT NULL,
    status TEXT NOT NULL,
    confidence REAL NOT NULL,
    classified_at TEXT NOT NULL,
    notes TEXT,
    FOREIGN KEY (transaction_id) REFERENCES transactions(id)
);

CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY,
    pattern TEXT NOT NULL,
    match_type TEXT DEFAULT 'contains',
    category_id INTEGER NOT NULL,
    priority INTEGER DEFAULT 0,
    hit_count INTEGER DEFAULT 0,
    is_active INTEGER DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS merchant_directions (
    merchant TEXT PRIMARY KEY,
    direction TEXT NOT NULL,
    confirmed_at TEXT DEFAULT (datetime('now'))
);
";

// (name, category_type, description)
const DEFAULT_CATEGORIES: &[(&str, &str, &str)] = &[
    // Income
    ("Salary", "income", "Paychecks and wages"),
    ("Interest Income", "income", "Bank and savings interest"),
    ("Refunds", "income", "Merchant refunds and reimbursements"),
    ("Other Income", "income", "Anything else coming in"),
    // Expenses
    ("Groceries", "expense", "Supermarkets and food stores"),
    ("Dining", "expense", "Restaurants, cafes, takeout"),
    ("Shopping", "expense", "General retail and online orders"),
    ("Utilities", "expense", "Power, water, internet, phone"),
    ("Transportation", "expense", "Fuel, transit, rideshare, parking"),
    ("Entertainment", "expense", "Streaming, movies, events, games"),
    ("Travel", "expense", "Flights, hotels, rentals"),
    ("Health", "expense", "Pharmacy, doctors, fitness"),
    ("Insurance", "expense", "Home, auto, life insurance"),
    ("Rent / Mortgage", "expense", "Housing payments"),
    ("Subscriptions", "expense", "Software and recurring memberships"),
    ("Bank Fees", "expense", "Account, wire, and overdraft fees"),
    ("Education", "expense", "Courses, books, tuition"),
    ("Gifts & Donations", "expense", "Charity and presents"),
    ("Taxes", "expense", "Income and property taxes"),
    ("Transfer", "transfer", "Moves between own accounts"),
    ("Uncategorized", "expense", "Needs review"),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |row| row.get(0))?;
    if count == 0 {
        for cat in DEFAULT_CATEGORIES {
            conn.execute(
                "INSERT INTO categories (name, category_type, description) VALUES (?1, ?2, ?3)",
                rusqlite::params![cat.0, cat.1, cat.2],
            )?;
        }
    }
    Ok(())
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        date: row.get(1)?,
        description: row.get(2)?,
        merchant: row.get(3)?,
        amount: row.get(4)?,
    })
}

/// Transactions with no classification, or only an `unclassified` one.
pub fn get_transactions_to_classify(conn: &Connection) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.date, t.description, t.merchant, t.amount \
         FROM transactions t LEFT JOIN classifications c ON c.transaction_id = t.id \
         WHERE c.transaction_id IS NULL OR c.status = 'unclassified' \
         ORDER BY t.date, t.id",
    )?;
    let rows = stmt
        .query_map([], row_to_transaction)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, category_type, description FROM categories WHERE is_active = 1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
                category_type: row.get(2)?,
                description: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn save_classification(conn: &Connection, c: &Classification) -> Result<()> {
    conn.execute(
        "INSERT INTO classifications (transaction_id, category, status, confidence, classified_at, notes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(transaction_id) DO UPDATE SET category = excluded.category, status = excluded.status, \
         confidence = excluded.confidence, classified_at = excluded.classified_at, notes = excluded.notes",
        rusqlite::params![
            c.transaction.id,
            c.category,
            c.status.as_str(),
            c.confidence,
            c.classified_at.to_rfc3339(),
            c.notes,
        ],
    )?;
    Ok(())
}

pub fn delete_classification(conn: &Connection, transaction_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM classifications WHERE transaction_id = ?1",
        [transaction_id],
    )?;
    Ok(())
}

pub fn list_classifications(conn: &Connection) -> Result<Vec<Classification>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.date, t.description, t.merchant, t.amount, \
                c.category, c.status, c.confidence, c.classified_at, c.notes \
         FROM classifications c JOIN transactions t ON t.id = c.transaction_id \
         ORDER BY t.date, t.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let status: String = row.get(6)?;
            let classified_at: String = row.get(8)?;
            Ok(Classification {
                transaction: row_to_transaction(row)?,
                category: row.get(5)?,
                status: ClassificationStatus::parse(&status)
                    .unwrap_or(ClassificationStatus::Unclassified),
                confidence: row.get(7)?,
                classified_at: DateTime::parse_from_rfc3339(&classified_at)
                    .map(|dt| dt.with_timezone(&Local))
                    .unwrap_or_else(|_| Local::now()),
                notes: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_rules(conn: &Connection) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.pattern, c.name, r.match_type, r.priority, r.hit_count, r.is_active \
         FROM rules r JOIN categories c ON c.id = r.category_id \
         WHERE r.is_active = 1 ORDER BY r.priority DESC, r.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Rule {
                id: row.get(0)?,
                pattern: row.get(1)?,
                category: row.get(2)?,
                match_type: row.get(3)?,
                priority: row.get(4)?,
                hit_count: row.get(5)?,
                is_active: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn add_rule(
    conn: &Connection,
    pattern: &str,
    category_name: &str,
    match_type: &str,
    priority: i64,
) -> Result<i64> {
    if !matches!(match_type, "contains" | "starts_with" | "regex") {
        return Err(TallyError::UnknownFormat(match_type.to_string()));
    }
    let category_id: i64 = conn
        .query_row(
            "SELECT id FROM categories WHERE name = ?1",
            [category_name],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| TallyError::UnknownCategory(category_name.to_string()))?;
    conn.execute(
        "INSERT INTO rules (pattern, match_type, category_id, priority) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![pattern, match_type, category_id, priority],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn record_rule_hit(conn: &Connection, rule_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE rules SET hit_count = hit_count + 1 WHERE id = ?1",
        [rule_id],
    )?;
    Ok(())
}

pub fn save_direction(conn: &Connection, merchant: &str, direction: Direction) -> Result<()> {
    conn.execute(
        "INSERT INTO merchant_directions (merchant, direction) VALUES (?1, ?2) \
         ON CONFLICT(merchant) DO UPDATE SET direction = excluded.direction, confirmed_at = datetime('now')",
        rusqlite::params![merchant, direction.as_str()],
    )?;
    Ok(())
}

pub fn get_direction(conn: &Connection, merchant: &str) -> Result<Option<Direction>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT direction FROM merchant_directions WHERE merchant = ?1",
            [merchant],
            |r| r.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|d| match d.as_str() {
        "expense" => Some(Direction::Expense),
        "income" => Some(Direction::Income),
        "transfer" => Some(Direction::Transfer),
        _ => None,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    pub(crate) fn add_txn(
        conn: &Connection,
        description: &str,
        merchant: &str,
        amount: f64,
    ) -> i64 {
        conn.execute(
            "INSERT INTO transactions (date, description, merchant, amount) VALUES ('2025-01-15', ?1, ?2, ?3)",
            rusqlite::params![description, merchant, amount],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn load_txn(conn: &Connection, id: i64) -> Transaction {
        conn.query_row(
            "SELECT id, date, description, merchant, amount FROM transactions WHERE id = ?1",
            [id],
            row_to_transaction,
        )
        .unwrap()
    }

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &[
            "categories",
            "transactions",
            "classifications",
            "rules",
            "imports",
            "merchant_directions",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM categories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, DEFAULT_CATEGORIES.len());
    }

    #[test]
    fn test_entertainment_has_id_ten() {
        let (_dir, conn) = test_db();
        let cats = get_categories(&conn).unwrap();
        let ent = cats.iter().find(|c| c.id == 10).unwrap();
        assert_eq!(ent.name, "Entertainment");
    }

    #[test]
    fn test_classified_transactions_leave_queue() {
        let (_dir, conn) = test_db();
        let a = add_txn(&conn, "WALMART #1", "Walmart", -20.0);
        let b = add_txn(&conn, "TARGET #9", "Target", -30.0);
        assert_eq!(get_transactions_to_classify(&conn).unwrap().len(), 2);

        let c = Classification::accepted(load_txn(&conn, a), "Groceries", 0.9);
        save_classification(&conn, &c).unwrap();
        let remaining = get_transactions_to_classify(&conn).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);

        // Skipped ones stay in the queue.
        save_classification(&conn, &Classification::skipped(load_txn(&conn, b))).unwrap();
        assert_eq!(get_transactions_to_classify(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_save_overwrites_and_delete_removes() {
        let (_dir, conn) = test_db();
        let id = add_txn(&conn, "NETFLIX.COM", "Netflix", -15.99);
        let txn = load_txn(&conn, id);
        let first = Classification::accepted(txn.clone(), "Subscriptions", 0.7);
        save_classification(&conn, &first).unwrap();
        let second = Classification::custom(txn, "Entertainment", "Custom category");
        save_classification(&conn, &second).unwrap();

        let all = list_classifications(&conn).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].category, "Entertainment");
        assert_eq!(all[0].status, ClassificationStatus::UserModified);
        assert_eq!(all[0].notes, "Custom category");

        delete_classification(&conn, id).unwrap();
        assert!(list_classifications(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_add_rule_validates_inputs() {
        let (_dir, conn) = test_db();
        add_rule(&conn, "WALMART", "Groceries", "contains", 0).unwrap();
        assert!(matches!(
            add_rule(&conn, "X", "Nope", "contains", 0),
            Err(TallyError::UnknownCategory(_))
        ));
        assert!(matches!(
            add_rule(&conn, "X", "Groceries", "fuzzy", 0),
            Err(TallyError::UnknownFormat(_))
        ));
        let rules = get_rules(&conn).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].category, "Groceries");
    }

    #[test]
    fn test_rule_hits_accumulate() {
        let (_dir, conn) = test_db();
        let id = add_rule(&conn, "SHELL", "Transportation", "contains", 0).unwrap();
        record_rule_hit(&conn, id).unwrap();
        record_rule_hit(&conn, id).unwrap();
        assert_eq!(get_rules(&conn).unwrap()[0].hit_count, 2);
    }

    #[test]
    fn test_direction_upsert() {
        let (_dir, conn) = test_db();
        assert_eq!(get_direction(&conn, "Venmo").unwrap(), None);
        save_direction(&conn, "Venmo", Direction::Transfer).unwrap();
        save_direction(&conn, "Venmo", Direction::Income).unwrap();
        assert_eq!(get_direction(&conn, "Venmo").unwrap(), Some(Direction::Income));
    }
}
