use std::path::Path;

use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::error::{Result, TallyError};
use crate::models::ParsedRow;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn parse_amount(raw: &str) -> f64 {
    let s = raw.replace(',', "").replace('"', "").replace('$', "");
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return -inner.trim().parse::<f64>().unwrap_or(0.0);
    }
    s.parse().unwrap_or(0.0)
}

/// Accepts `YYYY-MM-DD` or `MM/DD/YYYY`, returns `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(d) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d.format("%Y-%m-%d").to_string());
    }
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let m: u32 = parts[0].parse().ok()?;
    let d: u32 = parts[1].parse().ok()?;
    let y: i32 = parts[2].parse().ok()?;
    chrono::NaiveDate::from_ymd_opt(y, m, d).map(|dt| dt.format("%Y-%m-%d").to_string())
}

/// Derive a merchant key from a raw bank description: the leading words up
/// to the first store number, reference, or digit run, title-cased.
pub fn merchant_from_description(description: &str) -> String {
    let words: Vec<String> = description
        .split_whitespace()
        .take_while(|w| !w.starts_with('#') && !w.chars().any(|c| c.is_ascii_digit()))
        .take(2)
        .map(|w| {
            let lower = w.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        description.trim().to_string()
    } else {
        words.join(" ")
    }
}

fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

fn is_duplicate_row(conn: &Connection, row: &ParsedRow) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT 1 FROM transactions WHERE date = ?1 AND amount = ?2 AND description = ?3",
    )?;
    Ok(stmt.exists(rusqlite::params![row.date, row.amount, row.description])?)
}

// ---------------------------------------------------------------------------
// CSV parser
// ---------------------------------------------------------------------------

/// Parse a headered CSV with `date`, `description`, `amount` and an optional
/// `merchant` column (header names are matched case-insensitively).
pub fn parse_csv(file_path: &Path) -> Result<Vec<ParsedRow>> {
    let file = std::fs::File::open(file_path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(std::io::BufReader::new(file));

    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let col = |name: &str| headers.iter().position(|h| h == name);
    let (Some(date_idx), Some(desc_idx), Some(amount_idx)) =
        (col("date"), col("description"), col("amount"))
    else {
        return Err(TallyError::UnknownFormat(
            "expected date, description, amount columns".into(),
        ));
    };
    let merchant_idx = col("merchant");

    let mut rows = Vec::new();
    for result in rdr.records() {
        let Ok(record) = result else { continue };
        let Some(date) = record.get(date_idx).and_then(parse_date) else {
            continue;
        };
        let description = record.get(desc_idx).unwrap_or("").trim().to_string();
        if description.is_empty() {
            continue;
        }
        let amount = parse_amount(record.get(amount_idx).unwrap_or("0"));
        let merchant = merchant_idx
            .and_then(|i| record.get(i))
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        rows.push(ParsedRow {
            date,
            description,
            merchant,
            amount,
        });
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub duplicate_file: bool,
}

pub fn import_file(conn: &Connection, file_path: &Path) -> Result<ImportResult> {
    let checksum = compute_checksum(file_path)?;
    {
        let mut stmt = conn.prepare("SELECT 1 FROM imports WHERE checksum = ?1")?;
        if stmt.exists([&checksum])? {
            tracing::info!(file = %file_path.display(), "file already imported");
            return Ok(ImportResult {
                imported: 0,
                skipped: 0,
                duplicate_file: true,
            });
        }
    }

    let parsed_rows = parse_csv(file_path)?;

    let dates: Vec<&str> = parsed_rows.iter().map(|r| r.date.as_str()).collect();
    let min_date = dates.iter().min().copied();
    let max_date = dates.iter().max().copied();
    conn.execute(
        "INSERT INTO imports (filename, record_count, date_range_start, date_range_end, checksum) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            file_path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
            parsed_rows.len() as i64,
            min_date,
            max_date,
            checksum,
        ],
    )?;
    let import_id = conn.last_insert_rowid();

    let mut imported = 0usize;
    let mut skipped = 0usize;
    for row in &parsed_rows {
        if is_duplicate_row(conn, row)? {
            skipped += 1;
            continue;
        }
        let merchant = row
            .merchant
            .clone()
            .unwrap_or_else(|| merchant_from_description(&row.description));
        conn.execute(
            "INSERT INTO transactions (date, description, merchant, amount, import_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![row.date, row.description, merchant, row.amount, import_id],
        )?;
        imported += 1;
    }

    tracing::info!(imported, skipped, file = %file_path.display(), "import finished");
    Ok(ImportResult {
        imported,
        skipped,
        duplicate_file: false,
    })
}
