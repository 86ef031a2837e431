use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::Classification;

const HEADER: [&str; 10] = [
    "transaction_id",
    "date",
    "description",
    "merchant",
    "amount",
    "category",
    "status",
    "confidence",
    "classified_at",
    "notes",
];

/// `<data_dir>/exports/classifications-YYYYMMDD-HHMMSS.csv`
pub fn default_export_path(data_dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    data_dir
        .join("exports")
        .join(format!("classifications-{stamp}.csv"))
}

pub fn write_csv(path: &Path, classifications: &[Classification]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(HEADER)?;
    for c in classifications {
        wtr.write_record([
            c.transaction.id.to_string(),
            c.transaction.date.clone(),
            c.transaction.description.clone(),
            c.transaction.merchant.clone(),
            format!("{:.2}", c.transaction.amount),
            c.category.clone(),
            c.status.as_str().to_string(),
            format!("{:.2}", c.confidence),
            c.classified_at.to_rfc3339(),
            c.notes.clone(),
        ])?;
    }
    wtr.flush()?;
    tracing::info!(
        count = classifications.len(),
        path = %path.display(),
        "classifications exported"
    );
    Ok(())
}
