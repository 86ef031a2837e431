use std::path::PathBuf;

use crate::error::Result;
use crate::export::{default_export_path, write_csv};
use crate::settings::load_settings;
use crate::storage::{SqliteStorage, Storage};

pub fn run(output: Option<String>) -> Result<()> {
    let settings = load_settings();
    let storage = SqliteStorage::open(&settings.db_path())?;
    let classifications = storage.list_classifications()?;
    if classifications.is_empty() {
        println!("Nothing to export yet.");
        return Ok(());
    }

    let path = match output {
        Some(p) => PathBuf::from(p),
        None => default_export_path(&PathBuf::from(&settings.data_dir)),
    };
    write_csv(&path, &classifications)?;
    println!("Exported {} classifications to {}", classifications.len(), path.display());
    Ok(())
}
