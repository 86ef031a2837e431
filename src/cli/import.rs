use std::path::PathBuf;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::importer::import_file;
use crate::logging;
use crate::settings::load_settings;

pub fn run(file: &str) -> Result<()> {
    let file_path = PathBuf::from(file);
    let settings = load_settings();
    logging::init(&PathBuf::from(&settings.data_dir), &settings.log_level)?;
    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;

    let result = import_file(&conn, &file_path)?;

    if result.duplicate_file {
        println!("This file has already been imported (duplicate checksum).");
        return Ok(());
    }

    println!("{} imported, {} skipped (duplicates)", result.imported, result.skipped);
    if result.imported > 0 {
        println!("Run `tally classify` to review them.");
    }
    Ok(())
}
