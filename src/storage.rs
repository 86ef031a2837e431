use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::db;
use crate::error::{Result, TallyError};
use crate::models::{Category, Classification, Direction, Rule, Transaction};

/// Durable storage as seen by the engine and the review session. Calls are
/// individually best-effort; no transaction spans more than one call.
pub trait Storage: Send + Sync {
    fn get_transactions_to_classify(&self) -> Result<Vec<Transaction>>;
    fn get_categories(&self) -> Result<Vec<Category>>;
    fn save_classification(&self, classification: &Classification) -> Result<()>;
    fn delete_classification(&self, transaction_id: i64) -> Result<()>;
    fn list_classifications(&self) -> Result<Vec<Classification>>;
    fn get_rules(&self) -> Result<Vec<Rule>>;
    fn record_rule_hit(&self, rule_id: i64) -> Result<()>;
    fn save_direction(&self, merchant: &str, direction: Direction) -> Result<()>;
    fn get_direction(&self, merchant: &str) -> Result<Option<Direction>>;
}

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = db::get_connection(db_path)?;
        db::init_db(&conn)?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TallyError::Other("storage lock poisoned".into()))
    }
}

impl Storage for SqliteStorage {
    fn get_transactions_to_classify(&self) -> Result<Vec<Transaction>> {
        db::get_transactions_to_classify(&*self.conn()?)
    }

    fn get_categories(&self) -> Result<Vec<Category>> {
        db::get_categories(&*self.conn()?)
    }

    fn save_classification(&self, classification: &Classification) -> Result<()> {
        db::save_classification(&*self.conn()?, classification)
    }

    fn delete_classification(&self, transaction_id: i64) -> Result<()> {
        db::delete_classification(&*self.conn()?, transaction_id)
    }

    fn list_classifications(&self) -> Result<Vec<Classification>> {
        db::list_classifications(&*self.conn()?)
    }

    fn get_rules(&self) -> Result<Vec<Rule>> {
        db::get_rules(&*self.conn()?)
    }

    fn record_rule_hit(&self, rule_id: i64) -> Result<()> {
        db::record_rule_hit(&*self.conn()?, rule_id)
    }

    fn save_direction(&self, merchant: &str, direction: Direction) -> Result<()> {
        db::save_direction(&*self.conn()?, merchant, direction)
    }

    fn get_direction(&self, merchant: &str) -> Result<Option<Direction>> {
        db::get_direction(&*self.conn()?, merchant)
    }
}
