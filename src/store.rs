//! Embedded key-value store backing the dedup gate, like lists and the auth gate.
//!
//! Each logical entity lives in its own redb table. Every operation runs in
//! its own short write or read transaction.

use crate::config::StoreConfig;
use crate::extractor::IncomingUrl;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

const MARKER: &[u8] = b"1";

fn table(name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(name)
}

/// Result of running a batch of URLs through the dedup gate.
#[derive(Debug, Default)]
pub struct Partition {
    pub fresh: Vec<IncomingUrl>,
    pub duplicates: Vec<IncomingUrl>,
}

pub struct Store {
    db: Database,
    url_table: String,
    like_table: String,
    auth_table: String,
}

impl Store {
    /// Open (or create) the store file and make sure every table exists.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let path = Path::new(&config.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;
        let store = Self {
            db,
            url_table: config.url_table.clone(),
            like_table: config.like_table.clone(),
            auth_table: config.auth_table.clone(),
        };

        let txn = store.db.begin_write()?;
        for name in [&store.url_table, &store.like_table, &store.auth_table] {
            txn.open_table(table(name))?;
        }
        txn.commit()?;

        Ok(store)
    }

    /// Split URLs into fresh and already-seen ones, marking the fresh ones as seen.
    ///
    /// Runs in a single write transaction, so the same URL twice in one batch
    /// is fresh only once and concurrent batches cannot both claim a URL.
    pub fn partition(&self, urls: Vec<IncomingUrl>) -> Result<Partition, StoreError> {
        let mut result = Partition::default();

        let txn = self.db.begin_write()?;
        {
            let mut seen = txn.open_table(table(&self.url_table))?;
            for url in urls {
                let key = url.dedup_key();
                let exists = seen.get(key.as_str())?.is_some();
                if exists {
                    result.duplicates.push(url);
                } else {
                    seen.insert(key.as_str(), MARKER)?;
                    result.fresh.push(url);
                }
            }
        }
        txn.commit()?;

        Ok(result)
    }

    /// Record a user's reaction to a message.
    ///
    /// Returns the number of distinct users who reacted and whether this call
    /// added a new one.
    pub fn save_like(
        &self,
        chat_id: i64,
        message_id: i64,
        user_id: i64,
    ) -> Result<(usize, bool), StoreError> {
        let key = format!("chat_{}_msg_{}", chat_id, message_id);

        let txn = self.db.begin_write()?;
        let outcome = {
            let mut likes = txn.open_table(table(&self.like_table))?;
            let mut users: Vec<i64> = match likes.get(key.as_str())? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => Vec::new(),
            };

            if users.contains(&user_id) {
                (users.len(), false)
            } else {
                users.push(user_id);
                let encoded = serde_json::to_vec(&users)?;
                likes.insert(key.as_str(), encoded.as_slice())?;
                (users.len(), true)
            }
        };
        txn.commit()?;

        Ok(outcome)
    }

    /// Users who reacted to a message, in the order they did.
    pub fn likes(&self, chat_id: i64, message_id: i64) -> Result<Vec<i64>, StoreError> {
        let key = format!("chat_{}_msg_{}", chat_id, message_id);
        let txn = self.db.begin_read()?;
        let likes = txn.open_table(table(&self.like_table))?;
        let users = match likes.get(key.as_str())? {
            Some(value) => serde_json::from_slice(value.value())?,
            None => Vec::new(),
        };
        Ok(users)
    }

    pub fn is_authorized(&self, user_id: i64) -> Result<bool, StoreError> {
        let key = user_id.to_string();
        let txn = self.db.begin_read()?;
        let auth = txn.open_table(table(&self.auth_table))?;
        let exists = auth.get(key.as_str())?.is_some();
        Ok(exists)
    }

    pub fn grant(&self, user_id: i64) -> Result<(), StoreError> {
        let key = user_id.to_string();
        let txn = self.db.begin_write()?;
        {
            let mut auth = txn.open_table(table(&self.auth_table))?;
            auth.insert(key.as_str(), MARKER)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn revoke(&self, user_id: i64) -> Result<(), StoreError> {
        let key = user_id.to_string();
        let txn = self.db.begin_write()?;
        {
            let mut auth = txn.open_table(table(&self.auth_table))?;
            auth.remove(key.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }
}
