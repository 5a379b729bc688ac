//! External interface: a handle over one database file.
//!
//! `open` runs crash recovery before anything else; `execute`/`select` parse,
//! plan, and run statements in an implicit transaction unless the handle has
//! an explicit one open (`BEGIN` ... `COMMIT`/`ROLLBACK`). Closing the handle
//! checkpoints the WAL into the storage file.

use crate::access::value::Value;
use crate::catalog;
use crate::error::{Error, Result};
use crate::executor::{self, ExecutionResult, ResultSet};
use crate::sql::ast::Statement;
use crate::sql::{self, Parser};
use crate::storage::buffer::PageCache;
use crate::storage::disk::{Header, StorageFile};
use crate::storage::page::{PageId, PAGE_SIZE};
use crate::storage::wal::{WalManager, WalOptions};
use crate::transaction::{Transaction, TransactionManager, TransactionManagerOptions};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Page cache capacity in pages.
    pub cache_capacity: usize,
    /// Fsync the WAL on every append. Disable only in tests.
    pub wal_sync: bool,
    /// Checkpoint after a commit once the WAL exceeds this many bytes.
    pub checkpoint_threshold: u64,
    /// How long a writer waits for the writer slot before `Conflict`.
    pub writer_wait: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 64,
            wal_sync: true,
            checkpoint_threshold: 1024 * 1024,
            writer_wait: Duration::from_secs(5),
        }
    }
}

/// A handle over one database file and its WAL sidecar.
pub struct Database {
    manager: TransactionManager,
    session: Mutex<Option<Transaction>>,
    options: DatabaseOptions,
}

impl Database {
    /// Open `path`, creating it when absent, and recover from the WAL.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_options(path, DatabaseOptions::default())
    }

    pub fn open_with_options(path: &Path, options: DatabaseOptions) -> Result<Self> {
        let wal_path = wal_path_for(path);

        let existed = path.exists();
        let mut storage = if existed {
            StorageFile::open(path)?
        } else {
            // A WAL left behind by a deleted database is meaningless.
            if wal_path.exists() {
                log::warn!("removing stale wal {}", wal_path.display());
                std::fs::remove_file(&wal_path)?;
            }
            StorageFile::create(path)?
        };

        let summary = WalManager::recover(&wal_path, &mut storage)?;

        // Validate the header before accepting the file.
        let mut buf = [0u8; PAGE_SIZE];
        storage.read_page(PageId::HEADER, &mut buf)?;
        Header::decode(&buf)?;

        let cache = PageCache::new(storage, options.cache_capacity);
        let wal = WalManager::open(
            &wal_path,
            WalOptions {
                sync_on_write: options.wal_sync,
            },
            summary.next_lsn,
        )?;
        let manager = TransactionManager::new(
            cache,
            wal,
            TransactionManagerOptions {
                writer_wait: options.writer_wait,
            },
        );

        log::info!("opened database {}", path.display());
        Ok(Self {
            manager,
            session: Mutex::new(None),
            options,
        })
    }

    /// Run a mutating statement; returns the number of rows affected.
    /// `BEGIN`/`COMMIT`/`ROLLBACK` manage this handle's explicit transaction.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let statement = Parser::new(sql).parse()?;
        match statement {
            Statement::Begin => {
                self.begin()?;
                return Ok(0);
            }
            Statement::Commit => {
                self.commit()?;
                return Ok(0);
            }
            Statement::Rollback => {
                self.rollback()?;
                return Ok(0);
            }
            _ => {}
        }

        let mut session = self.session.lock();
        if let Some(tx) = session.as_mut() {
            // Statement-level atomicity: a failed statement leaves the
            // transaction exactly as it was, and the caller decides.
            let savepoint = tx.savepoint();
            return match Self::run(statement, params, tx, true) {
                Ok(ExecutionResult::RowsAffected(n)) => Ok(n),
                Ok(ExecutionResult::Rows(_)) => {
                    unreachable!("mutating statements return counts")
                }
                Err(e) => {
                    tx.rollback_to(savepoint);
                    Err(e)
                }
            };
        }
        drop(session);

        // Implicit transaction: begin, run, commit; abort on any error.
        let mut tx = self.manager.begin();
        match Self::run(statement, params, &mut tx, true) {
            Ok(ExecutionResult::RowsAffected(n)) => {
                tx.commit()?;
                self.manager
                    .maybe_checkpoint(self.options.checkpoint_threshold)?;
                Ok(n)
            }
            Ok(ExecutionResult::Rows(_)) => unreachable!("mutating statements return counts"),
            Err(e) => {
                let _ = tx.abort();
                Err(e)
            }
        }
    }

    /// Run a query; returns its rows in key order.
    pub fn select(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let statement = Parser::new(sql).parse()?;

        let mut session = self.session.lock();
        if let Some(tx) = session.as_mut() {
            return match Self::run(statement, params, tx, false)? {
                ExecutionResult::Rows(rows) => Ok(rows),
                ExecutionResult::RowsAffected(_) => unreachable!("queries return rows"),
            };
        }
        drop(session);

        let mut tx = self.manager.begin();
        let result = Self::run(statement, params, &mut tx, false);
        let _ = tx.commit();
        match result? {
            ExecutionResult::Rows(rows) => Ok(rows),
            ExecutionResult::RowsAffected(_) => unreachable!("queries return rows"),
        }
    }

    /// Start an explicit transaction on this handle.
    pub fn begin(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(Error::Schema("a transaction is already open".into()));
        }
        *session = Some(self.manager.begin());
        Ok(())
    }

    /// Commit the explicit transaction.
    pub fn commit(&self) -> Result<()> {
        let tx = self
            .session
            .lock()
            .take()
            .ok_or_else(|| Error::Schema("no open transaction".into()))?;
        tx.commit()?;
        self.manager
            .maybe_checkpoint(self.options.checkpoint_threshold)?;
        Ok(())
    }

    /// Abort the explicit transaction, discarding its changes.
    pub fn rollback(&self) -> Result<()> {
        let tx = self
            .session
            .lock()
            .take()
            .ok_or_else(|| Error::Schema("no open transaction".into()))?;
        tx.abort()
    }

    /// Apply the WAL to the storage file and truncate it, when quiescent.
    pub fn checkpoint(&self) -> Result<bool> {
        self.manager.checkpoint()
    }

    /// Checkpoint and release the handle.
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        if let Some(tx) = self.session.lock().take() {
            log::warn!("closing with an open transaction; rolling it back");
            let _ = tx.abort();
        }
        self.manager.checkpoint()?;
        Ok(())
    }

    fn run(
        statement: Statement,
        params: &[Value],
        tx: &mut Transaction,
        mutating: bool,
    ) -> Result<ExecutionResult> {
        if matches!(
            statement,
            Statement::Begin | Statement::Commit | Statement::Rollback
        ) {
            return Err(Error::Schema(
                "transaction control is not valid inside another statement".into(),
            ));
        }

        let tables = catalog::list_tables(tx)?;
        let plan = sql::plan(statement, params, &tables)?;
        if mutating && !plan.is_mutating() {
            return Err(Error::Schema(
                "SELECT statements must go through select()".into(),
            ));
        }
        if !mutating && plan.is_mutating() {
            return Err(Error::Schema(
                "mutating statements must go through execute()".into(),
            ));
        }
        executor::execute(plan, tx)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best effort checkpoint on drop.
        let _ = self.shutdown();
    }
}

fn wal_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".wal");
    PathBuf::from(os)
}
