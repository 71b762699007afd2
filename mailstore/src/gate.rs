//! Execution gate around the SQLite pool
//!
//! Every read or write against the store runs as a unit of work obtained from
//! [`Gate::execute`]. Read-write units are exclusive across the whole store;
//! read-only units share the gate with each other. Each unit runs inside one
//! transaction that commits when the closure returns `Ok` and rolls back on
//! `Err` or unwinding.
//!
//! A thread that already holds the gate gets [`StoreError::NestedUnitOfWork`]
//! instead of blocking on itself. Code that needs to do more work inside an
//! open unit takes the [`Session`] as a parameter.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::FromSql;
use rusqlite::{params_from_iter, Connection, Row, TransactionBehavior};
use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error};

use crate::error::{Result, StoreError};
use crate::query::{Compiled, Delete, Insert, Select, Statement, Update};
use crate::schema;

pub type DbPool = Pool<SqliteConnectionManager>;

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static HELD_GATES: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Marks a gate as held by the current thread until dropped
struct HoldGuard {
    gate_id: u64,
}

impl HoldGuard {
    fn enter(gate_id: u64) -> Result<Self> {
        HELD_GATES.with(|held| {
            let mut held = held.borrow_mut();
            if held.contains(&gate_id) {
                return Err(StoreError::NestedUnitOfWork);
            }
            held.push(gate_id);
            Ok(HoldGuard { gate_id })
        })
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        HELD_GATES.with(|held| held.borrow_mut().retain(|id| *id != self.gate_id));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Counters for observing how the store is used
#[derive(Debug, Default)]
pub struct GateStats {
    read_units: AtomicU64,
    write_units: AtomicU64,
    selects: AtomicU64,
    rollbacks: AtomicU64,
}

/// Point-in-time copy of [`GateStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStatsSnapshot {
    pub read_units: u64,
    pub write_units: u64,
    pub selects: u64,
    pub rollbacks: u64,
}

impl GateStats {
    pub fn snapshot(&self) -> GateStatsSnapshot {
        GateStatsSnapshot {
            read_units: self.read_units.load(Ordering::Relaxed),
            write_units: self.write_units.load(Ordering::Relaxed),
            selects: self.selects.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }
}

pub struct Gate {
    id: u64,
    pool: DbPool,
    lock: RwLock<()>,
    stats: GateStats,
}

impl Gate {
    /// Open (or create) a database file
    pub fn open_file(path: &Path, pool_size: u32) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;",
            )
        });
        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        Self::with_pool(pool)
    }

    /// In-memory database. A single connection, since each SQLite memory
    /// connection is its own database.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager)?;

        Self::with_pool(pool)
    }

    fn with_pool(pool: DbPool) -> Result<Self> {
        {
            let conn = pool.get()?;
            schema::initialize(&conn)?;
        }

        Ok(Self {
            id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
            pool,
            lock: RwLock::new(()),
            stats: GateStats::default(),
        })
    }

    pub fn stats(&self) -> GateStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one unit of work.
    ///
    /// The lock guards no data, so a unit that panicked leaves it usable;
    /// its transaction is rolled back when the connection is dropped.
    ///
    /// The gate lock is taken before a pooled connection so a waiting writer
    /// never sits on the only connection of an in-memory pool.
    pub fn execute<T, F>(&self, access: Access, work: F) -> Result<T>
    where
        F: FnOnce(&Session<'_>) -> Result<T>,
    {
        let _hold = HoldGuard::enter(self.id)?;

        match access {
            Access::ReadOnly => {
                let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
                self.stats.read_units.fetch_add(1, Ordering::Relaxed);
                self.run(access, TransactionBehavior::Deferred, work)
            }
            Access::ReadWrite => {
                let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
                self.stats.write_units.fetch_add(1, Ordering::Relaxed);
                self.run(access, TransactionBehavior::Immediate, work)
            }
        }
    }

    fn run<T, F>(&self, access: Access, behavior: TransactionBehavior, work: F) -> Result<T>
    where
        F: FnOnce(&Session<'_>) -> Result<T>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(behavior)?;

        let session = Session {
            conn: &tx,
            access,
            stats: &self.stats,
        };

        match work(&session) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
                debug!(error = %err, "Rolling back unit of work");
                if let Err(rollback_err) = tx.rollback() {
                    error!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Handle to the store valid for one unit of work.
///
/// Cursors opened through it are closed before each method returns.
pub struct Session<'a> {
    conn: &'a Connection,
    access: Access,
    stats: &'a GateStats,
}

impl<'a> Session<'a> {
    pub fn access(&self) -> Access {
        self.access
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.access {
            Access::ReadWrite => Ok(()),
            Access::ReadOnly => Err(StoreError::ReadOnlyUnitOfWork),
        }
    }

    /// All rows of a select, mapped
    pub fn select<T, F>(&self, select: &Select, mut map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let Compiled { sql, params } = select.compile()?;
        self.stats.selects.fetch_add(1, Ordering::Relaxed);

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| map(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// First row of a select, if any
    pub fn select_row<T, F>(&self, select: &Select, map: F) -> Result<Option<T>>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let Compiled { sql, params } = select.compile()?;
        self.stats.selects.fetch_add(1, Ordering::Relaxed);

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        match rows.next()? {
            Some(row) => Ok(Some(map(row)?)),
            None => Ok(None),
        }
    }

    /// First column of the first row. `None` for no row or a NULL value.
    pub fn select_value<T: FromSql>(&self, select: &Select) -> Result<Option<T>> {
        let value = self.select_row(select, |row| row.get::<_, Option<T>>(0))?;
        Ok(value.flatten())
    }

    /// Insert one row and return its rowid
    pub fn insert(&self, insert: &Insert) -> Result<i64> {
        self.ensure_writable()?;
        let Compiled { sql, params } = insert.compile()?;

        let mut stmt = self.conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(params.iter()))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Returns the number of rows changed
    pub fn update(&self, update: &Update) -> Result<usize> {
        self.ensure_writable()?;
        let Compiled { sql, params } = update.compile()?;

        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    /// Returns the number of rows removed
    pub fn delete(&self, delete: &Delete) -> Result<usize> {
        self.ensure_writable()?;
        let Compiled { sql, params } = delete.compile()?;

        let mut stmt = self.conn.prepare_cached(&sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }
}
