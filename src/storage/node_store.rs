//! Node store - SQLite-backed transactional key-value store for hierarchy nodes
//!
//! Each node is one row keyed by its id, holding the text record produced by
//! [`Node::encode`]. The database is provisioned with a fixed capacity at open
//! time; running past it fails the write with
//! [`StorageError::CapacityExhausted`] instead of growing the file.
//!
//! ```text
//! Build:   IndexWriter ──► NodeStore (read-write) ──► WriteTxn per track
//! Serving: IndexReader ──► ReaderPool (read-only)  ──► ReadTxn per query
//! ```

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::node::{Node, NodeId};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Page size used for new stores
const PAGE_SIZE: u64 = 4096;

/// Idle read-only connections kept around by a [`ReaderPool`]
const MAX_IDLE_READERS: usize = 8;

/// Anything nodes can be loaded from
///
/// Implemented by both transaction kinds so the builder, the writer's purge
/// and the query cache share one loading path.
pub trait NodeSource {
    /// Load a node by id; an absent id is `Ok(None)`
    fn load(&self, id: NodeId) -> StorageResult<Option<Node>>;
}

/// Read-write handle on a node store file
pub struct NodeStore {
    conn: Connection,
    path: PathBuf,
    capacity_bytes: u64,
}

impl NodeStore {
    /// Create or open a node store for writing
    pub fn open(path: &Path, capacity_bytes: u64) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(&format!(
            "
            PRAGMA page_size = {PAGE_SIZE};
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
            "
        ))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                record TEXT NOT NULL
            ) WITHOUT ROWID",
            [],
        )?;

        apply_capacity(&conn, capacity_bytes)?;

        tracing::debug!(path = %path.display(), capacity_bytes, "Opened node store");

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            capacity_bytes,
        })
    }

    /// How long a write waits for another writer before failing
    ///
    /// Partitioned builds share one store; a task blocks here while a peer
    /// commits a track.
    pub fn with_busy_timeout(self, timeout: Duration) -> StorageResult<Self> {
        self.conn.busy_timeout(timeout)?;
        Ok(self)
    }

    /// Begin the single write transaction
    ///
    /// The write lock is taken up front, so a transaction never has to be
    /// upgraded under a concurrent writer.
    pub fn write_txn(&mut self) -> StorageResult<WriteTxn<'_>> {
        let capacity_bytes = self.capacity_bytes;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::from_write(e, capacity_bytes))?;
        Ok(WriteTxn { tx, capacity_bytes })
    }

    /// Begin a read transaction on the write connection
    pub fn read_txn(&self) -> StorageResult<ReadTxn<'_>> {
        ReadTxn::begin(&self.conn)
    }

    /// Number of persisted nodes
    pub fn len(&self) -> StorageResult<u64> {
        count_nodes(&self.conn)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}

/// Exclusive write transaction
///
/// Nothing becomes visible to readers until [`WriteTxn::commit`]; dropping the
/// transaction rolls it back.
pub struct WriteTxn<'a> {
    tx: Transaction<'a>,
    capacity_bytes: u64,
}

impl<'a> WriteTxn<'a> {
    /// Persist a node, replacing any record under the same id
    pub fn put(&self, node: &Node) -> StorageResult<()> {
        let mut stmt = self
            .tx
            .prepare_cached("INSERT OR REPLACE INTO nodes (id, record) VALUES (?1, ?2)")?;
        stmt.execute(params![node.id.to_string(), node.encode()])
            .map_err(|e| StorageError::from_write(e, self.capacity_bytes))?;
        Ok(())
    }

    pub fn get(&self, id: NodeId) -> StorageResult<Option<Node>> {
        load_node(&self.tx, id)
    }

    /// Remove a node; returns whether it existed
    pub fn delete(&self, id: NodeId) -> StorageResult<bool> {
        let mut stmt = self.tx.prepare_cached("DELETE FROM nodes WHERE id = ?1")?;
        let removed = stmt
            .execute(params![id.to_string()])
            .map_err(|e| StorageError::from_write(e, self.capacity_bytes))?;
        Ok(removed > 0)
    }

    pub fn commit(self) -> StorageResult<()> {
        let capacity_bytes = self.capacity_bytes;
        self.tx
            .commit()
            .map_err(|e| StorageError::from_write(e, capacity_bytes))
    }
}

impl NodeSource for WriteTxn<'_> {
    fn load(&self, id: NodeId) -> StorageResult<Option<Node>> {
        self.get(id)
    }
}

/// Read transaction giving a consistent snapshot for one query
pub struct ReadTxn<'a> {
    tx: Transaction<'a>,
}

impl<'a> ReadTxn<'a> {
    fn begin(conn: &'a Connection) -> StorageResult<Self> {
        Ok(Self {
            tx: conn.unchecked_transaction()?,
        })
    }

    pub fn get(&self, id: NodeId) -> StorageResult<Option<Node>> {
        load_node(&self.tx, id)
    }
}

impl NodeSource for ReadTxn<'_> {
    fn load(&self, id: NodeId) -> StorageResult<Option<Node>> {
        self.get(id)
    }
}

/// Pool of read-only connections for concurrent queries
///
/// Connections are opened on demand and returned to the pool when the
/// [`PooledReader`] guard drops.
pub struct ReaderPool {
    path: PathBuf,
    capacity_bytes: u64,
    idle: Mutex<Vec<Connection>>,
}

impl ReaderPool {
    /// Open a pool over an existing store; fails if the file is missing
    pub fn open(path: &Path, capacity_bytes: u64) -> StorageResult<Self> {
        let pool = Self {
            path: path.to_path_buf(),
            capacity_bytes,
            idle: Mutex::new(Vec::new()),
        };

        // Open one connection eagerly so a missing store surfaces here
        let conn = pool.connect()?;
        pool.release(conn);

        tracing::debug!(path = %path.display(), "Opened read-only node store");
        Ok(pool)
    }

    /// Check out a connection
    pub fn acquire(&self) -> StorageResult<PooledReader<'_>> {
        let reused = match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(_) => None,
        };
        let conn = match reused {
            Some(conn) => conn,
            None => self.connect()?,
        };
        Ok(PooledReader {
            pool: self,
            conn: Some(conn),
        })
    }

    /// Number of idle connections
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn connect(&self) -> StorageResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        apply_capacity(&conn, self.capacity_bytes)?;
        Ok(conn)
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE_READERS {
                idle.push(conn);
            }
        }
    }
}

/// A checked-out read-only connection
pub struct PooledReader<'a> {
    pool: &'a ReaderPool,
    conn: Option<Connection>,
}

impl PooledReader<'_> {
    /// Begin a read transaction on this connection
    pub fn read_txn(&self) -> StorageResult<ReadTxn<'_>> {
        match &self.conn {
            Some(conn) => ReadTxn::begin(conn),
            None => Err(StorageError::Config("reader already released".to_string())),
        }
    }
}

impl Drop for PooledReader<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

fn apply_capacity(conn: &Connection, capacity_bytes: u64) -> StorageResult<()> {
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    let page_size = page_size.max(1) as u64;
    let max_pages = (capacity_bytes / page_size).max(1);

    conn.execute_batch(&format!(
        "
        PRAGMA max_page_count = {max_pages};
        PRAGMA mmap_size = {capacity_bytes};
        "
    ))?;
    Ok(())
}

fn load_node(conn: &Connection, id: NodeId) -> StorageResult<Option<Node>> {
    let mut stmt = conn.prepare_cached("SELECT record FROM nodes WHERE id = ?1")?;
    let record: Option<String> = stmt
        .query_row(params![id.to_string()], |row| row.get(0))
        .optional()?;
    record.map(|r| Node::decode(id, &r)).transpose()
}

fn count_nodes(conn: &Connection) -> StorageResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
    Ok(count as u64)
}
