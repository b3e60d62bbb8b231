//! The on-device store backing all domain and sync-bookkeeping state.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tillpoint_types::{
    ConflictId, MergeRule, QueueConfig, QueueItem, QueueItemId, RecordId, RuleScope, SyncConflict,
    SyncRecord, SyncRecordId, SyncStatus,
};
use tracing::debug;

/// Durable key-indexed storage for domain records and sync bookkeeping,
/// backed by SQLite.
///
/// All access serializes through one connection; each call is a single
/// non-suspending critical section, so read-modify-write sequences that must
/// not lose updates across a suspension point go through [`update_record`].
///
/// [`update_record`]: LocalStore::update_record
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &str) -> StorageResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Open(format!("failed to open local store: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Open(format!("failed to open in-memory store: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                table_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (table_name, record_id)
            );
            CREATE INDEX IF NOT EXISTS idx_records_updated
                ON records (table_name, updated_at);

            CREATE TABLE IF NOT EXISTS sync_records (
                id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sync_records_status
                ON sync_records (status, priority, created_at);

            CREATE TABLE IF NOT EXISTS queues (
                name TEXT PRIMARY KEY,
                config TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS queue_items (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queue_items_queue
                ON queue_items (queue, status);

            CREATE TABLE IF NOT EXISTS conflicts (
                id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                resolved INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conflicts_resolved
                ON conflicts (resolved, table_name);

            CREATE TABLE IF NOT EXISTS merge_rules (
                scope TEXT NOT NULL,
                field TEXT NOT NULL,
                data TEXT NOT NULL,
                UNIQUE (scope, field)
            );

            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| StorageError::Open(format!("failed to init schema: {e}")))?;
        Ok(())
    }

    // ── Domain records ───────────────────────────────────────────

    /// Writes (or overwrites) a domain record.
    pub fn put_record(
        &self,
        table: &str,
        record_id: &RecordId,
        data: &Value,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO records (table_name, record_id, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                table,
                record_id.to_string(),
                serde_json::to_string(data)?,
                updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(())
    }

    /// Reads a domain record.
    pub fn get_record(&self, table: &str, record_id: &RecordId) -> StorageResult<Option<Value>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<String> = conn
            .query_row(
                "SELECT data FROM records WHERE table_name = ?1 AND record_id = ?2",
                params![table, record_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        row.map(|s| serde_json::from_str(&s).map_err(Into::into))
            .transpose()
    }

    /// Deletes a domain record. Returns whether a row existed.
    pub fn delete_record(&self, table: &str, record_id: &RecordId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM records WHERE table_name = ?1 AND record_id = ?2",
            params![table, record_id.to_string()],
        )?;
        Ok(n > 0)
    }

    /// Returns all records in a table.
    pub fn records_in(&self, table: &str) -> StorageResult<Vec<(RecordId, Value)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT record_id, data FROM records WHERE table_name = ?1")?;
        let rows = stmt.query_map(params![table], |row| {
            let id: String = row.get(0)?;
            let data: String = row.get(1)?;
            Ok((id, data))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (id, data) = row?;
            let record_id = RecordId::parse(&id)
                .map_err(|e| StorageError::Corrupt(format!("invalid record id {id}: {e}")))?;
            result.push((record_id, serde_json::from_str(&data)?));
        }
        Ok(result)
    }

    /// Returns the records in a table whose `field` equals `value`. Backs
    /// the by-status and by-foreign-key lookups (orders by status, payments
    /// by order id, ...).
    pub fn records_matching(
        &self,
        table: &str,
        field: &str,
        value: &Value,
    ) -> StorageResult<Vec<(RecordId, Value)>> {
        Ok(self
            .records_in(table)?
            .into_iter()
            .filter(|(_, data)| data.get(field) == Some(value))
            .collect())
    }

    /// Returns the number of records in a table.
    pub fn count_records(&self, table: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE table_name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Atomically updates a record through `f` inside one critical section.
    ///
    /// Use this instead of a read, an await, then a write — re-reading at
    /// write time is what prevents lost updates across suspension points.
    pub fn update_record(
        &self,
        table: &str,
        record_id: &RecordId,
        updated_at: DateTime<Utc>,
        f: impl FnOnce(Option<Value>) -> Value,
    ) -> StorageResult<Value> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT data FROM records WHERE table_name = ?1 AND record_id = ?2",
                params![table, record_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.map(|s| serde_json::from_str(&s)).transpose()?;
        let next = f(current);
        tx.execute(
            "INSERT OR REPLACE INTO records (table_name, record_id, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                table,
                record_id.to_string(),
                serde_json::to_string(&next)?,
                updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        tx.commit()?;
        Ok(next)
    }

    /// Replaces the entire contents of a table in one transaction. Used for
    /// remote-authoritative reference data, which is overwritten wholesale
    /// rather than merged.
    pub fn replace_table(
        &self,
        table: &str,
        records: &[(RecordId, Value)],
        updated_at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM records WHERE table_name = ?1", params![table])?;
        for (record_id, data) in records {
            tx.execute(
                "INSERT INTO records (table_name, record_id, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    table,
                    record_id.to_string(),
                    serde_json::to_string(data)?,
                    updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )?;
        }
        tx.commit()?;
        debug!("replaced table {} with {} records", table, records.len());
        Ok(records.len())
    }

    // ── Sync records ─────────────────────────────────────────────

    /// Saves (or overwrites) a sync record.
    pub fn save_sync_record(&self, record: &SyncRecord) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO sync_records (id, table_name, status, priority, created_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.to_string(),
                record.table_name,
                record.status.to_string(),
                record.priority as i64,
                record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                serde_json::to_string(record)?,
            ],
        )?;
        Ok(())
    }

    /// Reads a sync record by id.
    pub fn get_sync_record(&self, id: &SyncRecordId) -> StorageResult<Option<SyncRecord>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<String> = conn
            .query_row(
                "SELECT data FROM sync_records WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        row.map(|s| serde_json::from_str(&s).map_err(Into::into))
            .transpose()
    }

    /// Returns all pending sync records, highest priority (lowest number)
    /// first, oldest first within a priority.
    pub fn pending_sync_records(&self) -> StorageResult<Vec<SyncRecord>> {
        self.sync_records_with_status(SyncStatus::Pending)
    }

    /// Returns all sync records in the given status, ordered by
    /// (priority, created_at).
    pub fn sync_records_with_status(&self, status: SyncStatus) -> StorageResult<Vec<SyncRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT data FROM sync_records WHERE status = ?1
             ORDER BY priority ASC, created_at ASC",
        )?;
        let rows = stmt.query_map(params![status.to_string()], |row| {
            let data: String = row.get(0)?;
            Ok(data)
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(serde_json::from_str(&row?)?);
        }
        Ok(result)
    }

    /// Returns the number of sync records still awaiting propagation.
    pub fn pending_sync_record_count(&self) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_records WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Deletes a sync record.
    pub fn delete_sync_record(&self, id: &SyncRecordId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM sync_records WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(n > 0)
    }

    /// Removes completed sync records created before the cutoff. Returns the
    /// number removed.
    pub fn purge_completed_sync_records(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM sync_records WHERE status = 'completed' AND created_at < ?1",
            params![cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)],
        )?;
        if n > 0 {
            debug!("purged {} completed sync records", n);
        }
        Ok(n)
    }

    // ── Queue state ──────────────────────────────────────────────

    /// Saves (or overwrites) a queue definition.
    pub fn save_queue_config(&self, name: &str, config: &QueueConfig) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO queues (name, config) VALUES (?1, ?2)",
            params![name, serde_json::to_string(config)?],
        )?;
        Ok(())
    }

    /// Loads all queue definitions.
    pub fn load_queue_configs(&self) -> StorageResult<Vec<(String, QueueConfig)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name, config FROM queues")?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let config: String = row.get(1)?;
            Ok((name, config))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (name, config) = row?;
            result.push((name, serde_json::from_str(&config)?));
        }
        Ok(result)
    }

    /// Saves (or overwrites) a queue item.
    pub fn save_queue_item(&self, item: &QueueItem) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO queue_items (id, queue, status, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                item.id.to_string(),
                item.queue,
                item.status.to_string(),
                serde_json::to_string(item)?,
            ],
        )?;
        Ok(())
    }

    /// Reads a queue item by id.
    pub fn get_queue_item(&self, id: &QueueItemId) -> StorageResult<Option<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<String> = conn
            .query_row(
                "SELECT data FROM queue_items WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        row.map(|s| serde_json::from_str(&s).map_err(Into::into))
            .transpose()
    }

    /// Loads every persisted queue item (pending, retrying and failed;
    /// completed items are deleted at completion time).
    pub fn load_queue_items(&self) -> StorageResult<Vec<QueueItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM queue_items")?;
        let rows = stmt.query_map([], |row| {
            let data: String = row.get(0)?;
            Ok(data)
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(serde_json::from_str(&row?)?);
        }
        Ok(result)
    }

    /// Deletes a queue item.
    pub fn delete_queue_item(&self, id: &QueueItemId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM queue_items WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(n > 0)
    }

    /// Deletes every item belonging to a queue. Returns the number removed.
    pub fn clear_queue_items(&self, queue: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM queue_items WHERE queue = ?1", params![queue])?;
        Ok(n)
    }

    // ── Conflicts ────────────────────────────────────────────────

    /// Saves (or overwrites) a conflict.
    pub fn save_conflict(&self, conflict: &SyncConflict) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO conflicts (id, table_name, resolved, created_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conflict.id.to_string(),
                conflict.table_name,
                conflict.resolved as i64,
                conflict.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                serde_json::to_string(conflict)?,
            ],
        )?;
        Ok(())
    }

    /// Reads a conflict by id.
    pub fn get_conflict(&self, id: &ConflictId) -> StorageResult<Option<SyncConflict>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<String> = conn
            .query_row(
                "SELECT data FROM conflicts WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        row.map(|s| serde_json::from_str(&s).map_err(Into::into))
            .transpose()
    }

    /// Loads the full conflict history.
    pub fn load_conflicts(&self) -> StorageResult<Vec<SyncConflict>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM conflicts ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], |row| {
            let data: String = row.get(0)?;
            Ok(data)
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(serde_json::from_str(&row?)?);
        }
        Ok(result)
    }

    /// Removes resolved conflicts created before the cutoff. Returns the
    /// number removed.
    pub fn purge_resolved_conflicts(&self, cutoff: DateTime<Utc>) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM conflicts WHERE resolved = 1 AND created_at < ?1",
            params![cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)],
        )?;
        if n > 0 {
            debug!("purged {} resolved conflicts", n);
        }
        Ok(n)
    }

    // ── Merge-rule overrides ─────────────────────────────────────

    /// Saves (or overwrites) a merge-rule override for its `(scope, field)`.
    pub fn save_merge_rule(&self, rule: &MergeRule) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO merge_rules (scope, field, data) VALUES (?1, ?2, ?3)",
            params![
                rule.scope.to_string(),
                rule.field,
                serde_json::to_string(rule)?,
            ],
        )?;
        Ok(())
    }

    /// Removes a merge-rule override. Returns whether one existed.
    pub fn remove_merge_rule(&self, scope: &RuleScope, field: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM merge_rules WHERE scope = ?1 AND field = ?2",
            params![scope.to_string(), field],
        )?;
        Ok(n > 0)
    }

    /// Loads all merge-rule overrides.
    pub fn load_merge_rules(&self) -> StorageResult<Vec<MergeRule>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM merge_rules")?;
        let rows = stmt.query_map([], |row| {
            let data: String = row.get(0)?;
            Ok(data)
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(serde_json::from_str(&row?)?);
        }
        Ok(result)
    }

    // ── Metadata ─────────────────────────────────────────────────

    /// Writes a metadata value.
    pub fn set_metadata(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Reads a metadata value.
    pub fn get_metadata(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}
