//! The transactional package index.
//!
//! Backed by SQLite through `rusqlite`, with MVCC realized as versioned
//! rows: every record carries the commit sequence that added it
//! (`seq_added`) and, once superseded, the sequence that retired it
//! (`seq_removed`). A key is live at sequence `S` iff
//! `seq_added <= S < seq_removed`. Readers query at a fixed sequence and
//! never block the writer; the writer appends a new sequence per commit
//! and never disturbs rows a reader can see.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use rusqlite::{params, Connection, Transaction as SqlTransaction, TransactionBehavior};
use tracing::{debug, trace};

use crate::{
    error::{Result, StoreError},
    types::{Operation, PackageId, PackageRecord, Proposal},
    version::Dependency,
};

const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE records (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    section         TEXT NOT NULL,
    name            TEXT NOT NULL,
    version         TEXT NOT NULL,
    arch            TEXT NOT NULL,
    digest          TEXT NOT NULL,
    manifest_digest TEXT NOT NULL,
    dependencies    TEXT NOT NULL,
    published_at    INTEGER NOT NULL,
    published_by    TEXT NOT NULL,
    seq_added       INTEGER NOT NULL,
    seq_removed     INTEGER
);

CREATE INDEX idx_records_key ON records (section, name, version, arch);
CREATE UNIQUE INDEX idx_records_live_key
    ON records (section, name, version, arch)
    WHERE seq_removed IS NULL;

CREATE TABLE commits (
    seq          INTEGER PRIMARY KEY,
    committed_at INTEGER NOT NULL
);
";

const RECORD_COLUMNS: &str =
    "name, version, arch, digest, manifest_digest, dependencies, published_at, published_by";

/// The embedded package index.
///
/// One writer connection shared behind a mutex; [`IndexStore::apply`] is
/// the only write path and is called exclusively by the transaction
/// coordinator.
pub struct IndexStore {
    conn: Arc<Mutex<Connection>>,
}

impl IndexStore {
    /// Opens (and if necessary initializes) the index database on disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self::init(conn)?;
        debug!(path = %path.as_ref().display(), "opened index store");
        Ok(store)
    }

    /// Opens a transient in-memory index, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// The latest committed sequence number; 0 for an empty index.
    pub fn head(&self) -> Result<u64> {
        let conn = self.conn.lock()?;
        head_of(&conn)
    }

    /// All records live in `section` at sequence `seq`.
    pub fn list(&self, seq: u64, section: &str) -> Result<Vec<PackageRecord>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE section = ?1 AND seq_added <= ?2
               AND (seq_removed IS NULL OR seq_removed > ?2)
             ORDER BY name, version, arch"
        ))?;
        let rows = stmt.query_map(params![section, seq as i64], row_to_raw)?;
        collect_records(rows)
    }

    /// All live versions of `name` in `section` at sequence `seq`.
    pub fn by_name(&self, seq: u64, section: &str, name: &str) -> Result<Vec<PackageRecord>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE section = ?1 AND name = ?2 AND seq_added <= ?3
               AND (seq_removed IS NULL OR seq_removed > ?3)
             ORDER BY version, arch"
        ))?;
        let rows = stmt.query_map(params![section, name, seq as i64], row_to_raw)?;
        collect_records(rows)
    }

    /// Looks up one exact key in `section` at sequence `seq`.
    pub fn get(&self, seq: u64, section: &str, id: &PackageId) -> Result<Option<PackageRecord>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE section = ?1 AND name = ?2 AND version = ?3 AND arch = ?4
               AND seq_added <= ?5 AND (seq_removed IS NULL OR seq_removed > ?5)"
        ))?;
        let mut rows = stmt.query_map(
            params![section, id.name, id.version, id.arch, seq as i64],
            row_to_raw,
        )?;
        match rows.next() {
            Some(row) => Ok(Some(raw_to_record(row?)?)),
            None => Ok(None),
        }
    }

    /// Atomically applies a validated proposal set on top of `base_seq`.
    ///
    /// Runs a single immediate SQLite transaction: first the conflict
    /// check (any touched key already written past `base_seq` fails the
    /// whole batch with [`StoreError::Conflict`]), then every operation
    /// is written at `head + 1` and the commit is recorded. Either the
    /// full batch becomes visible at the returned sequence or nothing
    /// does.
    pub fn apply(&self, base_seq: u64, proposals: &[Proposal]) -> Result<u64> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        {
            let mut stmt = tx.prepare(
                "SELECT EXISTS(
                     SELECT 1 FROM records
                     WHERE section = ?1 AND name = ?2 AND version = ?3 AND arch = ?4
                       AND (seq_added > ?5 OR COALESCE(seq_removed, 0) > ?5)
                 )",
            )?;
            for proposal in proposals {
                for key in proposal.operation.keys() {
                    let changed: bool = stmt.query_row(
                        params![
                            proposal.section,
                            key.name,
                            key.version,
                            key.arch,
                            base_seq as i64
                        ],
                        |row| row.get(0),
                    )?;
                    if changed {
                        return Err(StoreError::Conflict {
                            section: proposal.section.clone(),
                            key: key.to_string(),
                        });
                    }
                }
            }
        }

        let seq = head_of(&tx)? + 1;
        for proposal in proposals {
            match &proposal.operation {
                Operation::Add(record) => insert_record(&tx, &proposal.section, record, seq)?,
                Operation::Remove(id) => retire_record(&tx, &proposal.section, id, seq)?,
                Operation::Replace(old, record) => {
                    retire_record(&tx, &proposal.section, old, seq)?;
                    insert_record(&tx, &proposal.section, record, seq)?;
                }
            }
        }

        tx.execute(
            "INSERT INTO commits (seq, committed_at) VALUES (?1, ?2)",
            params![seq as i64, Utc::now().timestamp()],
        )?;
        tx.commit()?;

        debug!(seq, ops = proposals.len(), "committed to index");
        Ok(seq)
    }

    /// Deletes superseded row versions no snapshot at or above `seq` can
    /// see. Called by the snapshot manager once nothing older is pinned.
    pub fn reclaim_below(&self, seq: u64) -> Result<usize> {
        let conn = self.conn.lock()?;
        let deleted = conn.execute(
            "DELETE FROM records WHERE seq_removed IS NOT NULL AND seq_removed <= ?1",
            params![seq as i64],
        )?;
        if deleted > 0 {
            trace!(below = seq, deleted, "reclaimed superseded index rows");
        }
        Ok(deleted)
    }
}

fn head_of(conn: &Connection) -> Result<u64> {
    let head: Option<i64> = conn.query_row("SELECT MAX(seq) FROM commits", [], |row| row.get(0))?;
    Ok(head.unwrap_or(0) as u64)
}

type RawRecord = (String, String, String, String, String, String, i64, String);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn raw_to_record(raw: RawRecord) -> Result<PackageRecord> {
    let (name, version, arch, digest, manifest_digest, dependencies, published_at, published_by) =
        raw;
    let dependencies: Vec<Dependency> = serde_json::from_str(&dependencies)?;
    Ok(PackageRecord {
        id: PackageId {
            name,
            version,
            arch,
        },
        digest,
        manifest_digest,
        dependencies,
        published_at,
        published_by,
    })
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<RawRecord>>,
) -> Result<Vec<PackageRecord>> {
    let mut records = Vec::new();
    for row in rows {
        records.push(raw_to_record(row?)?);
    }
    Ok(records)
}

fn insert_record(
    tx: &SqlTransaction<'_>,
    section: &str,
    record: &PackageRecord,
    seq: u64,
) -> Result<()> {
    let dependencies = serde_json::to_string(&record.dependencies)?;
    tx.execute(
        "INSERT INTO records
             (section, name, version, arch, digest, manifest_digest,
              dependencies, published_at, published_by, seq_added)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            section,
            record.id.name,
            record.id.version,
            record.id.arch,
            record.digest,
            record.manifest_digest,
            dependencies,
            record.published_at,
            record.published_by,
            seq as i64
        ],
    )?;
    Ok(())
}

fn retire_record(tx: &SqlTransaction<'_>, section: &str, id: &PackageId, seq: u64) -> Result<()> {
    let updated = tx.execute(
        "UPDATE records SET seq_removed = ?1
         WHERE section = ?2 AND name = ?3 AND version = ?4 AND arch = ?5
           AND seq_removed IS NULL",
        params![seq as i64, section, id.name, id.version, id.arch],
    )?;
    if updated != 1 {
        // target vanished between validation and write
        return Err(StoreError::Conflict {
            section: section.to_string(),
            key: id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, version: &str) -> PackageRecord {
        PackageRecord {
            id: PackageId::new(name, version, "x86_64"),
            digest: "ab".repeat(32),
            manifest_digest: "cd".repeat(32),
            dependencies: vec!["glibc>=2.27".parse().unwrap()],
            published_at: 1_700_000_000,
            published_by: "tester".to_string(),
        }
    }

    fn add(section: &str, name: &str, version: &str) -> Proposal {
        Proposal::new(section, Operation::Add(record(name, version)))
    }

    #[test]
    fn test_empty_index_head_is_zero() {
        let index = IndexStore::open_in_memory().unwrap();
        assert_eq!(index.head().unwrap(), 0);
        assert!(index.list(0, "stable").unwrap().is_empty());
    }

    #[test]
    fn test_apply_advances_sequence_and_lists() {
        let index = IndexStore::open_in_memory().unwrap();

        let seq = index.apply(0, &[add("stable", "curl", "8.0.1-1")]).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(index.head().unwrap(), 1);

        let listed = index.list(1, "stable").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.name, "curl");
        assert_eq!(listed[0].dependencies[0].name, "glibc");

        // other sections stay empty
        assert!(index.list(1, "testing").unwrap().is_empty());
    }

    #[test]
    fn test_reads_at_old_sequence_ignore_later_commits() {
        let index = IndexStore::open_in_memory().unwrap();

        index.apply(0, &[add("stable", "curl", "8.0.1-1")]).unwrap();
        index.apply(1, &[add("stable", "jq", "1.7-1")]).unwrap();

        assert_eq!(index.list(1, "stable").unwrap().len(), 1);
        assert_eq!(index.list(2, "stable").unwrap().len(), 2);
    }

    #[test]
    fn test_remove_retires_only_from_newer_sequences() {
        let index = IndexStore::open_in_memory().unwrap();
        let id = PackageId::new("curl", "8.0.1-1", "x86_64");

        index.apply(0, &[add("stable", "curl", "8.0.1-1")]).unwrap();
        let seq = index
            .apply(1, &[Proposal::new("stable", Operation::Remove(id.clone()))])
            .unwrap();
        assert_eq!(seq, 2);

        assert!(index.get(1, "stable", &id).unwrap().is_some());
        assert!(index.get(2, "stable", &id).unwrap().is_none());
    }

    #[test]
    fn test_conflicting_writes_from_same_base_fail() {
        let index = IndexStore::open_in_memory().unwrap();

        index.apply(0, &[add("stable", "curl", "8.0.1-1")]).unwrap();
        // second writer raced on the same key from base 0
        let err = index
            .apply(0, &[add("stable", "curl", "8.0.1-1")])
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(index.head().unwrap(), 1);
    }

    #[test]
    fn test_disjoint_keys_from_same_base_both_commit() {
        let index = IndexStore::open_in_memory().unwrap();

        index.apply(0, &[add("stable", "curl", "8.0.1-1")]).unwrap();
        index.apply(0, &[add("testing", "jq", "1.7-1")]).unwrap();

        assert_eq!(index.head().unwrap(), 2);
        assert_eq!(index.list(2, "stable").unwrap().len(), 1);
        assert_eq!(index.list(2, "testing").unwrap().len(), 1);
    }

    #[test]
    fn test_batch_is_atomic_on_conflict() {
        let index = IndexStore::open_in_memory().unwrap();

        index.apply(0, &[add("stable", "curl", "8.0.1-1")]).unwrap();

        // one good op and one conflicting op: neither lands
        let err = index
            .apply(
                0,
                &[
                    add("stable", "jq", "1.7-1"),
                    add("stable", "curl", "8.0.1-1"),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(index.head().unwrap(), 1);
        assert!(index
            .by_name(1, "stable", "jq")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_replace_swaps_records_atomically() {
        let index = IndexStore::open_in_memory().unwrap();
        let old_id = PackageId::new("curl", "8.0.1-1", "x86_64");

        index.apply(0, &[add("stable", "curl", "8.0.1-1")]).unwrap();
        let seq = index
            .apply(
                1,
                &[Proposal::new(
                    "stable",
                    Operation::Replace(old_id.clone(), record("curl", "8.1.0-1")),
                )],
            )
            .unwrap();

        assert!(index.get(seq, "stable", &old_id).unwrap().is_none());
        let versions = index.by_name(seq, "stable", "curl").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].id.version, "8.1.0-1");

        // the pre-replace view still resolves the old record
        assert!(index.get(1, "stable", &old_id).unwrap().is_some());
    }

    #[test]
    fn test_reclaim_below_drops_only_superseded_rows() {
        let index = IndexStore::open_in_memory().unwrap();
        let id = PackageId::new("curl", "8.0.1-1", "x86_64");

        index.apply(0, &[add("stable", "curl", "8.0.1-1")]).unwrap();
        index
            .apply(1, &[Proposal::new("stable", Operation::Remove(id.clone()))])
            .unwrap();
        index.apply(2, &[add("stable", "jq", "1.7-1")]).unwrap();

        assert_eq!(index.reclaim_below(3).unwrap(), 1);
        // live rows survive reclamation
        assert_eq!(index.list(3, "stable").unwrap().len(), 1);
        // the retired row is gone from historical views too
        assert!(index.get(1, "stable", &id).unwrap().is_none());
    }

    #[test]
    fn test_readd_after_remove() {
        let index = IndexStore::open_in_memory().unwrap();
        let id = PackageId::new("curl", "8.0.1-1", "x86_64");

        index.apply(0, &[add("stable", "curl", "8.0.1-1")]).unwrap();
        index
            .apply(1, &[Proposal::new("stable", Operation::Remove(id.clone()))])
            .unwrap();
        let seq = index.apply(2, &[add("stable", "curl", "8.0.1-1")]).unwrap();

        assert!(index.get(seq, "stable", &id).unwrap().is_some());
        assert!(index.get(2, "stable", &id).unwrap().is_none());
    }
}
