//! Signal and insight store
//!
//! Tables written (see `/sql/` directory):
//! - `signals` - INSERT per (block_height, signal_type, revision); a reorg
//!   marks active rows superseded instead of deleting them
//! - `insights` - INSERT OR IGNORE, at most one per signal row
//! - `blocks_needing_replay` - UPSERT on block_height

use crate::error::{SignalError, SignalResult};
use crate::insight::{ExplainabilityFactors, Insight};
use crate::signals::{ConfidenceInterval, EvidenceRef, Signal, SignalType};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Result of writing a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted { row_id: i64, revision: u32 },
    /// Same height, type and block hash already active; nothing written
    AlreadyExists { row_id: i64, revision: u32 },
}

impl WriteOutcome {
    pub fn row_id(&self) -> i64 {
        match self {
            WriteOutcome::Inserted { row_id, .. } | WriteOutcome::AlreadyExists { row_id, .. } => *row_id,
        }
    }

    pub fn revision(&self) -> u32 {
        match self {
            WriteOutcome::Inserted { revision, .. } | WriteOutcome::AlreadyExists { revision, .. } => {
                *revision
            }
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, WriteOutcome::Inserted { .. })
    }
}

/// A signal row as read back from the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSignal {
    pub row_id: i64,
    pub signal: Signal,
    pub superseded_at: Option<i64>,
}

impl StoredSignal {
    pub fn is_active(&self) -> bool {
        self.superseded_at.is_none()
    }
}

/// Persistence for signals, insights and the replay set
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Write a signal as the active revision for its (height, type)
    ///
    /// Writing the same block twice is a no-op that reports the existing
    /// row. An active row for a different block hash is superseded first.
    async fn write_signal(&self, signal: &Signal) -> SignalResult<WriteOutcome>;

    /// Supersede every active signal at or above `from_height`
    ///
    /// Returns the distinct signal types that had active rows.
    async fn supersede_range(&self, from_height: u64) -> SignalResult<Vec<SignalType>>;

    /// Returns false when an insight already exists for that signal row
    async fn write_insight(&self, signal_row_id: i64, insight: &Insight) -> SignalResult<bool>;

    async fn mark_needs_replay(&self, height: u64, block_hash: &str, reason: &str) -> SignalResult<()>;

    async fn clear_replay(&self, height: u64) -> SignalResult<()>;

    async fn replay_heights(&self) -> SignalResult<Vec<u64>>;

    async fn active_signals(&self, height: u64) -> SignalResult<Vec<StoredSignal>>;

    /// Every revision for one key, oldest first
    async fn signal_revisions(&self, height: u64, signal_type: SignalType) -> SignalResult<Vec<StoredSignal>>;

    async fn insights_for_height(&self, height: u64) -> SignalResult<Vec<Insight>>;
}

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir` in file name order (00_, 01_, ...)
/// and executes them. Every file uses IF NOT EXISTS clauses, so running
/// the migrations again is harmless.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> SignalResult<()> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(SignalError::Config(format!(
            "Schema directory not found: {}",
            schema_dir
        )));
    }

    // PRAGMA journal_mode returns a row, so pragma_update rather than execute
    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);

        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;

        log::info!("   └─ ✅ Success: {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");

    Ok(())
}

/// Columns of `signals` in the order every query selects them
const SIGNAL_COLUMNS: &str = "id, block_height, signal_type, revision, block_hash, strength, \
     is_predictive, payload_json, evidence_json, ci_lower, ci_upper, ci_level, created_at, superseded_at";

struct SignalRow {
    row_id: i64,
    block_height: i64,
    signal_type: String,
    revision: i64,
    block_hash: String,
    strength: f64,
    is_predictive: bool,
    payload_json: String,
    evidence_json: String,
    ci: (Option<f64>, Option<f64>, Option<f64>),
    created_at: i64,
    superseded_at: Option<i64>,
}

impl SignalRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: row.get(0)?,
            block_height: row.get(1)?,
            signal_type: row.get(2)?,
            revision: row.get(3)?,
            block_hash: row.get(4)?,
            strength: row.get(5)?,
            is_predictive: row.get(6)?,
            payload_json: row.get(7)?,
            evidence_json: row.get(8)?,
            ci: (row.get(9)?, row.get(10)?, row.get(11)?),
            created_at: row.get(12)?,
            superseded_at: row.get(13)?,
        })
    }

    fn into_stored(self) -> SignalResult<StoredSignal> {
        let signal_type = SignalType::from_str(&self.signal_type).ok_or_else(|| {
            SignalError::PersistenceFailure(format!("unknown signal type in store: {}", self.signal_type))
        })?;
        let evidence: Vec<EvidenceRef> = serde_json::from_str(&self.evidence_json)?;
        let confidence_interval = match self.ci {
            (Some(lower), Some(upper), Some(level)) => Some(ConfidenceInterval { lower, upper, level }),
            _ => None,
        };

        Ok(StoredSignal {
            row_id: self.row_id,
            signal: Signal {
                signal_type,
                strength: self.strength,
                payload: serde_json::from_str(&self.payload_json)?,
                block_height: self.block_height as u64,
                block_hash: self.block_hash,
                evidence,
                is_predictive: self.is_predictive,
                confidence_interval,
                revision: self.revision as u32,
                created_at: self.created_at,
            },
            superseded_at: self.superseded_at,
        })
    }
}

/// SQLite implementation of SignalStore
///
/// The database must already carry the schema from `/sql/*.sql`
/// (see `run_schema_migrations`).
pub struct SqliteSignalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSignalStore {
    pub fn new(db_path: &str) -> SignalResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open `db_path` and apply the schema in `schema_dir`
    pub fn open_with_schema(db_path: &str, schema_dir: &str) -> SignalResult<Self> {
        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn, schema_dir)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> SignalResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SignalError::PersistenceFailure("connection mutex poisoned".to_string()))
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn insert_signal(tx: &Transaction<'_>, signal: &Signal, revision: u32) -> SignalResult<i64> {
        let (ci_lower, ci_upper, ci_level) = match signal.confidence_interval {
            Some(ci) => (Some(ci.lower), Some(ci.upper), Some(ci.level)),
            None => (None, None, None),
        };

        tx.execute(
            r#"
            INSERT INTO signals (
                block_height, signal_type, revision, block_hash, strength, is_predictive,
                payload_json, evidence_json, ci_lower, ci_upper, ci_level, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                signal.block_height as i64,
                signal.signal_type.as_str(),
                revision as i64,
                signal.block_hash,
                signal.strength,
                signal.is_predictive,
                serde_json::to_string(&signal.payload)?,
                serde_json::to_string(&signal.evidence)?,
                ci_lower,
                ci_upper,
                ci_level,
                signal.created_at,
            ],
        )?;

        Ok(tx.last_insert_rowid())
    }

    fn query_signals(
        conn: &Connection,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> SignalResult<Vec<StoredSignal>> {
        let sql = format!("SELECT {} FROM signals WHERE {}", SIGNAL_COLUMNS, filter);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, SignalRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SignalRow::into_stored).collect()
    }
}

#[async_trait]
impl SignalStore for SqliteSignalStore {
    async fn write_signal(&self, signal: &Signal) -> SignalResult<WriteOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let height = signal.block_height as i64;
        let signal_type = signal.signal_type.as_str();

        let active: Option<(i64, i64, String)> = tx
            .query_row(
                "SELECT id, revision, block_hash FROM signals
                 WHERE block_height = ? AND signal_type = ? AND superseded_at IS NULL",
                params![height, signal_type],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        if let Some((row_id, revision, block_hash)) = active {
            if block_hash == signal.block_hash {
                return Ok(WriteOutcome::AlreadyExists {
                    row_id,
                    revision: revision as u32,
                });
            }
            log::warn!(
                "⚠️  {} at {} was computed on {}, superseding for {}",
                signal_type,
                height,
                block_hash,
                signal.block_hash
            );
            tx.execute(
                "UPDATE signals SET superseded_at = ? WHERE id = ?",
                params![Self::now(), row_id],
            )?;
        }

        let next_revision: i64 = tx.query_row(
            "SELECT COALESCE(MAX(revision) + 1, 0) FROM signals
             WHERE block_height = ? AND signal_type = ?",
            params![height, signal_type],
            |row| row.get(0),
        )?;
        let revision = next_revision as u32;

        let row_id = Self::insert_signal(&tx, signal, revision)?;
        tx.commit()?;

        Ok(WriteOutcome::Inserted { row_id, revision })
    }

    async fn supersede_range(&self, from_height: u64) -> SignalResult<Vec<SignalType>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let names: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT signal_type FROM signals
                 WHERE block_height >= ? AND superseded_at IS NULL
                 ORDER BY signal_type",
            )?;
            let rows = stmt.query_map([from_height as i64], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let superseded = tx.execute(
            "UPDATE signals SET superseded_at = ?
             WHERE block_height >= ? AND superseded_at IS NULL",
            params![Self::now(), from_height as i64],
        )?;
        tx.commit()?;

        if superseded > 0 {
            log::info!(
                "🔁 Superseded {} signal(s) at or above height {}",
                superseded,
                from_height
            );
        }

        Ok(names.iter().filter_map(|n| SignalType::from_str(n)).collect())
    }

    async fn write_insight(&self, signal_row_id: i64, insight: &Insight) -> SignalResult<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO insights (
                id, signal_id, signal_type, block_height, headline, summary, confidence,
                evidence_json, explainability_json, tags_json, narrator, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                insight.id,
                signal_row_id,
                insight.signal_type.as_str(),
                insight.block_height as i64,
                insight.headline,
                insight.summary,
                insight.confidence,
                serde_json::to_string(&insight.evidence)?,
                serde_json::to_string(&insight.explainability)?,
                serde_json::to_string(&insight.tags)?,
                insight.narrator,
                insight.created_at,
            ],
        )?;
        Ok(inserted > 0)
    }

    async fn mark_needs_replay(&self, height: u64, block_hash: &str, reason: &str) -> SignalResult<()> {
        let conn = self.lock()?;
        let now = Self::now();
        conn.execute(
            r#"
            INSERT INTO blocks_needing_replay (
                block_height, block_hash, reason, attempts, first_failed_at, last_failed_at
            ) VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(block_height) DO UPDATE SET
                block_hash = excluded.block_hash,
                reason = excluded.reason,
                attempts = attempts + 1,
                last_failed_at = excluded.last_failed_at
            "#,
            params![height as i64, block_hash, reason, now, now],
        )?;
        Ok(())
    }

    async fn clear_replay(&self, height: u64) -> SignalResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM blocks_needing_replay WHERE block_height = ?",
            [height as i64],
        )?;
        Ok(())
    }

    async fn replay_heights(&self) -> SignalResult<Vec<u64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT block_height FROM blocks_needing_replay ORDER BY block_height")?;
        let heights = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(heights.into_iter().map(|h| h as u64).collect())
    }

    async fn active_signals(&self, height: u64) -> SignalResult<Vec<StoredSignal>> {
        let conn = self.lock()?;
        Self::query_signals(
            &conn,
            "block_height = ? AND superseded_at IS NULL ORDER BY signal_type",
            &[&(height as i64)],
        )
    }

    async fn signal_revisions(&self, height: u64, signal_type: SignalType) -> SignalResult<Vec<StoredSignal>> {
        let conn = self.lock()?;
        Self::query_signals(
            &conn,
            "block_height = ? AND signal_type = ? ORDER BY revision",
            &[&(height as i64), &signal_type.as_str()],
        )
    }

    async fn insights_for_height(&self, height: u64) -> SignalResult<Vec<Insight>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT i.id, i.signal_type, i.block_height, s.revision, i.headline, i.summary,
                   i.confidence, i.evidence_json, i.explainability_json, i.tags_json,
                   i.narrator, i.created_at
            FROM insights i
            JOIN signals s ON s.id = i.signal_id
            WHERE i.block_height = ?
            ORDER BY i.signal_type, s.revision
            "#,
        )?;

        type InsightRow = (String, String, i64, i64, String, String, f64, String, String, String, String, i64);
        let rows: Vec<InsightRow> = stmt
            .query_map([height as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                    row.get(11)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter()
            .map(
                |(id, type_name, block_height, revision, headline, summary, confidence, evidence, explain, tags, narrator, created_at)| {
                    let signal_type = SignalType::from_str(&type_name).ok_or_else(|| {
                        SignalError::PersistenceFailure(format!("unknown signal type in store: {}", type_name))
                    })?;
                    let explainability: ExplainabilityFactors = serde_json::from_str(&explain)?;
                    Ok(Insight {
                        id,
                        signal_type,
                        block_height: block_height as u64,
                        signal_revision: revision as u32,
                        headline,
                        summary,
                        confidence,
                        evidence: serde_json::from_str(&evidence)?,
                        explainability,
                        tags: serde_json::from_str(&tags)?,
                        narrator,
                        created_at,
                    })
                },
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    /// Helper to create a test database with schema
    fn create_test_store() -> (NamedTempFile, SqliteSignalStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();
        let store = SqliteSignalStore::open_with_schema(&db_path, "sql").unwrap();
        (temp_file, store)
    }

    fn flow_signal(height: u64, hash: &str) -> Signal {
        Signal::new(SignalType::ExchangeFlow, height, hash)
            .with_strength(0.9)
            .with_payload(json!({"entity_name": "Binance", "inflow": 5000.0}))
            .with_evidence(vec![EvidenceRef::block(height)
                .with_txid("deposit")
                .with_entity("binance", "Binance")
                .with_amount(5000.0)])
    }

    fn insight_for(signal: &Signal) -> Insight {
        Insight {
            id: crate::insight::insight_id(signal),
            signal_type: signal.signal_type,
            block_height: signal.block_height,
            signal_revision: signal.revision,
            headline: "Binance inflow".to_string(),
            summary: "Block summary".to_string(),
            confidence: 0.93,
            evidence: signal.evidence.clone(),
            explainability: ExplainabilityFactors {
                signal_strength: 0.9,
                historical_accuracy: 0.8,
                data_quality: 1.0,
                confidence: 0.93,
                threshold: 0.7,
                quality_issues: vec![],
            },
            tags: vec!["exchange_flow".to_string()],
            narrator: "template".to_string(),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut conn = Connection::open(temp_file.path()).unwrap();
        run_schema_migrations(&mut conn, "sql").unwrap();
        run_schema_migrations(&mut conn, "sql").unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('signals', 'insights', 'blocks_needing_replay', 'known_entities')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_missing_schema_dir() {
        let mut conn = Connection::open_in_memory().unwrap();
        let result = run_schema_migrations(&mut conn, "/nonexistent/schema");
        assert!(matches!(result, Err(SignalError::Config(_))));
    }

    #[tokio::test]
    async fn test_write_signal_round_trip() {
        let (_temp, store) = create_test_store();
        let signal = flow_signal(100, "aa");

        let outcome = store.write_signal(&signal).await.unwrap();
        assert!(outcome.is_insert());
        assert_eq!(outcome.revision(), 0);

        let active = store.active_signals(100).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].is_active());
        assert_eq!(active[0].signal, signal);
    }

    #[tokio::test]
    async fn test_duplicate_write_is_noop() {
        let (_temp, store) = create_test_store();
        let signal = flow_signal(100, "aa");

        let first = store.write_signal(&signal).await.unwrap();
        let second = store.write_signal(&signal).await.unwrap();

        assert_eq!(
            second,
            WriteOutcome::AlreadyExists {
                row_id: first.row_id(),
                revision: 0
            }
        );
        assert_eq!(store.signal_revisions(100, SignalType::ExchangeFlow).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_supersede_then_rewrite_bumps_revision() {
        let (_temp, store) = create_test_store();
        store.write_signal(&flow_signal(100, "aa")).await.unwrap();
        store.write_signal(&flow_signal(101, "bb")).await.unwrap();
        let mempool = Signal::new(SignalType::MempoolNowcast, 99, "cc").with_strength(0.2);
        store.write_signal(&mempool).await.unwrap();

        let types = store.supersede_range(100).await.unwrap();
        assert_eq!(types, vec![SignalType::ExchangeFlow]);
        assert!(store.active_signals(100).await.unwrap().is_empty());
        assert_eq!(store.active_signals(99).await.unwrap().len(), 1);

        let outcome = store.write_signal(&flow_signal(100, "dd")).await.unwrap();
        assert_eq!(outcome.revision(), 1);

        let revisions = store.signal_revisions(100, SignalType::ExchangeFlow).await.unwrap();
        assert_eq!(revisions.len(), 2);
        assert!(!revisions[0].is_active());
        assert!(revisions[1].is_active());
        assert_eq!(revisions[1].signal.block_hash, "dd");
    }

    #[tokio::test]
    async fn test_different_hash_supersedes_implicitly() {
        let (_temp, store) = create_test_store();
        store.write_signal(&flow_signal(100, "aa")).await.unwrap();
        let outcome = store.write_signal(&flow_signal(100, "bb")).await.unwrap();

        assert_eq!(outcome.revision(), 1);
        let active = store.active_signals(100).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].signal.block_hash, "bb");
    }

    #[tokio::test]
    async fn test_insight_written_once_per_signal() {
        let (_temp, store) = create_test_store();
        let signal = flow_signal(100, "aa");
        let outcome = store.write_signal(&signal).await.unwrap();
        let insight = insight_for(&signal);

        assert!(store.write_insight(outcome.row_id(), &insight).await.unwrap());
        assert!(!store.write_insight(outcome.row_id(), &insight).await.unwrap());

        let stored = store.insights_for_height(100).await.unwrap();
        assert_eq!(stored, vec![insight]);
    }

    #[tokio::test]
    async fn test_insight_confidence_check() {
        let (_temp, store) = create_test_store();
        let signal = flow_signal(100, "aa");
        let outcome = store.write_signal(&signal).await.unwrap();
        let mut insight = insight_for(&signal);
        insight.confidence = 1.5;

        let result = store.write_insight(outcome.row_id(), &insight).await;
        assert!(matches!(result, Err(SignalError::PersistenceFailure(_))));
    }

    #[tokio::test]
    async fn test_replay_markers() {
        let (_temp, store) = create_test_store();
        store.mark_needs_replay(105, "ee", "disk full").await.unwrap();
        store.mark_needs_replay(102, "ff", "locked").await.unwrap();
        store.mark_needs_replay(105, "ee", "disk full").await.unwrap();

        assert_eq!(store.replay_heights().await.unwrap(), vec![102, 105]);

        let attempts: i64 = {
            let conn = store.lock().unwrap();
            conn.query_row(
                "SELECT attempts FROM blocks_needing_replay WHERE block_height = 105",
                [],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert_eq!(attempts, 2);

        store.clear_replay(105).await.unwrap();
        assert_eq!(store.replay_heights().await.unwrap(), vec![102]);
    }

    #[tokio::test]
    async fn test_interval_round_trip() {
        let (_temp, store) = create_test_store();
        let signal = Signal::new(SignalType::FeeForecast, 200, "aa")
            .with_strength(0.4)
            .with_interval(ConfidenceInterval {
                lower: 10.0,
                upper: 30.0,
                level: 0.9,
            });
        let mut predictive = signal.clone();
        predictive.is_predictive = true;
        store.write_signal(&predictive).await.unwrap();

        let active = store.active_signals(200).await.unwrap();
        assert_eq!(active[0].signal.confidence_interval, predictive.confidence_interval);
        assert!(active[0].signal.is_predictive);
    }
}
