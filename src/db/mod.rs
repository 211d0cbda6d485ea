use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub mod models;
use models::*;

/// Thread-safe SQLite archive (single connection with mutex).
///
/// The archive is a passive collaborator: write-once invariants live in the
/// engine's in-memory stores, and the conflict clauses here just make the
/// history tables faithful to them across process restarts.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite archive at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Edge records ──────────────────────────────────────────────────────────

    /// Append an evaluated edge. Every evaluation is a fresh row; history is
    /// never rewritten.
    pub fn insert_edge_record(&self, rec: &EdgeRecord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO edge_records (
                subject_id, model_price, market_price, adjustment,
                raw_edge, tier, confidence, evaluated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                rec.subject_id,
                rec.model_price,
                rec.market_price,
                rec.adjustment,
                rec.raw_edge,
                serde_json::to_string(&rec.tier)?,
                rec.confidence,
                rec.evaluated_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List the most recently evaluated edges
    pub fn list_recent_edge_records(&self, limit: i64) -> Result<Vec<EdgeRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT subject_id, model_price, market_price, adjustment,
                    raw_edge, tier, confidence, evaluated_at
             FROM edge_records ORDER BY evaluated_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, chrono::DateTime<Utc>>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(
                |(subject_id, model_price, market_price, adjustment, raw_edge, tier, confidence, evaluated_at)| {
                    Ok(EdgeRecord {
                        subject_id,
                        model_price,
                        market_price,
                        adjustment,
                        raw_edge,
                        tier: serde_json::from_str(&tier)?,
                        confidence,
                        evaluated_at,
                    })
                },
            )
            .collect()
    }

    // ── Predictions & outcomes ────────────────────────────────────────────────

    /// Archive a prediction. Conflicting subject ids keep the first row,
    /// mirroring the engine's write-once rule.
    pub fn insert_prediction(&self, p: &PredictionRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO predictions (
                subject_id, predicted_edge, adjustment, breakdown, confidence,
                tier, stake_fraction, stake_usd, source_ids, recorded_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(subject_id) DO NOTHING",
            params![
                p.subject_id,
                p.predicted_edge,
                p.adjustment,
                serde_json::to_string(&p.breakdown)?,
                p.confidence,
                serde_json::to_string(&p.tier)?,
                p.stake_fraction,
                p.stake_usd,
                serde_json::to_string(&p.source_ids)?,
                p.recorded_at,
            ],
        )?;
        Ok(())
    }

    /// Archive an outcome. First write wins, as in the engine.
    pub fn insert_outcome(&self, o: &OutcomeRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO outcomes (
                subject_id, actual_result, actual_margin, realized_value, recorded_at
             ) VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(subject_id) DO NOTHING",
            params![
                o.subject_id,
                serde_json::to_string(&o.actual_result)?,
                o.actual_margin,
                o.realized_value,
                o.recorded_at,
            ],
        )?;
        Ok(())
    }

    // ── Source scores ─────────────────────────────────────────────────────────

    /// Upsert a source's rolling score snapshot
    pub fn upsert_source_score(&self, score: &SourceScore) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO source_scores (source_id, accuracy, latency_ewma_ms, samples, updated_at)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(source_id) DO UPDATE SET
                accuracy=excluded.accuracy,
                latency_ewma_ms=excluded.latency_ewma_ms,
                samples=excluded.samples,
                updated_at=excluded.updated_at",
            params![
                score.source_id,
                score.accuracy,
                score.latency_ewma_ms,
                score.samples as i64,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    /// Row counts for the run summary
    pub fn get_archive_stats(&self) -> Result<ArchiveStats> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> i64 {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                .unwrap_or(0)
        };
        Ok(ArchiveStats {
            edge_records: count("edge_records"),
            predictions: count("predictions"),
            outcomes: count("outcomes"),
            source_scores: count("source_scores"),
        })
    }
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS edge_records (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id   TEXT    NOT NULL,
    model_price  REAL    NOT NULL,
    market_price REAL    NOT NULL,
    adjustment   REAL    NOT NULL,
    raw_edge     REAL    NOT NULL,
    tier         TEXT    NOT NULL,
    confidence   REAL    NOT NULL,
    evaluated_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS predictions (
    subject_id     TEXT PRIMARY KEY,
    predicted_edge REAL NOT NULL,
    adjustment     REAL NOT NULL,
    breakdown      TEXT NOT NULL,
    confidence     REAL NOT NULL,
    tier           TEXT NOT NULL,
    stake_fraction REAL NOT NULL,
    stake_usd      REAL NOT NULL,
    source_ids     TEXT NOT NULL,
    recorded_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS outcomes (
    subject_id     TEXT PRIMARY KEY,
    actual_result  TEXT NOT NULL,
    actual_margin  REAL NOT NULL,
    realized_value REAL NOT NULL,
    recorded_at    TEXT NOT NULL,
    FOREIGN KEY (subject_id) REFERENCES predictions(subject_id)
);

CREATE TABLE IF NOT EXISTS source_scores (
    source_id       TEXT PRIMARY KEY,
    accuracy        REAL    NOT NULL,
    latency_ewma_ms REAL    NOT NULL,
    samples         INTEGER NOT NULL,
    updated_at      TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_edge_records_subject ON edge_records(subject_id);
CREATE INDEX IF NOT EXISTS idx_edge_records_evaluated ON edge_records(evaluated_at);
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub edge_records: i64,
    pub predictions: i64,
    pub outcomes: i64,
    pub source_scores: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::EdgeTier;
    use approx::assert_relative_eq;

    fn memory_db() -> Database {
        let conn = Connection::open_in_memory().unwrap();
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations().unwrap();
        db
    }

    fn edge_record(subject_id: &str) -> EdgeRecord {
        EdgeRecord {
            subject_id: subject_id.into(),
            model_price: 3.0,
            market_price: 0.5,
            adjustment: -1.0,
            raw_edge: 1.5,
            tier: EdgeTier::Moderate,
            confidence: 0.7,
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn edge_records_round_trip() {
        let db = memory_db();
        db.insert_edge_record(&edge_record("kc-buf")).unwrap();
        let rows = db.list_recent_edge_records(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tier, EdgeTier::Moderate);
        assert_relative_eq!(rows[0].raw_edge, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn duplicate_prediction_rows_keep_the_first() {
        let db = memory_db();
        let mut p = PredictionRecord {
            subject_id: "kc-buf".into(),
            predicted_edge: 1.5,
            adjustment: -1.0,
            breakdown: Vec::new(),
            confidence: 0.7,
            tier: EdgeTier::Moderate,
            stake_fraction: 0.05,
            stake_usd: 500.0,
            source_ids: vec!["injury-wire".into()],
            recorded_at: Utc::now(),
        };
        db.insert_prediction(&p).unwrap();
        p.predicted_edge = 9.9;
        db.insert_prediction(&p).unwrap();
        let stats = db.get_archive_stats().unwrap();
        assert_eq!(stats.predictions, 1);
    }

    #[test]
    fn source_score_upsert_replaces_snapshot() {
        let db = memory_db();
        let mut score = SourceScore {
            source_id: "injury-wire".into(),
            accuracy: 0.5,
            latency_ewma_ms: 1000.0,
            samples: 1,
            insufficient_sample: true,
        };
        db.upsert_source_score(&score).unwrap();
        score.accuracy = 0.8;
        score.samples = 2;
        db.upsert_source_score(&score).unwrap();
        let stats = db.get_archive_stats().unwrap();
        assert_eq!(stats.source_scores, 1);
    }
}
