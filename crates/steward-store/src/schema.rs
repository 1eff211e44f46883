//! Table definitions
//!
//! Timestamps are epoch milliseconds. JSON columns hold `serde_json` text.

use crate::error::StoreError;
use rusqlite::Connection;
use steward_core::MAX_IMPROVEMENT_ATTEMPTS;

pub(crate) fn configure(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;\
         PRAGMA synchronous=NORMAL;\
         PRAGMA foreign_keys=ON;\
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}

pub(crate) fn create_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS proposals (\
           id INTEGER PRIMARY KEY AUTOINCREMENT,\
           capability TEXT,\
           intent TEXT,\
           parameters TEXT NOT NULL DEFAULT '{{}}',\
           status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN \
             ('pending', 'approved', 'running', 'completed', 'failed', 'rejected')),\
           creator TEXT NOT NULL,\
           created_at INTEGER NOT NULL,\
           reviewer TEXT,\
           reviewed_at INTEGER,\
           review_notes TEXT,\
           risk_level TEXT NOT NULL DEFAULT 'unassessed',\
           claimed_by TEXT,\
           claimed_at INTEGER,\
           resolved_kind TEXT,\
           failure_reason TEXT,\
           finished_at INTEGER,\
           CHECK (capability IS NOT NULL OR intent IS NOT NULL)\
         );\
         CREATE TABLE IF NOT EXISTS results (\
           proposal_id INTEGER PRIMARY KEY REFERENCES proposals(id),\
           analysis_kind TEXT NOT NULL,\
           body TEXT NOT NULL,\
           created_at INTEGER NOT NULL\
         );\
         CREATE TABLE IF NOT EXISTS scores (\
           proposal_id INTEGER PRIMARY KEY REFERENCES proposals(id),\
           capability TEXT NOT NULL,\
           dimensions TEXT NOT NULL,\
           composite REAL,\
           grade TEXT NOT NULL,\
           scored_at INTEGER NOT NULL\
         );\
         CREATE TABLE IF NOT EXISTS improvement_cycles (\
           id INTEGER PRIMARY KEY AUTOINCREMENT,\
           capability TEXT NOT NULL,\
           dimension TEXT NOT NULL,\
           window_id INTEGER NOT NULL,\
           attempt INTEGER NOT NULL CHECK (attempt BETWEEN 1 AND {max_attempts}),\
           before_score REAL NOT NULL,\
           after_score REAL,\
           outcome TEXT NOT NULL DEFAULT 'open',\
           proposal_id INTEGER NOT NULL UNIQUE REFERENCES proposals(id),\
           created_at INTEGER NOT NULL,\
           resolved_at INTEGER,\
           UNIQUE (capability, dimension, window_id, attempt)\
         );\
         CREATE TABLE IF NOT EXISTS completion_counters (\
           capability TEXT PRIMARY KEY,\
           completed INTEGER NOT NULL DEFAULT 0\
         );\
         CREATE TABLE IF NOT EXISTS audit_log (\
           seq INTEGER PRIMARY KEY,\
           event_id TEXT NOT NULL UNIQUE,\
           recorded_at INTEGER NOT NULL,\
           proposal_id INTEGER,\
           kind TEXT NOT NULL,\
           actor TEXT NOT NULL,\
           detail TEXT NOT NULL,\
           prev_hash TEXT NOT NULL,\
           hash TEXT NOT NULL\
         );\
         CREATE INDEX IF NOT EXISTS idx_proposals_status ON proposals(status, created_at);\
         CREATE INDEX IF NOT EXISTS idx_scores_capability ON scores(capability, scored_at);\
         CREATE INDEX IF NOT EXISTS idx_cycles_pair ON improvement_cycles(capability, dimension, window_id);\
         CREATE INDEX IF NOT EXISTS idx_audit_proposal ON audit_log(proposal_id, seq);",
        max_attempts = MAX_IMPROVEMENT_ATTEMPTS,
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 6);
    }

    #[test]
    fn attempt_ceiling_is_enforced_by_the_schema() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO proposals (capability, creator, created_at) VALUES ('StockoutAnalyzer', 'system', 0)",
            [],
        )
        .unwrap();
        let err = conn.execute(
            "INSERT INTO improvement_cycles \
             (capability, dimension, window_id, attempt, before_score, proposal_id, created_at) \
             VALUES ('StockoutAnalyzer', 'brevity', 1, 4, 3.0, 1, 0)",
            [],
        );
        assert!(err.is_err());
    }
}
