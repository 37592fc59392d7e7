// src/result_db.rs

use crate::analyze::AnalysisReport;
use crate::error::{FipError, Result};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub struct ResultStore {
    conn: Connection,
}

/// One row of the analysis history.
#[derive(Debug, Clone)]
pub struct StoredAnalysis {
    pub uid: String,
    pub patient_name: Option<String>,
    pub age: Option<String>,
    pub collection_date: Option<String>,
    pub source: Option<String>,
    pub risk_percentage: u32,
    pub risk_level: String,
    pub analysed_at: String,
    /// Full `AnalysisReport` as JSON.
    pub report_json: String,
}

impl StoredAnalysis {
    pub fn report(&self) -> Result<AnalysisReport> {
        Ok(serde_json::from_str(&self.report_json)?)
    }
}

const SELECT_COLUMNS: &str = "uid, patient_name, age, collection_date, source, \
     risk_percentage, risk_level, analysed_at, report_json";

impl ResultStore {
    /// Open (or create) the SQLite store, creating parent directories.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS analyses (
                uid TEXT PRIMARY KEY,
                patient_name TEXT,
                age TEXT,
                collection_date TEXT,
                source TEXT,
                risk_percentage INTEGER NOT NULL,
                risk_level TEXT NOT NULL,
                analysed_at TEXT NOT NULL,
                report_json TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_analyses_analysed_at ON analyses(analysed_at)",
            [],
        )?;

        info!(path = %db_path.display(), "Result store initialized");
        Ok(Self { conn })
    }

    /// Stable ID of a patient sample: SHA-256 over name, age and collection date.
    pub fn generate_uid(name: &str, age: &str, collection_date: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(age.as_bytes());
        hasher.update(collection_date.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn uid_for(report: &AnalysisReport) -> String {
        let p = &report.lab.patient;
        Self::generate_uid(
            p.name.as_deref().unwrap_or_default(),
            p.age.as_deref().unwrap_or_default(),
            p.collection_date.as_deref().unwrap_or_default(),
        )
    }

    /// Insert an analysis, replacing an earlier one of the same sample.
    pub fn upsert(&self, report: &AnalysisReport) -> Result<String> {
        let uid = Self::uid_for(report);
        let json = serde_json::to_string(report)?;
        let p = &report.lab.patient;

        self.conn.execute(
            "INSERT INTO analyses (uid, patient_name, age, collection_date, source,
                 risk_percentage, risk_level, analysed_at, report_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(uid) DO UPDATE SET
                 source = excluded.source,
                 risk_percentage = excluded.risk_percentage,
                 risk_level = excluded.risk_level,
                 analysed_at = excluded.analysed_at,
                 report_json = excluded.report_json",
            params![
                uid,
                p.name,
                p.age,
                p.collection_date,
                report.source,
                report.risk.percentage,
                report.risk.level.label(),
                report.analysed_at,
                json,
            ],
        )?;
        debug!(uid = %uid, risk = report.risk.percentage, "Analysis stored");
        Ok(uid)
    }

    fn row_to_analysis(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredAnalysis> {
        Ok(StoredAnalysis {
            uid: row.get(0)?,
            patient_name: row.get(1)?,
            age: row.get(2)?,
            collection_date: row.get(3)?,
            source: row.get(4)?,
            risk_percentage: row.get(5)?,
            risk_level: row.get(6)?,
            analysed_at: row.get(7)?,
            report_json: row.get(8)?,
        })
    }

    pub fn get(&self, uid: &str) -> Result<Option<StoredAnalysis>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM analyses WHERE uid = ?1"),
                params![uid],
                Self::row_to_analysis,
            )
            .optional()?;
        Ok(row)
    }

    /// The stored report, or `FipError::NotFound`.
    pub fn get_report(&self, uid: &str) -> Result<AnalysisReport> {
        self.get(uid)?
            .ok_or_else(|| FipError::NotFound(uid.to_string()))?
            .report()
    }

    /// Most recent analyses first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<StoredAnalysis>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM analyses ORDER BY analysed_at DESC, uid LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_analysis)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, uid: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM analyses WHERE uid = ?1", params![uid])?;
        Ok(removed > 0)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))?)
    }
}
