//! SQLite persistence for the fundamentals pipeline.
//!
//! Tables:
//! - `financial_periods`: normalized periods, upserted on (symbol, year, kind, quarter)
//! - `pillar_analyses`: Eight Pillars results, one per (symbol, analysis date)
//! - `scan_jobs`: batch scan jobs; a partial unique index allows one `running` row
//! - `pillar_scan_rows`: per-symbol scan results, upserted on (scan_id, symbol)
//! - `saved_valuations`: user-owned DCF snapshots
//! - `universe_cache`: index constituents with fetch time
//!
//! Every write is an `INSERT OR REPLACE` on the natural key, so overlapping
//! writers converge on the last full row instead of conflicting.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{FinancialPeriod, PeriodKind};
use crate::scanner::types::{
    Page, PillarScanRow, ScanJob, ScanResultsQuery, ScanStatus, PILLAR_COUNT,
};
use crate::valuation::types::SavedValuation;

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS financial_periods (
    symbol TEXT NOT NULL,
    fiscal_year INTEGER NOT NULL,
    period_kind TEXT NOT NULL,
    fiscal_quarter INTEGER NOT NULL DEFAULT 0,
    revenue REAL,
    net_income REAL,
    operating_income REAL,
    gross_profit REAL,
    total_assets REAL,
    total_liabilities REAL,
    total_equity REAL,
    long_term_debt REAL,
    short_term_debt REAL,
    total_debt REAL,
    cash REAL,
    free_cash_flow REAL,
    operating_cash_flow REAL,
    capital_expenditures REAL,
    dividends_paid REAL,
    shares_outstanding REAL,
    shares_basic REAL,
    shares_diluted REAL,
    eps REAL,
    filing_date TEXT,
    fetched_at TEXT NOT NULL,
    period_end TEXT,
    UNIQUE(symbol, fiscal_year, period_kind, fiscal_quarter)
);

CREATE INDEX IF NOT EXISTS idx_periods_symbol_kind
ON financial_periods(symbol, period_kind, fiscal_year DESC);

CREATE TABLE IF NOT EXISTS pillar_analyses (
    symbol TEXT NOT NULL,
    analysis_date TEXT NOT NULL,
    result_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(symbol, analysis_date)
);

CREATE TABLE IF NOT EXISTS scan_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_date TEXT NOT NULL,
    status TEXT NOT NULL,
    total_stocks INTEGER NOT NULL DEFAULT 0,
    stocks_analyzed INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    duration_seconds INTEGER,
    stocks_processed INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_scan_jobs_single_running
ON scan_jobs(status) WHERE status = 'running';

CREATE TABLE IF NOT EXISTS pillar_scan_rows (
    scan_id INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    pillar1_pass INTEGER NOT NULL,
    pillar2_pass INTEGER NOT NULL,
    pillar3_pass INTEGER NOT NULL,
    pillar4_pass INTEGER NOT NULL,
    pillar5_pass INTEGER NOT NULL,
    pillar6_pass INTEGER NOT NULL,
    pillar7_pass INTEGER NOT NULL,
    pillar8_pass INTEGER NOT NULL,
    pillar1_score INTEGER NOT NULL,
    pillar2_score INTEGER NOT NULL,
    pillar3_score INTEGER NOT NULL,
    pillar4_score INTEGER NOT NULL,
    pillar5_score INTEGER NOT NULL,
    pillar6_score INTEGER NOT NULL,
    pillar7_score INTEGER NOT NULL,
    pillar8_score INTEGER NOT NULL,
    pillars_passed INTEGER NOT NULL,
    total_score INTEGER NOT NULL,
    current_price REAL,
    market_cap REAL,
    sector TEXT,
    company_name TEXT,
    analyzed_at TEXT NOT NULL,
    UNIQUE(scan_id, symbol)
);

CREATE INDEX IF NOT EXISTS idx_scan_rows_scan_score
ON pillar_scan_rows(scan_id, total_score DESC);

CREATE TABLE IF NOT EXISTS saved_valuations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    result_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_saved_valuations_user
ON saved_valuations(user_id, created_at DESC);

CREATE TABLE IF NOT EXISTS universe_cache (
    index_symbol TEXT NOT NULL,
    symbol TEXT NOT NULL,
    position INTEGER NOT NULL,
    fetched_at TEXT NOT NULL,
    UNIQUE(index_symbol, symbol)
);
"#;

const PERIOD_COLUMNS: &str = "symbol, fiscal_year, period_kind, fiscal_quarter, revenue, \
    net_income, operating_income, gross_profit, total_assets, total_liabilities, total_equity, \
    long_term_debt, short_term_debt, total_debt, cash, free_cash_flow, operating_cash_flow, \
    capital_expenditures, dividends_paid, shares_outstanding, shares_basic, shares_diluted, eps, \
    filing_date, fetched_at, period_end";

const SCAN_JOB_COLUMNS: &str = "id, scan_date, status, total_stocks, stocks_analyzed, \
    error_message, created_at, completed_at, duration_seconds, stocks_processed";

/// Unreadable timestamps become the oldest instant, so the row reads as stale.
fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!(value = s, error = %e, "Unparseable stored timestamp");
            DateTime::<Utc>::MIN_UTC
        })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

// ============================================================================
// Fundamental Store
// ============================================================================

/// SQLite store shared by the cache, analyzers and scanner.
pub struct FundamentalStore {
    /// rusqlite::Connection is Send but not Sync, so it lives behind a Mutex
    db: Arc<Mutex<Connection>>,
}

impl FundamentalStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path).context("Failed to open fundamentals database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set database pragmas")?;

        let store = Self::from_connection(conn)?;
        info!(db_path = %path.display(), "Initialized fundamentals store");
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create database tables")?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    // ========================================================================
    // Financial Periods
    // ========================================================================

    /// Upsert whole period rows on their natural key.
    pub async fn upsert_periods(&self, periods: &[FinancialPeriod]) -> Result<usize> {
        if periods.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        {
            let sql = format!(
                "INSERT OR REPLACE INTO financial_periods ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                  ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
                PERIOD_COLUMNS
            );
            let mut stmt = tx.prepare(&sql)?;
            for p in periods {
                stmt.execute(params![
                    p.symbol,
                    p.fiscal_year,
                    p.period_kind.as_str(),
                    p.quarter_key(),
                    p.revenue,
                    p.net_income,
                    p.operating_income,
                    p.gross_profit,
                    p.total_assets,
                    p.total_liabilities,
                    p.total_equity,
                    p.long_term_debt,
                    p.short_term_debt,
                    p.total_debt,
                    p.cash,
                    p.free_cash_flow,
                    p.operating_cash_flow,
                    p.capital_expenditures,
                    p.dividends_paid,
                    p.shares_outstanding,
                    p.shares_basic,
                    p.shares_diluted,
                    p.eps,
                    p.filing_date.map(|d| d.to_string()),
                    p.fetched_at.to_rfc3339(),
                    p.period_end.map(|d| d.to_string()),
                ])?;
            }
        }
        tx.commit()?;

        debug!(count = periods.len(), "Upserted financial periods");
        Ok(periods.len())
    }

    /// Cached periods for a symbol, most recent first.
    pub async fn get_periods(
        &self,
        symbol: &str,
        kind: PeriodKind,
        limit: usize,
    ) -> Result<Vec<FinancialPeriod>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM financial_periods WHERE symbol = ?1 AND period_kind = ?2 \
             ORDER BY fiscal_year DESC, fiscal_quarter DESC LIMIT ?3",
            PERIOD_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![symbol, kind.as_str(), limit as i64],
                Self::row_to_period,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn row_to_period(row: &rusqlite::Row) -> rusqlite::Result<FinancialPeriod> {
        let kind: String = row.get(2)?;
        let quarter: i64 = row.get(3)?;
        let filing_date: Option<String> = row.get(23)?;
        let fetched_at: String = row.get(24)?;
        let period_end: Option<String> = row.get(25)?;

        Ok(FinancialPeriod {
            symbol: row.get(0)?,
            fiscal_year: row.get(1)?,
            period_kind: PeriodKind::parse(&kind).unwrap_or(PeriodKind::Annual),
            fiscal_quarter: (quarter > 0).then_some(quarter as u8),
            revenue: row.get(4)?,
            net_income: row.get(5)?,
            operating_income: row.get(6)?,
            gross_profit: row.get(7)?,
            total_assets: row.get(8)?,
            total_liabilities: row.get(9)?,
            total_equity: row.get(10)?,
            long_term_debt: row.get(11)?,
            short_term_debt: row.get(12)?,
            total_debt: row.get(13)?,
            cash: row.get(14)?,
            free_cash_flow: row.get(15)?,
            operating_cash_flow: row.get(16)?,
            capital_expenditures: row.get(17)?,
            dividends_paid: row.get(18)?,
            shares_outstanding: row.get(19)?,
            shares_basic: row.get(20)?,
            shares_diluted: row.get(21)?,
            eps: row.get(22)?,
            filing_date: filing_date.as_deref().and_then(parse_date),
            period_end: period_end.as_deref().and_then(parse_date),
            fetched_at: parse_timestamp(&fetched_at),
        })
    }

    // ========================================================================
    // Pillar Analyses
    // ========================================================================

    /// Cached analysis for (symbol, date) if it was written after `fresh_after`.
    pub async fn get_pillar_analysis<T: DeserializeOwned>(
        &self,
        symbol: &str,
        analysis_date: NaiveDate,
        fresh_after: DateTime<Utc>,
    ) -> Result<Option<T>> {
        let db = self.db.lock().await;

        let row: Option<(String, String)> = db
            .query_row(
                "SELECT result_json, created_at FROM pillar_analyses \
                 WHERE symbol = ?1 AND analysis_date = ?2",
                params![symbol, analysis_date.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((json, created_at)) => {
                if parse_timestamp(&created_at) < fresh_after {
                    debug!(symbol, "Pillar analysis cache expired");
                    return Ok(None);
                }
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    /// Upsert an analysis for (symbol, date).
    pub async fn save_pillar_analysis<T: Serialize>(
        &self,
        symbol: &str,
        analysis_date: NaiveDate,
        analysis: &T,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let json = serde_json::to_string(analysis)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO pillar_analyses \
             (symbol, analysis_date, result_json, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![symbol, analysis_date.to_string(), json, created_at.to_rfc3339()],
        )?;
        debug!(symbol, "Saved pillar analysis");
        Ok(())
    }

    // ========================================================================
    // Scan Jobs
    // ========================================================================

    /// Insert a new `running` job.
    ///
    /// Returns `None` when another job already holds the running slot.
    pub async fn try_start_scan_job(&self, now: DateTime<Utc>) -> Result<Option<ScanJob>> {
        let db = self.db.lock().await;
        let inserted = db.execute(
            "INSERT INTO scan_jobs (scan_date, status, created_at) VALUES (?1, ?2, ?3)",
            params![
                now.date_naive().to_string(),
                ScanStatus::Running.as_str(),
                now.to_rfc3339()
            ],
        );

        match inserted {
            Ok(_) => {
                let id = db.last_insert_rowid();
                let sql = format!("SELECT {} FROM scan_jobs WHERE id = ?1", SCAN_JOB_COLUMNS);
                let job = db.query_row(&sql, params![id], Self::row_to_scan_job)?;
                Ok(Some(job))
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_scan_job(&self, id: i64) -> Result<Option<ScanJob>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM scan_jobs WHERE id = ?1", SCAN_JOB_COLUMNS);
        Ok(db.query_row(&sql, params![id], Self::row_to_scan_job).optional()?)
    }

    /// All jobs currently marked running.
    pub async fn running_scan_jobs(&self) -> Result<Vec<ScanJob>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM scan_jobs WHERE status = 'running' ORDER BY id",
            SCAN_JOB_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let jobs = stmt
            .query_map([], Self::row_to_scan_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Most recently created job of any status.
    pub async fn latest_scan_job(&self) -> Result<Option<ScanJob>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM scan_jobs ORDER BY id DESC LIMIT 1", SCAN_JOB_COLUMNS);
        Ok(db.query_row(&sql, [], Self::row_to_scan_job).optional()?)
    }

    /// Most recent job with the given status.
    pub async fn latest_scan_job_with_status(&self, status: ScanStatus) -> Result<Option<ScanJob>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM scan_jobs WHERE status = ?1 ORDER BY id DESC LIMIT 1",
            SCAN_JOB_COLUMNS
        );
        Ok(db
            .query_row(&sql, params![status.as_str()], Self::row_to_scan_job)
            .optional()?)
    }

    pub async fn set_scan_total(&self, id: i64, total: usize) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE scan_jobs SET total_stocks = ?1 WHERE id = ?2",
            params![total as i64, id],
        )?;
        Ok(())
    }

    /// Record progress: symbols scored so far, and symbols attempted so far.
    pub async fn update_scan_progress(
        &self,
        id: i64,
        stocks_analyzed: usize,
        stocks_processed: usize,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE scan_jobs SET stocks_analyzed = ?1, stocks_processed = ?2 WHERE id = ?3",
            params![stocks_analyzed as i64, stocks_processed as i64, id],
        )?;
        Ok(())
    }

    /// Mark a running job completed. Returns false if it was no longer running.
    pub async fn complete_scan_job(
        &self,
        id: i64,
        stocks_analyzed: usize,
        completed_at: DateTime<Utc>,
        duration_seconds: i64,
        message: Option<&str>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE scan_jobs SET status = 'completed', stocks_analyzed = ?1, completed_at = ?2, \
             duration_seconds = ?3, error_message = ?4 WHERE id = ?5 AND status = 'running'",
            params![
                stocks_analyzed as i64,
                completed_at.to_rfc3339(),
                duration_seconds,
                message,
                id
            ],
        )?;
        Ok(changed > 0)
    }

    /// Mark a running job failed. Returns false if it was no longer running.
    pub async fn fail_scan_job(
        &self,
        id: i64,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let created_at: Option<String> = db
            .query_row(
                "SELECT created_at FROM scan_jobs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let duration = created_at
            .map(|c| (completed_at - parse_timestamp(&c)).num_seconds().max(0))
            .unwrap_or(0);

        let changed = db.execute(
            "UPDATE scan_jobs SET status = 'failed', error_message = ?1, completed_at = ?2, \
             duration_seconds = ?3 WHERE id = ?4 AND status = 'running'",
            params![message, completed_at.to_rfc3339(), duration, id],
        )?;
        Ok(changed > 0)
    }

    fn row_to_scan_job(row: &rusqlite::Row) -> rusqlite::Result<ScanJob> {
        let scan_date: String = row.get(1)?;
        let status: String = row.get(2)?;
        let total: i64 = row.get(3)?;
        let analyzed: i64 = row.get(4)?;
        let created_at: String = row.get(6)?;
        let completed_at: Option<String> = row.get(7)?;
        let processed: i64 = row.get(9)?;

        Ok(ScanJob {
            id: row.get(0)?,
            scan_date: parse_date(&scan_date).unwrap_or_else(|| Utc::now().date_naive()),
            status: ScanStatus::parse(&status),
            total_stocks: total.max(0) as usize,
            stocks_analyzed: analyzed.max(0) as usize,
            stocks_processed: processed.max(0) as usize,
            error_message: row.get(5)?,
            created_at: parse_timestamp(&created_at),
            completed_at: completed_at.as_deref().map(parse_timestamp),
            duration_seconds: row.get(8)?,
        })
    }

    // ========================================================================
    // Scan Rows
    // ========================================================================

    /// Upsert one symbol's result within a scan.
    pub async fn upsert_scan_row(&self, row: &PillarScanRow) -> Result<()> {
        let db = self.db.lock().await;
        let p = &row.passes;
        let s = &row.scores;
        db.execute(
            "INSERT OR REPLACE INTO pillar_scan_rows (scan_id, symbol, \
             pillar1_pass, pillar2_pass, pillar3_pass, pillar4_pass, \
             pillar5_pass, pillar6_pass, pillar7_pass, pillar8_pass, \
             pillar1_score, pillar2_score, pillar3_score, pillar4_score, \
             pillar5_score, pillar6_score, pillar7_score, pillar8_score, \
             pillars_passed, total_score, current_price, market_cap, sector, company_name, \
             analyzed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
             ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
            params![
                row.scan_id,
                row.symbol,
                p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7],
                s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7],
                row.pillars_passed,
                row.total_score,
                row.current_price,
                row.market_cap,
                row.sector,
                row.company_name,
                row.analyzed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Filtered, sorted, paginated scan rows.
    pub async fn query_scan_rows(
        &self,
        scan_id: i64,
        query: &ScanResultsQuery,
    ) -> Result<Page<PillarScanRow>> {
        let mut filter = String::from("scan_id = ?1");
        for pillar in &query.pillars {
            // Only 1..=8 reach here; the column name is never user text
            if (1..=PILLAR_COUNT as u8).contains(pillar) {
                filter.push_str(&format!(" AND pillar{}_pass = 1", pillar));
            }
        }

        let per_page = query.per_page();
        let page = query.page();
        let offset = i64::try_from((page - 1).saturating_mul(per_page)).unwrap_or(i64::MAX);

        let db = self.db.lock().await;
        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM pillar_scan_rows WHERE {}", filter),
            params![scan_id],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT * FROM pillar_scan_rows WHERE {} ORDER BY {} {}, symbol ASC LIMIT ?2 OFFSET ?3",
            filter,
            query.sort.column(),
            query.order.sql()
        );
        let mut stmt = db.prepare(&sql)?;
        let items = stmt
            .query_map(
                params![scan_id, per_page as i64, offset],
                Self::row_to_scan_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page::new(items, total.max(0) as usize, page, per_page))
    }

    fn row_to_scan_row(row: &rusqlite::Row) -> rusqlite::Result<PillarScanRow> {
        let mut passes = [false; PILLAR_COUNT];
        let mut scores = [1u8; PILLAR_COUNT];
        for i in 0..PILLAR_COUNT {
            passes[i] = row.get(2 + i)?;
            scores[i] = row.get(2 + PILLAR_COUNT + i)?;
        }
        let analyzed_at: String = row.get(24)?;

        Ok(PillarScanRow {
            scan_id: row.get(0)?,
            symbol: row.get(1)?,
            passes,
            scores,
            pillars_passed: row.get(18)?,
            total_score: row.get(19)?,
            current_price: row.get(20)?,
            market_cap: row.get(21)?,
            sector: row.get(22)?,
            company_name: row.get(23)?,
            analyzed_at: parse_timestamp(&analyzed_at),
        })
    }

    // ========================================================================
    // Saved Valuations
    // ========================================================================

    pub async fn save_valuation(&self, saved: &SavedValuation) -> Result<()> {
        let json = serde_json::to_string(&saved.result)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO saved_valuations \
             (id, user_id, symbol, name, result_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                saved.id,
                saved.user_id,
                saved.symbol,
                saved.name,
                json,
                saved.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// A user's saved valuations, newest first.
    pub async fn list_valuations(
        &self,
        user_id: &str,
        symbol: Option<&str>,
    ) -> Result<Vec<SavedValuation>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, symbol, name, result_json, created_at FROM saved_valuations \
             WHERE user_id = ?1 AND (?2 IS NULL OR symbol = ?2) ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id, symbol], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(Self::tuple_to_saved_valuation).collect()
    }

    /// One saved valuation, only if owned by `user_id`.
    pub async fn get_valuation(&self, user_id: &str, id: &str) -> Result<Option<SavedValuation>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT id, user_id, symbol, name, result_json, created_at FROM saved_valuations \
                 WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(Self::tuple_to_saved_valuation).transpose()
    }

    /// Delete a saved valuation owned by `user_id`. Returns whether a row was removed.
    pub async fn delete_valuation(&self, user_id: &str, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "DELETE FROM saved_valuations WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }

    fn tuple_to_saved_valuation(
        (id, user_id, symbol, name, json, created_at): (
            String,
            String,
            String,
            String,
            String,
            String,
        ),
    ) -> Result<SavedValuation> {
        Ok(SavedValuation {
            id,
            user_id,
            symbol,
            name,
            result: serde_json::from_str(&json).context("Corrupt saved valuation")?,
            created_at: parse_timestamp(&created_at),
        })
    }

    // ========================================================================
    // Universe Cache
    // ========================================================================

    /// Replace the cached constituents of an index.
    pub async fn save_universe(
        &self,
        index_symbol: &str,
        symbols: &[String],
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM universe_cache WHERE index_symbol = ?1",
            params![index_symbol],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO universe_cache \
                 (index_symbol, symbol, position, fetched_at) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let fetched = fetched_at.to_rfc3339();
            for (i, symbol) in symbols.iter().enumerate() {
                stmt.execute(params![index_symbol, symbol, i as i64, fetched])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Cached constituents fetched after `fresh_after`, in original order.
    pub async fn get_universe(
        &self,
        index_symbol: &str,
        fresh_after: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT symbol, fetched_at FROM universe_cache \
             WHERE index_symbol = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![index_symbol], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter(|(_, fetched_at)| parse_timestamp(fetched_at) >= fresh_after)
            .map(|(symbol, _)| symbol)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::types::{SortField, SortOrder};
    use chrono::Duration;

    fn period(symbol: &str, year: i32, revenue: f64, fetched_at: DateTime<Utc>) -> FinancialPeriod {
        let mut p = FinancialPeriod::new(symbol, year, PeriodKind::Annual, fetched_at);
        p.revenue = Some(revenue);
        p
    }

    fn scan_row(scan_id: i64, symbol: &str, passes: [bool; 8], total: u32) -> PillarScanRow {
        PillarScanRow {
            scan_id,
            symbol: symbol.to_string(),
            passes,
            scores: [3; 8],
            pillars_passed: passes.iter().filter(|p| **p).count() as u8,
            total_score: total,
            current_price: Some(10.0),
            market_cap: Some(1e9),
            sector: Some("Technology".into()),
            company_name: Some(format!("{} Inc", symbol)),
            analyzed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FundamentalStore::open(dir.path().join("nested").join("f.db")).unwrap();
        let now = Utc::now();
        store.upsert_periods(&[period("AAPL", 2023, 1.0, now)]).await.unwrap();
        assert_eq!(store.get_periods("AAPL", PeriodKind::Annual, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_timestamps_read_as_stale() {
        let store = FundamentalStore::in_memory().unwrap();
        store
            .upsert_periods(&[period("IBM", 2023, 1.0, Utc::now())])
            .await
            .unwrap();
        let job = store.try_start_scan_job(Utc::now()).await.unwrap().unwrap();
        {
            let db = store.db.lock().await;
            db.execute("UPDATE financial_periods SET fetched_at = 'garbage'", [])
                .unwrap();
            db.execute("UPDATE scan_jobs SET created_at = ''", []).unwrap();
        }

        let rows = store.get_periods("IBM", PeriodKind::Annual, 5).await.unwrap();
        assert_eq!(rows[0].fetched_at, DateTime::<Utc>::MIN_UTC);
        assert!(Utc::now() - rows[0].fetched_at > Duration::hours(24));

        let job = store.get_scan_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.created_at, DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn test_period_end_roundtrip() {
        let store = FundamentalStore::in_memory().unwrap();
        let mut p = period("MSFT", 2024, 1.0, Utc::now());
        p.period_end = NaiveDate::from_ymd_opt(2024, 6, 30);
        store.upsert_periods(&[p]).await.unwrap();

        let rows = store.get_periods("MSFT", PeriodKind::Annual, 1).await.unwrap();
        assert_eq!(rows[0].period_end, NaiveDate::from_ymd_opt(2024, 6, 30));
    }

    #[tokio::test]
    async fn test_period_upsert_replaces_whole_row() {
        let store = FundamentalStore::in_memory().unwrap();
        let now = Utc::now();

        let mut first = period("MSFT", 2023, 100.0, now - Duration::hours(30));
        first.net_income = Some(10.0);
        store.upsert_periods(&[first]).await.unwrap();

        let second = period("MSFT", 2023, 120.0, now);
        store.upsert_periods(&[second]).await.unwrap();

        let rows = store.get_periods("MSFT", PeriodKind::Annual, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].revenue, Some(120.0));
        assert_eq!(rows[0].net_income, None);
    }

    #[tokio::test]
    async fn test_periods_ordered_and_limited() {
        let store = FundamentalStore::in_memory().unwrap();
        let now = Utc::now();
        let periods: Vec<_> = (2018..=2023).map(|y| period("KO", y, y as f64, now)).collect();
        store.upsert_periods(&periods).await.unwrap();

        let rows = store.get_periods("KO", PeriodKind::Annual, 3).await.unwrap();
        let years: Vec<i32> = rows.iter().map(|p| p.fiscal_year).collect();
        assert_eq!(years, vec![2023, 2022, 2021]);
        assert!(store.get_periods("KO", PeriodKind::Quarterly, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quarterly_and_annual_keys_coexist() {
        let store = FundamentalStore::in_memory().unwrap();
        let now = Utc::now();
        let annual = period("T", 2023, 1.0, now);
        let mut q1 = FinancialPeriod::new("T", 2023, PeriodKind::Quarterly, now);
        q1.fiscal_quarter = Some(1);
        let mut q2 = q1.clone();
        q2.fiscal_quarter = Some(2);
        store.upsert_periods(&[annual, q1, q2]).await.unwrap();

        let quarters = store.get_periods("T", PeriodKind::Quarterly, 10).await.unwrap();
        assert_eq!(quarters.len(), 2);
        assert_eq!(quarters[0].fiscal_quarter, Some(2));
    }

    #[tokio::test]
    async fn test_pillar_analysis_freshness() {
        let store = FundamentalStore::in_memory().unwrap();
        let now = Utc::now();
        let today = now.date_naive();
        let payload = serde_json::json!({"symbol": "AAPL", "pillars_passed": 6});

        store
            .save_pillar_analysis("AAPL", today, &payload, now - Duration::hours(2))
            .await
            .unwrap();

        let fresh: Option<serde_json::Value> = store
            .get_pillar_analysis("AAPL", today, now - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(fresh.unwrap()["pillars_passed"], 6);

        let stale: Option<serde_json::Value> = store
            .get_pillar_analysis("AAPL", today, now - Duration::hours(1))
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn test_single_running_job() {
        let store = FundamentalStore::in_memory().unwrap();
        let now = Utc::now();

        let job = store.try_start_scan_job(now).await.unwrap().unwrap();
        assert_eq!(job.status, ScanStatus::Running);
        assert!(store.try_start_scan_job(now).await.unwrap().is_none());

        assert!(store.complete_scan_job(job.id, 5, now, 12, None).await.unwrap());
        assert!(!store.complete_scan_job(job.id, 5, now, 12, None).await.unwrap());

        let next = store.try_start_scan_job(now).await.unwrap().unwrap();
        assert!(next.id > job.id);
    }

    #[tokio::test]
    async fn test_fail_scan_job_records_message() {
        let store = FundamentalStore::in_memory().unwrap();
        let start = Utc::now() - Duration::hours(7);
        let job = store.try_start_scan_job(start).await.unwrap().unwrap();

        assert!(store.fail_scan_job(job.id, "stuck", Utc::now()).await.unwrap());
        let job = store.get_scan_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, ScanStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("stuck"));
        assert!(job.duration_seconds.unwrap() >= 7 * 3600 - 5);
        assert!(store.running_scan_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_rows_filter_sort_paginate() {
        let store = FundamentalStore::in_memory().unwrap();
        let all = [true; 8];
        let mut no_p8 = [true; 8];
        no_p8[7] = false;

        store.upsert_scan_row(&scan_row(1, "AAA", all, 30)).await.unwrap();
        store.upsert_scan_row(&scan_row(1, "BBB", no_p8, 35)).await.unwrap();
        store.upsert_scan_row(&scan_row(1, "CCC", all, 25)).await.unwrap();
        store.upsert_scan_row(&scan_row(2, "DDD", all, 40)).await.unwrap();
        // Upsert replaces
        store.upsert_scan_row(&scan_row(1, "CCC", all, 28)).await.unwrap();

        let query = ScanResultsQuery {
            scan_id: None,
            pillars: vec![1, 8],
            page: Some(1),
            per_page: Some(10),
            sort: SortField::TotalScore,
            order: SortOrder::Desc,
        };
        let page = store.query_scan_rows(1, &query).await.unwrap();
        assert_eq!(page.total, 2);
        let symbols: Vec<&str> = page.items.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAA", "CCC"]);
        assert_eq!(page.items[1].total_score, 28);

        let query = ScanResultsQuery {
            pillars: vec![],
            page: Some(2),
            per_page: Some(2),
            ..query
        };
        let page = store.query_scan_rows(1, &query).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].symbol, "CCC");
    }

    #[tokio::test]
    async fn test_universe_cache_freshness_and_order() {
        let store = FundamentalStore::in_memory().unwrap();
        let now = Utc::now();
        let symbols = vec!["ZZZ".to_string(), "AAA".to_string()];
        store.save_universe("^RUT", &symbols, now - Duration::days(2)).await.unwrap();

        let fresh = store.get_universe("^RUT", now - Duration::days(7)).await.unwrap();
        assert_eq!(fresh, symbols);
        let stale = store.get_universe("^RUT", now - Duration::days(1)).await.unwrap();
        assert!(stale.is_empty());
    }
}
