use crate::errors::ErrorKind;
use crate::loader::CsvCacheStore;
use crate::models::{OhlcvBar, OhlcvSeries, ScanUnit};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use duckdb::{params, AccessMode, Config, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

// ── Store abstraction ─────────────────────────────────────────────────────────

/// Where daily series come from. Implementations must be shareable between
/// scan tasks.
pub trait SeriesStore: Send + Sync {
    /// Series for `symbol` between `start` and `end` (inclusive).
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<OhlcvSeries, ErrorKind>;

    /// Every (symbol, range) this store can serve.
    fn discover_units(&self) -> Result<Vec<ScanUnit>>;

    /// How another process can reopen this store, if it can.
    fn source(&self) -> Option<StoreSource> {
        None
    }
}

/// Serializable description of a store, handed to worker processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum StoreSource {
    CsvDir(PathBuf),
    DuckDb(PathBuf),
}

impl StoreSource {
    pub fn open(&self) -> Result<Arc<dyn SeriesStore>> {
        let store: Arc<dyn SeriesStore> = match self {
            Self::CsvDir(dir) => Arc::new(CsvCacheStore::new(dir)),
            Self::DuckDb(path) => Arc::new(Repository::open_read_only(path)?),
        };
        Ok(store)
    }
}

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS daily_bars (
    symbol      VARCHAR  NOT NULL,
    date        DATE     NOT NULL,
    open        DOUBLE   NOT NULL,
    high        DOUBLE   NOT NULL,
    low         DOUBLE   NOT NULL,
    close       DOUBLE   NOT NULL,
    volume      BIGINT   NOT NULL,
    PRIMARY KEY (symbol, date)
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_bars_date   ON daily_bars (date);
CREATE INDEX IF NOT EXISTS idx_bars_symbol ON daily_bars (symbol);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

/// DuckDB-backed series store.
pub struct Repository {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn), path: Some(path.to_path_buf()) })
    }

    /// Read-only handle; several processes may hold one at the same time.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(path, config)
            .with_context(|| format!("Failed to open DuckDB read-only at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn), path: Some(path.to_path_buf()) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?), path: None })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("DuckDB connection mutex poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![chrono::Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Daily bars ────────────────────────────────────────────────────────────

    /// Upsert bars — idempotent, safe to re-run on same data.
    pub fn upsert_bars(&self, symbol: &str, bars: &[OhlcvBar]) -> Result<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO daily_bars (symbol, date, open, high, low, close, volume)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (symbol, date) DO UPDATE SET
                open   = excluded.open,
                high   = excluded.high,
                low    = excluded.low,
                close  = excluded.close,
                volume = excluded.volume
        "#;

        for bar in bars {
            let volume = i64::try_from(bar.volume)
                .with_context(|| format!("volume overflow {} {}", symbol, bar.date))?;
            tx.execute(sql, params![symbol, bar.date, bar.open, bar.high, bar.low, bar.close, volume])
                .with_context(|| format!("insert bar {} {}", symbol, bar.date))?;
        }

        tx.commit()?;
        Ok(bars.len())
    }

    fn query_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<(NaiveDate, f64, f64, f64, f64, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT date, open, high, low, close, volume FROM daily_bars
               WHERE symbol = ? AND date BETWEEN ? AND ?
               ORDER BY date"#,
        )?;
        let rows = stmt
            .query_map(params![symbol, start, end], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn bar_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM daily_bars")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn symbol_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(DISTINCT symbol) FROM daily_bars")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT MIN(date), MAX(date) FROM daily_bars")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }
}

impl SeriesStore for Repository {
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<OhlcvSeries, ErrorKind> {
        let rows = self
            .query_bars(symbol, start, end)
            .map_err(|e| ErrorKind::DataUnavailable(format!("{} query failed: {:#}", symbol, e)))?;

        if rows.is_empty() {
            return Err(ErrorKind::DataUnavailable(format!("no bars for {} in {}..{}", symbol, start, end)));
        }

        let bars = rows
            .into_iter()
            .map(|(date, open, high, low, close, volume)| {
                let volume = u64::try_from(volume)
                    .map_err(|_| ErrorKind::DataMalformed(format!("{} {}: negative volume", symbol, date)))?;
                Ok(OhlcvBar { date, open, high, low, close, volume })
            })
            .collect::<Result<Vec<_>, ErrorKind>>()?;

        OhlcvSeries::new(bars)
    }

    fn discover_units(&self) -> Result<Vec<ScanUnit>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT symbol, MIN(date), MAX(date) FROM daily_bars GROUP BY symbol ORDER BY symbol",
        )?;
        let units = stmt
            .query_map([], |r| Ok(ScanUnit::new(r.get::<_, String>(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    fn source(&self) -> Option<StoreSource> {
        self.path.clone().map(StoreSource::DuckDb)
    }
}

// ── In-memory store (tests) ───────────────────────────────────────────────────
