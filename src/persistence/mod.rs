//! SQLite journal of spread samples and executed trades.
//!
//! Journaling is fire-and-forget from the engine's point of view: the
//! [`TradeJournal`] methods log write failures instead of returning them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// One paired top-of-book observation.
#[derive(Debug, Clone)]
pub struct BboSample {
    pub timestamp: DateTime<Utc>,
    pub a_bid: Decimal,
    pub a_ask: Decimal,
    pub b_bid: Decimal,
    pub b_ask: Decimal,
    pub long_spread: Decimal,
    pub short_spread: Decimal,
}

/// One dispatched pair and how it resolved.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub direction: String,
    pub size: Decimal,
    pub spread: Decimal,
    pub entry_price: Option<Decimal>,
    pub outcome: String,
    pub order_a: Option<String>,
    pub order_b: Option<String>,
}

/// Aggregate view used by the `status` command.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalSummary {
    pub bbo_samples: u64,
    pub trades: u64,
    pub filled_trades: u64,
    pub first_sample: Option<DateTime<Utc>>,
    pub last_trade: Option<DateTime<Utc>>,
    pub last_long_spread: Option<Decimal>,
    pub last_short_spread: Option<Decimal>,
}

/// Append-only sink for market and trade events.
pub trait TradeJournal: Send + Sync {
    fn log_bbo(&self, sample: &BboSample);
    fn log_trade(&self, trade: &TradeRecord);
    fn flush(&self);
}

/// SQLite-backed journal.
pub struct SqliteJournal {
    conn: Mutex<Connection>,
}

impl SqliteJournal {
    /// Open (or create) the journal database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let journal = Self {
            conn: Mutex::new(conn),
        };
        journal.init_schema()?;

        info!("Journal initialized at {:?}", path);
        Ok(journal)
    }

    /// In-memory journal, for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let journal = Self {
            conn: Mutex::new(conn),
        };
        journal.init_schema()?;
        Ok(journal)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A panic mid-write leaves the connection itself usable
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        self.lock()
            .execute_batch(
                r#"
            -- Paired top-of-book samples
            CREATE TABLE IF NOT EXISTS bbo_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                a_bid TEXT NOT NULL,
                a_ask TEXT NOT NULL,
                b_bid TEXT NOT NULL,
                b_ask TEXT NOT NULL,
                long_spread TEXT NOT NULL,
                short_spread TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bbo_timestamp ON bbo_samples(timestamp);

            -- Dispatched pairs
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                direction TEXT NOT NULL,
                size TEXT NOT NULL,
                spread TEXT NOT NULL,
                entry_price TEXT,
                outcome TEXT NOT NULL,
                order_a TEXT,
                order_b TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
            "#,
            )
            .context("Failed to initialize journal schema")
    }

    fn insert_bbo(&self, sample: &BboSample) -> Result<()> {
        self.lock().execute(
            r#"
            INSERT INTO bbo_samples (timestamp, a_bid, a_ask, b_bid, b_ask, long_spread, short_spread)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                sample.timestamp.to_rfc3339(),
                sample.a_bid.to_string(),
                sample.a_ask.to_string(),
                sample.b_bid.to_string(),
                sample.b_ask.to_string(),
                sample.long_spread.to_string(),
                sample.short_spread.to_string(),
            ],
        )?;
        Ok(())
    }

    fn insert_trade(&self, trade: &TradeRecord) -> Result<()> {
        self.lock().execute(
            r#"
            INSERT INTO trades (timestamp, direction, size, spread, entry_price, outcome, order_a, order_b)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                trade.timestamp.to_rfc3339(),
                trade.direction,
                trade.size.to_string(),
                trade.spread.to_string(),
                trade.entry_price.map(|p| p.to_string()),
                trade.outcome,
                trade.order_a,
                trade.order_b,
            ],
        )?;
        Ok(())
    }

    /// Counts and latest readings across both tables.
    pub fn summary(&self) -> Result<JournalSummary> {
        let conn = self.lock();

        let bbo_samples: i64 = conn.query_row("SELECT COUNT(*) FROM bbo_samples", [], |row| row.get(0))?;
        let trades: i64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        let filled_trades: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE outcome = 'both_filled'",
            [],
            |row| row.get(0),
        )?;

        let first_sample: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM bbo_samples ORDER BY id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let last_trade: Option<String> = conn
            .query_row(
                "SELECT timestamp FROM trades ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let last_spreads: Option<(String, String)> = conn
            .query_row(
                "SELECT long_spread, short_spread FROM bbo_samples ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(JournalSummary {
            bbo_samples: bbo_samples as u64,
            trades: trades as u64,
            filled_trades: filled_trades as u64,
            first_sample: first_sample.as_deref().and_then(parse_timestamp),
            last_trade: last_trade.as_deref().and_then(parse_timestamp),
            last_long_spread: last_spreads
                .as_ref()
                .and_then(|(long, _)| Decimal::from_str(long).ok()),
            last_short_spread: last_spreads
                .as_ref()
                .and_then(|(_, short)| Decimal::from_str(short).ok()),
        })
    }

    /// Most recent trades, newest first.
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, direction, size, spread, entry_price, outcome, order_a, order_b
            FROM trades
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let trades = stmt
            .query_map([limit as i64], |row| {
                let ts: String = row.get(0)?;
                let size: String = row.get(2)?;
                let spread: String = row.get(3)?;
                let entry_price: Option<String> = row.get(4)?;
                Ok(TradeRecord {
                    timestamp: parse_timestamp(&ts).unwrap_or_else(Utc::now),
                    direction: row.get(1)?,
                    size: Decimal::from_str(&size).unwrap_or_default(),
                    spread: Decimal::from_str(&spread).unwrap_or_default(),
                    entry_price: entry_price.and_then(|p| Decimal::from_str(&p).ok()),
                    outcome: row.get(5)?,
                    order_a: row.get(6)?,
                    order_b: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(trades)
    }
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl TradeJournal for SqliteJournal {
    fn log_bbo(&self, sample: &BboSample) {
        if let Err(e) = self.insert_bbo(sample) {
            warn!(error = %e, "Failed to journal BBO sample");
        }
    }

    fn log_trade(&self, trade: &TradeRecord) {
        match self.insert_trade(trade) {
            Ok(()) => debug!(direction = %trade.direction, outcome = %trade.outcome, "Trade journaled"),
            Err(e) => warn!(error = %e, "Failed to journal trade"),
        }
    }

    fn flush(&self) {
        if let Err(e) = self.lock().cache_flush() {
            warn!(error = %e, "Failed to flush journal");
        }
    }
}
