//! Spread Arb - Main Entry Point
//!
//! Runs the arbitrage engine against two paper venues driven by a shared
//! random-walk quote feed.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spread_arb::config::{Config, ExecutionMode};
use spread_arb::exchange::{PaperVenue, QuoteWalk, VenueAdapter};
use spread_arb::notify::{Notifier, TelegramNotifier};
use spread_arb::persistence::{SqliteJournal, TradeJournal};
use spread_arb::strategy::{Engine, SAMPLE_INTERVAL};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Spread Arb CLI
#[derive(Parser)]
#[command(name = "spread-arb")]
#[command(version, about = "Cross-venue spread arbitrage on perpetual futures")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the arbitrage engine against paper venues
    Run(RunArgs),

    /// Show journal statistics and recent trades
    Status {
        /// Path to the SQLite journal (default: data/spread_arb.db)
        #[arg(short, long, default_value = "data/spread_arb.db")]
        db: String,

        /// Number of recent trades to list
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

/// Overrides applied on top of the loaded configuration.
#[derive(clap::Args, Default)]
struct RunArgs {
    /// Underlying ticker (BTC, ETH, SOL, ...)
    #[arg(long)]
    ticker: Option<String>,

    /// Order size per leg
    #[arg(long)]
    size: Option<Decimal>,

    /// Maximum absolute position on venue A
    #[arg(long)]
    max_position: Option<Decimal>,

    /// Deviation above the mean that triggers a LONG entry
    #[arg(long)]
    long_threshold: Option<Decimal>,

    /// Deviation above the mean that triggers a SHORT entry
    #[arg(long)]
    short_threshold: Option<Decimal>,

    /// Minimum absolute trigger distance
    #[arg(long)]
    min_spread: Option<Decimal>,

    /// Seconds to wait for a maker fill
    #[arg(long)]
    fill_timeout: Option<u64>,

    /// Balance below which the engine stops
    #[arg(long)]
    min_balance: Option<Decimal>,

    /// Samples required before signals fire
    #[arg(long)]
    warmup_samples: Option<u64>,

    /// Entry style on venue A
    #[arg(long, value_enum)]
    mode: Option<ExecutionMode>,

    /// Starting balance of each paper venue
    #[arg(long, default_value = "10000")]
    paper_balance: Decimal,

    /// Starting mid price of the paper quote feed
    #[arg(long, default_value = "100000")]
    paper_mid: Decimal,
}

impl RunArgs {
    /// Arguments used when no subcommand is given.
    fn paper_defaults() -> Self {
        Self {
            paper_balance: dec!(10000),
            paper_mid: dec!(100000),
            ..Default::default()
        }
    }

    fn apply(&self, config: &mut Config) {
        let trading = &mut config.trading;
        if let Some(ticker) = &self.ticker {
            trading.ticker = ticker.clone();
            // Re-derive markets from the new ticker
            trading.market_a.clear();
            trading.market_b.clear();
        }
        if let Some(size) = self.size {
            trading.size = size;
        }
        if let Some(max_position) = self.max_position {
            trading.max_position = max_position;
        }
        if let Some(threshold) = self.long_threshold {
            trading.long_threshold = threshold;
        }
        if let Some(threshold) = self.short_threshold {
            trading.short_threshold = threshold;
        }
        if let Some(min_spread) = self.min_spread {
            trading.min_spread = min_spread;
        }
        if let Some(min_balance) = self.min_balance {
            trading.min_balance = min_balance;
        }
        if let Some(warmup) = self.warmup_samples {
            trading.warmup_samples = warmup;
        }
        if let Some(secs) = self.fill_timeout {
            config.execution.fill_timeout_secs = secs;
        }
        if let Some(mode) = self.mode {
            config.execution.mode = mode;
        }
        config.trading.resolve_markets();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Status { db, limit }) => show_status(&db, limit),
        Some(Commands::Run(args)) => run(args).await,
        None => run(RunArgs::paper_defaults()).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║        Spread Arb v{} - Paper Trading                   ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let mut config = Config::load()?;
    args.apply(&mut config);
    config.validate()?;
    log_config(&config);

    let paper_a = Arc::new(PaperVenue::new("venue-a", args.paper_balance));
    let paper_b = Arc::new(PaperVenue::new("venue-b", args.paper_balance));

    let cancel = CancellationToken::new();

    // Quote feed
    {
        let (a, b) = (paper_a.clone(), paper_b.clone());
        let (market_a, market_b) = (
            config.trading.market_a.clone(),
            config.trading.market_b.clone(),
        );
        let token = cancel.clone();
        let mut walk = QuoteWalk::new(args.paper_mid, dec!(0.5), dec!(0.5), dec!(40));
        walk.tick(&a, &market_a, &b, &market_b).await;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(SAMPLE_INTERVAL) => {
                        walk.tick(&a, &market_a, &b, &market_b).await;
                    }
                }
            }
        });
    }

    let venue_a: Arc<dyn VenueAdapter> = paper_a;
    let venue_b: Arc<dyn VenueAdapter> = paper_b;
    let mut engine = Engine::new(config.clone(), venue_a, venue_b, cancel.clone());

    match TelegramNotifier::from_config(&config.telegram)? {
        Some(notifier) => {
            info!("📨 [INIT] Telegram notifications enabled");
            let notifier: Arc<dyn Notifier> = Arc::new(notifier);
            engine = engine.with_notifier(notifier);
        }
        None => info!("📨 [INIT] Telegram notifications disabled"),
    }

    if config.journal.enabled {
        match SqliteJournal::new(&config.journal.path) {
            Ok(journal) => {
                let journal: Arc<dyn TradeJournal> = Arc::new(journal);
                engine = engine.with_journal(journal);
            }
            Err(e) => warn!("⚠️  [INIT] Journal unavailable, continuing without it: {:#}", e),
        }
    }

    // Shutdown signal
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 [SHUTDOWN] Signal received");
        signal_token.cancel();
    });

    info!("🚀 Starting main trading loop...");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let summary = engine.run().await?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("📊 {}", summary);
    if !summary.is_flat() {
        warn!("⚠️  Positions may not be flat, check both venues manually");
    }

    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "spread-arb.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("spread_arb=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let trading = &config.trading;
    info!("📋 Configuration:");
    info!(
        "   Markets: {} (A) / {} (B)",
        trading.market_a, trading.market_b
    );
    info!(
        "   Size: {} | Max Position: {}",
        trading.size, trading.max_position
    );
    info!(
        "   Thresholds: long {} / short {} | Min Spread: {}",
        trading.long_threshold, trading.short_threshold, trading.min_spread
    );
    info!(
        "   Warmup: {} samples | Window: {} samples",
        trading.warmup_samples, trading.window_size
    );
    info!(
        "   Mode: {} | Fill Timeout: {}s | Cooldown: {}s",
        config.execution.mode, config.execution.fill_timeout_secs, config.execution.trade_cooldown_secs
    );
    info!("   Min Balance: {}", trading.min_balance);
}

/// Print journal statistics.
fn show_status(db_path: &str, limit: usize) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              SPREAD ARB JOURNAL                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The engine has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let journal = SqliteJournal::new(db_path)?;
    let summary = journal.summary()?;

    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map_or_else(
            || "-".to_string(),
            |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
    };
    let fmt_dec = |d: Option<Decimal>| d.map_or_else(|| "-".to_string(), |d| d.to_string());

    println!("\n📈 Activity");
    println!("   ├─ BBO Samples:      {}", summary.bbo_samples);
    println!("   ├─ First Sample:     {}", fmt_time(summary.first_sample));
    println!("   ├─ Trades:           {}", summary.trades);
    println!("   ├─ Both Filled:      {}", summary.filled_trades);
    println!("   └─ Last Trade:       {}", fmt_time(summary.last_trade));

    println!("\n📊 Latest Spreads");
    println!("   ├─ Long:             {}", fmt_dec(summary.last_long_spread));
    println!("   └─ Short:            {}", fmt_dec(summary.last_short_spread));

    let trades = journal.recent_trades(limit)?;
    if !trades.is_empty() {
        println!("\n🔁 Recent Trades");
        for trade in &trades {
            println!(
                "   ├─ {} {} {} @ spread {} → {}",
                trade.timestamp.format("%m-%d %H:%M:%S"),
                trade.direction,
                trade.size,
                trade.spread,
                trade.outcome
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "spread-arb",
            "run",
            "--ticker",
            "eth",
            "--size",
            "0.05",
            "--mode",
            "taker",
            "--warmup-samples",
            "50",
            "--fill-timeout",
            "7",
        ])
        .unwrap();

        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run subcommand");
        };
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.trading.ticker, "ETH");
        assert_eq!(config.trading.market_a, "ETH-USD-PERP");
        assert_eq!(config.trading.market_b, "ETH");
        assert_eq!(config.trading.size, dec!(0.05));
        assert_eq!(config.execution.mode, ExecutionMode::Taker);
        assert_eq!(config.trading.warmup_samples, 50);
        assert_eq!(config.execution.fill_timeout_secs, 7);
        assert_eq!(args.paper_balance, dec!(10000));
    }

    #[test]
    fn test_status_defaults() {
        let cli = Cli::try_parse_from(["spread-arb", "status"]).unwrap();
        let Some(Commands::Status { db, limit }) = cli.command else {
            panic!("expected status subcommand");
        };
        assert_eq!(db, "data/spread_arb.db");
        assert_eq!(limit, 10);
    }
}
