//! Closed-trade history: the record type, a SQLite store, the CSV export
//! format, and a mock generator for demos.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

pub const CSV_HEADER: &str = "date,ticker,side,entry,exit,size,pnl,entry_signal,exit_signal,note";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Side::Long),
            "SHORT" | "SELL" => Ok(Side::Short),
            other => Err(anyhow!("unknown side '{}'", other)),
        }
    }
}

/// One round trip, entry to exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub closed_at: NaiveDate,
    pub ticker: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    /// Realized profit/loss
    pub pnl: f64,
    pub entry_signal: String,
    pub exit_signal: String,
    pub note: String,
}

// =============================================================================
// SQLite store
// =============================================================================

pub struct TradeStore {
    conn: Connection,
}

impl TradeStore {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                closed_at TEXT NOT NULL,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                size REAL NOT NULL,
                pnl REAL NOT NULL,
                entry_signal TEXT NOT NULL DEFAULT '',
                exit_signal TEXT NOT NULL DEFAULT '',
                note TEXT NOT NULL DEFAULT ''
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn insert(&mut self, trades: &[TradeRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for t in trades {
            tx.execute(
                "INSERT INTO trades (closed_at, ticker, side, entry_price, exit_price, size, pnl,
                                     entry_signal, exit_signal, note)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    t.closed_at.to_string(),
                    t.ticker,
                    t.side.as_str(),
                    t.entry_price,
                    t.exit_price,
                    t.size,
                    t.pnl,
                    t.entry_signal,
                    t.exit_signal,
                    t.note
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Chronological; ties keep insertion order.
    pub fn load_all(&self) -> Result<Vec<TradeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT closed_at, ticker, side, entry_price, exit_price, size, pnl,
                    entry_signal, exit_signal, note
             FROM trades ORDER BY closed_at, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (
                closed_at,
                ticker,
                side,
                entry_price,
                exit_price,
                size,
                pnl,
                entry_signal,
                exit_signal,
                note,
            ) = row?;
            out.push(TradeRecord {
                closed_at: closed_at
                    .parse()
                    .with_context(|| format!("bad closed_at '{}'", closed_at))?,
                ticker,
                side: Side::parse(&side)?,
                entry_price,
                exit_price,
                size,
                pnl,
                entry_signal,
                exit_signal,
                note,
            });
        }
        Ok(out)
    }
}

// =============================================================================
// CSV export format
// =============================================================================

/// Parses one data row. Any text column may be quoted; the note is the last
/// column and keeps unquoted commas.
pub fn parse_trade_line(line: &str) -> Result<TradeRecord> {
    let parts = split_fields(line, 10);
    if parts.len() < 7 {
        return Err(anyhow!("expected at least 7 columns, got {}", parts.len()));
    }
    let text = |i: usize| parts.get(i).cloned().unwrap_or_default();
    Ok(TradeRecord {
        closed_at: parts[0]
            .parse()
            .with_context(|| format!("bad date '{}'", parts[0]))?,
        ticker: parts[1].clone(),
        side: Side::parse(&parts[2])?,
        entry_price: parts[3].parse()?,
        exit_price: parts[4].parse()?,
        size: parts[5].parse()?,
        pnl: parts[6].parse()?,
        entry_signal: text(7),
        exit_signal: text(8),
        note: text(9),
    })
}

/// Splits into at most `max` fields; the last one takes the remainder.
fn split_fields(line: &str, max: usize) -> Vec<String> {
    let mut fields = Vec::new();
    let mut rest = line;
    while fields.len() + 1 < max {
        let (field, tail) = next_field(rest);
        fields.push(field);
        match tail {
            Some(tail) => rest = tail,
            None => return fields,
        }
    }
    fields.push(unquote(rest));
    fields
}

/// One field off the front of `s`, plus what follows its separator.
fn next_field(s: &str) -> (String, Option<&str>) {
    let s = s.trim_start();
    let Some(body) = s.strip_prefix('"') else {
        return match s.find(',') {
            Some(i) => (s[..i].trim().to_string(), Some(&s[i + 1..])),
            None => (s.trim().to_string(), None),
        };
    };

    let mut value = String::new();
    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '"' {
            value.push(c);
            continue;
        }
        if let Some((_, '"')) = chars.peek() {
            value.push('"');
            chars.next();
            continue;
        }
        let after = &body[i + 1..];
        return match after.find(',') {
            Some(j) => (value, Some(&after[j + 1..])),
            None => (value, None),
        };
    }
    // Unterminated quote: keep what was read
    (value, None)
}

fn unquote(field: &str) -> String {
    let f = field.trim();
    if f.len() >= 2 && f.starts_with('"') && f.ends_with('"') {
        f[1..f.len() - 1].replace("\"\"", "\"")
    } else {
        f.to_string()
    }
}

fn quote(field: &str) -> String {
    if field.contains(',') || field.contains('"') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Loads a CSV export, skipping blank lines, comments and the header.
/// Rows come back in file order.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<TradeRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut trades = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        let is_header = trimmed.to_lowercase().starts_with("date,");
        if trimmed.is_empty() || trimmed.starts_with('#') || is_header {
            continue;
        }
        let trade = parse_trade_line(trimmed)
            .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
        trades.push(trade);
    }
    Ok(trades)
}

pub fn write_csv<W: Write>(mut out: W, trades: &[TradeRecord]) -> Result<()> {
    writeln!(out, "{}", CSV_HEADER)?;
    for t in trades {
        writeln!(
            out,
            "{},{},{},{:.2},{:.2},{},{:.2},{},{},{}",
            t.closed_at,
            t.ticker,
            t.side.as_str(),
            t.entry_price,
            t.exit_price,
            t.size,
            t.pnl,
            quote(&t.entry_signal),
            quote(&t.exit_signal),
            quote(&t.note)
        )?;
    }
    Ok(())
}

/// Loads from SQLite when the path ends in `.sqlite`/`.db`, CSV otherwise.
pub fn load_trades(path: &str) -> Result<Vec<TradeRecord>> {
    if path.ends_with(".sqlite") || path.ends_with(".db") {
        TradeStore::open(path)?.load_all()
    } else {
        load_csv(path)
    }
}

// =============================================================================
// Mock history
// =============================================================================

const MOCK_TICKERS: &[&str] = &["AAPL", "TSLA", "NVDA", "AMD", "SPY", "BTC-USD"];
const LONG_ENTRIES: &[&str] = &[
    "RSI Divergence",
    "MACD Crossover",
    "Support Bounce",
    "Breakout Re-test",
    "Golden Cross",
];
const LONG_EXITS: &[&str] = &[
    "Target Hit",
    "Trailing Stop",
    "RSI Overbought",
    "Time Stop",
    "News Event",
];
const SHORT_ENTRIES: &[&str] = &[
    "Bearish Engulfing",
    "Resistance Rejection",
    "Head & Shoulders",
    "Breakdown",
    "Death Cross",
];
const SHORT_EXITS: &[&str] = &[
    "Cover at Support",
    "Stop Loss Hit",
    "RSI Oversold",
    "Liquidity Grab",
    "Sector Rotation",
];
const MOCK_NOTES: &[&str] = &[
    "Felt good about this setup, executed clean.",
    "Hesitated on entry, got a bad fill.",
    "Exited too early, left money on the table.",
    "Followed the plan perfectly.",
    "Revenge trade after the last loss (bad idea).",
    "FOMO entry, lucky to get out at breakeven.",
    "Textbook setup, smooth sailing.",
    "Market was choppy, got stopped out on noise.",
];

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn pick<R: Rng>(rng: &mut R, items: &[&str]) -> String {
    items.choose(rng).copied().unwrap_or_default().to_string()
}

/// `n` random closed trades over the last 60 days, sorted by date.
pub fn generate_mock_trades<R: Rng>(n: usize, rng: &mut R) -> Vec<TradeRecord> {
    let start = Utc::now().date_naive() - Duration::days(60);
    let mut trades: Vec<TradeRecord> = (0..n)
        .map(|_| {
            let side = if rng.gen_bool(0.5) { Side::Long } else { Side::Short };
            let base = rng.gen_range(100.0..1000.0);
            let vol = rng.gen_range(0.01..0.05);
            let outcome = if rng.gen_bool(0.5) { 1.0 + vol } else { 1.0 - vol };
            let entry_price = round2(base);
            let exit_price = match side {
                Side::Long => round2(base * outcome),
                Side::Short => round2(base * (2.0 - outcome)),
            };
            let size = f64::from(rng.gen_range(1u32..100));
            let pnl = match side {
                Side::Long => round2((exit_price - entry_price) * size),
                Side::Short => round2((entry_price - exit_price) * size),
            };
            let (entries, exits) = match side {
                Side::Long => (LONG_ENTRIES, LONG_EXITS),
                Side::Short => (SHORT_ENTRIES, SHORT_EXITS),
            };
            let note = if rng.gen_bool(0.8) { pick(rng, MOCK_NOTES) } else { String::new() };
            TradeRecord {
                closed_at: start + Duration::days(rng.gen_range(0..60)),
                ticker: pick(rng, MOCK_TICKERS),
                side,
                entry_price,
                exit_price,
                size,
                pnl,
                entry_signal: pick(rng, entries),
                exit_signal: pick(rng, exits),
                note,
            }
        })
        .collect();
    trades.sort_by_key(|t| t.closed_at);
    trades
}
