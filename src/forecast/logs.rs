//! Transaction-log batches.
//!
//! Raw logs arrive as CSV blobs with the collector's column names
//! (`Transaction Hash`, `Contract Address`, `Input Token`, `Output Token`,
//! `Block Number`). Extra columns are ignored and column order is free.

use crate::forecast::clock::{Clock, RetryPolicy};
use crate::forecast::error::{PipelineError, Result};
use crate::forecast::store::BlobStore;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub const COL_TX_HASH: &str = "Transaction Hash";
pub const COL_CONTRACT: &str = "Contract Address";
pub const COL_INPUT_TOKEN: &str = "Input Token";
pub const COL_OUTPUT_TOKEN: &str = "Output Token";
pub const COL_BLOCK: &str = "Block Number";

/// One observed swap through a liquidity contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub transaction_id: String,
    pub contract_address: String,
    pub input_token: String,
    pub output_token: String,
    pub block_number: u64,
}

/// Lookback tags used by rolling log snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lookback {
    OneDay,
    ThreeDays,
    OneWeek,
    ThreeWeeks,
    OneMonth,
}

impl Lookback {
    pub const ALL: [Lookback; 5] = [
        Lookback::OneDay,
        Lookback::ThreeDays,
        Lookback::OneWeek,
        Lookback::ThreeWeeks,
        Lookback::OneMonth,
    ];

    /// Upper-case tag as used in rolling log keys ("1D", "3D", ...).
    pub fn tag(&self) -> &'static str {
        match self {
            Lookback::OneDay => "1D",
            Lookback::ThreeDays => "3D",
            Lookback::OneWeek => "1W",
            Lookback::ThreeWeeks => "3W",
            Lookback::OneMonth => "1M",
        }
    }

    /// Lower-case tag as used in model and dataset keys.
    pub fn key_suffix(&self) -> String {
        self.tag().to_lowercase()
    }

    /// Parse "1D"/"1d"/"3W"/... (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|lb| lb.tag().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Identifies one window of logs in the log source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogWindow {
    Day(NaiveDate),
    Rolling(Lookback),
}

impl LogWindow {
    pub fn storage_key(&self) -> String {
        match self {
            LogWindow::Day(date) => format!("logs/{}-oneinch_logs.csv", date.format("%Y-%m-%d")),
            LogWindow::Rolling(lb) => format!("rolling/oneinch_logs_{}.csv", lb.tag()),
        }
    }
}

impl fmt::Display for LogWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogWindow::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            LogWindow::Rolling(lb) => write!(f, "rolling {}", lb),
        }
    }
}

/// A finite batch of log events covering one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogTable {
    events: Vec<LogEvent>,
}

impl LogTable {
    pub fn new(events: Vec<LogEvent>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Concatenate several batches (used for multi-day forward windows).
    pub fn concat<'a>(tables: impl IntoIterator<Item = &'a LogTable>) -> LogTable {
        LogTable {
            events: tables
                .into_iter()
                .flat_map(|t| t.events.iter().cloned())
                .collect(),
        }
    }

    /// Events whose block number lies in `[lo, hi]`.
    pub fn block_range(&self, lo: u64, hi: u64) -> LogTable {
        LogTable {
            events: self
                .events
                .iter()
                .filter(|e| e.block_number >= lo && e.block_number <= hi)
                .cloned()
                .collect(),
        }
    }

    pub fn max_block(&self) -> Option<u64> {
        self.events.iter().map(|e| e.block_number).max()
    }

    /// Parse a CSV document with a header row.
    pub fn from_csv(text: &str) -> Result<LogTable> {
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        let (_, header_line) = lines
            .next()
            .ok_or_else(|| PipelineError::malformed("log CSV is empty (no header row)"))?;
        let header = split_csv_line(header_line);
        let index: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();

        let column = |name: &str| -> Result<usize> {
            index
                .get(name)
                .copied()
                .ok_or_else(|| PipelineError::malformed(format!("missing required column '{}'", name)))
        };
        let tx_col = column(COL_TX_HASH)?;
        let contract_col = column(COL_CONTRACT)?;
        let input_col = column(COL_INPUT_TOKEN)?;
        let output_col = column(COL_OUTPUT_TOKEN)?;
        let block_col = column(COL_BLOCK)?;

        let mut events = Vec::new();
        for (line_no, line) in lines {
            let fields = split_csv_line(line);
            let field = |col: usize, name: &str| -> Result<String> {
                fields.get(col).map(|s| s.trim().to_string()).ok_or_else(|| {
                    PipelineError::malformed(format!("row {}: missing field '{}'", line_no + 1, name))
                })
            };

            let contract_address = field(contract_col, COL_CONTRACT)?;
            if contract_address.is_empty() {
                return Err(PipelineError::malformed(format!(
                    "row {}: empty '{}'",
                    line_no + 1,
                    COL_CONTRACT
                )));
            }
            let block_raw = field(block_col, COL_BLOCK)?;
            let block_number = parse_block(&block_raw).ok_or_else(|| {
                PipelineError::malformed(format!(
                    "row {}: invalid '{}' value '{}'",
                    line_no + 1,
                    COL_BLOCK,
                    block_raw
                ))
            })?;

            events.push(LogEvent {
                transaction_id: field(tx_col, COL_TX_HASH)?,
                contract_address,
                input_token: field(input_col, COL_INPUT_TOKEN)?,
                output_token: field(output_col, COL_OUTPUT_TOKEN)?,
                block_number,
            });
        }

        Ok(LogTable { events })
    }

    /// Serialize with the collector's column names.
    pub fn to_csv(&self) -> String {
        let mut out = format!(
            "{},{},{},{},{}\n",
            COL_TX_HASH, COL_CONTRACT, COL_INPUT_TOKEN, COL_OUTPUT_TOKEN, COL_BLOCK
        );
        for e in &self.events {
            out.push_str(&format!(
                "{},{},{},{},{}\n",
                csv_escape(&e.transaction_id),
                csv_escape(&e.contract_address),
                csv_escape(&e.input_token),
                csv_escape(&e.output_token),
                e.block_number
            ));
        }
        out
    }
}

/// Block numbers sometimes come through pandas as "12345.0".
fn parse_block(raw: &str) -> Option<u64> {
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
        .map(|v| v as u64)
}

/// Split one CSV record, honouring double-quoted fields.
pub(crate) fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current.trim_end_matches('\r').to_string());
    fields
}

pub(crate) fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// =============================================================================
// LOG SOURCE
// =============================================================================

/// Supplies log batches by window.
pub trait LogSource: Send + Sync {
    /// `Err(MissingWindowData)` when the window has no logs.
    fn fetch(&self, window: LogWindow) -> Result<LogTable>;
}

/// Reads log CSVs from a blob store, retrying transient failures.
pub struct StoreLogSource {
    store: Arc<dyn BlobStore>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl StoreLogSource {
    pub fn new(store: Arc<dyn BlobStore>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            retry,
            clock,
        }
    }
}

impl LogSource for StoreLogSource {
    fn fetch(&self, window: LogWindow) -> Result<LogTable> {
        let key = window.storage_key();
        let body = self
            .retry
            .run(self.clock.as_ref(), &key, || self.store.get(&key))
            .map_err(|e| PipelineError::external(format!("fetching {}: {}", key, e)))?
            .ok_or_else(|| PipelineError::missing_window(window.to_string()))?;

        let text = String::from_utf8(body)
            .map_err(|_| PipelineError::malformed(format!("{} is not valid UTF-8", key)))?;
        let table = LogTable::from_csv(&text)
            .map_err(|e| PipelineError::malformed(format!("{}: {}", key, e)))?;
        debug!("Loaded {} log rows from {}", table.len(), key);
        Ok(table)
    }
}

/// In-memory log source keyed by window (tests and fixtures).
#[derive(Default)]
pub struct MemoryLogSource {
    windows: HashMap<LogWindow, LogTable>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, window: LogWindow, table: LogTable) {
        self.windows.insert(window, table);
    }

    pub fn with(mut self, window: LogWindow, table: LogTable) -> Self {
        self.insert(window, table);
        self
    }
}

impl LogSource for MemoryLogSource {
    fn fetch(&self, window: LogWindow) -> Result<LogTable> {
        self.windows
            .get(&window)
            .cloned()
            .ok_or_else(|| PipelineError::missing_window(window.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Transaction Hash,Contract Address,Input Token,Output Token,Block Number,Protocol\n\
0x01,0xpool1,0xusdc,0xdai,100,Curve\n\
0x02,0xpool1,0xdai,0xusdc,150.0,Curve\n\
0x03,\"0xpool,2\",0xweth,0xusdc,120,\"Uniswap \"\"V3\"\"\"\n";

    #[test]
    fn test_parse_csv_with_extra_columns_and_quotes() {
        let table = LogTable::from_csv(SAMPLE).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.events()[1].block_number, 150);
        assert_eq!(table.events()[2].contract_address, "0xpool,2");
        assert_eq!(table.max_block(), Some(150));
    }

    #[test]
    fn test_missing_column_is_malformed() {
        let err = LogTable::from_csv("Transaction Hash,Contract Address\n0x1,0xa\n").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput(_)));
        assert!(err.to_string().contains("Input Token"));
        assert!(!err.is_skippable());
    }

    #[test]
    fn test_bad_block_number_is_malformed() {
        let text = "Transaction Hash,Contract Address,Input Token,Output Token,Block Number\n0x1,0xa,t1,t2,abc\n";
        let err = LogTable::from_csv(text).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn test_csv_roundtrip_preserves_events() {
        let table = LogTable::from_csv(SAMPLE).unwrap();
        let again = LogTable::from_csv(&table.to_csv()).unwrap();
        assert_eq!(table, again);
    }

    #[test]
    fn test_lookback_parse_and_keys() {
        assert_eq!(Lookback::parse("3d"), Some(Lookback::ThreeDays));
        assert_eq!(Lookback::parse("1W"), Some(Lookback::OneWeek));
        assert_eq!(Lookback::parse("2D"), None);
        assert_eq!(
            LogWindow::Rolling(Lookback::OneDay).storage_key(),
            "rolling/oneinch_logs_1D.csv"
        );
        let day = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(LogWindow::Day(day).storage_key(), "logs/2025-03-09-oneinch_logs.csv");
    }

    #[test]
    fn test_block_range_is_inclusive() {
        let table = LogTable::from_csv(SAMPLE).unwrap();
        assert_eq!(table.block_range(100, 120).len(), 2);
        assert_eq!(table.block_range(151, 200).len(), 0);
    }

    #[test]
    fn test_memory_source_missing_window() {
        let source = MemoryLogSource::new();
        let err = source.fetch(LogWindow::Rolling(Lookback::OneDay)).unwrap_err();
        assert!(err.is_skippable());
    }
}
