//! Oversold-reversal equity screener.
//!
//! Pulls fundamentals and daily price history for a configured symbol
//! universe through a fallback chain of sources, computes RSI/MACD/SMA
//! indicators, scores oversold reversal setups, persists everything to
//! DuckDB and serves results over an HTTP API.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod indicators;
pub mod models;
pub mod scan;
pub mod server;
pub mod signals;
pub mod storage;
pub mod universe;
