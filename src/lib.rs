//! Liquidity Forecast Library
//!
//! Exposes the forecasting pipeline for the CLI binary and integration tests.

pub mod forecast;
