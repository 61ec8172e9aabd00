//! crypto-agent: a paper-trading BTC/ETH agent.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod market;
pub mod llm;
pub mod strategy;
pub mod exogenous;
pub mod engine;
pub mod storage;
pub mod backtest;
pub mod dashboard;
