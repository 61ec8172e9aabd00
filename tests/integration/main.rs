//! Integration tests: the full pipeline wired together over an in-memory
//! SQLite database with scripted market, news and LLM sources.

mod api;
mod mock_sources;
mod simulation;
