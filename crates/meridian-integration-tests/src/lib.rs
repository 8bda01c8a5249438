//! End-to-end tests for the Meridian MCP host.
//!
//! The tests live under `tests/` and drive an [`Orchestrator`] against
//! scripted MCP servers running in-process on `tokio::io::duplex` streams.
//!
//! [`Orchestrator`]: meridian_mcp::Orchestrator
