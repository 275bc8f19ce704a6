//! API handlers.

pub mod mcp;
