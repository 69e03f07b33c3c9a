//! MCP server exposing Calendly event types and booking links as tools.

pub mod calendly;
pub mod config;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use error::{CalendlyError, ErrorKind, Result};
