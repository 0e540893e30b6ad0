//! Event document language server implementation
//! Provides hover help for aggregate-event JSON documents

mod server;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod hover;
pub mod index;
pub mod parser;
pub mod schema;
pub mod state;

// Re-export the modules needed for public API
pub use server::{Backend, HEADER_SCHEMA_METHOD};
