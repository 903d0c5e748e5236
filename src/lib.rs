//! Loglens: client engine and CLI for per-level application log batches.

mod cli;
pub mod colors;
pub mod loglens_client;
pub mod loglens_core;
pub mod loglens_fetch;

pub use cli::{run, DynError};
