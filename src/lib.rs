//! Gabinete Digital offline sync core.
//!
//! The [`sync`] module keeps a client usable without a connection: reads fall
//! back to a local snapshot cache, new demands are queued, and the queue is
//! drained when connectivity returns. The reference data store the client
//! talks to (SQLite persistence, Tantivy search) lives in [`server`].

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod errors;
pub mod models;
pub mod query;
pub mod remote;
pub mod search;
pub mod server;
pub mod sync;

pub use server::{create_router, AppState};

#[cfg(test)]
mod tests;
