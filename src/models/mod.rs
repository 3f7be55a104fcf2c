//! Data models for Gabinete Digital.
//!
//! Field names serialize in camelCase to match the documents held by the remote store.

mod collection;
mod contact;
mod dataset;
mod demand;
mod geo;
mod offline;
mod revision;
mod stats;
mod user;

pub use collection::*;
pub use contact::*;
pub use dataset::*;
pub use demand::*;
pub use geo::*;
pub use offline::*;
pub use revision::*;
pub use stats::*;
pub use user::*;
