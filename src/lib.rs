//! Offline-first data layer for a property-analytics dashboard.
//!
//! Large paginated collections are fetched from the REST API, persisted in a
//! local SQLite cache, and served to readers through a watch-based session
//! store. `sync::DataSync` decides per session whether the cache is good
//! enough or a refetch is needed.

pub mod api;
pub mod cache;
pub mod commands;
pub mod config;
pub mod context;
pub mod selectors;
pub mod session;
pub mod store;
pub mod sync;
#[cfg(test)]
mod testing;
