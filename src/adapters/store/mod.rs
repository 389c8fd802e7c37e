//! Row store abstraction layer
//!
//! Trait-based access to the upstream queue, so the selector and connector
//! run unchanged against PostgreSQL or the in-memory store.

pub mod factory;
pub mod traits;

pub use factory::create_row_store;
pub use traits::RowStore;
