//! Infrastructure adapters for external systems.

pub mod memory;
pub mod mock;
pub mod sqlite;
