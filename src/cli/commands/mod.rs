//! CLI command implementations.

pub mod init;
pub mod list;
pub mod start;
pub mod status;
