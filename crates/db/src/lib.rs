pub mod batch;
pub mod connection;
pub mod migrations;
pub mod repositories;

pub use batch::{BatchError, BatchExecutor, RetryPolicy};
pub use connection::{connect, connect_with_settings, DbPool};
