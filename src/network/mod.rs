pub mod backoff;
pub mod connection;

pub use backoff::Backoff;
pub use connection::{ConnectionManager, ConnectionState};
