//! Wire protocols and connection handling
//!
//! Bytes flow: TCP stream → `StreamBuffer` → text or binary parser →
//! samples into the current registry. The first byte of a connection
//! picks the parser; the choice is fixed for the connection's lifetime.

pub mod binary;
pub mod connection;
pub mod server;
pub mod stream;
pub mod text;

pub use binary::BINARY_MAGIC;
pub use connection::{ConnectionDriver, ConnectionInfo, ConnectionPool, StreamMode};
pub use server::TcpServer;
pub use stream::StreamBuffer;
