//! Flush serialization
//!
//! A retired registry is walked once and one record per derived
//! statistic is written to the sink: `text` emits `name|value|ts` lines,
//! `binary` the packed record format, and `command` pipes either into
//! the configured child process.

pub mod binary;
pub mod command;
pub mod text;

pub use binary::FlushRecord;
pub use command::stream_to_command;
