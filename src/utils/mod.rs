pub mod config;
pub mod log_buffer;
pub mod logging;

pub use log_buffer::{LogBuffer, LogEntry};
