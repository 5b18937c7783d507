pub mod clienv;
pub mod config;
pub mod error;
pub mod guardian;

pub use config::{GuardianConfig, ServiceConfig};
pub use error::{AggregateError, BulkAction, GuardianError, Result};
pub use guardian::{Guardian, LogSink, ServiceStatus, ALL_SERVICES};
