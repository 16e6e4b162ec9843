pub mod error;
pub mod transport;
pub mod upload;
pub mod utils;

pub use error::{ArchiveError, ConfigError, ConnectError, CycleError, ScanError, TransferError};
pub use transport::{Endpoint, Session, Transport};
pub use upload::{ServiceLoop, ServiceSummary};
pub use utils::config::Config;
