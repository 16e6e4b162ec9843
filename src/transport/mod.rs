pub mod sftp;

pub use sftp::{SftpSession, SftpTransport};

use crate::error::{ConnectError, TransferError};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

/// Where and as whom to connect.
#[derive(Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Opens sessions against a remote host.
#[async_trait]
pub trait Transport: Send + Sync {
    type Session: Session;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Session, ConnectError>;
}

/// A live authenticated session. Once `put` fails the session must not be
/// reused; the owner closes it and connects again.
#[async_trait]
pub trait Session: Send {
    async fn put(&mut self, local_path: &Path, remote_path: &str) -> Result<(), TransferError>;

    async fn close(&mut self);
}

/// Join a remote folder and a filename with `/`, whatever the local platform.
pub fn remote_path(remote_folder: &str, file_name: &str) -> String {
    let folder = remote_folder.trim_end_matches('/');
    format!("{}/{}", folder, file_name)
}
