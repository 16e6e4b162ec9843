use super::{Endpoint, Session, Transport};
use crate::error::{ConnectError, TransferError};
use async_trait::async_trait;
use parking_lot::Mutex;
use ssh2::{RenameFlags, Sftp};
use std::fs::File;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Suffix used while a file is still being written remotely.
const PARTIAL_SUFFIX: &str = ".part";

/// SFTP over libssh2. The library is blocking, so every call runs on the
/// tokio blocking pool.
pub struct SftpTransport {
    io_timeout: Duration,
}

impl SftpTransport {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

struct Connection {
    session: ssh2::Session,
    sftp: Sftp,
}

pub struct SftpSession {
    conn: Option<Arc<Mutex<Connection>>>,
    addr: String,
}

#[async_trait]
impl Transport for SftpTransport {
    type Session = SftpSession;

    async fn connect(&self, endpoint: &Endpoint) -> Result<SftpSession, ConnectError> {
        let endpoint = endpoint.clone();
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        let timeout = self.io_timeout;

        let conn = tokio::task::spawn_blocking(move || open_connection(&endpoint, timeout))
            .await
            .map_err(|e| ConnectError::Task(e.to_string()))??;

        info!("SFTP session established with {}", addr);
        Ok(SftpSession {
            conn: Some(Arc::new(Mutex::new(conn))),
            addr,
        })
    }
}

#[async_trait]
impl Session for SftpSession {
    async fn put(&mut self, local_path: &Path, remote_path: &str) -> Result<(), TransferError> {
        let conn = self.conn.clone().ok_or(TransferError::SessionClosed)?;
        let local = local_path.to_path_buf();
        let remote = remote_path.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            upload_file(&conn.sftp, &local, &remote)
        })
        .await
        .map_err(|e| TransferError::Task(e.to_string()))?
    }

    async fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let addr = self.addr.clone();

        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.session.disconnect(None, "service shutting down", None)
        })
        .await;

        match result {
            Ok(Ok(())) => debug!("Closed SFTP session with {}", addr),
            Ok(Err(e)) => debug!("Disconnect from {} was not clean: {}", addr, e),
            Err(e) => debug!("Disconnect task for {} failed: {}", addr, e),
        }
    }
}

fn open_connection(endpoint: &Endpoint, timeout: Duration) -> Result<Connection, ConnectError> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port);
    let resolve_err = |source: io::Error| ConnectError::Resolve {
        host: endpoint.host.clone(),
        port: endpoint.port,
        source,
    };

    let socket_addr = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(resolve_err)?
        .next()
        .ok_or_else(|| resolve_err(io::Error::new(io::ErrorKind::NotFound, "no addresses")))?;

    let tcp = TcpStream::connect_timeout(&socket_addr, timeout).map_err(|source| {
        ConnectError::Tcp {
            addr: addr.clone(),
            source,
        }
    })?;

    let handshake_err = |e: ssh2::Error| ConnectError::Handshake {
        addr: addr.clone(),
        message: e.to_string(),
    };

    let mut session = ssh2::Session::new().map_err(handshake_err)?;
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session.set_tcp_stream(tcp);
    session.handshake().map_err(handshake_err)?;

    session
        .userauth_password(&endpoint.username, &endpoint.password)
        .map_err(|e| ConnectError::Auth {
            username: endpoint.username.clone(),
            message: e.to_string(),
        })?;
    if !session.authenticated() {
        return Err(ConnectError::Auth {
            username: endpoint.username.clone(),
            message: "server rejected the credentials".to_string(),
        });
    }

    let sftp = session
        .sftp()
        .map_err(|e| ConnectError::Subsystem(e.to_string()))?;

    Ok(Connection { session, sftp })
}

/// Write to `<remote>.part`, then rename over the final name so a dropped
/// connection never leaves a truncated file under `remote`.
fn upload_file(sftp: &Sftp, local: &Path, remote: &str) -> Result<(), TransferError> {
    let remote_err = |message: String| TransferError::Remote {
        remote: remote.to_string(),
        message,
    };

    let mut local_file = File::open(local).map_err(|source| TransferError::LocalRead {
        path: local.to_path_buf(),
        source,
    })?;

    let partial = format!("{}{}", remote, PARTIAL_SUFFIX);
    {
        let mut remote_file = sftp
            .create(Path::new(&partial))
            .map_err(|e| remote_err(e.to_string()))?;
        let bytes = io::copy(&mut local_file, &mut remote_file)
            .map_err(|e| remote_err(e.to_string()))?;
        debug!("Wrote {} bytes to {}", bytes, partial);
    }

    move_into_place(sftp, Path::new(&partial), Path::new(remote)).map_err(remote_err)
}

/// The remote calls needed to rename a finished upload over its final name.
trait RemoteRename {
    fn rename(&self, from: &Path, to: &Path, overwrite: bool) -> Result<(), String>;
    fn exists(&self, path: &Path) -> bool;
    fn unlink(&self, path: &Path) -> Result<(), String>;
}

impl RemoteRename for Sftp {
    fn rename(&self, from: &Path, to: &Path, overwrite: bool) -> Result<(), String> {
        let flags = overwrite
            .then_some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
        Sftp::rename(self, from, to, flags).map_err(|e| e.to_string())
    }

    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }

    fn unlink(&self, path: &Path) -> Result<(), String> {
        Sftp::unlink(self, path).map_err(|e| e.to_string())
    }
}

/// Rename `partial` onto `target`. Servers speaking SFTPv3 ignore the
/// overwrite flag, so an existing target is removed and the rename retried.
/// The existing target is only touched when it is actually in the way.
fn move_into_place(fs: &impl RemoteRename, partial: &Path, target: &Path) -> Result<(), String> {
    let first = match fs.rename(partial, target, true) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if !fs.exists(target) {
        return Err(first);
    }

    debug!("Rename onto {} failed ({}), replacing existing file", target.display(), first);
    if let Err(e) = fs.unlink(target) {
        warn!("Could not remove existing {}: {}", target.display(), e);
        return Err(format!("{}; existing file could not be removed: {}", first, e));
    }
    fs.rename(partial, target, false)
}
