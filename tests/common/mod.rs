#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sftp_upload_service::upload::ServiceEvent;
use sftp_upload_service::{Config, ConnectError, Endpoint, Session, TransferError, Transport};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Put(String),
    Close,
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    /// Connect attempts that fail before one succeeds; `usize::MAX` never succeeds
    connect_failures: usize,
    /// Remaining put failures per file name
    put_failures: HashMap<String, usize>,
    /// Names whose local file reads are refused
    unreadable: HashSet<String>,
    /// Remote file system: path -> contents
    remote: HashMap<String, Vec<u8>>,
}

/// In-memory transport that records every call and fails on request.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connects(self, times: usize) -> Self {
        self.script.lock().connect_failures = times;
        self
    }

    pub fn fail_put(self, name: &str, times: usize) -> Self {
        self.script.lock().put_failures.insert(name.to_string(), times);
        self
    }

    pub fn unreadable(self, name: &str) -> Self {
        self.script.lock().unreadable.insert(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    pub fn puts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Put(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Connect).count()
    }

    pub fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.script.lock().remote.get(path).cloned()
    }
}

pub struct ScriptedSession {
    script: Arc<Mutex<Script>>,
    open: bool,
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Session = ScriptedSession;

    async fn connect(&self, endpoint: &Endpoint) -> Result<ScriptedSession, ConnectError> {
        let mut script = self.script.lock();
        script.calls.push(Call::Connect);
        if script.connect_failures > 0 {
            if script.connect_failures != usize::MAX {
                script.connect_failures -= 1;
            }
            return Err(ConnectError::Tcp {
                addr: format!("{}:{}", endpoint.host, endpoint.port),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        Ok(ScriptedSession {
            script: self.script.clone(),
            open: true,
        })
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn put(&mut self, local_path: &Path, remote_path: &str) -> Result<(), TransferError> {
        assert!(self.open, "put on a closed session");
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut script = self.script.lock();
        script.calls.push(Call::Put(name.clone()));

        if let Some(remaining) = script.put_failures.get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransferError::Remote {
                    remote: remote_path.to_string(),
                    message: "network error".to_string(),
                });
            }
        }

        if script.unreadable.contains(&name) {
            return Err(TransferError::LocalRead {
                path: local_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
            });
        }

        let contents = std::fs::read(local_path).map_err(|source| TransferError::LocalRead {
            path: local_path.to_path_buf(),
            source,
        })?;
        script.remote.insert(remote_path.to_string(), contents);
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.script.lock().calls.push(Call::Close);
        }
    }
}

pub fn test_config(local_folder: &Path) -> Config {
    Config {
        host: "sftp.test".to_string(),
        username: "tester".to_string(),
        password: "secret".to_string(),
        local_folder: local_folder.to_path_buf(),
        remote_folder: "/incoming".to_string(),
        poll_interval: Duration::from_millis(50),
        retry_delay: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Wait up to five seconds for an event matching `pred`.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<ServiceEvent>, mut pred: F) -> ServiceEvent
where
    F: FnMut(&ServiceEvent) -> bool,
{
    let waiting = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("timed out waiting for service event")
}
