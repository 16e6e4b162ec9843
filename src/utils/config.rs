use crate::error::ConfigError;
use crate::transport::Endpoint;
use crate::upload::scanner::verify_watched_dir;
use crate::upload::ARCHIVE_DIR_NAME;
use config::{File, FileFormat};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "sftp_config.ini";

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "SFTP_UPLOAD_CONFIG";

#[derive(Clone)]
pub struct Config {
    /// SFTP server host name or address
    pub host: String,

    /// SFTP server port
    pub port: u16,

    pub username: String,
    pub password: String,

    /// Watched directory; must exist
    pub local_folder: PathBuf,

    /// Destination directory on the server
    pub remote_folder: String,

    /// Time between upload cycles while connected
    pub poll_interval: Duration,

    /// Time between connection attempts while disconnected
    pub retry_delay: Duration,

    /// Connect and per-operation timeout handed to the transport
    pub io_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: String::new(),
            local_folder: PathBuf::new(),
            remote_folder: "/".to_string(),
            poll_interval: Duration::from_secs(60),
            retry_delay: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("local_folder", &self.local_folder)
            .field("remote_folder", &self.remote_folder)
            .field("poll_interval", &self.poll_interval)
            .field("retry_delay", &self.retry_delay)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

/// The `[Settings]` section exactly as written; every value is still a string.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawSettings {
    pub host: Option<String>,
    pub port: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub local_folder: Option<String>,
    pub remote_folder: Option<String>,
    pub poll_interval: Option<String>,
    pub retry_delay: Option<String>,
    pub io_timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFile {
    #[serde(default, alias = "Settings")]
    settings: RawSettings,
}

impl RawSettings {
    /// Read the `[Settings]` section of an INI file. A missing file yields
    /// empty settings.
    pub fn from_ini_file(path: &Path) -> Result<Self, ConfigError> {
        let raw: RawFile = config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini).required(false))
            .build()?
            .try_deserialize()?;
        Ok(raw.settings)
    }

    /// Override values from `SFTP_*` variables, as returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut Option<String>); 9] = [
            ("SFTP_HOST", &mut self.host),
            ("SFTP_PORT", &mut self.port),
            ("SFTP_USERNAME", &mut self.username),
            ("SFTP_PASSWORD", &mut self.password),
            ("SFTP_LOCAL_FOLDER", &mut self.local_folder),
            ("SFTP_REMOTE_FOLDER", &mut self.remote_folder),
            ("SFTP_POLL_INTERVAL", &mut self.poll_interval),
            ("SFTP_RETRY_DELAY", &mut self.retry_delay),
            ("SFTP_IO_TIMEOUT", &mut self.io_timeout),
        ];
        for (var, slot) in overrides {
            if let Some(value) = lookup(var) {
                *slot = Some(value);
            }
        }
    }
}

impl Config {
    /// Load from the INI file at `path`, then the process environment, then
    /// validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut raw = RawSettings::from_ini_file(path)?;
        raw.apply_env(|var| std::env::var(var).ok());
        let config = Self::from_raw(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse raw values and fill defaults. Does not touch the filesystem.
    pub fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let port = match non_empty(raw.port) {
            Some(value) => value.parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "port",
                message: format!("'{}': {}", value, e),
            })?,
            None => defaults.port,
        };

        Ok(Self {
            host: non_empty(raw.host).ok_or(ConfigError::Missing("host"))?,
            port,
            username: non_empty(raw.username).ok_or(ConfigError::Missing("username"))?,
            password: non_empty(raw.password).ok_or(ConfigError::Missing("password"))?,
            local_folder: non_empty(raw.local_folder)
                .map(PathBuf::from)
                .ok_or(ConfigError::Missing("local_folder"))?,
            remote_folder: non_empty(raw.remote_folder).unwrap_or(defaults.remote_folder),
            poll_interval: duration_or("poll_interval", raw.poll_interval, defaults.poll_interval)?,
            retry_delay: duration_or("retry_delay", raw.retry_delay, defaults.retry_delay)?,
            io_timeout: duration_or("io_timeout", raw.io_timeout, defaults.io_timeout)?,
        })
    }

    /// Checks that need the filesystem or cross-field rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                key: "port",
                message: "must be between 1 and 65535".to_string(),
            });
        }

        for (key, value) in [
            ("poll_interval", self.poll_interval),
            ("retry_delay", self.retry_delay),
            ("io_timeout", self.io_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        verify_watched_dir(&self.local_folder)?;
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.local_folder.join(ARCHIVE_DIR_NAME)
    }
}

/// Where to read the config file from: an explicit argument, then
/// `SFTP_UPLOAD_CONFIG`, then next to the executable, then the working
/// directory.
pub fn locate_config(arg: Option<String>) -> PathBuf {
    if let Some(path) = arg.or_else(|| std::env::var(CONFIG_PATH_ENV).ok()) {
        return PathBuf::from(path);
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)));

    match beside_exe {
        Some(path) if path.exists() => path,
        _ => PathBuf::from(CONFIG_FILE_NAME),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Bare integers are seconds; anything else goes through humantime ("90s", "2m").
fn duration_or(
    key: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = non_empty(value) else {
        return Ok(default);
    };

    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    humantime::parse_duration(&value).map_err(|e| ConfigError::Invalid {
        key,
        message: format!("'{}': {}", value, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn complete_raw(local_folder: &Path) -> RawSettings {
        RawSettings {
            host: Some("sftp.example.org".to_string()),
            username: Some("uploader".to_string()),
            password: Some("secret".to_string()),
            local_folder: Some(local_folder.to_string_lossy().to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_fill_optional_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::from_raw(complete_raw(tmp.path())).unwrap();

        assert_eq!(config.port, 22);
        assert_eq!(config.remote_folder, "/");
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.retry_delay, Duration::from_secs(10));
        assert_eq!(config.archive_dir(), tmp.path().join("uploaded"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reads_settings_section_from_ini() {
        let tmp = tempfile::tempdir().unwrap();
        let ini = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &ini,
            format!(
                "[Settings]\nhost = files.example.org\nport = 2222\nusername = bot\npassword = pw\n\
                 local_folder = {}\nremote_folder = /drop\npoll_interval = 2m\nretry_delay = 5\n",
                tmp.path().display()
            ),
        )
        .unwrap();

        let raw = RawSettings::from_ini_file(&ini).unwrap();
        let config = Config::from_raw(raw).unwrap();

        assert_eq!(config.host, "files.example.org");
        assert_eq!(config.port, 2222);
        assert_eq!(config.remote_folder, "/drop");
        assert_eq!(config.poll_interval, Duration::from_secs(120));
        assert_eq!(config.retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_file_gives_empty_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = RawSettings::from_ini_file(&tmp.path().join("absent.ini")).unwrap();
        assert!(raw.host.is_none());
        assert!(matches!(Config::from_raw(raw), Err(ConfigError::Missing("host"))));
    }

    #[test]
    fn test_environment_overrides_file_values() {
        let tmp = tempfile::tempdir().unwrap();
        let mut raw = complete_raw(tmp.path());
        let env: HashMap<&str, &str> = [("SFTP_HOST", "other.example.org"), ("SFTP_PORT", "2022")]
            .into_iter()
            .collect();

        raw.apply_env(|var| env.get(var).map(|v| v.to_string()));
        let config = Config::from_raw(raw).unwrap();

        assert_eq!(config.host, "other.example.org");
        assert_eq!(config.port, 2022);
        assert_eq!(config.username, "uploader");
    }

    #[test]
    fn test_rejects_bad_values() {
        let tmp = tempfile::tempdir().unwrap();

        let mut raw = complete_raw(tmp.path());
        raw.port = Some("ssh".to_string());
        assert!(matches!(Config::from_raw(raw), Err(ConfigError::Invalid { key: "port", .. })));

        let mut raw = complete_raw(tmp.path());
        raw.poll_interval = Some("soon".to_string());
        assert!(matches!(
            Config::from_raw(raw),
            Err(ConfigError::Invalid { key: "poll_interval", .. })
        ));

        let mut raw = complete_raw(tmp.path());
        raw.password = Some("   ".to_string());
        assert!(matches!(Config::from_raw(raw), Err(ConfigError::Missing("password"))));
    }

    #[test]
    fn test_validate_rejects_zero_and_missing_folder() {
        let tmp = tempfile::tempdir().unwrap();

        let mut config = Config::from_raw(complete_raw(tmp.path())).unwrap();
        config.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { key: "port", .. })));

        let mut config = Config::from_raw(complete_raw(tmp.path())).unwrap();
        config.retry_delay = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "retry_delay", .. })
        ));

        let config = Config::from_raw(complete_raw(&tmp.path().join("missing"))).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::WatchedDirectory(_))));
    }

    #[test]
    fn test_debug_redacts_password() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::from_raw(complete_raw(tmp.path())).unwrap();
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
