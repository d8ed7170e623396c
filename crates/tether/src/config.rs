//! Connection configuration
//!
//! Loaded once per invocation from a TOML file and passed by reference to
//! everything that talks to the remote host:
//!
//! ```toml
//! [server]
//! host = "login.example.edu"
//! port = 22
//! user = "z1111111"
//!
//! [auth]
//! method = "password"   # or "key" with key_path = "~/.ssh/id_ed25519"
//!
//! [sync]
//! exclude = [".git", "node_modules"]
//! ```

use crate::{Result, TetherError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_ssh::{control_socket_path, SshConfig};

/// Environment variable overriding the config location
pub const CONFIG_ENV: &str = "TETHER_CONFIG";

/// Patterns excluded from sync when the config names none
pub const DEFAULT_EXCLUDES: [&str; 5] = [".git", "__pycache__", "node_modules", ".venv", "target"];

/// How the master connection authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Password, from the config or prompted
    #[default]
    Password,
    /// Private key file
    Key,
}

/// Everything needed to reach one remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Remote hostname
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Login name
    pub user: String,
    /// Authentication method
    pub auth_method: AuthMethod,
    /// Stored password, if any
    pub password: Option<String>,
    /// Private key path as written in the config
    pub key_path: Option<String>,
    /// rsync exclude patterns, in order
    pub exclude: Vec<String>,
    /// Directory holding control sockets
    pub socket_dir: PathBuf,
    /// Idle lifetime of the master connection
    pub control_persist: Duration,
    /// Poll interval when no event watcher is installed
    pub poll_interval: Duration,
    /// Event watcher latency
    pub watch_latency: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    server: ServerSection,
    auth: AuthSection,
    sync: SyncSection,
    session: SessionSection,
    watch: WatchSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    host: String,
    port: u16,
    user: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            user: String::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AuthSection {
    method: AuthMethod,
    password: Option<String>,
    key_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SyncSection {
    exclude: Vec<String>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            exclude: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SessionSection {
    socket_dir: PathBuf,
    control_persist_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from("/tmp"),
            control_persist_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WatchSection {
    poll_interval_ms: u64,
    latency_secs: u64,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            latency_secs: 1,
        }
    }
}

impl From<ConfigFile> for ConnectionConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            host: file.server.host,
            port: file.server.port,
            user: file.server.user,
            auth_method: file.auth.method,
            password: file.auth.password.filter(|p| !p.is_empty()),
            key_path: file.auth.key_path,
            exclude: file.sync.exclude,
            socket_dir: file.session.socket_dir,
            control_persist: Duration::from_secs(file.session.control_persist_secs),
            poll_interval: Duration::from_millis(file.watch.poll_interval_ms),
            watch_latency: Duration::from_secs(file.watch.latency_secs),
        }
    }
}

impl ConnectionConfig {
    /// Default config location, `~/.config/tether/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("tether").join("config.toml"))
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        let config = Self::from(file);
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TetherError::ConfigMissing {
                path: path.to_path_buf(),
            });
        }

        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| TetherError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Check the invariants every remote operation relies on
    pub fn validate(&self) -> Result<()> {
        if self.user.trim().is_empty() {
            return Err(TetherError::Config("server.user is required".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(TetherError::Config("server.host is required".to_string()));
        }
        if self.port == 0 {
            return Err(TetherError::Config("server.port must be between 1 and 65535".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(TetherError::Config("watch.poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Control socket shared by every invocation against this endpoint
    pub fn control_socket(&self) -> PathBuf {
        control_socket_path(&self.socket_dir, &self.user, &self.host, self.port)
    }

    /// Key path with `~` expanded, only for key authentication
    pub fn resolved_key_path(&self) -> Option<PathBuf> {
        match self.auth_method {
            AuthMethod::Key => self.key_path.as_deref().map(expand_home),
            AuthMethod::Password => None,
        }
    }

    /// Transport settings for this endpoint
    pub fn ssh_config(&self) -> SshConfig {
        let mut ssh = SshConfig::new(self.host.clone(), self.port, self.user.clone());
        ssh.key_path = self.resolved_key_path();
        ssh.control_path = self.control_socket();
        ssh.control_persist = self.control_persist;
        ssh
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(path),
    }
}

/// Write a starter config to `path`, creating parent directories.
///
/// An existing file is replaced.
pub fn write_default(path: &Path, host: &str, user: &str, password: Option<&str>) -> Result<()> {
    let password_line = match password.filter(|p| !p.is_empty()) {
        Some(password) => format!("password = {}", toml_string(password)),
        None => "# password = \"\"  # optional, prompted when missing".to_string(),
    };
    let exclude = DEFAULT_EXCLUDES
        .iter()
        .map(|p| toml_string(p))
        .collect::<Vec<_>>()
        .join(", ");

    let content = format!(
        "[server]\n\
         host = {host}\n\
         port = 22\n\
         user = {user}\n\
         \n\
         [auth]\n\
         method = \"password\"\n\
         {password_line}\n\
         \n\
         # [auth]\n\
         # method = \"key\"\n\
         # key_path = \"~/.ssh/id_ed25519\"\n\
         \n\
         [sync]\n\
         exclude = [{exclude}]\n",
        host = toml_string(host),
        user = toml_string(user),
    );

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn toml_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
