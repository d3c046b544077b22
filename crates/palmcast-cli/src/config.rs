//! Configuration – reads/writes `~/.palmcast/config.toml`.
//!
//! Only the OSC destination is configurable.

use palmcast_types::PalmError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

/// Persisted user configuration stored in `~/.palmcast/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Host name or IP address the pose messages are sent to.
    #[serde(default = "default_host")]
    pub host: String,

    /// UDP port on `host`.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    12345
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Resolve `host:port` to the first matching socket address.
    ///
    /// # Errors
    ///
    /// [`PalmError::Config`] if the host does not resolve.
    pub fn destination(&self) -> Result<SocketAddr, PalmError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| PalmError::Config(format!("cannot resolve {}:{}: {e}", self.host, self.port)))?
            .next()
            .ok_or_else(|| PalmError::Config(format!("{}:{} has no addresses", self.host, self.port)))
    }

    /// Address a local receiver listens on: every interface, same port.
    pub fn listen_addr(&self) -> SocketAddr {
        (Ipv4Addr::UNSPECIFIED, self.port).into()
    }
}

/// Return the path to `~/.palmcast/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".palmcast").join("config.toml")
}

/// Load the config from disk and apply env overrides.  Returns `None` if
/// the file does not exist.
pub fn load() -> Result<Option<Config>, PalmError> {
    Ok(load_from(&config_path())?.map(|mut cfg| {
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, PalmError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| PalmError::Config(format!("read {}: {e}", path.display())))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| PalmError::Config(format!("parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Load the config, falling back to defaults (plus env overrides) when the
/// file is missing.
pub fn load_or_default() -> Result<Config, PalmError> {
    match load()? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Apply `PALMCAST_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PALMCAST_HOST` | `host` |
/// | `PALMCAST_PORT` | `port` (ignored unless it parses as `u16`) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("PALMCAST_HOST")
        && !v.trim().is_empty()
    {
        cfg.host = v.trim().to_string();
    }
    if let Ok(v) = std::env::var("PALMCAST_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.port = port;
    }
}

/// Save the config to disk, creating `~/.palmcast/` if necessary.
pub fn save(cfg: &Config) -> Result<(), PalmError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), PalmError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PalmError::Config(format!("create {}: {e}", parent.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| PalmError::Config(format!("chmod {}: {e}", parent.display())))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| PalmError::Config(format!("serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| PalmError::Config(format!("write {}: {e}", path.display())))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| PalmError::Config(format!("write {}: {e}", path.display())))?;
    Ok(())
}
