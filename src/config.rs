//! Configuration for btd
//!
//! The daemon is configured by a small `key = value` file, discovered in the
//! usual XDG locations, plus a verbosity level from the command line. The
//! result is an immutable [`Config`] built once at startup and passed to the
//! server and store explicitly.
//!
//! ## File Format
//!
//! ```text
//! # comment
//! socket = /var/run/btd.socket, localhost:7070
//! db = ~/.local/share/btd
//! pidfile = /var/run/btd.pid   # trailing comments are fine
//! check_fields = true
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default Unix socket the daemon listens on.
pub const DEFAULT_SOCKET: &str = "/var/run/btd.socket";

/// Highest verbosity level accepted.
pub const MAX_VERBOSITY: u8 = 5;

/// Verbosity when no `-v`/`-q` flag is given.
pub const DEFAULT_VERBOSITY: u8 = 1;

/// Errors raised while locating or parsing the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },

    /// An explicitly named configuration file does not exist
    #[error("configuration file '{0}' doesn't exist")]
    NotFound(PathBuf),

    #[error("invalid socket address '{0}'")]
    InvalidSocket(String),

    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },
}

/// One socket candidate as written in the configuration.
///
/// TCP candidates are resolved when the server binds, and may expand to
/// several addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketSpec {
    /// Unix domain socket at a filesystem path.
    Unix(PathBuf),

    /// TCP host name or address and port.
    Tcp { host: String, port: u16 },
}

impl SocketSpec {
    /// Parses a single candidate.
    ///
    /// `unix:<path>` and anything starting with `/`, `~` or `.` is a Unix
    /// socket path; everything else must be `host:port`.
    ///
    /// # Example
    /// ```
    /// use btd::config::SocketSpec;
    /// use std::path::PathBuf;
    ///
    /// assert_eq!(
    ///     "/run/btd.sock".parse::<SocketSpec>().unwrap(),
    ///     SocketSpec::Unix(PathBuf::from("/run/btd.sock"))
    /// );
    /// assert_eq!(
    ///     "[::1]:7070".parse::<SocketSpec>().unwrap(),
    ///     SocketSpec::Tcp { host: "::1".to_string(), port: 7070 }
    /// );
    /// ```
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let input = input.trim();
        if let Some(path) = input.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ConfigError::InvalidSocket(input.to_string()));
            }
            return Ok(SocketSpec::Unix(expand_tilde(path)));
        }
        if input.starts_with(['/', '~', '.']) {
            return Ok(SocketSpec::Unix(expand_tilde(input)));
        }

        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidSocket(input.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidSocket(input.to_string()))?;
        if host.is_empty() {
            return Err(ConfigError::InvalidSocket(input.to_string()));
        }
        Ok(SocketSpec::Tcp {
            host: host.to_string(),
            port,
        })
    }

    /// Parses a comma separated candidate list.
    pub fn parse_list(input: &str) -> Result<Vec<Self>, ConfigError> {
        input
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(SocketSpec::parse)
            .collect()
    }
}

impl std::str::FromStr for SocketSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SocketSpec::parse(s)
    }
}

impl fmt::Display for SocketSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketSpec::Unix(path) => write!(f, "unix:{}", path.display()),
            SocketSpec::Tcp { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            SocketSpec::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

/// Main configuration for a btd instance
#[derive(Debug, Clone)]
pub struct Config {
    /// Configuration file that was read, if any
    pub config_path: Option<PathBuf>,

    /// 0 (quiet) to 5 (everything)
    pub verbosity: u8,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Ordered socket candidates; the first one that binds wins
    pub sockets: Vec<SocketSpec>,

    /// Idle limit for a single read from a client, `None` waits forever
    pub read_timeout: Option<Duration>,

    /// How long shutdown waits for open sessions before aborting them
    pub shutdown_grace: Duration,

    // -------------------------------------------------------------------------
    // Protocol Configuration
    // -------------------------------------------------------------------------
    /// Enforce required fields per BibTeX entry type
    pub check_fields: bool,

    /// Largest attachment accepted, `None` for no limit
    pub max_attachment_size: Option<u64>,

    /// Answer malformed integer arguments with an error envelope instead of
    /// staying silent
    pub report_malformed_integers: bool,

    // -------------------------------------------------------------------------
    // Process Configuration
    // -------------------------------------------------------------------------
    /// Store directory
    pub db: PathBuf,

    /// Where to write the daemon's pid
    pub pidfile: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: None,
            verbosity: DEFAULT_VERBOSITY,
            sockets: vec![SocketSpec::Unix(PathBuf::from(DEFAULT_SOCKET))],
            read_timeout: None,
            shutdown_grace: Duration::from_secs(5),
            check_fields: false,
            max_attachment_size: None,
            report_malformed_integers: false,
            db: dirs::data_dir()
                .map(|dir| dir.join("btd"))
                .unwrap_or_else(|| PathBuf::from("./btd_data")),
            pidfile: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Locates and reads the configuration file.
    ///
    /// `explicit` must exist when given. Otherwise the XDG locations are
    /// searched; when nothing is found the defaults are used.
    pub fn load(explicit: Option<&Path>, verbosity: u8) -> Result<Config, ConfigError> {
        let mut config = Config::builder().verbosity(verbosity).build();

        let Some(path) = discover(explicit)? else {
            warn!("No configuration file found, using defaults");
            return Ok(config);
        };

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        config.apply_str(&contents)?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// Applies every `key = value` line of `contents`.
    pub fn apply_str(&mut self, contents: &str) -> Result<(), ConfigError> {
        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                let key = line.trim();
                if !key.is_empty() && !key.starts_with('#') {
                    warn!(line = key, "Ignoring configuration line without '='");
                }
                continue;
            };

            let key = key.trim();
            if key.is_empty() || key.starts_with('#') {
                continue;
            }
            let value = value.split('#').next().unwrap_or_default().trim();
            if value.is_empty() {
                continue;
            }
            self.apply(key, value)?;
        }
        Ok(())
    }

    /// Applies one configuration option.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "socket" => self.sockets = SocketSpec::parse_list(value)?,
            "db" => self.db = expand_tilde(value),
            "pidfile" => self.pidfile = Some(expand_tilde(value)),
            "check_fields" => self.check_fields = parse_bool(value).ok_or_else(invalid)?,
            "report_malformed_integers" => {
                self.report_malformed_integers = parse_bool(value).ok_or_else(invalid)?
            }
            "read_timeout" => {
                let secs = value.parse::<f64>().map_err(|_| invalid())?;
                self.read_timeout = match secs {
                    s if s == 0.0 => None,
                    s if s.is_finite() && s > 0.0 => Some(Duration::from_secs_f64(s)),
                    _ => return Err(invalid()),
                };
            }
            "shutdown_grace" => {
                let secs = value.parse::<f64>().map_err(|_| invalid())?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(invalid());
                }
                self.shutdown_grace = Duration::from_secs_f64(secs);
            }
            "max_attachment_size" => {
                let size = value.parse::<u64>().map_err(|_| invalid())?;
                self.max_attachment_size = if size == 0 { None } else { Some(size) };
            }
            _ => warn!(key, "Ignoring unknown configuration key"),
        }
        Ok(())
    }

}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        let sockets = self
            .sockets
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        writeln!(f, "BTD Config digest")?;
        writeln!(f, "-----------------")?;
        writeln!(f, "configpath: '{}'", opt(&self.config_path))?;
        writeln!(f, "verbosity: '{}'", self.verbosity)?;
        writeln!(f)?;
        writeln!(f, "socket: '{}'", sockets)?;
        writeln!(f, "db: '{}'", self.db.display())?;
        writeln!(f, "pidfile: '{}'", opt(&self.pidfile))?;
        writeln!(f, "check_fields: '{}'", self.check_fields)?;
        writeln!(f, "read_timeout: '{:?}'", self.read_timeout)?;
        writeln!(f, "shutdown_grace: '{:?}'", self.shutdown_grace)?;
        writeln!(f, "max_attachment_size: '{:?}'", self.max_attachment_size)?;
        write!(f, "report_malformed_integers: '{}'", self.report_malformed_integers)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Replace the socket candidates
    pub fn sockets(mut self, sockets: Vec<SocketSpec>) -> Self {
        self.config.sockets = sockets;
        self
    }

    pub fn verbosity(mut self, level: u8) -> Self {
        self.config.verbosity = level.min(MAX_VERBOSITY);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Maps a verbosity level to a `tracing` filter directive.
pub fn verbosity_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Finds the configuration file.
///
/// Search order: the explicit path, `$XDG_CONFIG_HOME/btd/config`
/// (`~/.config` by default), `/etc/btd.conf`, then `btd/config` under every
/// entry of `$XDG_CONFIG_DIRS` (`/etc/xdg` by default).
pub fn discover(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let config_home = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| "~/.config".to_string());
    let config_dirs = std::env::var("XDG_CONFIG_DIRS").unwrap_or_else(|_| "/etc/xdg".to_string());

    let mut candidates = std::iter::once(expand_tilde(&config_home).join("btd/config"))
        .chain(std::iter::once(PathBuf::from("/etc/btd.conf")))
        .chain(
            config_dirs
                .split(':')
                .filter(|dir| !dir.is_empty())
                .map(|dir| expand_tilde(dir).join("btd/config")),
        );

    Ok(candidates.find(|path| path.exists()))
}

/// Expands a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.verbosity, 1);
        assert_eq!(
            config.sockets,
            vec![SocketSpec::Unix(PathBuf::from(DEFAULT_SOCKET))]
        );
        assert!(config.read_timeout.is_none());
        assert!(config.max_attachment_size.is_none());
        assert!(!config.report_malformed_integers);
        assert!(!config.check_fields);
    }

    #[test]
    fn test_apply_file_contents() {
        let mut config = Config::default();
        config
            .apply_str(
                "# btd configuration\n\
                 socket = unix:/tmp/btd.sock, 127.0.0.1:7070 # two candidates\n\
                 db=/srv/btd\n\
                 \n\
                 pidfile =\n\
                 check_fields = yes\n\
                 read_timeout = 2.5\n\
                 max_attachment_size = 1048576\n\
                 #db = /nowhere\n\
                 colour = blue\n",
            )
            .unwrap();

        assert_eq!(
            config.sockets,
            vec![
                SocketSpec::Unix(PathBuf::from("/tmp/btd.sock")),
                SocketSpec::Tcp {
                    host: "127.0.0.1".to_string(),
                    port: 7070
                },
            ]
        );
        assert_eq!(config.db, PathBuf::from("/srv/btd"));
        assert!(config.pidfile.is_none());
        assert!(config.check_fields);
        assert_eq!(config.read_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.max_attachment_size, Some(1048576));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = Config::default();
        assert!(matches!(
            config.apply("check_fields", "maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.apply("read_timeout", "-1"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.apply("socket", "localhost"),
            Err(ConfigError::InvalidSocket(_))
        ));
        assert!(matches!(
            config.apply("socket", "localhost:http"),
            Err(ConfigError::InvalidSocket(_))
        ));
    }

    #[test]
    fn test_zero_disables_limits() {
        let mut config = Config::default();
        config.apply("read_timeout", "0").unwrap();
        config.apply("max_attachment_size", "0").unwrap();
        assert!(config.read_timeout.is_none());
        assert!(config.max_attachment_size.is_none());
    }

    #[test]
    fn test_socket_spec_display() {
        let specs = SocketSpec::parse_list("./btd.sock,[::1]:80, example.org:7070").unwrap();
        let shown: Vec<String> = specs.iter().map(ToString::to_string).collect();
        assert_eq!(shown, vec!["unix:./btd.sock", "[::1]:80", "example.org:7070"]);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
        assert_eq!(expand_tilde("rel/~"), PathBuf::from("rel/~"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/x"), home.join("x"));
            assert_eq!(expand_tilde("~"), home);
        }
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let missing = Path::new("/definitely/not/here/btd.conf");
        assert!(matches!(
            Config::load(Some(missing), 1),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        fs::write(&path, "db = /data/btd\nreport_malformed_integers = on\n").unwrap();

        let config = Config::load(Some(&path), 9).unwrap();
        assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(config.db, PathBuf::from("/data/btd"));
        assert!(config.report_malformed_integers);
        assert_eq!(config.verbosity, MAX_VERBOSITY);
    }

    #[test]
    fn test_verbosity_filter() {
        assert_eq!(verbosity_filter(0), "warn");
        assert_eq!(verbosity_filter(1), "info");
        assert_eq!(verbosity_filter(2), "debug");
        assert_eq!(verbosity_filter(5), "trace");
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .sockets(vec![SocketSpec::Unix(PathBuf::from("/tmp/b.sock"))])
            .shutdown_grace(Duration::from_secs(1))
            .verbosity(42)
            .build();
        assert_eq!(config.sockets, vec![SocketSpec::Unix(PathBuf::from("/tmp/b.sock"))]);
        assert_eq!(config.shutdown_grace, Duration::from_secs(1));
        assert_eq!(config.verbosity, MAX_VERBOSITY);
    }
}
