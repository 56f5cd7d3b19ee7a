//! Configuration: the TOML file plus fixed runtime paths.
//!
//! The file lives at `~/.config/tab-switcher/config.toml`. Every key is
//! optional; a missing file is the same as an empty one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::resolver::ResolverError;
use crate::resolver::catalog::BrowserCatalog;

const APP_DIR: &str = "tab-switcher";
const CONFIG_FILE: &str = "config.toml";

/// Lock file name. Fixed across versions so helpers from different
/// installs still contend for the same hook.
pub const LOCK_FILE: &str = "hook.lock";
/// Bus socket name, likewise version independent.
pub const BUS_SOCKET: &str = "bus.sock";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Browsers(#[from] ResolverError),
    #[error("create runtime directory {path}: {source}")]
    RuntimeDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracing filter used when `TAB_SWITCHER_LOG` is unset.
    pub log_level: Option<String>,
    pub shortcuts: ShortcutConfig,
    pub timing: TimingConfig,
    pub browsers: Vec<BrowserEntry>,
    /// Program and arguments that read the copied URL on stdin.
    /// Defaults to `xclip -selection clipboard`.
    pub clipboard_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShortcutConfig {
    /// Cycles forward; the same chord plus Shift cycles backward.
    pub tab_switch: String,
    pub copy_url: String,
}

impl Default for ShortcutConfig {
    fn default() -> Self {
        Self {
            tab_switch: "Ctrl+Tab".into(),
            copy_url: "Ctrl+Shift+C".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub reveal_delay_ms: u64,
    pub leader_poll_secs: u64,
    pub focus_check_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reveal_delay_ms: 150,
            leader_poll_secs: 5,
            focus_check_ms: 250,
        }
    }
}

impl TimingConfig {
    pub fn reveal_delay(&self) -> Duration {
        Duration::from_millis(self.reveal_delay_ms)
    }

    pub fn leader_poll(&self) -> Duration {
        Duration::from_secs(self.leader_poll_secs.max(1))
    }

    pub fn focus_check(&self) -> Duration {
        Duration::from_millis(self.focus_check_ms.max(10))
    }
}

/// A `[[browsers]]` table: overrides a built-in browser by id, or adds
/// a new one when `executable` is given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrowserEntry {
    pub id: String,
    pub name: Option<String>,
    /// Regex over the executable file name, matched case-insensitively.
    pub executable: Option<String>,
    pub enabled: Option<bool>,
    pub combine_all_windows: Option<bool>,
}

impl Config {
    /// `~/.config/tab-switcher/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join(CONFIG_FILE)
    }

    /// Load from `path`, or the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => Self::load_from(&Self::default_path()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        // Surface bad patterns at load time rather than at first lookup.
        config.catalog()?;

        tracing::debug!(
            path = %path.display(),
            browsers = config.browsers.len(),
            "loaded config"
        );
        Ok(config)
    }

    /// Built-in browser catalog with this file's `[[browsers]]` applied.
    pub fn catalog(&self) -> Result<BrowserCatalog, ResolverError> {
        BrowserCatalog::with_overrides(&self.browsers)
    }
}

/// Where the lock file and bus socket live.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    pub dir: PathBuf,
    pub lock_file: PathBuf,
    pub bus_socket: PathBuf,
}

impl RuntimePaths {
    /// `$XDG_RUNTIME_DIR/tab-switcher`, or a per-user directory under the
    /// system temp dir when there is no runtime dir.
    pub fn resolve(override_dir: Option<&Path>) -> Self {
        let dir = match override_dir {
            Some(dir) => dir.to_path_buf(),
            None => match dirs::runtime_dir() {
                Some(runtime) => runtime.join(APP_DIR),
                None => std::env::temp_dir()
                    .join(format!("{APP_DIR}-{}", nix::unistd::getuid().as_raw())),
            },
        };
        Self::in_dir(dir)
    }

    pub fn in_dir(dir: PathBuf) -> Self {
        Self {
            lock_file: dir.join(LOCK_FILE),
            bus_socket: dir.join(BUS_SOCKET),
            dir,
        }
    }

    /// Create the directory, owner-only.
    pub fn ensure(&self) -> Result<(), ConfigError> {
        use std::os::unix::fs::DirBuilderExt;

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&self.dir)
            .map_err(|source| ConfigError::RuntimeDir {
                path: self.dir.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.shortcuts, ShortcutConfig::default());
        assert_eq!(config.timing.reveal_delay(), Duration::from_millis(150));
        assert_eq!(config.timing.leader_poll(), Duration::from_secs(5));
        assert!(config.browsers.is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[shortcuts]
tab_switch = "Alt+Tab"

[timing]
reveal_delay_ms = 80

[[browsers]]
id = "com.google.Chrome"
combine_all_windows = true

[[browsers]]
id = "org.example.Forkium"
name = "Forkium"
executable = "^forkium$"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.shortcuts.tab_switch, "Alt+Tab");
        assert_eq!(config.shortcuts.copy_url, "Ctrl+Shift+C");
        assert_eq!(config.timing.reveal_delay_ms, 80);
        assert_eq!(config.timing.focus_check_ms, 250);

        let catalog = config.catalog().unwrap();
        assert!(catalog.combine_all_windows("com.google.Chrome"));
        assert_eq!(
            catalog.identify("forkium").map(|b| b.id.as_str()),
            Some("org.example.Forkium")
        );
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[timing\nreveal_delay_ms = 1").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn bad_browser_pattern_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[browsers]]\nid = \"x\"\nexecutable = \"(\"\n").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Browsers(ResolverError::Pattern { .. }))
        ));
    }

    #[test]
    fn runtime_paths_use_fixed_names() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RuntimePaths::resolve(Some(&dir.path().join("rt")));
        assert_eq!(paths.lock_file, dir.path().join("rt").join("hook.lock"));
        assert_eq!(paths.bus_socket, dir.path().join("rt").join("bus.sock"));

        paths.ensure().unwrap();
        assert!(paths.dir.is_dir());
    }
}
