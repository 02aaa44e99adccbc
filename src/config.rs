use std::{
    env,
    ffi::OsStr,
    fmt, fs,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context as _, bail};
use serde::Deserialize;

pub const APP_NAME: &str = "capsulemon";
pub const PROJECT_CONFIG_FILE: &str = "capsulemon.toml";
const HOME_CONFIG_DIR: &str = ".capsulemon";
const HOME_CONFIG_FILE: &str = "config.toml";
const DB_FILENAME: &str = "contact.db";
const SOCKET_FILENAME: &str = "contact.sock";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub capsule: CapsuleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub contact: ContactConfig,
    pub logging: Option<LoggingConfig>,
    #[serde(skip)]
    dirs: AppDirs,
    #[serde(skip)]
    source: Option<ConfigSource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapsuleConfig {
    #[serde(default = "default_capsule_name")]
    pub name: String,
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        Self {
            name: default_capsule_name(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Message database. Defaults to `contact.db` in the data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogsConfig {
    pub access: Option<PathBuf>,
    pub error: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// Requests under this prefix belong to admin tooling and never appear in reports.
    #[serde(default = "default_internal_prefix")]
    pub internal_prefix: String,
    #[serde(default = "default_journal_prefix")]
    pub journal_prefix: String,
    #[serde(default = "default_journal_entries_prefix")]
    pub journal_entries_prefix: String,
    #[serde(default = "default_feed_path")]
    pub feed_path: String,
    #[serde(default = "default_include_messages")]
    pub include_messages: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            internal_prefix: default_internal_prefix(),
            journal_prefix: default_journal_prefix(),
            journal_entries_prefix: default_journal_entries_prefix(),
            feed_path: default_feed_path(),
            include_messages: default_include_messages(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContactConfig {
    /// SCGI socket. Defaults to `contact.sock` in the runtime directory.
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Per-user directories used when the configuration leaves a path unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppDirs {
    pub data: PathBuf,
    pub state: PathBuf,
    pub runtime: PathBuf,
}

impl AppDirs {
    /// Resolves XDG-style directories from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let home = env::var_os("HOME").map(PathBuf::from);
        let xdg_or_home = |var: &str, fallback: &[&str]| -> anyhow::Result<PathBuf> {
            if let Some(dir) = env::var_os(var).filter(|dir| !dir.is_empty()) {
                return Ok(PathBuf::from(dir).join(APP_NAME));
            }
            let Some(home) = home.as_ref() else {
                bail!("cannot resolve {var} default: HOME is not set");
            };
            Ok(fallback
                .iter()
                .fold(home.clone(), |path, part| path.join(part))
                .join(APP_NAME))
        };

        let runtime = match env::var_os("XDG_RUNTIME_DIR").filter(|dir| !dir.is_empty()) {
            Some(dir) => PathBuf::from(dir).join(APP_NAME),
            None => env::temp_dir().join(APP_NAME),
        };

        Ok(Self {
            data: xdg_or_home("XDG_DATA_HOME", &[".local", "share"])?,
            state: xdg_or_home("XDG_STATE_HOME", &[".local", "state"])?,
            runtime,
        })
    }

    pub fn under(base: &Path) -> Self {
        Self {
            data: base.join("data"),
            state: base.join("state"),
            runtime: base.join("run"),
        }
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Override(PathBuf),
    Project,
    Home(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> PathBuf {
        match self {
            Self::Override(path) | Self::Home(path) => path.clone(),
            Self::Project => PathBuf::from(PROJECT_CONFIG_FILE),
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override(path) => write!(f, "--config {}", path.display()),
            Self::Project => write!(f, "project ./{PROJECT_CONFIG_FILE}"),
            Self::Home(path) => write!(f, "home {}", path.display()),
        }
    }
}

impl Config {
    /// Loads the configuration: an explicit `--config` path wins, then
    /// `./capsulemon.toml`, then `~/.capsulemon/config.toml`. Without any file
    /// the built-in defaults apply.
    pub fn load(override_path: Option<&Path>) -> anyhow::Result<Self> {
        let dirs = AppDirs::from_env()?;
        let source = match override_path {
            Some(path) => Some(ConfigSource::Override(path.to_path_buf())),
            None => discover_source(),
        };

        let config = match source {
            Some(source) => {
                let mut config = Self::from_path(source.path())
                    .with_context(|| format!("load config from {source}"))?;
                config.source = Some(source);
                config
            }
            None => Self::from_toml_str("")?,
        };
        Ok(config.with_dirs(dirs))
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let toml =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&toml)
    }

    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        toml.parse()
    }

    pub fn with_dirs(mut self, dirs: AppDirs) -> Self {
        self.dirs = dirs;
        self
    }

    pub fn source(&self) -> Option<&ConfigSource> {
        self.source.as_ref()
    }

    pub fn db_path(&self) -> anyhow::Result<PathBuf> {
        match self.storage.path.as_deref() {
            Some(path) => self.resolve_path(path),
            None => Ok(self.dirs.data.join(DB_FILENAME)),
        }
    }

    pub fn socket_path(&self) -> anyhow::Result<PathBuf> {
        match self.contact.socket.as_deref() {
            Some(path) => self.resolve_path(path),
            None => Ok(self.dirs.runtime.join(SOCKET_FILENAME)),
        }
    }

    pub fn access_log_path(&self) -> anyhow::Result<Option<PathBuf>> {
        self.logs
            .access
            .as_deref()
            .map(|path| self.resolve_path(path))
            .transpose()
    }

    pub fn error_log_path(&self) -> anyhow::Result<Option<PathBuf>> {
        self.logs
            .error
            .as_deref()
            .map(|path| self.resolve_path(path))
            .transpose()
    }

    /// Log file for `[logging].file`. A bare file name lands in the state
    /// directory.
    pub fn log_file_path(&self) -> anyhow::Result<Option<PathBuf>> {
        let Some(path) = self
            .logging
            .as_ref()
            .and_then(|logging| logging.file.as_deref())
        else {
            return Ok(None);
        };
        if path.parent().is_some_and(|parent| parent.as_os_str().is_empty()) {
            return Ok(Some(self.dirs.state.join(path)));
        }
        self.resolve_path(path).map(Some)
    }

    /// Expands `~` and anchors relative paths at the config file's directory.
    fn resolve_path(&self, path: &Path) -> anyhow::Result<PathBuf> {
        let expanded = expand_tilde_path(path)?;
        if expanded.is_absolute() {
            return Ok(expanded);
        }

        if let Some(source) = self.source.as_ref()
            && let Some(config_dir) = source.path().parent()
        {
            return Ok(config_dir.join(expanded));
        }

        Ok(expanded)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let prefixes = [
            ("report.internal_prefix", &self.report.internal_prefix),
            ("report.journal_prefix", &self.report.journal_prefix),
            ("report.journal_entries_prefix", &self.report.journal_entries_prefix),
            ("report.feed_path", &self.report.feed_path),
        ];
        for (key, value) in prefixes {
            if !value.starts_with('/') {
                bail!("`{key}` must start with `/`, got `{value}`");
            }
        }
        if self.capsule.name.trim().is_empty() {
            bail!("`capsule.name` cannot be empty");
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s).context("parse config TOML")?;
        config.validate()?;
        Ok(config)
    }
}

fn discover_source() -> Option<ConfigSource> {
    if Path::new(PROJECT_CONFIG_FILE).is_file() {
        return Some(ConfigSource::Project);
    }

    let home_config = PathBuf::from(env::var_os("HOME")?)
        .join(HOME_CONFIG_DIR)
        .join(HOME_CONFIG_FILE);
    home_config
        .is_file()
        .then_some(ConfigSource::Home(home_config))
}

fn expand_tilde_path(path: &Path) -> anyhow::Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(component)) if component == OsStr::new("~") => {
            let home = env::var_os("HOME").ok_or_else(|| {
                anyhow::anyhow!("cannot expand `~` in {}: HOME is not set", path.display())
            })?;
            let mut expanded = PathBuf::from(home);
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn default_capsule_name() -> String {
    "capsule".to_owned()
}

fn default_internal_prefix() -> String {
    "/remini".to_owned()
}

fn default_journal_prefix() -> String {
    "/gemlog".to_owned()
}

fn default_journal_entries_prefix() -> String {
    "/gemlog/posts/".to_owned()
}

fn default_feed_path() -> String {
    "/gemlog/posts/atom.xml".to_owned()
}

fn default_include_messages() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{AppDirs, Config, LogFormat};

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml_str("")
            .expect("empty config should parse")
            .with_dirs(AppDirs::under(Path::new("/srv/capsule")));

        assert_eq!(config.capsule.name, "capsule");
        assert_eq!(config.report.internal_prefix, "/remini");
        assert_eq!(config.report.journal_prefix, "/gemlog");
        assert_eq!(config.report.feed_path, "/gemlog/posts/atom.xml");
        assert!(config.report.include_messages);
        assert!(config.logging.is_none());
        assert_eq!(
            config.db_path().unwrap(),
            PathBuf::from("/srv/capsule/data/contact.db")
        );
        assert_eq!(
            config.socket_path().unwrap(),
            PathBuf::from("/srv/capsule/run/contact.sock")
        );
        assert_eq!(config.access_log_path().unwrap(), None);
    }

    #[test]
    fn full_config_parses() {
        let config = Config::from_toml_str(
            r#"
[capsule]
name = "example.org"

[storage]
path = "/var/lib/capsulemon/contact.db"

[logs]
access = "/var/log/molly/access.log"
error = "/var/log/molly/error.log"

[report]
internal_prefix = "/admin"
include_messages = false

[contact]
socket = "/run/capsulemon/contact.sock"

[logging]
level = "debug"
format = "pretty"
file = "/var/log/capsulemon.log"
"#,
        )
        .expect("config should parse");

        assert_eq!(config.capsule.name, "example.org");
        assert_eq!(
            config.db_path().unwrap(),
            PathBuf::from("/var/lib/capsulemon/contact.db")
        );
        assert_eq!(
            config.error_log_path().unwrap(),
            Some(PathBuf::from("/var/log/molly/error.log"))
        );
        assert_eq!(config.report.internal_prefix, "/admin");
        assert_eq!(config.report.journal_prefix, "/gemlog");
        assert!(!config.report.include_messages);
        let logging = config.logging.as_ref().unwrap();
        assert_eq!(logging.format, Some(LogFormat::Pretty));
        assert_eq!(
            config.log_file_path().unwrap(),
            Some(PathBuf::from("/var/log/capsulemon.log"))
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml_str(
            r#"
[capsule]
name = "example.org"
colour = "blue"
"#,
        )
        .unwrap_err();
        assert!(
            format!("{err:#}").contains("unknown field"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn prefixes_must_be_absolute_paths() {
        let err = Config::from_toml_str(
            r#"
[report]
journal_prefix = "gemlog"
"#,
        )
        .unwrap_err();
        assert!(
            err.to_string().contains("report.journal_prefix"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn relative_paths_resolve_against_config_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("capsulemon.toml");
        std::fs::write(
            &config_path,
            r#"
[logs]
access = "logs/access.log"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&config_path)).expect("config should load");
        assert_eq!(
            config.access_log_path().unwrap(),
            Some(temp_dir.path().join("logs").join("access.log"))
        );
    }

    #[test]
    fn bare_log_file_name_lands_in_state_dir() {
        let config = Config::from_toml_str(
            r#"
[logging]
file = "capsulemon.log"
"#,
        )
        .unwrap()
        .with_dirs(AppDirs::under(Path::new("/srv/capsule")));

        assert_eq!(
            config.log_file_path().unwrap(),
            Some(PathBuf::from("/srv/capsule/state/capsulemon.log"))
        );
    }
}
