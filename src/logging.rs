use std::{
    fs::{self, OpenOptions},
    sync::Mutex,
};

use anyhow::{Context as _, anyhow};
use tracing_subscriber::{filter::LevelFilter, fmt::MakeWriter};

use crate::config::{Config, LogFormat};

const DEFAULT_LOG_LEVEL: &str = "info";

/// Installs the global subscriber. Logs go to stderr unless `[logging].file`
/// is set, so that report output on stdout stays clean.
pub fn init(config: &Config, cli_level_override: Option<&str>) -> anyhow::Result<()> {
    let log_level = resolve_log_level(config, cli_level_override)?;
    let log_format = resolve_log_format(config);

    match config.log_file_path()? {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file {}", path.display()))?;
            init_with_writer(log_format, log_level, Mutex::new(file))
        }
        None => init_with_writer(log_format, log_level, std::io::stderr),
    }
}

fn init_with_writer<W>(format: LogFormat, level: LevelFilter, writer: W) -> anyhow::Result<()>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(true)
            .with_writer(writer)
            .json()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(true)
            .with_writer(writer)
            .pretty()
            .try_init(),
    }
    .map_err(|err| anyhow!("initialize logging subscriber: {err}"))
}

fn resolve_log_level(
    config: &Config,
    cli_level_override: Option<&str>,
) -> anyhow::Result<LevelFilter> {
    let raw_level = cli_level_override
        .or_else(|| {
            config
                .logging
                .as_ref()
                .and_then(|logging| logging.level.as_deref())
        })
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let normalized = raw_level.trim().to_ascii_lowercase();

    normalized.parse::<LevelFilter>().map_err(|_| {
        anyhow!(
            "invalid log level `{raw_level}`; expected one of trace, debug, info, warn, error, off"
        )
    })
}

fn resolve_log_format(config: &Config) -> LogFormat {
    config
        .logging
        .as_ref()
        .and_then(|logging| logging.format)
        .unwrap_or(LogFormat::Json)
}
