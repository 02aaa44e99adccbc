use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use capsulemon::{
    config::Config,
    error::ConfigError,
    logfile::Period,
    logging,
    report::{self, ReportSettings, ReportSources},
    server,
    store::{MessageFilter, MessageStore},
    timestamp,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "capsulemon", about = "Contact form and activity reports for a Gemini capsule")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the contact form over SCGI until interrupted.
    Serve {
        /// Optional path to config TOML. If omitted, default discovery is used.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override log level (trace, debug, info, warn, error, off).
        #[arg(long)]
        log_level: Option<String>,
        /// Listen on this socket instead of the configured one.
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Read stored messages.
    Messages {
        /// Optional path to config TOML. If omitted, default discovery is used.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override log level (trace, debug, info, warn, error, off).
        #[arg(long)]
        log_level: Option<String>,
        #[command(subcommand)]
        action: MessagesCommand,
    },
    /// Print an activity report built from the server logs.
    Report {
        /// Optional path to config TOML. If omitted, default discovery is used.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override log level (trace, debug, info, warn, error, off).
        #[arg(long)]
        log_level: Option<String>,
        /// Only count activity after this time.
        #[arg(long, value_parser = timestamp::parse_cli_arg)]
        since: Option<DateTime<Utc>>,
        /// Only count activity before this time.
        #[arg(long, value_parser = timestamp::parse_cli_arg)]
        until: Option<DateTime<Utc>>,
        /// Write the report to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand, Clone, PartialEq, Eq)]
enum MessagesCommand {
    /// Print messages.
    Print {
        /// Print unread messages only.
        #[arg(long)]
        unread: bool,
        /// Mark the printed messages as read.
        #[arg(long)]
        mark_read: bool,
    },
    /// Print the number of messages.
    Count {
        /// Count unread messages only.
        #[arg(long)]
        unread: bool,
        /// Count messages left after this time.
        #[arg(long, value_parser = timestamp::parse_cli_arg)]
        since: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            log_level,
            socket,
        } => {
            let config = Config::load(config.as_deref())?;
            logging::init(&config, log_level.as_deref())?;
            let db_path = config.db_path()?;
            let store = Arc::new(MessageStore::open(&db_path)?);
            let handle = match socket {
                Some(socket) => server::serve_on(&socket, store).await?,
                None => server::serve(&config, store).await?,
            };
            eprintln!("{}", startup_summary(&config, &handle.socket_path, &db_path));
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down contact endpoint");
            handle.shutdown().await;
        }
        Command::Messages {
            config,
            log_level,
            action,
        } => {
            let config = Config::load(config.as_deref())?;
            logging::init(&config, log_level.as_deref())?;
            let store = MessageStore::open(config.db_path()?)?;
            let stdout = io::stdout();
            run_messages_command(&store, action, &mut stdout.lock())?;
        }
        Command::Report {
            config,
            log_level,
            since,
            until,
            output,
        } => {
            let config = Config::load(config.as_deref())?;
            logging::init(&config, log_level.as_deref())?;
            let lines = run_report(&config, Period::new(since, until), Utc::now())?;
            match output {
                Some(path) => {
                    let mut file = fs::File::create(&path)
                        .with_context(|| format!("create report file {}", path.display()))?;
                    write_lines(&mut file, &lines)?;
                }
                None => write_lines(&mut io::stdout().lock(), &lines)?,
            }
        }
    }

    Ok(())
}

fn run_messages_command(
    store: &MessageStore,
    action: MessagesCommand,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match action {
        MessagesCommand::Print { unread, mark_read } => {
            let filter = if unread {
                MessageFilter::unread()
            } else {
                MessageFilter::default()
            };
            let messages = store.query(&filter)?;
            for message in &messages {
                writeln!(out, "Script path: {}", message.script_path)?;
                writeln!(out, "Path info: {}", message.path_info)?;
                writeln!(out, "TLS client hash: {}", message.tls_client_hash)?;
                writeln!(out, "IP address: {}", message.ip_addr)?;
                writeln!(out, "Time: {}", timestamp::display(&message.time))?;
                writeln!(out, "Message: {}", message.message)?;
                writeln!(out, "Read: {}", message.read)?;
                writeln!(out)?;
            }
            if mark_read {
                let ids: Vec<_> = messages.iter().map(|message| message.id).collect();
                store.mark_read(&ids)?;
            }
        }
        MessagesCommand::Count { unread, since } => {
            let filter = MessageFilter {
                since,
                read: unread.then_some(false),
                ..MessageFilter::default()
            };
            writeln!(out, "{}", count_line(store.count(&filter)?, since.as_ref()))?;
        }
    }
    Ok(())
}

fn count_line(count: u64, since: Option<&DateTime<Utc>>) -> String {
    match since {
        Some(since) => format!(
            "{count} messages since {}.",
            since.format("%Y-%m-%d at %H:%M UTC")
        ),
        None => format!("{count} messages."),
    }
}

fn run_report(
    config: &Config,
    period: Period,
    generated_at: DateTime<Utc>,
) -> anyhow::Result<Vec<String>> {
    let access_log = config.access_log_path()?.ok_or_else(|| {
        ConfigError::Invalid("no access log configured; set `logs.access`".to_owned())
    })?;
    let error_log = config.error_log_path()?;
    let store = report_store(config)?;

    let sources = ReportSources {
        access_log: &access_log,
        error_log: error_log.as_deref(),
        store: store.as_ref(),
    };
    Ok(report::generate(
        &ReportSettings::from(config),
        sources,
        period,
        generated_at,
    )?)
}

/// The message database to count from, if the report should include messages.
/// An explicitly configured database must exist; the default one is skipped
/// when nothing has been stored yet.
fn report_store(config: &Config) -> anyhow::Result<Option<MessageStore>> {
    if !config.report.include_messages {
        return Ok(None);
    }
    let db_path = config.db_path()?;
    if config.storage.path.is_none() && !db_path.exists() {
        tracing::debug!(path = %db_path.display(), "no message database yet");
        return Ok(None);
    }

    let store = MessageStore::open_existing(&db_path).map_err(|source| ConfigError::Database {
        path: db_path.clone(),
        source,
    })?;
    Ok(Some(store))
}

fn write_lines(out: &mut impl Write, lines: &[String]) -> anyhow::Result<()> {
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

fn startup_summary(config: &Config, socket_path: &Path, db_path: &Path) -> String {
    let source = config
        .source()
        .map(ToString::to_string)
        .unwrap_or_else(|| "defaults".to_owned());
    format!(
        "startup config: capsule={}, socket={}, database={}, config={}",
        config.capsule.name,
        socket_path.display(),
        db_path.display(),
        source
    )
}
