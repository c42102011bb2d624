//! Process-wide logging setup.

use anyhow::Error;
use clap::{builder::BoolishValueParser, ArgAction, Args};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Minimum level to log when `RUST_LOG` is not set.
    ///
    /// Accepts DEBUG, INFO, WARNING, ERROR and CRITICAL.
    #[clap(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Also append logs to LOG_FILE_PATH.
    #[clap(
        long,
        env = "LOG_TO_FILE",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub log_to_file: bool,

    /// File to append logs to when LOG_TO_FILE is set.
    #[clap(long, env = "LOG_FILE_PATH", default_value = "logs/bot.log")]
    pub log_file_path: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_level: "INFO".into(),
            log_to_file: false,
            log_file_path: "logs/bot.log".into(),
        }
    }
}

impl Options {
    /// Install the global subscriber.
    ///
    /// `RUST_LOG` takes precedence over [`log_level`](Self::log_level). Installing a second
    /// subscriber is a no-op, so this may be called from every test.
    pub fn init(&self) -> Result<(), Error> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.directives()));
        let file = if self.log_to_file {
            if let Some(dir) = self.log_file_path.parent() {
                fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file_path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        } else {
            None
        };

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(file)
            .try_init()
            .is_ok();
        if installed && self.log_to_file {
            tracing::info!(path = %self.log_file_path.display(), "logging to file");
        }
        Ok(())
    }

    fn directives(&self) -> String {
        let level = match self.log_level.to_ascii_uppercase().as_str() {
            "TRACE" => "trace",
            "DEBUG" => "debug",
            "WARN" | "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        };
        format!("{level},surf=warn,isahc=warn,tide=warn")
    }
}

/// Install a stderr subscriber with default options.
pub fn init_logging() {
    if let Err(err) = Options::default().init() {
        eprintln!("unable to initialize logging: {err}");
    }
}
