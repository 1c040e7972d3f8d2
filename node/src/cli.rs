//! Command-line arguments (§SPEC_FULL 10.3: config layering starts here).

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "listd", about = "Multi-port list-server daemon")]
pub struct Args {
    /// Path to an optional TOML config file overlaying the built-in defaults.
    #[arg(long, env = "LISTD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the log file (tracing-appender rolls daily under its directory).
    #[arg(long, env = "LISTD_LOG_FILE", default_value = "listd.log")]
    pub log_file: PathBuf,

    /// Log verbosity; also controlled by `RUST_LOG` (`RUST_LOG` wins if set).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
