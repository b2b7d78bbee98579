//! Diagnostics and Command-Line Interface
//!
//! Logging setup plus one-shot diagnostic commands for troubleshooting a
//! clipshare installation without running the daemon.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Clipshare daemon command-line interface
#[derive(Parser, Debug)]
#[command(name = "clipshare-daemon")]
#[command(about = "Share clipboard text with devices on the local network", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Omit timestamps from log lines
    #[arg(long)]
    pub no_timestamps: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Approve every incoming pairing request without asking
    #[arg(long)]
    pub auto_accept: bool,

    /// Diagnostic subcommand
    #[command(subcommand)]
    pub command: Option<DiagnosticCommand>,
}

/// Diagnostic commands for troubleshooting
#[derive(Subcommand, Debug)]
pub enum DiagnosticCommand {
    /// Show daemon version and build information
    Version {
        /// Show detailed build information
        #[arg(long)]
        verbose: bool,
    },

    /// Show current configuration
    DumpConfig,

    /// Check that a peer answers on its clipboard port
    Ping {
        /// Peer IP address
        ip: String,
        /// Peer server port
        port: u16,
    },

    /// Ask a peer for its identity
    Discover {
        ip: String,
        port: u16,
    },

    /// Push text to a peer's clipboard
    Send {
        ip: String,
        port: u16,
        /// Text to send
        text: String,
    },

    /// List approved devices
    ListDevices {
        /// Show address and last-seen details
        #[arg(long)]
        verbose: bool,
    },

    /// Show clipboard history
    History {
        /// Only show entries containing this text
        #[arg(short, long)]
        search: Option<String>,

        /// Maximum entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show or change persisted settings
    Settings {
        /// New device name
        #[arg(long)]
        device_name: Option<String>,

        /// New server base port
        #[arg(long)]
        server_port: Option<u16>,
    },
}

/// Initialize logging based on CLI arguments
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let timestamps = !cli.no_timestamps;
    match (cli.json_logs, timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, timestamps
    );

    Ok(())
}

/// Human-readable age of a millisecond timestamp
pub fn format_age(now_millis: i64, then_millis: i64) -> String {
    let secs = (now_millis - then_millis).max(0) / 1000;
    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86400)
    }
}

/// Build information
#[derive(Debug)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: Option<&'static str>,
}

impl BuildInfo {
    pub fn get() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_hash: option_env!("GIT_HASH"),
        }
    }

    pub fn display(&self, verbose: bool) {
        println!("Clipshare Daemon v{}", self.version);

        if verbose {
            if let Some(hash) = self.git_hash {
                println!("Git commit: {}", hash);
            }
            println!("Service type: {}", clipshare_protocol::discovery::SERVICE_TYPE);
            println!("Platform: {}", std::env::consts::OS);
            println!("Architecture: {}", std::env::consts::ARCH);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(10_000, 5_000), "5s ago");
        assert_eq!(format_age(600_000, 0), "10m ago");
        assert_eq!(format_age(7_200_000, 0), "2h ago");
        assert_eq!(format_age(172_800_000, 0), "2d ago");
        assert_eq!(format_age(0, 5_000), "0s ago");
    }

    #[test]
    fn test_cli_parses_send() {
        let cli = Cli::parse_from(["clipshare-daemon", "send", "192.168.1.20", "8080", "hello"]);
        match cli.command {
            Some(DiagnosticCommand::Send { ip, port, text }) => {
                assert_eq!(ip, "192.168.1.20");
                assert_eq!(port, 8080);
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["clipshare-daemon"]);
        assert_eq!(cli.log_level, "info");
        assert!(!cli.no_timestamps);
        assert!(!cli.auto_accept);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_no_timestamps() {
        let cli = Cli::parse_from(["clipshare-daemon", "--no-timestamps", "--json-logs"]);
        assert!(cli.no_timestamps);
        assert!(cli.json_logs);
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::get();
        assert!(!info.version.is_empty());
    }
}
