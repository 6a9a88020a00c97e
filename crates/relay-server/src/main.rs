//! relayserver entry point.
//!
//! A simple network relay: any number of clients make a TCP connection and
//! every chunk of bytes one client sends is forwarded to all the others.
//! Traffic can optionally be logged to a local SQLite database.
//!
//! # Usage
//!
//! ```text
//! relayserver [OPTIONS]
//!
//! Options:
//!   -p, --port <PORT>     TCP port to use [default: 9000]
//!       --bind <ADDR>     IP address to bind to [default: 0.0.0.0]
//!       --db [<PATH>]     SQLite database to log traffic to, if any.
//!                         With no value: 'relaylog.db' in the program
//!                         directory. An empty value disables logging.
//!       --config <PATH>   Optional TOML configuration file
//!       --verbose         Print verbose activity messages
//!   -t, --test            Do a test run with dummy clients and exit
//! ```
//!
//! # Exit codes
//!
//! 0 on clean shutdown or a passing self-check; non-zero on a bind
//! failure, a malformed config file, or a failing self-check.
//!
//! # Architecture overview
//!
//! ```text
//! main()
//!  └─ RelayServer::start()
//!       ├─ accept loop        (one task)
//!       ├─ client sessions    (one reader loop + writer task each)
//!       │     └─ BroadcastHub.route() fans chunks out to the others
//!       └─ sink writer        (drains traffic records into the sink)
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relay_core::{NoopSink, TrafficSink};
use relay_server::application::lifecycle::RelayServer;
use relay_server::application::self_check;
use relay_server::infrastructure::storage::config::{load_config, RelayConfig};
use relay_server::infrastructure::storage::sqlite_sink::{DB_DEFAULT_FILENAME, SqliteSink};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// A simple network relay server to exchange data between clients.
#[derive(Debug, Parser)]
#[command(
    name = "relayserver",
    about = "A simple network relay server to exchange data between clients",
    version
)]
struct Cli {
    /// TCP port to use, 9000 by default.
    #[arg(short = 'p', long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// IP address to bind the listener to, 0.0.0.0 by default.
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<String>,

    /// SQLite database to log traffic to, if any. If PATH is not given,
    /// defaults to 'relaylog.db' in the program directory; an empty PATH
    /// disables logging.
    #[arg(long, num_args = 0..=1)]
    db: Option<Option<PathBuf>>,

    /// TOML configuration file. Command-line flags take precedence over
    /// file values.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Print verbose activity messages.
    #[arg(long)]
    verbose: bool,

    /// Do a test run with dummy clients and exit.
    #[arg(short = 't', long)]
    test: bool,
}

/// Applies CLI flags on top of file-based configuration.
fn apply_cli_overrides(config: &mut RelayConfig, cli: &Cli) {
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(bind) = &cli.bind {
        config.network.bind_address = bind.clone();
    }
}

/// Resolves the effective traffic-log path from the `--db` flag and the
/// config file.
///
/// | `--db`            | Result                               |
/// |-------------------|--------------------------------------|
/// | absent            | config file value, if any            |
/// | `--db`            | `relaylog.db` next to the executable |
/// | `--db ""`         | disabled                             |
/// | `--db some/path`  | `some/path`                          |
fn resolve_db_path(cli_db: Option<Option<PathBuf>>, file_db: Option<PathBuf>) -> Option<PathBuf> {
    match cli_db {
        Some(None) => Some(default_db_path()),
        Some(Some(path)) if path.as_os_str().is_empty() => None,
        Some(Some(path)) => Some(path),
        None => file_db.filter(|path| !path.as_os_str().is_empty()),
    }
}

/// `relaylog.db` in the program directory, falling back to the working
/// directory when the executable path is unavailable.
fn default_db_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DB_DEFAULT_FILENAME)))
        .unwrap_or_else(|| PathBuf::from(DB_DEFAULT_FILENAME))
}

/// Builds the log filter: `RUST_LOG` wins, then `--verbose` (or `--test`,
/// which reports through the same activity log), then the configured base
/// level. Without any of those the relay stays silent except for warnings
/// and fatal startup failures.
fn log_filter(verbose: bool, config_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    if verbose {
        EnvFilter::new("relay_server=debug,relay_core=debug")
    } else {
        EnvFilter::new(config_level)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RelayConfig::default(),
    };
    apply_cli_overrides(&mut config, &cli);

    // A test run reports through the activity log, so `--test` implies
    // `--verbose`.
    let verbose = cli.verbose || cli.test;
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose, &config.log.level))
        .init();

    let db_path = resolve_db_path(cli.db.clone(), config.log.db_path.clone());
    let sink: Arc<dyn TrafficSink> = match &db_path {
        Some(path) => {
            let sink = SqliteSink::open(path)
                .await
                .with_context(|| format!("failed to open traffic log at {}", path.display()))?;
            info!("logging traffic to {}", path.display());
            Arc::new(sink)
        }
        None => Arc::new(NoopSink),
    };

    let mut server = RelayServer::new(config, sink);
    let bound = server
        .start()
        .await
        .context("failed to start relay server")?;

    if cli.test {
        // Run the dummy-client exchange against the server just started,
        // then shut down and report through the exit code.
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bound.port());
        let outcome = self_check::run_self_check(target).await;
        let snapshot = server.counters();
        server
            .stop()
            .await
            .context("failed to stop relay server after self-check")?;
        outcome.context("self-check failed")?;
        info!(
            "self-check relayed {} chunk(s), {} byte(s)",
            snapshot.total_chunks, snapshot.total_bytes
        );
        return Ok(());
    }

    info!("press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {e}");
    }
    info!("shutdown signal received");

    let snapshot = server.counters();
    server.stop().await.context("failed to stop relay server")?;
    info!(
        "relay server stopped after {} chunk(s), {} byte(s)",
        snapshot.total_chunks, snapshot.total_bytes
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_leave_port_unset() {
        // Arrange: parse with no arguments
        let cli = Cli::parse_from(["relayserver"]);

        // Assert – the config file value (or the built-in 9000) applies
        assert_eq!(cli.port, None);
        assert_eq!(cli.bind, None);
        assert!(cli.db.is_none());
        assert!(!cli.verbose);
        assert!(!cli.test);
    }

    #[test]
    fn test_cli_port_override() {
        let cli = Cli::parse_from(["relayserver", "--port", "9100"]);
        assert_eq!(cli.port, Some(9100));
    }

    #[test]
    fn test_cli_short_port_flag() {
        let cli = Cli::parse_from(["relayserver", "-p", "9200"]);
        assert_eq!(cli.port, Some(9200));
    }

    #[test]
    fn test_cli_db_without_value() {
        let cli = Cli::parse_from(["relayserver", "--db"]);
        assert_eq!(cli.db, Some(None));
    }

    #[test]
    fn test_cli_db_with_value() {
        let cli = Cli::parse_from(["relayserver", "--db", "traffic.db"]);
        assert_eq!(cli.db, Some(Some(PathBuf::from("traffic.db"))));
    }

    #[test]
    fn test_cli_test_short_flag() {
        let cli = Cli::parse_from(["relayserver", "-t"]);
        assert!(cli.test);
    }

    #[test]
    fn test_apply_cli_overrides_takes_precedence_over_file() {
        // Arrange
        let mut config = RelayConfig::default();
        config.network.port = 7000;
        let cli = Cli::parse_from(["relayserver", "--port", "8000", "--bind", "127.0.0.1"]);

        // Act
        apply_cli_overrides(&mut config, &cli);

        // Assert
        assert_eq!(config.network.port, 8000);
        assert_eq!(config.network.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_apply_cli_overrides_keeps_file_values_when_flags_absent() {
        let mut config = RelayConfig::default();
        config.network.port = 7000;
        let cli = Cli::parse_from(["relayserver"]);
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.network.port, 7000);
    }

    #[test]
    fn test_resolve_db_path_absent_uses_file_value() {
        let file = Some(PathBuf::from("from-config.db"));
        assert_eq!(resolve_db_path(None, file.clone()), file);
    }

    #[test]
    fn test_resolve_db_path_absent_without_file_value_disables() {
        assert_eq!(resolve_db_path(None, None), None);
    }

    #[test]
    fn test_resolve_db_path_bare_flag_uses_program_directory_default() {
        // Arrange / Act
        let resolved = resolve_db_path(Some(None), None).expect("must resolve to a path");

        // Assert
        assert!(resolved.ends_with(DB_DEFAULT_FILENAME));
    }

    #[test]
    fn test_resolve_db_path_empty_value_disables_logging() {
        assert_eq!(resolve_db_path(Some(Some(PathBuf::new())), None), None);
        // An explicit empty value also beats a config file value.
        assert_eq!(
            resolve_db_path(Some(Some(PathBuf::new())), Some(PathBuf::from("x.db"))),
            None
        );
    }

    #[test]
    fn test_resolve_db_path_explicit_value_wins() {
        let resolved = resolve_db_path(
            Some(Some(PathBuf::from("explicit.db"))),
            Some(PathBuf::from("file.db")),
        );
        assert_eq!(resolved, Some(PathBuf::from("explicit.db")));
    }

    #[test]
    fn test_resolve_db_path_empty_file_value_disables() {
        assert_eq!(resolve_db_path(None, Some(PathBuf::new())), None);
    }
}
