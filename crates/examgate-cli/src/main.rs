//! examgate - a terminal client for timed examinations.
//!
//! Signs a candidate in, lists the tests open to them, and runs each exam
//! section against a countdown that survives restarts.

mod app;
mod screen;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Result};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;
use examgate_core::api::ApiError;
use examgate_core::config::Config;
use examgate_core::exam::SectionKind;

/// Log file written inside the cache directory
const LOG_FILE: &str = "examgate.log";

const USAGE: &str = "\
Usage: examgate <command>

Commands:
  register <email> [name]               Create an account (password is prompted)
  login [email]                         Sign in (password is prompted)
  logout [--forget]                     Sign out; --forget also drops the stored password
  status                                Show session and running section clocks
  tests                                 List tests you can take
  start <scheduledTestId>               Start an attempt
  section <attemptId> <section> [--answers <file.json>]
                                        Open a timed section (listening, reading, writing)
  finish <attemptId>                    Finish an attempt
";

/// Initialize the tracing subscriber for logging.
///
/// The section screen owns the terminal, so logs go to a file. Use RUST_LOG
/// to control the level (e.g., RUST_LOG=debug).
fn init_tracing(log_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    if std::fs::create_dir_all(log_dir).is_err() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
        return None;
    }

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    Some(guard)
}

/// Settle on a config and a log directory before tracing exists. A load
/// failure is handed back so it can be logged once tracing is installed.
fn resolve_config(loaded: Result<Config>) -> (Config, PathBuf, Option<anyhow::Error>) {
    let (config, error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    let config = config.with_env_overrides();
    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    (config, cache_dir, error)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || matches!(args[0].as_str(), "-h" | "--help" | "help") {
        print!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    let (config, cache_dir, config_error) = resolve_config(Config::load());

    // Installed before anything else so startup logs are recorded; the
    // guard flushes the log file when main returns.
    let _guard = init_tracing(&cache_dir);
    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }
    info!(command = %args[0], api = %config.api_base_url, "examgate starting");

    let result = match App::new(config, &cache_dir) {
        Ok(mut app) => run(&mut app, &args).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(command = %args[0], error = %format!("{:#}", e), "Command failed");
            if ApiError::is_session_ended(&e) {
                eprintln!("Your session ended, please log in again.");
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(app: &mut App, args: &[String]) -> Result<()> {
    let arg = |i: usize| args.get(i).map(String::as_str);

    match args[0].as_str() {
        "register" => {
            let Some(email) = arg(1) else {
                bail!("Missing email\n\n{}", USAGE);
            };
            app.register(email, arg(2)).await
        }
        "login" => app.login(arg(1)).await,
        "logout" => {
            let forget = match arg(1) {
                None => false,
                Some("--forget") => true,
                Some(other) => bail!("Unknown logout option '{}'\n\n{}", other, USAGE),
            };
            app.logout(forget);
            Ok(())
        }
        "status" => app.status(),
        "tests" => app.list_tests().await,
        "start" => {
            let Some(id) = arg(1) else {
                bail!("Missing scheduled test id\n\n{}", USAGE);
            };
            app.start_attempt(id).await
        }
        "section" => {
            let (Some(attempt_id), Some(section)) = (arg(1), arg(2)) else {
                bail!("Missing attempt id or section\n\n{}", USAGE);
            };
            let Some(kind) = SectionKind::parse(section) else {
                bail!("Unknown section '{}', expected listening, reading or writing", section);
            };
            let answers = match (arg(3), arg(4)) {
                (Some("--answers"), Some(path)) => Some(Path::new(path)),
                (None, _) => None,
                _ => bail!("Unexpected arguments\n\n{}", USAGE),
            };
            app.run_section(attempt_id, kind, answers).await
        }
        "finish" => {
            let Some(id) = arg(1) else {
                bail!("Missing attempt id\n\n{}", USAGE);
            };
            app.finish_attempt(id).await
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_config_keeps_load_error() {
        let (config, cache_dir, error) = resolve_config(Err(anyhow::anyhow!("bad toml")));
        assert_eq!(error.unwrap().to_string(), "bad toml");
        assert_eq!(config.last_username, None);
        assert!(!cache_dir.as_os_str().is_empty());
    }

    #[test]
    fn test_log_file_is_flushed_when_guard_drops() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_tracing(dir.path());
        assert!(guard.is_some());

        error!(command = "start", "Command failed");
        drop(guard);

        let log = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        assert!(log.contains("Command failed"));
    }
}
