use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Keeps the non-blocking writers flushing until the service exits.
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

/// Initialize console logging, plus a daily-rotated file log when `log_dir` is writable
pub fn init_service_logging(log_dir: &str, service_name: &str) -> Result<LoggingGuard, anyhow::Error> {
    // Controlled via RUST_LOG
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = non_blocking(std::io::stdout());
    guards.push(stdout_guard);
    let console_layer = fmt::layer()
        .with_writer(stdout_writer)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false);

    let file_layer = if log_dir_writable(log_dir) {
        let _ = rotate_logs_on_startup(log_dir, service_name);

        let file_appender =
            tracing_appender::rolling::daily(log_dir, format!("{service_name}.log"));
        let (file_writer, file_guard) = non_blocking(file_appender);
        guards.push(file_guard);

        Some(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .boxed(),
        )
    } else {
        None
    };
    let has_file = file_layer.is_some();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if has_file {
        info!("Logging initialized - logs will be written to {log_dir}/{service_name}.log");
    } else {
        info!("Logging initialized - console output only (could not create log directory)");
    }

    Ok(LoggingGuard { _guards: guards })
}

fn log_dir_writable(log_dir: &str) -> bool {
    let probe = format!("{log_dir}/.test_write");
    std::fs::create_dir_all(log_dir)
        .and_then(|_| std::fs::File::create(&probe))
        .map(|_| std::fs::remove_file(&probe))
        .is_ok()
}

pub fn rotate_logs_on_startup(log_dir: &str, service_name: &str) -> Result<(), anyhow::Error> {
    let log_file = format!("{log_dir}/{service_name}.log");
    let log_path = Path::new(&log_file);

    if log_path.exists() {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_file = format!("{log_dir}/{service_name}.{timestamp}.log");

        std::fs::rename(&log_file, &backup_file)?;
        info!("Previous log file backed up to: {backup_file}");
    }

    Ok(())
}
