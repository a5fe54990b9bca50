use someip_session::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "someip-session.log";

pub fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let default_directives = format!("{},someip_session=debug", logging.level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    // File logging only when SOMEIP_SESSION_LOG_DIR is set.
    //
    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial file, so writability is checked first.
    let file_layer = std::env::var("SOMEIP_SESSION_LOG_DIR")
        .ok()
        .and_then(|log_dir| {
            if let Err(e) = std::fs::create_dir_all(&log_dir) {
                eprintln!(
                    "Warning: Could not create log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                return None;
            }
            let probe = std::path::Path::new(&log_dir).join(".someip_session_write_test");
            if let Err(e) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&probe)
            {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                return None;
            }
            let _ = std::fs::remove_file(&probe);

            let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // Flushes on drop; lives as long as the process
            Box::leak(Box::new(guard));

            eprintln!("Logging to: {}/{}", log_dir, LOG_FILE);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            )
        });

    let (json_layer, console_layer) = if logging.json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_target(true)),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init();
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
