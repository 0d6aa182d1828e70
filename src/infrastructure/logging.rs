use crate::domain::settings::LogSettings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Radio stack crates are chatty below warn
const QUIET_DEPENDENCIES: [&str; 2] = ["btleplug=warn", "bluez_async=warn"];

pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn rotation_from_str(rotation: &str) -> Rotation {
    match rotation.trim().to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// `RUST_LOG` when set, otherwise the configured level with the radio stack
/// capped at warn.
fn build_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directives = std::iter::once(level.trim().to_string())
        .chain(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_thread_names(settings.show_thread_names)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let (file_layer, file_guard) = if settings.file_logging_enabled {
        std::fs::create_dir_all(&settings.log_dir)?;
        let appender = RollingFileAppender::new(
            rotation_from_str(&settings.rotation),
            &settings.log_dir,
            &settings.file_name_prefix,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // Worker thread names matter when reading a file after the fact
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_names(true)
            .with_target(settings.show_target);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(build_filter(&settings.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging initialized (level: {}, file: {})",
        settings.level,
        settings.file_logging_enabled
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
