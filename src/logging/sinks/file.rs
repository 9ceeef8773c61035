use std::path::Path;

use tracing::Subscriber;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::Layer, registry::LookupSpan};

use crate::logging::config::{FileConfig, LogFormat, Rotation};

/// Файловый layer с ротацией. Guard нужно держать до завершения процесса,
/// иначе хвост буфера потеряется.
pub fn layer<S>(
    log_dir: &Path,
    config: &FileConfig,
) -> (Box<dyn Layer<S> + Send + Sync>, WorkerGuard)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = match config.rotation {
        Rotation::Minutely => rolling::minutely(log_dir, &config.filename),
        Rotation::Hourly => rolling::hourly(log_dir, &config.filename),
        Rotation::Daily => rolling::daily(log_dir, &config.filename),
        Rotation::Never => rolling::never(log_dir, &config.filename),
    };
    let (writer, guard) = non_blocking(appender);

    let base = fmt::layer().with_ansi(false).with_writer(writer);
    let layer = match config.format {
        LogFormat::Json => base.json().boxed(),
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
    };
    (layer, guard)
}
