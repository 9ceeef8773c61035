use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::Layer, registry::LookupSpan};

use crate::logging::config::{ConsoleConfig, LogFormat};

/// Console layer (stdout) в формате из конфигурации.
pub fn layer<S>(config: &ConsoleConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_ansi(config.with_ansi);

    match config.format {
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
        LogFormat::Json => base.json().with_ansi(false).boxed(),
    }
}

#[cfg(test)]
mod tests {
    use tracing::info;
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;

    /// Тест проверяет, что layer любого формата можно зарегистрировать и
    /// логирование не паникует.
    #[test]
    fn test_layer_all_formats() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            let cfg = ConsoleConfig {
                format,
                with_ansi: false,
                ..Default::default()
            };
            let subscriber = Registry::default().with(layer::<Registry>(&cfg));
            tracing::subscriber::with_default(subscriber, || {
                info!(?format, "console layer smoke test");
            });
        }
    }
}
