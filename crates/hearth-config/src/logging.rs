//! Tracing subscriber setup from `[logging]`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::{ConfigError, LoggingConfig, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global tracing subscriber.
///
/// Console output uses `RUST_LOG` when set, otherwise `config.filter`. With
/// `file_dir` set, JSON logs at trace level for the hearth crates are also
/// written to a daily-rotated file; keep the returned guard alive for as
/// long as logs should be flushed.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (layers, guard) = build_layers(config);
    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;
    Ok(guard)
}

fn console_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

fn build_layers(config: &LoggingConfig) -> (Vec<BoxedLayer>, Option<WorkerGuard>) {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(console_filter(config))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(console_filter(config))
            .boxed()
    };
    layers.push(console);

    let guard = config.file_dir.as_ref().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, "hearth.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new("hearth_session=trace,hearth_config=trace,info"))
                .boxed(),
        );
        guard
    });

    (layers, guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_console_only_layers() {
        let (layers, guard) = build_layers(&LoggingConfig::default());
        assert_eq!(layers.len(), 1);
        assert!(guard.is_none());
    }

    #[test]
    fn test_file_layer_added() {
        let dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            json: true,
            file_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let (layers, guard) = build_layers(&config);
        assert_eq!(layers.len(), 2);
        assert!(guard.is_some());
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        assert!(init_tracing(&config).unwrap().is_none());
        assert!(matches!(init_tracing(&config), Err(ConfigError::Logging(_))));
    }
}
