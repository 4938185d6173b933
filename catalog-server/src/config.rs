//! Runtime configuration for the telemetry stack.
//!
//! The exporter variant is an explicit enum chosen at startup, either
//! programmatically or from the environment. Nothing here reconfigures
//! at runtime: the stack is built once and lives for the process.
//!
//! Environment variables, all optional:
//!
//! | Variable                 | Meaning                                   |
//! |--------------------------|-------------------------------------------|
//! | `CATALOG_SERVICE_NAME`   | service name stamped into spans and logs  |
//! | `CATALOG_EXPORTER`       | `none`, `console` or `collector`          |
//! | `CATALOG_COLLECTOR_ADDR` | collector endpoint as `host:port`         |
//! | `CATALOG_LOG_PATH`       | log-record file (defaults to stderr)      |

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use catalog_trace::{
    BatchConfig, CollectorExporter, ConsoleExporter, Telemetry, TelemetryGuard,
};

/// Service name used when nothing overrides it.
pub const DEFAULT_SERVICE_NAME: &str = "course-catalog-service";
/// Collector host used when nothing overrides it.
pub const DEFAULT_COLLECTOR_HOST: &str = "127.0.0.1";
/// Collector port used when nothing overrides it.
pub const DEFAULT_COLLECTOR_PORT: u16 = 6831;

/// Which span exporter the process runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportConfig {
    /// Spans are produced but discarded.
    None,
    /// Human-readable span summaries on stdout.
    Console,
    /// Batched JSON spans to a network collector.
    Collector {
        /// Collector hostname or address.
        host: String,
        /// Collector port.
        port: u16,
    },
}

impl ExportConfig {
    /// The default collector endpoint.
    pub fn default_collector() -> Self {
        ExportConfig::Collector {
            host: DEFAULT_COLLECTOR_HOST.to_owned(),
            port: DEFAULT_COLLECTOR_PORT,
        }
    }
}

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A setting had a value outside the accepted set.
    #[error("invalid {name} value {value:?}, expected {expected}")]
    Invalid {
        /// The setting (environment variable) name.
        name: &'static str,
        /// The rejected value.
        value: String,
        /// What would have been accepted.
        expected: &'static str,
    },
    /// The configured log file could not be opened.
    #[error("failed to open log file {path}")]
    LogSink {
        /// The configured log path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Startup configuration for the whole telemetry stack.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    service_name: String,
    export: ExportConfig,
    log_path: Option<PathBuf>,
    batch: BatchConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            export: ExportConfig::Console,
            log_path: None,
            batch: BatchConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// The defaults: console exporter, stderr log records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads configuration from `CATALOG_*` environment variables,
    /// falling back to the defaults for anything unset.
    ///
    /// `CATALOG_COLLECTOR_ADDR` must parse as `host:port` whenever it is
    /// set, even though only the `collector` exporter uses it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = TelemetryConfig::new();
        if let Ok(name) = std::env::var("CATALOG_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(path) = std::env::var("CATALOG_LOG_PATH") {
            config.log_path = Some(PathBuf::from(path));
        }
        if let Ok(exporter) = std::env::var("CATALOG_EXPORTER") {
            config.export = match exporter.to_ascii_lowercase().as_str() {
                "none" => ExportConfig::None,
                "console" => ExportConfig::Console,
                "collector" => ExportConfig::default_collector(),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "CATALOG_EXPORTER",
                        value: exporter,
                        expected: "`none`, `console` or `collector`",
                    })
                }
            };
        }
        if let Ok(addr) = std::env::var("CATALOG_COLLECTOR_ADDR") {
            // Validated whenever set; only the collector variant applies it.
            let (new_host, new_port) = parse_collector_addr(&addr)?;
            if let ExportConfig::Collector { host, port } = &mut config.export {
                *host = new_host;
                *port = new_port;
            }
        }
        Ok(config)
    }

    /// Overrides the service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Selects the exporter variant.
    pub fn export(mut self, export: ExportConfig) -> Self {
        self.export = export;
        self
    }

    /// Writes log records to a file instead of stderr.
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Tunes the batching pipeline used with the collector exporter.
    pub fn batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Builds the telemetry stack this configuration describes.
    pub fn init(self) -> Result<(Telemetry, TelemetryGuard), ConfigError> {
        let mut builder = Telemetry::builder(self.service_name);

        if let Some(path) = self.log_path {
            let file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .map_err(|source| ConfigError::LogSink {
                    path: path.clone(),
                    source,
                })?;
            builder = builder.with_log_writer(file);
        }

        builder = match self.export {
            ExportConfig::None => builder,
            ExportConfig::Console => builder.with_exporter(ConsoleExporter::stdout()),
            ExportConfig::Collector { host, port } => builder.with_batched_exporter(
                CollectorExporter::new(format!("{}:{}", host, port)),
                self.batch,
            ),
        };

        Ok(builder.build())
    }
}

fn parse_collector_addr(addr: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::Invalid {
        name: "CATALOG_COLLECTOR_ADDR",
        value: addr.to_owned(),
        expected: "`host:port`",
    };
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse().map_err(|_| invalid())?;
    Ok((host.to_owned(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_addr_parses_host_and_port() {
        assert_eq!(
            parse_collector_addr("127.0.0.1:6831").unwrap(),
            ("127.0.0.1".to_owned(), 6831)
        );
        assert_eq!(
            parse_collector_addr("collector.internal:14268").unwrap(),
            ("collector.internal".to_owned(), 14268)
        );
    }

    #[test]
    fn bad_collector_addrs_are_rejected() {
        assert!(parse_collector_addr("no-port-here").is_err());
        assert!(parse_collector_addr(":6831").is_err());
        assert!(parse_collector_addr("host:notaport").is_err());
    }

    #[test]
    fn env_overrides_apply_and_invalid_values_are_rejected() {
        const VARS: [&str; 4] = [
            "CATALOG_SERVICE_NAME",
            "CATALOG_EXPORTER",
            "CATALOG_COLLECTOR_ADDR",
            "CATALOG_LOG_PATH",
        ];
        // Every scenario shares one test so they cannot race over the
        // process environment.
        for var in VARS {
            std::env::remove_var(var);
        }
        let config = TelemetryConfig::from_env().unwrap();
        assert_eq!(config.service_name, DEFAULT_SERVICE_NAME);
        assert_eq!(config.export, ExportConfig::Console);

        std::env::set_var("CATALOG_SERVICE_NAME", "registrar");
        std::env::set_var("CATALOG_EXPORTER", "collector");
        std::env::set_var("CATALOG_COLLECTOR_ADDR", "collector.example:14268");
        let config = TelemetryConfig::from_env().unwrap();
        assert_eq!(config.service_name, "registrar");
        assert_eq!(
            config.export,
            ExportConfig::Collector {
                host: "collector.example".to_owned(),
                port: 14268,
            }
        );

        // Exporter names are matched case-insensitively.
        std::env::set_var("CATALOG_EXPORTER", "CONSOLE");
        let config = TelemetryConfig::from_env().unwrap();
        assert_eq!(config.export, ExportConfig::Console);

        // A junk addr fails even while the console exporter is selected.
        std::env::set_var("CATALOG_COLLECTOR_ADDR", "no-port-here");
        match TelemetryConfig::from_env() {
            Err(ConfigError::Invalid {
                name: "CATALOG_COLLECTOR_ADDR",
                ..
            }) => {}
            other => panic!("expected an invalid-addr error, got {:?}", other),
        }

        std::env::set_var("CATALOG_EXPORTER", "jaeger");
        std::env::set_var("CATALOG_COLLECTOR_ADDR", "collector.example:14268");
        match TelemetryConfig::from_env() {
            Err(ConfigError::Invalid {
                name: "CATALOG_EXPORTER",
                value,
                ..
            }) => assert_eq!(value, "jaeger"),
            other => panic!("expected an invalid-exporter error, got {:?}", other),
        }

        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn default_config_initializes() {
        let (telemetry, guard) = TelemetryConfig::new()
            .export(ExportConfig::None)
            .init()
            .unwrap();
        assert_eq!(telemetry.tracer().service(), DEFAULT_SERVICE_NAME);
        drop(guard);
    }
}
