//! Producer-side tracing and structured logging for the course-catalog
//! service.
//!
//! # Overview
//!
//! This crate is the instrumentation half of the catalog project: it
//! creates trace spans around units of work, ships the completed spans to
//! pluggable exporters, and emits machine-parseable log records alongside
//! them. Only the producer side lives here; storing or querying traces is
//! a collector's job.
//!
//! The pieces compose bottom-up:
//!
//! - [`span`] holds the data model: [`SpanData`], [`SpanContext`], ids,
//!   attribute [`Value`]s and events.
//! - [`tracer`] creates spans via [`Tracer`]; the [`ActiveSpan`] guard
//!   closes each span exactly once, on every exit path, and hands the
//!   finished record to the exporters.
//! - [`export`] defines the [`SpanExporter`] trait plus the console and
//!   in-memory implementations.
//! - [`batch`] runs a bounded queue and worker thread that decouple a
//!   slow exporter from the threads producing spans.
//! - [`collector`] ships span batches to a network collector endpoint.
//! - [`logger`] provides [`StructuredLogger`], which emits one JSON
//!   record per call, correlated with a span via its [`SpanContext`].
//! - [`counter`] provides [`ErrorCounter`], the shared failure count
//!   surfaced as a span attribute on error paths.
//!
//! Span parenting is always explicit. There is no thread-local "current
//! span": a request owns its root span's [`SpanContext`] and passes it to
//! whatever work should nest under it. This keeps traces correct no
//! matter how requests are scheduled, at the cost of one extra parameter
//! on instrumented call paths.
//!
//! # Usage
//!
//! [`Telemetry`] wires the pieces together at process start:
//!
//! ```
//! use catalog_trace::{ConsoleExporter, Telemetry};
//!
//! let (telemetry, guard) = Telemetry::builder("course-catalog-service")
//!     .with_exporter(ConsoleExporter::stdout())
//!     .build();
//!
//! let mut span = telemetry.tracer().root_span("index_page");
//! span.set_attribute("http.method", "GET");
//! span.add_event("Rendering index");
//! span.end();
//!
//! // Dropping the guard flushes everything still in flight.
//! drop(guard);
//! ```
//!
//! Shipping to a collector goes through the batching pipeline so a slow
//! or absent collector never stalls request threads:
//!
//! ```no_run
//! use std::time::Duration;
//! use catalog_trace::{BatchConfig, CollectorExporter, Telemetry};
//!
//! let (telemetry, guard) = Telemetry::builder("course-catalog-service")
//!     .with_batched_exporter(
//!         CollectorExporter::new("127.0.0.1:6831"),
//!         BatchConfig::default().linger(Duration::from_secs(1)),
//!     )
//!     .build();
//! // ... serve requests ...
//! drop(guard); // drains queued spans before exit
//! ```
#![doc(html_root_url = "https://docs.rs/catalog-trace/0.1.0")]
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    nonstandard_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true
)]

use std::fmt;
use std::io::{self, Write};

pub mod batch;
pub mod collector;
pub mod counter;
pub mod export;
pub mod logger;
pub mod span;
pub mod tracer;

pub use self::batch::{batch, BatchConfig, BatchExporter, BatchGuard};
pub use self::collector::CollectorExporter;
pub use self::counter::ErrorCounter;
pub use self::export::{ConsoleExporter, ExportError, RecordingExporter, SpanExporter};
pub use self::logger::{Level, StructuredLogger};
pub use self::span::{SpanContext, SpanData, SpanEvent, SpanId, SpanKind, TraceId, Value};
pub use self::tracer::{ActiveSpan, Tracer, TracerBuilder};

/// Handles to a fully wired telemetry stack.
///
/// Built once at process start via [`Telemetry::builder`]; the contained
/// tracer, logger and error counter are cheap-clone handles meant to be
/// passed into whatever serves requests.
#[derive(Debug, Clone)]
pub struct Telemetry {
    tracer: Tracer,
    logger: StructuredLogger,
    errors: ErrorCounter,
}

impl Telemetry {
    /// Starts configuring a telemetry stack for the named service.
    pub fn builder(service: impl Into<String>) -> TelemetryBuilder {
        let service = service.into();
        TelemetryBuilder {
            tracer: Tracer::builder(service.clone()),
            service,
            logger_name: None,
            log_sink: None,
            batched: Vec::new(),
        }
    }

    /// The span producer.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// The structured log stream.
    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// The shared error counter fed by the logger and the domain layer.
    pub fn errors(&self) -> &ErrorCounter {
        &self.errors
    }
}

/// Configures and assembles a [`Telemetry`] stack.
pub struct TelemetryBuilder {
    service: String,
    logger_name: Option<String>,
    log_sink: Option<Box<dyn Write + Send>>,
    tracer: TracerBuilder,
    batched: Vec<(Box<dyn SpanExporter>, BatchConfig)>,
}

impl TelemetryBuilder {
    /// Registers an exporter that receives each span synchronously at
    /// close.
    ///
    /// Suitable for fast local sinks such as [`ConsoleExporter`] or the
    /// in-memory [`RecordingExporter`].
    pub fn with_exporter(mut self, exporter: impl SpanExporter + 'static) -> Self {
        self.tracer = self.tracer.with_exporter(exporter);
        self
    }

    /// Registers an exporter behind a batching worker thread.
    ///
    /// Spans are queued at close and shipped in batches off the request
    /// path; the returned [`TelemetryGuard`] drains the queue on drop.
    pub fn with_batched_exporter(
        mut self,
        exporter: impl SpanExporter + 'static,
        config: BatchConfig,
    ) -> Self {
        self.batched.push((Box::new(exporter), config));
        self
    }

    /// Sends log records to the given writer instead of stderr.
    pub fn with_log_writer(mut self, sink: impl Write + Send + 'static) -> Self {
        self.log_sink = Some(Box::new(sink));
        self
    }

    /// Overrides the logger name stamped into records (defaults to the
    /// service name).
    pub fn logger_name(mut self, name: impl Into<String>) -> Self {
        self.logger_name = Some(name.into());
        self
    }

    /// Builds the stack and starts any batch workers.
    ///
    /// Keep the returned [`TelemetryGuard`] alive for the process
    /// lifetime; dropping it flushes and stops the pipeline.
    pub fn build(self) -> (Telemetry, TelemetryGuard) {
        let errors = ErrorCounter::default();
        let logger_name = self.logger_name.unwrap_or_else(|| self.service.clone());
        let sink: Box<dyn Write + Send> = match self.log_sink {
            Some(sink) => sink,
            None => Box::new(io::stderr()),
        };
        let logger = StructuredLogger::new(logger_name, sink, errors.clone());

        // Export failures from both the tracer and the batch workers are
        // reported through the log stream, never to request code.
        let mut tracer = self.tracer.diagnostics(logger.clone());
        let mut batch_guards = Vec::with_capacity(self.batched.len());
        for (exporter, config) in self.batched {
            let (batch, guard) = config.diagnostics(logger.clone()).finish(exporter);
            tracer = tracer.with_exporter(batch);
            batch_guards.push(guard);
        }
        let tracer = tracer.build();

        let telemetry = Telemetry {
            tracer: tracer.clone(),
            logger,
            errors,
        };
        let guard = TelemetryGuard {
            batch: batch_guards,
            tracer,
        };
        (telemetry, guard)
    }
}

impl fmt::Debug for TelemetryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryBuilder")
            .field("service", &self.service)
            .field("logger_name", &self.logger_name)
            .field("batched", &self.batched.len())
            .finish_non_exhaustive()
    }
}

/// Flushes the telemetry pipeline when dropped.
///
/// Drops every batch worker guard first, draining queued spans into their
/// exporters, then flushes the synchronous exporters. Bind it in `main`
/// so it outlives everything that produces spans.
#[must_use]
#[derive(Debug)]
pub struct TelemetryGuard {
    batch: Vec<BatchGuard>,
    tracer: Tracer,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // Batch workers drain before the synchronous exporters flush;
        // the drop body runs before the fields themselves are dropped.
        self.batch.clear();
        self.tracer.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_wires_tracer_logger_and_counter() {
        let recorder = RecordingExporter::new();
        let (telemetry, guard) = Telemetry::builder("course-catalog-service")
            .with_exporter(recorder.clone())
            .with_log_writer(io::sink())
            .build();

        assert_eq!(telemetry.tracer().service(), "course-catalog-service");
        assert_eq!(telemetry.logger().name(), "course-catalog-service");

        telemetry.tracer().root_span("index_page").end();
        drop(guard);

        assert_eq!(recorder.spans().len(), 1);
        assert_eq!(telemetry.errors().get(), 0);
    }

    #[test]
    fn batched_exporter_drains_through_the_guard() {
        let recorder = RecordingExporter::new();
        let (telemetry, guard) = Telemetry::builder("course-catalog-service")
            .with_batched_exporter(recorder.clone(), BatchConfig::default())
            .with_log_writer(io::sink())
            .build();

        telemetry.tracer().root_span("course_catalog").end();
        telemetry.tracer().root_span("add_course").end();
        // The default linger is long; the drop is what forces the flush.
        drop(guard);

        let names: Vec<_> = recorder.spans().iter().map(|s| s.name).collect();
        assert_eq!(names, ["course_catalog", "add_course"]);
    }
}
