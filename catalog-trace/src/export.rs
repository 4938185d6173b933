//! Sinks for completed spans.
//!
//! An exporter receives spans *after* they close; it can serialize them,
//! print them, or buffer them in memory, but it can never reach back into
//! the request that produced them. Failures stay inside the telemetry
//! pipeline: the tracer and the batch worker swallow them at the boundary
//! so an unhealthy exporter cannot break the primary request flow.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::mem;
use std::sync::{Arc, Mutex};

use crate::span::{SpanData, Value};

/// Error produced when a batch of spans could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Writing the rendered spans to the underlying sink failed.
    #[error("failed to write spans to sink")]
    Sink(#[from] io::Error),
    /// Encoding spans for the wire failed.
    #[error("failed to encode spans")]
    Encode(#[from] serde_json::Error),
    /// The network collector could not be reached or written to in time.
    #[error("collector {addr} unreachable")]
    Unreachable {
        /// The configured collector endpoint.
        addr: String,
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },
}

/// A sink for completed spans.
///
/// `export` is handed batches of one or more closed spans. Implementations
/// must be callable from any thread; the batching worker in particular
/// calls them off the request path.
pub trait SpanExporter: Send + Sync {
    /// Delivers a batch of completed spans.
    fn export(&self, batch: &[SpanData]) -> Result<(), ExportError>;

    /// Flushes buffered state before shutdown.
    ///
    /// Called when the telemetry stack is torn down. The default is a
    /// no-op.
    fn shutdown(&self) {}
}

impl<E: SpanExporter + ?Sized> SpanExporter for Arc<E> {
    fn export(&self, batch: &[SpanData]) -> Result<(), ExportError> {
        (**self).export(batch)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}

impl<E: SpanExporter + ?Sized> SpanExporter for Box<E> {
    fn export(&self, batch: &[SpanData]) -> Result<(), ExportError> {
        (**self).export(batch)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}

/// Writes one human-readable summary per completed span.
///
/// The summary line carries the service, kind, name, ids, duration and
/// attributes; each event follows on its own indented line. A whole span
/// is written under a single lock acquisition so concurrent requests do
/// not interleave their output.
pub struct ConsoleExporter<W = io::Stdout> {
    out: Arc<Mutex<W>>,
}

impl ConsoleExporter<io::Stdout> {
    /// Returns an exporter printing to standard output.
    pub fn stdout() -> Self {
        ConsoleExporter::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleExporter<W> {
    /// Returns an exporter printing to the given writer.
    pub fn new(out: W) -> Self {
        ConsoleExporter {
            out: Arc::new(Mutex::new(out)),
        }
    }
}

impl<W> std::fmt::Debug for ConsoleExporter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad("ConsoleExporter { .. }")
    }
}

fn render_value(out: &mut String, value: &Value) {
    match value {
        Value::Str(s) => {
            let _ = write!(out, "{:?}", s);
        }
        Value::I64(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::Bool(b) => {
            let _ = write!(out, "{}", b);
        }
    }
}

fn render_span(out: &mut String, span: &SpanData) {
    let _ = write!(
        out,
        "{} {} {} trace={} span={}",
        span.service,
        span.kind.as_str(),
        span.name,
        span.trace_id,
        span.id,
    );
    if let Some(parent) = span.parent {
        let _ = write!(out, " parent={}", parent);
    }
    let _ = write!(out, " {:.3}ms", span.duration_us as f64 / 1000.0);
    for (key, value) in &span.attributes {
        let _ = write!(out, " {}=", key);
        render_value(out, value);
    }
    out.push('\n');
    for event in &span.events {
        let _ = write!(out, "  {}", event.name);
        for (key, value) in &event.attributes {
            let _ = write!(out, " {}=", key);
            render_value(out, value);
        }
        out.push('\n');
    }
}

impl<W: Write + Send> SpanExporter for ConsoleExporter<W> {
    fn export(&self, batch: &[SpanData]) -> Result<(), ExportError> {
        let mut rendered = String::new();
        for span in batch {
            render_span(&mut rendered, span);
        }
        let mut out = self.out.lock().unwrap();
        out.write_all(rendered.as_bytes())?;
        Ok(())
    }

    fn shutdown(&self) {
        let _ = self.out.lock().unwrap().flush();
    }
}

/// An exporter that buffers spans in memory.
///
/// Intended for tests and demos: clones share the buffer, so a test can
/// keep one handle, run the code under test with the other, and assert on
/// the captured spans afterwards.
#[derive(Debug, Clone, Default)]
pub struct RecordingExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl RecordingExporter {
    /// Returns a fresh, empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything exported so far.
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.lock().unwrap().clone()
    }

    /// Removes and returns everything exported so far.
    pub fn take(&self) -> Vec<SpanData> {
        mem::take(&mut *self.spans.lock().unwrap())
    }
}

impl SpanExporter for RecordingExporter {
    fn export(&self, batch: &[SpanData]) -> Result<(), ExportError> {
        self.spans.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SpanEvent, SpanId, SpanKind, TraceId};
    use time::OffsetDateTime;

    fn sample_span() -> SpanData {
        SpanData {
            service: "course-catalog-service".to_owned(),
            trace_id: TraceId::generate(),
            id: SpanId::from_u64(1).unwrap(),
            parent: None,
            name: "add_course",
            kind: SpanKind::Server,
            start: OffsetDateTime::UNIX_EPOCH,
            end: OffsetDateTime::UNIX_EPOCH,
            duration_us: 2500,
            attributes: [("http.method", Value::from("POST"))].into_iter().collect(),
            events: vec![SpanEvent {
                name: "Validation failed",
                time: OffsetDateTime::UNIX_EPOCH,
                attributes: [("missing_fields", Value::from("name"))]
                    .into_iter()
                    .collect(),
            }],
        }
    }

    #[test]
    fn console_renders_span_and_events() {
        let mut rendered = String::new();
        render_span(&mut rendered, &sample_span());
        let mut lines = rendered.lines();

        let head = lines.next().unwrap();
        assert!(head.starts_with("course-catalog-service SERVER add_course trace="));
        assert!(head.contains(" 2.500ms"));
        assert!(head.contains("http.method=\"POST\""));
        assert!(!head.contains("parent="));

        let event = lines.next().unwrap();
        assert_eq!(event, "  Validation failed missing_fields=\"name\"");
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn recording_exporter_captures_batches() {
        let recorder = RecordingExporter::new();
        let clone = recorder.clone();
        clone.export(&[sample_span(), sample_span()]).unwrap();

        assert_eq!(recorder.spans().len(), 2);
        assert_eq!(recorder.take().len(), 2);
        assert!(recorder.spans().is_empty());
    }
}
