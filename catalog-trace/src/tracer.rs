//! Span creation and the guard that closes spans exactly once.
//!
//! The tracer deliberately has no notion of a thread-local "current"
//! span. Parenting is explicit: a caller that wants children passes its
//! span's [`SpanContext`] down, which keeps span trees correct however
//! requests are scheduled across threads and makes the parent visible at
//! every call site.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use time::OffsetDateTime;

use crate::export::{ExportError, SpanExporter};
use crate::logger::StructuredLogger;
use crate::span::{SpanContext, SpanData, SpanId, SpanKind, TraceId, Value};

struct Inner {
    service: String,
    exporters: Vec<Arc<dyn SpanExporter>>,
    next_span_id: AtomicU64,
    diagnostics: Option<StructuredLogger>,
}

/// Creates spans and forwards them, once closed, to every registered
/// exporter.
///
/// Cheap to clone; clones share the exporter list and the span id
/// sequence. Export failures never propagate to the code being traced:
/// they are reported to the diagnostic logger (or stderr) and swallowed.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<Inner>,
}

impl Tracer {
    /// Starts building a tracer for the named service.
    pub fn builder(service: impl Into<String>) -> TracerBuilder {
        TracerBuilder {
            service: service.into(),
            exporters: Vec::new(),
            diagnostics: None,
        }
    }

    /// The service name stamped into every span.
    pub fn service(&self) -> &str {
        &self.inner.service
    }

    /// Opens a span.
    ///
    /// With no parent the span starts a new trace; with a parent it
    /// joins the parent's trace. The returned guard closes and exports
    /// the span when dropped, so every exit path of the enclosing scope
    /// closes it exactly once.
    pub fn span(
        &self,
        name: &'static str,
        kind: SpanKind,
        parent: Option<SpanContext>,
    ) -> ActiveSpan {
        let trace_id = match parent {
            Some(ctx) => ctx.trace_id(),
            None => TraceId::generate(),
        };
        let id = self.next_span_id();
        let data = SpanData {
            service: self.inner.service.clone(),
            trace_id,
            id,
            parent: parent.map(|ctx| ctx.span_id()),
            name,
            kind,
            start: OffsetDateTime::now_utc(),
            end: OffsetDateTime::now_utc(),
            duration_us: 0,
            attributes: Default::default(),
            events: Vec::new(),
        };
        ActiveSpan {
            tracer: self.clone(),
            context: SpanContext::new(trace_id, id),
            started: Instant::now(),
            data: Some(data),
        }
    }

    /// Opens the `SERVER` root span for one inbound request.
    pub fn root_span(&self, name: &'static str) -> ActiveSpan {
        self.span(name, SpanKind::Server, None)
    }

    /// Opens an `INTERNAL` child span for a sub-step of `parent`.
    pub fn child_span(&self, name: &'static str, parent: SpanContext) -> ActiveSpan {
        self.span(name, SpanKind::Internal, Some(parent))
    }

    /// Flushes every registered exporter.
    ///
    /// Called during telemetry shutdown; batched exporters are drained
    /// separately by their guard.
    pub fn shutdown(&self) {
        for exporter in &self.inner.exporters {
            exporter.shutdown();
        }
    }

    fn next_span_id(&self) -> SpanId {
        // The sequence starts at 1; skipping 0 only matters after a
        // u64 wraparound.
        loop {
            let raw = self.inner.next_span_id.fetch_add(1, Ordering::Relaxed);
            if let Some(id) = SpanId::from_u64(raw) {
                return id;
            }
        }
    }

    fn export(&self, data: SpanData) {
        for exporter in &self.inner.exporters {
            if let Err(error) = exporter.export(std::slice::from_ref(&data)) {
                self.report(&error, data.name);
            }
        }
    }

    fn report(&self, error: &ExportError, span: &'static str) {
        match &self.inner.diagnostics {
            Some(logger) => logger.log(
                crate::logger::Level::Warn,
                "span export failed",
                [("span", span.into()), ("error", error.to_string().into())],
            ),
            None => eprintln!("catalog-trace: failed to export span {:?}: {}", span, error),
        }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("service", &self.inner.service)
            .field("exporters", &self.inner.exporters.len())
            .finish_non_exhaustive()
    }
}

/// Configures a [`Tracer`].
pub struct TracerBuilder {
    service: String,
    exporters: Vec<Arc<dyn SpanExporter>>,
    diagnostics: Option<StructuredLogger>,
}

impl TracerBuilder {
    /// Registers an exporter to receive every completed span.
    pub fn with_exporter(mut self, exporter: impl SpanExporter + 'static) -> Self {
        self.exporters.push(Arc::new(exporter));
        self
    }

    /// Routes export failures to the given logger instead of stderr.
    pub fn diagnostics(mut self, logger: StructuredLogger) -> Self {
        self.diagnostics = Some(logger);
        self
    }

    /// Finishes the tracer.
    pub fn build(self) -> Tracer {
        Tracer {
            inner: Arc::new(Inner {
                service: self.service,
                exporters: self.exporters,
                next_span_id: AtomicU64::new(1),
                diagnostics: self.diagnostics,
            }),
        }
    }
}

impl fmt::Debug for TracerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerBuilder")
            .field("service", &self.service)
            .field("exporters", &self.exporters.len())
            .finish_non_exhaustive()
    }
}

/// An open span, closed exactly once when this guard goes out of scope.
///
/// Attributes and events can only be recorded while the guard is alive,
/// which is what makes "annotate, then close" the only order the API can
/// express: the record describing an outcome must be written before the
/// scope that owns the span exits. Calling [`end`](ActiveSpan::end)
/// closes early and consumes the guard; otherwise drop closes it,
/// including on panic and early-return paths.
pub struct ActiveSpan {
    tracer: Tracer,
    context: SpanContext,
    started: Instant,
    data: Option<SpanData>,
}

impl ActiveSpan {
    /// This span's position in its trace, for parenting children and
    /// correlating log records.
    pub fn context(&self) -> SpanContext {
        self.context
    }

    /// Sets a scalar attribute, replacing any previous value for `key`.
    pub fn set_attribute(&mut self, key: &'static str, value: impl Into<Value>) {
        if let Some(data) = &mut self.data {
            data.attributes.insert(key, value.into());
        }
    }

    /// Appends a timestamped event with no attributes.
    pub fn add_event(&mut self, name: &'static str) {
        self.add_event_with(name, std::iter::empty());
    }

    /// Appends a timestamped event carrying its own attributes.
    pub fn add_event_with(
        &mut self,
        name: &'static str,
        attributes: impl IntoIterator<Item = (&'static str, Value)>,
    ) {
        if let Some(data) = &mut self.data {
            data.events.push(crate::span::SpanEvent {
                name,
                time: OffsetDateTime::now_utc(),
                attributes: attributes.into_iter().collect(),
            });
        }
    }

    /// Closes the span now instead of at end of scope.
    pub fn end(self) {
        // Consuming self runs the drop close.
        mem::drop(self);
    }

    fn close(&mut self) {
        if let Some(mut data) = self.data.take() {
            data.end = OffsetDateTime::now_utc();
            data.duration_us = self.started.elapsed().as_micros() as u64;
            self.tracer.export(data);
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ActiveSpan");
        if let Some(data) = &self.data {
            debug.field("name", &data.name).field("kind", &data.kind);
        }
        debug.field("context", &self.context).finish_non_exhaustive()
    }
}
