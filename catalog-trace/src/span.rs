//! The span data model: identifiers, scalar attribute values, events, and
//! the immutable record produced when a span closes.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU64;

use serde::ser::{Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

/// The role a span plays within its trace.
///
/// Every externally-triggered operation gets exactly one `Server` root
/// span; sub-steps performed inside that operation get `Internal` children.
/// `Client` marks calls out to another service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanKind {
    /// The root of an inbound request.
    Server,
    /// A sub-step inside an operation.
    Internal,
    /// An outbound call to another service.
    Client,
}

impl SpanKind {
    /// The wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Server => "SERVER",
            SpanKind::Internal => "INTERNAL",
            SpanKind::Client => "CLIENT",
        }
    }
}

/// Identifies a whole trace: the tree of spans produced by one logical
/// request.
///
/// Trace ids are random (v4 UUIDs) rather than sequential so that traces
/// reported by concurrent processes cannot collide at a shared collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(Uuid);

impl TraceId {
    pub(crate) fn generate() -> Self {
        TraceId(Uuid::new_v4())
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl Serialize for TraceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0.simple())
    }
}

/// Identifies one span within its process.
///
/// Ids are allocated from a process-local sequence starting at 1, so they
/// are only meaningful together with the owning trace id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(NonZeroU64);

impl SpanId {
    pub(crate) fn from_u64(id: u64) -> Option<SpanId> {
        NonZeroU64::new(id).map(SpanId)
    }

    /// Returns the id as a `u64`.
    pub fn into_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.0.get())
    }
}

/// A span's position in its trace, used to parent child spans and to
/// correlate log records.
///
/// A context is owned by the request that created its span and is threaded
/// down the call chain by parameter; it is never stored in ambient global
/// or thread-local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
}

impl SpanContext {
    pub(crate) fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        SpanContext { trace_id, span_id }
    }

    /// The trace this span belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The span itself.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }
}

/// A scalar attribute value: a string, a 64-bit integer, or a bool.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A string value.
    Str(String),
    /// A signed integer value.
    I64(i64),
    /// A boolean value.
    Bool(bool),
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Str(s) => serializer.serialize_str(s),
            Value::I64(n) => serializer.serialize_i64(*n),
            Value::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::I64(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A timestamped annotation appended to a span while it is open.
///
/// Events are order-significant: they are exported in the order they were
/// added and are never reordered or merged.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SpanEvent {
    /// What happened.
    pub name: &'static str,
    /// When it happened.
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    /// Scalar details attached to the event.
    pub attributes: BTreeMap<&'static str, Value>,
}

/// An immutable record of one completed unit of work.
///
/// A `SpanData` is produced exactly once, when the span that recorded it
/// closes, and is handed to every registered exporter. After that point
/// nothing can mutate it; the mutable recording surface lives on
/// [`ActiveSpan`](crate::tracer::ActiveSpan) and is consumed by the close.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SpanData {
    /// The service that produced the span.
    pub service: String,
    /// The trace this span belongs to.
    pub trace_id: TraceId,
    /// This span's id.
    pub id: SpanId,
    /// The parent span, if this is not a root.
    pub parent: Option<SpanId>,
    /// The name of the unit of work.
    pub name: &'static str,
    /// The span's role in the trace.
    pub kind: SpanKind,
    /// Wall-clock start timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    /// Wall-clock end timestamp, set exactly once at close.
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    /// Monotonically-measured duration in microseconds.
    pub duration_us: u64,
    /// Scalar attributes recorded while the span was open.
    pub attributes: BTreeMap<&'static str, Value>,
    /// Ordered events recorded while the span was open.
    pub events: Vec<SpanEvent>,
}

impl SpanData {
    /// Looks up an event by name.
    pub fn event(&self, name: &str) -> Option<&SpanEvent> {
        self.events.iter().find(|event| event.name == name)
    }

    /// Looks up an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}
