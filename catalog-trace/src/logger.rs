//! Structured logging alongside the trace stream.
//!
//! The logger is deliberately independent of span lifetimes: a record may
//! be emitted after the span that triggered it has closed. Correlation is
//! opt-in, by passing the span's [`SpanContext`] to [`StructuredLogger::log_in`],
//! which stamps the trace and span ids into the record's extras.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::panic::Location;
use std::path::Path;
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;

use crate::counter::ErrorCounter;
use crate::span::{SpanContext, Value};

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// A failure the operator should look at.
    Error,
    /// Something unexpected that the process recovered from.
    Warn,
    /// Routine operational messages.
    Info,
    /// Detail useful while developing.
    Debug,
}

impl Level {
    /// The wire name of this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
        }
    }
}

/// One log record, serialized as a single JSON object per line.
#[derive(serde::Serialize)]
struct Record<'a> {
    level: &'static str,
    message: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    time: OffsetDateTime,
    logger_name: &'a str,
    source_file: &'static str,
    source_line: u32,
    extras: &'a BTreeMap<&'static str, Value>,
}

struct Inner {
    name: String,
    sink: Mutex<Box<dyn Write + Send>>,
    errors: ErrorCounter,
}

/// Emits machine-parseable log records to an append-only sink.
///
/// Each call produces one complete JSON object followed by a newline,
/// written under a single lock acquisition so records from concurrent
/// requests never interleave. Emission is infallible from the caller's
/// point of view: a failed sink write bumps the shared [`ErrorCounter`]
/// and falls back to stderr instead of propagating.
#[derive(Clone)]
pub struct StructuredLogger {
    inner: Arc<Inner>,
}

impl StructuredLogger {
    /// Creates a logger writing to the given sink.
    pub fn new(
        name: impl Into<String>,
        sink: impl Write + Send + 'static,
        errors: ErrorCounter,
    ) -> Self {
        StructuredLogger {
            inner: Arc::new(Inner {
                name: name.into(),
                sink: Mutex::new(Box::new(sink)),
                errors,
            }),
        }
    }

    /// Creates a logger appending to the file at `path`, creating it if
    /// needed.
    pub fn to_file(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        errors: ErrorCounter,
    ) -> io::Result<Self> {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(StructuredLogger::new(name, file, errors))
    }

    /// The logger name stamped into every record.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The error counter that records failed sink writes.
    pub fn errors(&self) -> &ErrorCounter {
        &self.inner.errors
    }

    /// Emits one record.
    #[track_caller]
    pub fn log(
        &self,
        level: Level,
        message: impl Into<String>,
        extras: impl IntoIterator<Item = (&'static str, Value)>,
    ) {
        self.write(level, message.into(), extras.into_iter().collect());
    }

    /// Emits one record correlated with an open or closed span.
    ///
    /// The context's trace and span ids are added to the record's extras
    /// under `trace_id` and `span_id`.
    #[track_caller]
    pub fn log_in(
        &self,
        ctx: SpanContext,
        level: Level,
        message: impl Into<String>,
        extras: impl IntoIterator<Item = (&'static str, Value)>,
    ) {
        let mut extras: BTreeMap<&'static str, Value> = extras.into_iter().collect();
        extras.insert("trace_id", ctx.trace_id().to_string().into());
        extras.insert("span_id", (ctx.span_id().into_u64() as i64).into());
        self.write(level, message.into(), extras);
    }

    /// Emits a record at [`Level::Error`] with no extras.
    #[track_caller]
    pub fn error(&self, message: impl Into<String>) {
        self.write(Level::Error, message.into(), BTreeMap::new());
    }

    /// Emits a record at [`Level::Warn`] with no extras.
    #[track_caller]
    pub fn warn(&self, message: impl Into<String>) {
        self.write(Level::Warn, message.into(), BTreeMap::new());
    }

    /// Emits a record at [`Level::Info`] with no extras.
    #[track_caller]
    pub fn info(&self, message: impl Into<String>) {
        self.write(Level::Info, message.into(), BTreeMap::new());
    }

    /// Emits a record at [`Level::Debug`] with no extras.
    #[track_caller]
    pub fn debug(&self, message: impl Into<String>) {
        self.write(Level::Debug, message.into(), BTreeMap::new());
    }

    #[track_caller]
    fn write(&self, level: Level, message: String, extras: BTreeMap<&'static str, Value>) {
        let caller = Location::caller();
        let record = Record {
            level: level.as_str(),
            message: &message,
            time: OffsetDateTime::now_utc(),
            logger_name: &self.inner.name,
            source_file: caller.file(),
            source_line: caller.line(),
            extras: &extras,
        };
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(error) => {
                self.report_failure(&record, &error.into());
                return;
            }
        };
        line.push(b'\n');
        // One lock acquisition per record keeps concurrent records whole.
        let result = {
            let mut sink = self.inner.sink.lock().unwrap();
            sink.write_all(&line).and_then(|()| sink.flush())
        };
        if let Err(error) = result {
            self.report_failure(&record, &error.into());
        }
    }

    fn report_failure(&self, record: &Record<'_>, error: &LogSinkError) {
        self.inner.errors.increment();
        eprintln!(
            "catalog-trace: logger {:?} failed to emit {} record {:?}: {}",
            self.inner.name, record.level, record.message, error
        );
    }
}

impl fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredLogger")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// Error produced when a log record could not reach its sink.
///
/// Never propagated to callers of the logger; surfaced only through the
/// error counter and a best-effort stderr line.
#[derive(Debug, thiserror::Error)]
enum LogSinkError {
    #[error("failed to append record to sink")]
    Sink(#[from] io::Error),
    #[error("failed to encode record")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SpanId, TraceId};

    #[derive(Clone, Default)]
    struct SharedWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl SharedWriter {
        fn lines(&self) -> Vec<serde_json::Value> {
            let buf = self.buf.lock().unwrap();
            let text = std::str::from_utf8(&buf).unwrap();
            text.lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buf.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "sink unavailable"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn record_has_fixed_fields_and_extras() {
        let writer = SharedWriter::default();
        let logger = StructuredLogger::new("catalog", writer.clone(), ErrorCounter::default());

        logger.log(
            Level::Info,
            "Course added successfully: CS101",
            [("course.code", "CS101".into())],
        );

        let lines = writer.lines();
        assert_eq!(lines.len(), 1);
        let record = &lines[0];
        assert_eq!(record["level"], "INFO");
        assert_eq!(record["message"], "Course added successfully: CS101");
        assert_eq!(record["logger_name"], "catalog");
        assert_eq!(record["source_file"], file!());
        assert!(record["source_line"].as_u64().unwrap() > 0);
        assert_eq!(record["extras"]["course.code"], "CS101");
        assert!(record["time"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn log_in_stamps_trace_and_span_ids() {
        let writer = SharedWriter::default();
        let logger = StructuredLogger::new("catalog", writer.clone(), ErrorCounter::default());
        let ctx = SpanContext::new(TraceId::generate(), SpanId::from_u64(7).unwrap());

        logger.log_in(ctx, Level::Warn, "lookup missed", std::iter::empty());

        let record = &writer.lines()[0];
        assert_eq!(record["level"], "WARN");
        assert_eq!(record["extras"]["span_id"], 7);
        assert_eq!(
            record["extras"]["trace_id"],
            ctx.trace_id().to_string().as_str()
        );
    }

    #[test]
    fn one_line_per_record() {
        let writer = SharedWriter::default();
        let logger = StructuredLogger::new("catalog", writer.clone(), ErrorCounter::default());

        logger.info("first");
        logger.error("second");

        let lines = writer.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["level"], "INFO");
        assert_eq!(lines[1]["level"], "ERROR");
    }

    #[test]
    fn failed_write_bumps_counter_and_does_not_panic() {
        let errors = ErrorCounter::default();
        let logger = StructuredLogger::new("catalog", FailingWriter, errors.clone());

        logger.info("will not make it");
        logger.info("nor this");

        assert_eq!(errors.get(), 2);
    }

    #[test]
    fn file_sink_appends_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.log");
        let errors = ErrorCounter::default();

        let logger = StructuredLogger::to_file("catalog", &path, errors.clone()).unwrap();
        logger.info("first");
        drop(logger);
        // Reopening appends rather than truncating.
        let logger = StructuredLogger::to_file("catalog", &path, errors.clone()).unwrap();
        logger.info("second");

        let text = std::fs::read_to_string(&path).unwrap();
        let records: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["message"], "first");
        assert_eq!(records[1]["message"], "second");
        assert_eq!(errors.get(), 0);
    }
}
