//! Off-thread batching in front of a slow exporter.
//!
//! [`batch`] wraps any [`SpanExporter`] in a bounded queue drained by a
//! dedicated worker thread. Request threads hand spans over with a
//! non-blocking send and move on; the worker accumulates them and flushes
//! whole batches, so a slow collector never stalls a response. Spans that
//! arrive while the queue is full are dropped and counted rather than
//! blocking the producer.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError,
};

use crate::export::{ExportError, SpanExporter};
use crate::logger::StructuredLogger;
use crate::span::SpanData;

/// Default bound on spans waiting for the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2_048;
/// Default maximum number of spans shipped in one export call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 512;
/// Default time the worker waits for more spans before flushing a
/// partial batch.
pub const DEFAULT_LINGER: Duration = Duration::from_secs(5);
/// Default time a dropped [`BatchGuard`] waits for the final flush.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Msg {
    Span(SpanData),
    Shutdown,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum WorkerState {
    Empty,
    Disconnected,
    Continue,
    Shutdown,
}

struct Worker<E> {
    exporter: E,
    receiver: Receiver<Msg>,
    shutdown: Receiver<()>,
    buffer: Vec<SpanData>,
    max_batch_size: usize,
    linger: Duration,
    diagnostics: Option<StructuredLogger>,
}

impl<E: SpanExporter + 'static> Worker<E> {
    fn handle_recv(&mut self, result: Result<Msg, RecvTimeoutError>) -> WorkerState {
        match result {
            Ok(Msg::Span(span)) => {
                self.buffer.push(span);
                WorkerState::Continue
            }
            Ok(Msg::Shutdown) => WorkerState::Shutdown,
            Err(RecvTimeoutError::Timeout) => WorkerState::Empty,
            Err(RecvTimeoutError::Disconnected) => WorkerState::Disconnected,
        }
    }

    fn handle_try_recv(&mut self, result: Result<Msg, TryRecvError>) -> WorkerState {
        match result {
            Ok(Msg::Span(span)) => {
                self.buffer.push(span);
                WorkerState::Continue
            }
            Ok(Msg::Shutdown) => WorkerState::Shutdown,
            Err(TryRecvError::Empty) => WorkerState::Empty,
            Err(TryRecvError::Disconnected) => WorkerState::Disconnected,
        }
    }

    /// Waits up to the linger interval for the first span of a batch,
    /// then grabs as many queued spans as fit in one batch and flushes
    /// them in a single export call.
    fn work(&mut self) -> WorkerState {
        let mut state = self.handle_recv(self.receiver.recv_timeout(self.linger));

        while state == WorkerState::Continue && self.buffer.len() < self.max_batch_size {
            let result = self.receiver.try_recv();
            state = self.handle_try_recv(result);
        }
        self.flush();
        state
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = mem::take(&mut self.buffer);
        if let Err(error) = self.exporter.export(&batch) {
            self.report(&error, batch.len());
        }
    }

    /// Export failures stay inside the pipeline: they go to the
    /// diagnostic logger when one is configured, otherwise to stderr.
    fn report(&self, error: &ExportError, spans: usize) {
        match &self.diagnostics {
            Some(logger) => logger.log(
                crate::logger::Level::Warn,
                "span export failed",
                [
                    ("error", error.to_string().into()),
                    ("spans", (spans as i64).into()),
                ],
            ),
            None => eprintln!("catalog-trace: failed to export {} spans: {}", spans, error),
        }
    }

    fn worker_thread(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("catalog-trace-batch".to_owned())
            .spawn(move || loop {
                match self.work() {
                    WorkerState::Continue | WorkerState::Empty => {}
                    WorkerState::Shutdown | WorkerState::Disconnected => {
                        self.exporter.shutdown();
                        // Accepting this rendezvous releases the guard that
                        // is blocked in drop.
                        let _ = self.shutdown.recv();
                        break;
                    }
                }
            })
            .expect("failed to spawn `catalog-trace-batch` worker thread")
    }
}

/// Configuration for [`batch`], with builder-style setters.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    queue_capacity: usize,
    max_batch_size: usize,
    linger: Duration,
    shutdown_timeout: Duration,
    diagnostics: Option<StructuredLogger>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            linger: DEFAULT_LINGER,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            diagnostics: None,
        }
    }
}

impl BatchConfig {
    /// Bounds the number of spans waiting for the worker. Sends beyond
    /// the bound are dropped and counted.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Caps how many spans one export call may carry.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// How long the worker waits for more spans before flushing a
    /// partial batch.
    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// How long a dropped [`BatchGuard`] waits for the worker to finish
    /// its final flush.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Routes export failures to the given logger instead of stderr.
    pub fn diagnostics(mut self, logger: StructuredLogger) -> Self {
        self.diagnostics = Some(logger);
        self
    }

    /// Spawns the worker thread and returns the producer handle plus the
    /// guard that flushes it on drop.
    pub fn finish<E: SpanExporter + 'static>(self, exporter: E) -> (BatchExporter, BatchGuard) {
        let (sender, receiver) = bounded(self.queue_capacity);
        let (shutdown_sender, shutdown_receiver) = bounded(0);
        let worker = Worker {
            exporter,
            receiver,
            shutdown: shutdown_receiver,
            buffer: Vec::new(),
            max_batch_size: self.max_batch_size,
            linger: self.linger,
            diagnostics: self.diagnostics,
        };
        let handle = worker.worker_thread();
        let batch = BatchExporter {
            sender: sender.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let guard = BatchGuard {
            _handle: handle,
            sender,
            shutdown: shutdown_sender,
            shutdown_timeout: self.shutdown_timeout,
        };
        (batch, guard)
    }
}

/// Wraps `exporter` with the default [`BatchConfig`].
pub fn batch<E: SpanExporter + 'static>(exporter: E) -> (BatchExporter, BatchGuard) {
    BatchConfig::default().finish(exporter)
}

/// Producer half of a batching pipeline.
///
/// Cloneable; every clone feeds the same worker. Handing a span over
/// never blocks: if the queue is full the span is dropped and
/// [`dropped_spans`](BatchExporter::dropped_spans) goes up by one.
#[derive(Debug, Clone)]
pub struct BatchExporter {
    sender: Sender<Msg>,
    dropped: Arc<AtomicU64>,
}

impl BatchExporter {
    /// Number of spans dropped because the queue was full.
    pub fn dropped_spans(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl SpanExporter for BatchExporter {
    fn export(&self, spans: &[SpanData]) -> Result<(), ExportError> {
        for span in spans {
            if self.sender.try_send(Msg::Span(span.clone())).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

/// Flushes and stops the batch worker when dropped.
///
/// Keep the guard alive for as long as spans are produced, typically by
/// binding it in `main`. Dropping it sends a shutdown message, then
/// blocks up to the configured shutdown timeout while the worker drains
/// the queue, exports the final batch, and shuts the inner exporter down.
#[must_use]
#[derive(Debug)]
pub struct BatchGuard {
    _handle: JoinHandle<()>,
    sender: Sender<Msg>,
    shutdown: Sender<()>,
    shutdown_timeout: Duration,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        match self
            .sender
            .send_timeout(Msg::Shutdown, Duration::from_millis(100))
        {
            Ok(()) => {
                // Zero-capacity channel: this send completes only once the
                // worker has flushed everything and reached its rendezvous.
                let _ = self.shutdown.send_timeout((), self.shutdown_timeout);
            }
            Err(SendTimeoutError::Disconnected(_)) => (),
            Err(SendTimeoutError::Timeout(_)) => {
                eprintln!(
                    "catalog-trace: failed to signal batch worker shutdown; \
                     queued spans may be lost"
                );
            }
        }
    }
}
