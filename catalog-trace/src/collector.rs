//! Exporter that ships span batches to a network collector.
//!
//! The wire format is one JSON object per span, newline-delimited, over a
//! plain TCP connection. The connection is opened lazily on the first
//! export and reopened after any failure, so a collector that is down at
//! startup or restarts mid-run only costs the batches sent while it was
//! away. Connect and write are both bounded by timeouts; a stalled
//! collector turns into an [`ExportError::Unreachable`] instead of a
//! stuck worker.

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use crate::export::{ExportError, SpanExporter};
use crate::span::SpanData;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ships completed spans to a collector endpoint as JSON lines.
#[derive(Debug)]
pub struct CollectorExporter {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl CollectorExporter {
    /// Creates an exporter for the given `host:port` endpoint.
    ///
    /// No connection is attempted here; the first export connects.
    pub fn new(addr: impl Into<String>) -> Self {
        CollectorExporter {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            conn: Mutex::new(None),
        }
    }

    /// Bounds how long one connection attempt may take.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bounds how long one batch write may take.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// The configured endpoint.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn unreachable(&self, source: io::Error) -> ExportError {
        ExportError::Unreachable {
            addr: self.addr.clone(),
            source,
        }
    }

    fn try_connect(&self) -> Result<TcpStream, ExportError> {
        let addr = self
            .addr
            .to_socket_addrs()
            .map_err(|e| self.unreachable(e))?
            .next()
            .ok_or_else(|| {
                self.unreachable(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "endpoint resolved to no addresses",
                ))
            })?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| self.unreachable(e))?;
        stream
            .set_write_timeout(Some(self.write_timeout))
            .map_err(|e| self.unreachable(e))?;
        Ok(stream)
    }
}

impl SpanExporter for CollectorExporter {
    fn export(&self, batch: &[SpanData]) -> Result<(), ExportError> {
        let mut payload = Vec::with_capacity(batch.len() * 256);
        for span in batch {
            serde_json::to_writer(&mut payload, span)?;
            payload.push(b'\n');
        }

        let mut conn = self.conn.lock().unwrap();
        let stream = match &mut *conn {
            Some(stream) => stream,
            slot @ None => slot.insert(self.try_connect()?),
        };
        if let Err(source) = stream.write_all(&payload).and_then(|()| stream.flush()) {
            // Drop the broken connection; the next export reconnects.
            *conn = None;
            return Err(self.unreachable(source));
        }
        Ok(())
    }

    fn shutdown(&self) {
        if let Some(stream) = self.conn.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
