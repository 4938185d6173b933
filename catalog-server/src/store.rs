//! JSON-file persistence for the course collection.
//!
//! The whole catalog lives in one JSON array. Reads never take a lock:
//! writers replace the file atomically (write to a temporary file in the
//! same directory, then rename over the target), so a concurrent reader
//! sees either the old collection or the new one, never a torn file.
//! Writers serialize their read-modify-write cycles through an internal
//! mutex so concurrent appends cannot lose records.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;

use crate::course::CourseRecord;

/// Failure talking to the catalog file.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The catalog file exists but could not be read.
    #[error("failed to read catalog file {path}")]
    Read {
        /// The catalog file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The catalog file does not contain a valid course collection.
    #[error("catalog file {path} is not a valid course collection")]
    Decode {
        /// The catalog file.
        path: PathBuf,
        /// The underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The updated collection could not be written out.
    #[error("failed to persist catalog file {path}")]
    Persist {
        /// The catalog file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// The course collection, stored as one JSON array on disk.
#[derive(Debug)]
pub struct CatalogStore {
    path: PathBuf,
    // Serializes append cycles; see the module docs.
    write_lock: Mutex<()>,
}

impl CatalogStore {
    /// Opens a store backed by the file at `path`.
    ///
    /// The file is not created until the first append; loading from an
    /// absent file yields an empty collection.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CatalogStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the whole collection.
    pub fn load(&self) -> Result<Vec<CourseRecord>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    /// Appends one record, rewriting the collection atomically.
    pub fn append(&self, record: &CourseRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut courses = self.load()?;
        courses.push(record.clone());
        self.replace(&courses)
    }

    /// Looks a course up by its code.
    pub fn find(&self, code: &str) -> Result<Option<CourseRecord>, StoreError> {
        let courses = self.load()?;
        Ok(courses.into_iter().find(|course| course.code == code))
    }

    fn replace(&self, courses: &[CourseRecord]) -> Result<(), StoreError> {
        let persist_error = |source| StoreError::Persist {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(persist_error)?;
        serde_json::to_writer_pretty(&mut tmp, courses)
            .map_err(|source| persist_error(io::Error::from(source)))?;
        tmp.flush().map_err(persist_error)?;
        tmp.persist(&self.path)
            .map_err(|error| persist_error(error.error))?;
        Ok(())
    }
}
