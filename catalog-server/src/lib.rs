//! The course-catalog record service.
//!
//! Four operations over a JSON-file course collection, each wrapped in
//! the span tree and structured log stream provided by [`catalog_trace`]:
//! a landing page, the catalog listing, an add-course submission with
//! validation and persistence sub-spans, and a by-code lookup.
//!
//! The HTTP layer itself is not here. A router owns request parsing and
//! response rendering and calls one [`CatalogService`] method per route,
//! handing it a [`RequestInfo`] and getting back plain outcome values
//! (including the user-facing messages to flash). The
//! `serve_requests` example shows the intended wiring end to end.
//!
//! ```no_run
//! use catalog_server::{CatalogService, CatalogStore, RequestInfo, TelemetryConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (telemetry, guard) = TelemetryConfig::from_env()?.init()?;
//!     let service = CatalogService::new(
//!         CatalogStore::new("course_catalog.json"),
//!         &telemetry,
//!     );
//!
//!     let request = RequestInfo::new("GET", "/catalog", "127.0.0.1");
//!     for course in service.course_catalog(&request)? {
//!         println!("{}: {}", course.code, course.name);
//!     }
//!
//!     drop(guard); // flush spans and logs before exit
//!     Ok(())
//! }
//! ```
#![warn(missing_debug_implementations, missing_docs, rust_2018_idioms)]

pub mod config;
pub mod course;
pub mod service;
pub mod store;

pub use self::config::{ConfigError, ExportConfig, TelemetryConfig};
pub use self::course::{CourseRecord, ValidationError, REQUIRED_FIELDS};
pub use self::service::{AddOutcome, CatalogService, LookupOutcome, RequestInfo};
pub use self::store::{CatalogStore, StoreError};
