//! Instrumented request handling for the four catalog operations.
//!
//! Each public method wraps one inbound route in a `SERVER` root span,
//! opens `INTERNAL` child spans around validation and persistence
//! sub-steps, and emits log records alongside the span events. The root
//! span is a drop guard owned by the method body, so it closes exactly
//! once on every path, and always after the outcome it describes has
//! been recorded on it.
//!
//! Domain failures (validation, persistence) come back as explicit
//! outcome values carrying the user-facing message; the telemetry layer
//! can fail only into its own reporting, never into these methods'
//! callers.

use catalog_trace::{ActiveSpan, ErrorCounter, Level, StructuredLogger, Telemetry, Tracer};

use crate::course::CourseRecord;
use crate::store::{CatalogStore, StoreError};

/// What the routing layer knows about an inbound request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Request target, e.g. `/add_course`.
    pub target: String,
    /// Peer address of the caller.
    pub peer_addr: String,
}

impl RequestInfo {
    /// Describes one inbound request.
    pub fn new(
        method: impl Into<String>,
        target: impl Into<String>,
        peer_addr: impl Into<String>,
    ) -> Self {
        RequestInfo {
            method: method.into(),
            target: target.into(),
            peer_addr: peer_addr.into(),
        }
    }
}

/// Result of an add-course submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The course was validated and persisted.
    Added {
        /// User-facing confirmation, e.g. `Course 'Intro' added successfully!`.
        message: String,
    },
    /// Required fields were blank; nothing was written.
    Rejected {
        /// The blank required fields, in declaration order.
        missing: Vec<&'static str>,
        /// User-facing error text listing the missing fields.
        message: String,
    },
    /// Validation passed but the write failed.
    Failed {
        /// User-facing error text.
        message: String,
    },
}

impl AddOutcome {
    /// The user-facing message for this outcome.
    pub fn message(&self) -> &str {
        match self {
            AddOutcome::Added { message }
            | AddOutcome::Rejected { message, .. }
            | AddOutcome::Failed { message } => message,
        }
    }
}

/// Result of a course-details lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The course exists.
    Found(CourseRecord),
    /// No course has the requested code.
    NotFound {
        /// User-facing message naming the code.
        message: String,
    },
}

/// The course-catalog service with its instrumentation wired in.
///
/// One instance serves all requests; handles are cheap clones, so the
/// routing layer can share it across its worker threads behind an `Arc`
/// or by cloning the telemetry handles it was built from.
#[derive(Debug)]
pub struct CatalogService {
    store: CatalogStore,
    tracer: Tracer,
    logger: StructuredLogger,
    errors: ErrorCounter,
}

impl CatalogService {
    /// Builds the service on a store and an assembled telemetry stack.
    pub fn new(store: CatalogStore, telemetry: &Telemetry) -> Self {
        CatalogService {
            store,
            tracer: telemetry.tracer().clone(),
            logger: telemetry.logger().clone(),
            errors: telemetry.errors().clone(),
        }
    }

    /// Handles `GET /`, the landing page.
    ///
    /// Rendering is the routing collaborator's job; this records the
    /// visit.
    pub fn index(&self, request: &RequestInfo) {
        let mut span = self.tracer.root_span("index_page");
        self.set_request_attributes(&mut span, request);
    }

    /// Handles `GET /add_course`, the submission form.
    ///
    /// Same shape as [`index`](Self::index): the form itself is rendered
    /// elsewhere.
    pub fn add_course_form(&self, request: &RequestInfo) {
        let mut span = self.tracer.root_span("add_course");
        self.set_request_attributes(&mut span, request);
    }

    /// Lists the whole course collection for `GET /catalog`.
    pub fn course_catalog(&self, request: &RequestInfo) -> Result<Vec<CourseRecord>, StoreError> {
        let mut span = self.tracer.root_span("course_catalog");
        self.set_request_attributes(&mut span, request);

        span.add_event("Fetching course catalog");
        match self.store.load() {
            Ok(courses) => {
                span.add_event_with(
                    "Loaded courses from file",
                    [("course_count", (courses.len() as i64).into())],
                );
                Ok(courses)
            }
            Err(error) => {
                let count = self.errors.increment();
                span.set_attribute("error.type", "persistence");
                span.set_attribute("error.count", count as i64);
                self.logger.log_in(
                    span.context(),
                    Level::Error,
                    format!("Failed to load course catalog: {}", error),
                    std::iter::empty(),
                );
                Err(error)
            }
        }
    }

    /// Handles `POST /add_course`: validate a submission, then persist it.
    ///
    /// The root span stays open for the whole operation; the validation
    /// and persistence children each fully enclose the step whose
    /// outcome they record.
    pub fn add_course(&self, request: &RequestInfo, course: CourseRecord) -> AddOutcome {
        let mut root = self.tracer.root_span("add_course");
        self.set_request_attributes(&mut root, request);
        root.set_attribute("course.name", course.name.clone());
        root.set_attribute("course.instructor", course.instructor.clone());

        {
            let mut validation = self.tracer.child_span("validate_course_form", root.context());
            if let Err(error) = course.validate() {
                let count = self.errors.increment();
                validation.add_event_with(
                    "Validation failed",
                    [("missing_fields", error.missing.join(", ").into())],
                );
                validation.set_attribute("error.type", "validation");
                validation.set_attribute("error.count", count as i64);
                let message = format!("Missing required fields: {}", error.missing.join(", "));
                self.logger.log_in(
                    validation.context(),
                    Level::Error,
                    message.clone(),
                    std::iter::empty(),
                );
                return AddOutcome::Rejected {
                    missing: error.missing,
                    message,
                };
            }
            validation.end();
        }

        let mut save = self.tracer.child_span("save_course_data", root.context());
        match self.store.append(&course) {
            Ok(()) => {
                save.add_event_with(
                    "Course saved successfully",
                    [("course_code", course.code.clone().into())],
                );
                save.end();

                root.add_event_with("Course added", [("course_code", course.code.clone().into())]);
                self.logger.log_in(
                    root.context(),
                    Level::Info,
                    format!(
                        "Course added: {} - {} by {}",
                        course.code, course.name, course.instructor
                    ),
                    [("course.code", course.code.clone().into())],
                );
                AddOutcome::Added {
                    message: format!("Course '{}' added successfully!", course.name),
                }
            }
            Err(error) => {
                let count = self.errors.increment();
                save.add_event_with("Course save failed", [("error", error.to_string().into())]);
                save.set_attribute("error.type", "persistence");
                save.set_attribute("error.count", count as i64);
                self.logger.log_in(
                    save.context(),
                    Level::Error,
                    format!("Failed to save course {}: {}", course.code, error),
                    std::iter::empty(),
                );
                AddOutcome::Failed {
                    message: format!("Could not save course '{}'.", course.name),
                }
            }
        }
    }

    /// Looks up one course's details for `GET /course/{code}`.
    ///
    /// An unknown code is a normal outcome, recorded as an event, not an
    /// error.
    pub fn course_details(
        &self,
        request: &RequestInfo,
        code: &str,
    ) -> Result<LookupOutcome, StoreError> {
        let mut span = self.tracer.root_span("course_details");
        self.set_request_attributes(&mut span, request);
        span.set_attribute("course.code", code);

        match self.store.find(code) {
            Ok(Some(course)) => {
                span.add_event_with(
                    "Course details fetched",
                    [("course_name", course.name.clone().into())],
                );
                Ok(LookupOutcome::Found(course))
            }
            Ok(None) => {
                span.add_event_with("Course not found", [("course_code", code.into())]);
                Ok(LookupOutcome::NotFound {
                    message: format!("No course found with code '{}'.", code),
                })
            }
            Err(error) => {
                let count = self.errors.increment();
                span.set_attribute("error.type", "persistence");
                span.set_attribute("error.count", count as i64);
                self.logger.log_in(
                    span.context(),
                    Level::Error,
                    format!("Failed to look up course {}: {}", code, error),
                    std::iter::empty(),
                );
                Err(error)
            }
        }
    }

    fn set_request_attributes(&self, span: &mut ActiveSpan, request: &RequestInfo) {
        span.set_attribute("http.method", request.method.clone());
        span.set_attribute("http.target", request.target.clone());
        span.set_attribute("peer.addr", request.peer_addr.clone());
    }
}
