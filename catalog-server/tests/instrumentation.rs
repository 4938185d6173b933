//! End-to-end checks of the span trees, log records and counter changes
//! each catalog operation produces.

use std::io::{self, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use catalog_server::{
    AddOutcome, CatalogService, CatalogStore, CourseRecord, LookupOutcome, RequestInfo,
};
use catalog_trace::{
    BatchConfig, CollectorExporter, RecordingExporter, SpanData, SpanKind, Telemetry,
    TelemetryGuard, Value,
};

fn course(code: &str, name: &str, instructor: &str) -> CourseRecord {
    CourseRecord {
        code: code.to_owned(),
        name: name.to_owned(),
        instructor: instructor.to_owned(),
        semester: "Fall 2025".to_owned(),
        schedule: "MWF 10:00".to_owned(),
        classroom: "B-12".to_owned(),
        prerequisites: "None".to_owned(),
        grading: "Letter".to_owned(),
        description: "A course.".to_owned(),
    }
}

fn get(target: &str) -> RequestInfo {
    RequestInfo::new("GET", target, "203.0.113.9")
}

fn post(target: &str) -> RequestInfo {
    RequestInfo::new("POST", target, "203.0.113.9")
}

struct Harness {
    service: CatalogService,
    recorder: RecordingExporter,
    telemetry: Telemetry,
    _guard: TelemetryGuard,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let recorder = RecordingExporter::new();
    let (telemetry, guard) = Telemetry::builder("course-catalog-service")
        .with_exporter(recorder.clone())
        .with_log_writer(io::sink())
        .build();
    let store = CatalogStore::new(dir.path().join("course_catalog.json"));
    let service = CatalogService::new(store, &telemetry);
    Harness {
        service,
        recorder,
        telemetry,
        _guard: guard,
        _dir: dir,
    }
}

fn span_named<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|span| span.name == name)
        .unwrap_or_else(|| panic!("no span named {:?} in {:?}", name, names(spans)))
}

fn names(spans: &[SpanData]) -> Vec<&'static str> {
    spans.iter().map(|span| span.name).collect()
}

#[test]
fn every_operation_closes_exactly_one_root_span() {
    let h = harness();

    h.service.index(&get("/"));
    h.service.course_catalog(&get("/catalog")).unwrap();
    let added = h
        .service
        .add_course(&post("/add_course"), course("CS101", "Intro", "Dr. X"));
    assert!(matches!(added, AddOutcome::Added { .. }));
    h.service
        .course_details(&get("/course/CS101"), "CS101")
        .unwrap();

    let spans = h.recorder.spans();
    let roots: Vec<_> = spans
        .iter()
        .filter(|span| span.kind == SpanKind::Server)
        .collect();
    assert_eq!(roots.len(), 4);
    for expected in ["index_page", "course_catalog", "add_course", "course_details"] {
        assert_eq!(
            roots.iter().filter(|span| span.name == expected).count(),
            1,
            "expected exactly one {:?} root",
            expected
        );
    }
    // Roots carry the base request attributes and the service identity.
    for root in roots {
        assert_eq!(root.service, "course-catalog-service");
        assert!(root.attribute("http.method").is_some());
        assert!(root.attribute("http.target").is_some());
        assert_eq!(root.attribute("peer.addr"), Some(&Value::from("203.0.113.9")));
        assert!(root.parent.is_none());
    }
}

#[test]
fn add_course_success_writes_once_and_marks_the_root() {
    let h = harness();

    let outcome = h.service.add_course(
        &post("/add_course"),
        course("CS101", "Intro to Computer Science", "Dr. X"),
    );

    assert_eq!(
        outcome,
        AddOutcome::Added {
            message: "Course 'Intro to Computer Science' added successfully!".to_owned()
        }
    );
    assert_eq!(h.telemetry.errors().get(), 0);

    let spans = h.recorder.spans();
    // Children close before the root, so export order mirrors nesting.
    assert_eq!(
        names(&spans),
        ["validate_course_form", "save_course_data", "add_course"]
    );

    let root = span_named(&spans, "add_course");
    assert_eq!(root.kind, SpanKind::Server);
    assert!(root.event("Course added").is_some());
    assert_eq!(root.attribute("course.name"), Some(&Value::from("Intro to Computer Science")));
    assert_eq!(root.attribute("course.instructor"), Some(&Value::from("Dr. X")));

    let save = span_named(&spans, "save_course_data");
    assert_eq!(save.kind, SpanKind::Internal);
    assert_eq!(save.parent, Some(root.id));
    assert_eq!(save.trace_id, root.trace_id);
    let saved = save.event("Course saved successfully").unwrap();
    assert_eq!(saved.attributes.get("course_code"), Some(&Value::from("CS101")));

    let validation = span_named(&spans, "validate_course_form");
    assert_eq!(validation.parent, Some(root.id));
    assert!(validation.event("Validation failed").is_none());

    // Exactly one record reached the file.
    let listed = h.service.course_catalog(&get("/catalog")).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].code, "CS101");
}

#[test]
fn blank_name_is_rejected_before_any_write() {
    let h = harness();

    let outcome = h
        .service
        .add_course(&post("/add_course"), course("CS101", "", "Dr. X"));

    match outcome {
        AddOutcome::Rejected { missing, message } => {
            assert_eq!(missing, ["name"]);
            assert_eq!(message, "Missing required fields: name");
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
    assert_eq!(h.telemetry.errors().get(), 1);

    let spans = h.recorder.spans();
    // No persistence child was ever opened.
    assert_eq!(names(&spans), ["validate_course_form", "add_course"]);

    let validation = span_named(&spans, "validate_course_form");
    let failed = validation.event("Validation failed").unwrap();
    assert_eq!(failed.attributes.get("missing_fields"), Some(&Value::from("name")));
    assert_eq!(validation.attribute("error.type"), Some(&Value::from("validation")));
    assert_eq!(validation.attribute("error.count"), Some(&Value::I64(1)));

    // Nothing reached the file.
    assert!(h
        .service
        .course_catalog(&get("/catalog"))
        .unwrap()
        .is_empty());
}

#[test]
fn reported_missing_fields_are_exactly_the_blank_required_subset() {
    let h = harness();

    let outcome = h
        .service
        .add_course(&post("/add_course"), course("", "", "Dr. X"));

    match outcome {
        AddOutcome::Rejected { missing, .. } => assert_eq!(missing, ["code", "name"]),
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[test]
fn each_failure_gets_its_own_counter_value() {
    let h = harness();

    h.service
        .add_course(&post("/add_course"), course("CS101", "", "Dr. X"));
    h.service
        .add_course(&post("/add_course"), course("CS102", "", "Dr. X"));

    let spans = h.recorder.spans();
    let counts: Vec<_> = spans
        .iter()
        .filter(|span| span.name == "validate_course_form")
        .map(|span| span.attribute("error.count").cloned())
        .collect();
    assert_eq!(counts, [Some(Value::I64(1)), Some(Value::I64(2))]);
    assert_eq!(h.telemetry.errors().get(), 2);
}

#[test]
fn catalog_listing_records_fetch_and_load_events() {
    let h = harness();
    h.service
        .add_course(&post("/add_course"), course("CS101", "Intro", "Dr. X"));
    h.service
        .add_course(&post("/add_course"), course("CS203", "Tools", "Dr. N"));
    h.recorder.take();

    let courses = h.service.course_catalog(&get("/catalog")).unwrap();
    assert_eq!(courses.len(), 2);

    let spans = h.recorder.spans();
    let root = span_named(&spans, "course_catalog");
    let events: Vec<_> = root.events.iter().map(|event| event.name).collect();
    assert_eq!(events, ["Fetching course catalog", "Loaded courses from file"]);
    assert_eq!(
        root.event("Loaded courses from file").unwrap().attributes.get("course_count"),
        Some(&Value::I64(2))
    );
}

#[test]
fn unknown_code_lookup_is_an_event_not_an_error() {
    let h = harness();

    let outcome = h
        .service
        .course_details(&get("/course/CS000"), "CS000")
        .unwrap();

    assert_eq!(
        outcome,
        LookupOutcome::NotFound {
            message: "No course found with code 'CS000'.".to_owned()
        }
    );
    assert_eq!(h.telemetry.errors().get(), 0);

    let spans = h.recorder.spans();
    let root = span_named(&spans, "course_details");
    assert_eq!(root.attribute("course.code"), Some(&Value::from("CS000")));
    let missed = root.event("Course not found").unwrap();
    assert_eq!(missed.attributes.get("course_code"), Some(&Value::from("CS000")));
}

#[test]
fn found_lookup_records_the_course_name() {
    let h = harness();
    h.service
        .add_course(&post("/add_course"), course("CS101", "Intro", "Dr. X"));
    h.recorder.take();

    let outcome = h
        .service
        .course_details(&get("/course/CS101"), "CS101")
        .unwrap();

    match outcome {
        LookupOutcome::Found(found) => assert_eq!(found.code, "CS101"),
        other => panic!("expected Found, got {:?}", other),
    }
    let spans = h.recorder.spans();
    let fetched = span_named(&spans, "course_details")
        .event("Course details fetched")
        .unwrap();
    assert_eq!(fetched.attributes.get("course_name"), Some(&Value::from("Intro")));
}

/// Captures log records for assertions, sharing the buffer with clones.
#[derive(Clone, Default)]
struct SharedWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn records(&self) -> Vec<serde_json::Value> {
        let buf = self.buf.lock().unwrap();
        std::str::from_utf8(&buf)
            .unwrap()
            .lines()
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

#[test]
fn unreachable_collector_never_fails_the_request() {
    // A port with nothing listening on it.
    let dead_addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let dir = tempfile::tempdir().unwrap();
    let logs = SharedWriter::default();
    let (telemetry, guard) = Telemetry::builder("course-catalog-service")
        .with_batched_exporter(
            CollectorExporter::new(dead_addr).connect_timeout(Duration::from_millis(200)),
            BatchConfig::default()
                .linger(Duration::from_millis(20))
                .shutdown_timeout(Duration::from_secs(5)),
        )
        .with_log_writer(logs.clone())
        .build();
    let service = CatalogService::new(
        CatalogStore::new(dir.path().join("course_catalog.json")),
        &telemetry,
    );

    let outcome = service.add_course(&post("/add_course"), course("CS101", "Intro", "Dr. X"));
    assert!(matches!(outcome, AddOutcome::Added { .. }));

    // Force the worker to flush its queue at the dead endpoint.
    drop(guard);

    let export_failures: Vec<_> = logs
        .records()
        .into_iter()
        .filter(|record| record["message"] == "span export failed")
        .collect();
    assert!(
        !export_failures.is_empty(),
        "expected the log sink to record the failed export"
    );
    assert_eq!(export_failures[0]["level"], "WARN");

    // Export failures are pipeline trouble, not domain errors.
    assert_eq!(telemetry.errors().get(), 0);
}
