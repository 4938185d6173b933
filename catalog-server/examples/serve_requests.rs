//! Drives the four catalog operations end to end, standing in for the
//! HTTP routing layer.
//!
//! Runs with the console exporter unless `CATALOG_EXPORTER` says
//! otherwise; try `CATALOG_EXPORTER=collector` with a collector
//! listening on 127.0.0.1:6831 to watch batches ship over the wire.

use catalog_server::{
    CatalogService, CatalogStore, CourseRecord, LookupOutcome, RequestInfo, TelemetryConfig,
};

fn course(code: &str, name: &str, instructor: &str) -> CourseRecord {
    CourseRecord {
        code: code.to_owned(),
        name: name.to_owned(),
        instructor: instructor.to_owned(),
        semester: "Fall 2025".to_owned(),
        schedule: "MWF 10:00-11:00".to_owned(),
        classroom: "B-12".to_owned(),
        prerequisites: "None".to_owned(),
        grading: "60% exams, 40% labs".to_owned(),
        description: "Hands-on introduction to the toolchain.".to_owned(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (telemetry, guard) = TelemetryConfig::from_env()?.init()?;
    let service = CatalogService::new(CatalogStore::new("course_catalog.json"), &telemetry);
    let from = |method: &str, target: &str| RequestInfo::new(method, target, "127.0.0.1");

    service.index(&from("GET", "/"));

    let added = service.add_course(
        &from("POST", "/add_course"),
        course("CS203", "Software Tools and Techniques", "Dr. N"),
    );
    println!("add_course: {}", added.message());

    // A submission with a blank instructor gets rejected, counted and
    // logged; nothing reaches the file.
    let rejected = service.add_course(
        &from("POST", "/add_course"),
        course("CS999", "Phantom Seminar", "  "),
    );
    println!("add_course: {}", rejected.message());

    let courses = service.course_catalog(&from("GET", "/catalog"))?;
    println!("catalog: {} course(s) on file", courses.len());

    match service.course_details(&from("GET", "/course/CS203"), "CS203")? {
        LookupOutcome::Found(course) => println!("details: {} by {}", course.name, course.instructor),
        LookupOutcome::NotFound { message } => println!("details: {}", message),
    }
    match service.course_details(&from("GET", "/course/CS000"), "CS000")? {
        LookupOutcome::Found(course) => println!("details: {} by {}", course.name, course.instructor),
        LookupOutcome::NotFound { message } => println!("details: {}", message),
    }

    println!("errors recorded: {}", telemetry.errors().get());

    drop(guard); // flush spans and logs before exit
    Ok(())
}
