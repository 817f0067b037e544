use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_default()
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or_default()
}

struct Fixture {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    workspace: PathBuf,
    students: Vec<String>,
}

fn setup(prefix: &str, names: &[&str]) -> Fixture {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(&mut stdin, &mut reader, "cls", "classes.create", json!({ "name": "7A" }))
        ["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let students = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            request_ok(
                &mut stdin,
                &mut reader,
                &format!("stu{}", i),
                "students.create",
                json!({ "classId": class_id, "lastName": name, "firstName": "X" }),
            )["studentId"]
                .as_str()
                .expect("studentId")
                .to_string()
        })
        .collect();
    Fixture {
        child,
        stdin,
        reader,
        workspace,
        students,
    }
}

fn teardown(f: Fixture) {
    let Fixture {
        mut child,
        stdin,
        workspace,
        ..
    } = f;
    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn check_in_records_lateness_and_rejects_a_second_attempt() {
    let mut f = setup("rollcall-checkin-late", &["Adams"]);
    let student = f.students[0].clone();

    let first = request_ok(
        &mut f.stdin,
        &mut f.reader,
        "1",
        "attendance.checkIn",
        json!({ "studentId": student, "at": "2026-03-02T07:05:00" }),
    );
    assert_eq!(first["record"]["status"], json!("present"));
    assert_eq!(first["record"]["latenessMinutes"], json!(5));
    assert_eq!(first["record"]["arrivalTime"], json!("07:05:00"));

    let again = request_err(
        &mut f.stdin,
        &mut f.reader,
        "2",
        "attendance.checkIn",
        json!({ "studentId": student, "at": "2026-03-02T07:30:00" }),
    );
    assert_eq!(again["code"], json!("already_checked_in"));

    // The next day is a fresh record.
    let next_day = request_ok(
        &mut f.stdin,
        &mut f.reader,
        "3",
        "attendance.checkIn",
        json!({ "studentId": student, "at": "2026-03-03T06:50:00" }),
    );
    assert_eq!(next_day["record"]["latenessMinutes"], json!(0));

    teardown(f);
}

#[test]
fn check_in_after_cutoff_is_rejected() {
    let mut f = setup("rollcall-checkin-cutoff", &["Baker"]);
    let student = f.students[0].clone();

    request_ok(
        &mut f.stdin,
        &mut f.reader,
        "1",
        "setup.update",
        json!({ "section": "geofence", "patch": { "cutoffTime": "12:00" } }),
    );
    let closed = request_err(
        &mut f.stdin,
        &mut f.reader,
        "2",
        "attendance.checkIn",
        json!({ "studentId": student, "at": "2026-03-02T12:01:00" }),
    );
    assert_eq!(closed["code"], json!("check_in_window_closed"));
    assert_eq!(closed["details"]["cutoff"], json!("12:00"));

    let at_cutoff = request_ok(
        &mut f.stdin,
        &mut f.reader,
        "3",
        "attendance.checkIn",
        json!({ "studentId": student, "at": "2026-03-02T12:00:00" }),
    );
    assert_eq!(at_cutoff["record"]["latenessMinutes"], json!(300));

    teardown(f);
}

#[test]
fn geofenced_check_in_validates_location() {
    let mut f = setup("rollcall-checkin-geo", &["Chen"]);
    let student = f.students[0].clone();

    let updated = request_ok(
        &mut f.stdin,
        &mut f.reader,
        "1",
        "setup.update",
        json!({
            "section": "geofence",
            "patch": { "schoolLat": -6.2, "schoolLon": 106.816666, "radiusMeters": 200 }
        }),
    );
    assert_eq!(updated["geofence"]["radiusMeters"], json!(200.0));

    let missing = request_err(
        &mut f.stdin,
        &mut f.reader,
        "2",
        "attendance.checkIn",
        json!({ "studentId": student, "at": "2026-03-02T06:45:00" }),
    );
    assert_eq!(missing["code"], json!("location_required"));

    // Roughly 1.1 km north of the school.
    let far = request_err(
        &mut f.stdin,
        &mut f.reader,
        "3",
        "attendance.checkIn",
        json!({ "studentId": student, "lat": -6.19, "lon": 106.816666, "at": "2026-03-02T06:45:00" }),
    );
    assert_eq!(far["code"], json!("out_of_geofence_range"));
    let distance = far["details"]["distanceMeters"].as_i64().expect("distance");
    assert!((1100..1125).contains(&distance), "distance {}", distance);

    let near = request_ok(
        &mut f.stdin,
        &mut f.reader,
        "4",
        "attendance.checkIn",
        json!({ "studentId": student, "lat": -6.2005, "lon": 106.8167, "at": "2026-03-02T06:46:00" }),
    );
    assert_eq!(near["record"]["method"], json!("geo"));
    assert_eq!(near["record"]["latitude"], json!(-6.2005));

    let half = request_err(
        &mut f.stdin,
        &mut f.reader,
        "5",
        "attendance.checkIn",
        json!({ "studentId": student, "lat": -6.2 }),
    );
    assert_eq!(half["code"], json!("bad_params"));

    teardown(f);
}

#[test]
fn manual_daily_entries_show_in_the_class_list() {
    let mut f = setup("rollcall-daily-list", &["Diaz", "Evans"]);
    let (diaz, evans) = (f.students[0].clone(), f.students[1].clone());

    request_ok(
        &mut f.stdin,
        &mut f.reader,
        "1",
        "attendance.setDaily",
        json!({ "studentId": diaz, "date": "2026-03-02", "status": "izin" }),
    );
    let corrected = request_ok(
        &mut f.stdin,
        &mut f.reader,
        "2",
        "attendance.setDaily",
        json!({ "studentId": diaz, "date": "2026-03-02", "status": "H", "arrivalTime": "07:20" }),
    );
    assert_eq!(corrected["record"]["status"], json!("present"));
    assert_eq!(corrected["record"]["latenessMinutes"], json!(20));
    assert_eq!(corrected["record"]["method"], json!("manual"));

    let bogus = request_err(
        &mut f.stdin,
        &mut f.reader,
        "3",
        "attendance.setDaily",
        json!({ "studentId": evans, "date": "2026-03-02", "status": "vacation" }),
    );
    assert_eq!(bogus["code"], json!("unknown_status"));

    let class_id = request_ok(&mut f.stdin, &mut f.reader, "4", "classes.list", json!({}))["classes"][0]
        ["id"]
        .as_str()
        .expect("class id")
        .to_string();
    let listed = request_ok(
        &mut f.stdin,
        &mut f.reader,
        "5",
        "attendance.dailyList",
        json!({ "classId": class_id, "date": "2026-03-02" }),
    );
    let rows = listed["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["record"]["status"], json!("present"));
    assert_eq!(rows[1]["record"], json!(null));

    teardown(f);
}
