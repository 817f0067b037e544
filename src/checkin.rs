use crate::clock;
use crate::config::GeofenceConfig;
use crate::error::{is_unique_violation, AttendanceError};
use crate::geofence;
use crate::roster;
use crate::status::{CheckInMethod, DailyStatus};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAttendance {
    pub id: String,
    pub student_id: String,
    pub date: String,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub status: DailyStatus,
    pub lateness_minutes: i64,
    pub method: CheckInMethod,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

const DAILY_COLUMNS: &str = "id, student_id, date, arrival_time, departure_time, status,
     lateness_minutes, method, latitude, longitude";

fn daily_from_row(r: &Row<'_>) -> rusqlite::Result<DailyAttendance> {
    let status: String = r.get(5)?;
    let method: String = r.get(7)?;
    Ok(DailyAttendance {
        id: r.get(0)?,
        student_id: r.get(1)?,
        date: r.get(2)?,
        arrival_time: r.get(3)?,
        departure_time: r.get(4)?,
        status: DailyStatus::canonicalize(&status),
        lateness_minutes: r.get(6)?,
        // Rows predating the method column default to manual entry.
        method: CheckInMethod::parse(&method).unwrap_or(CheckInMethod::Manual),
        latitude: r.get(8)?,
        longitude: r.get(9)?,
    })
}

pub fn get_daily(
    conn: &Connection,
    student_id: &str,
    date: NaiveDate,
) -> Result<Option<DailyAttendance>, AttendanceError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM daily_attendance WHERE student_id = ? AND date = ?",
                DAILY_COLUMNS
            ),
            (student_id, clock::fmt_date(date)),
            daily_from_row,
        )
        .optional()?)
}

pub fn daily_status(
    conn: &Connection,
    student_id: &str,
    date: NaiveDate,
) -> Result<Option<DailyStatus>, AttendanceError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM daily_attendance WHERE student_id = ? AND date = ?",
            (student_id, clock::fmt_date(date)),
            |r| r.get(0),
        )
        .optional()?;
    Ok(raw.as_deref().map(DailyStatus::canonicalize))
}

/// Daily status for each student that has a record on `date`.
pub fn daily_statuses_for(
    conn: &Connection,
    student_ids: &[String],
    date: NaiveDate,
) -> Result<HashMap<String, DailyStatus>, AttendanceError> {
    let mut out = HashMap::new();
    if student_ids.is_empty() {
        return Ok(out);
    }
    let placeholders = vec!["?"; student_ids.len()].join(", ");
    let sql = format!(
        "SELECT student_id, status FROM daily_attendance WHERE date = ? AND student_id IN ({})",
        placeholders
    );
    let mut bind: Vec<String> = Vec::with_capacity(student_ids.len() + 1);
    bind.push(clock::fmt_date(date));
    bind.extend(student_ids.iter().cloned());

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(bind.iter()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, status) in rows {
        out.insert(student_id, DailyStatus::canonicalize(&status));
    }
    Ok(out)
}

/// Geofenced self check-in. At most one per student per day, only up to the
/// configured cutoff.
pub fn record_check_in(
    conn: &Connection,
    cfg: &GeofenceConfig,
    student_id: &str,
    coords: Option<Coordinates>,
    now: NaiveDateTime,
) -> Result<DailyAttendance, AttendanceError> {
    if !roster::student_exists(conn, student_id)? {
        return Err(AttendanceError::NotFound("student"));
    }
    let today = now.date();
    if get_daily(conn, student_id, today)?.is_some() {
        return Err(AttendanceError::AlreadyCheckedIn);
    }
    if now.time() > cfg.cutoff_time {
        return Err(AttendanceError::CheckInWindowClosed {
            cutoff: cfg.cutoff_time,
        });
    }

    if cfg.school_point().is_some() {
        let Some(c) = coords else {
            return Err(AttendanceError::LocationRequired);
        };
        if let Some(distance_meters) = geofence::validate(c.lat, c.lon, cfg).rounded_meters() {
            return Err(AttendanceError::OutOfGeofenceRange { distance_meters });
        }
    }

    let lateness = clock::lateness_minutes(now.time(), cfg.scheduled_arrival_time);
    let record = DailyAttendance {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        date: clock::fmt_date(today),
        arrival_time: Some(clock::fmt_time(now.time())),
        departure_time: None,
        status: DailyStatus::Present,
        lateness_minutes: lateness,
        method: CheckInMethod::Geo,
        latitude: coords.map(|c| c.lat),
        longitude: coords.map(|c| c.lon),
    };

    let inserted = conn.execute(
        "INSERT INTO daily_attendance(id, student_id, date, arrival_time, status,
           lateness_minutes, method, latitude, longitude)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record.id,
            &record.student_id,
            &record.date,
            &record.arrival_time,
            record.status.as_str(),
            record.lateness_minutes,
            record.method.as_str(),
            record.latitude,
            record.longitude,
        ),
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => return Err(AttendanceError::AlreadyCheckedIn),
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        student_id,
        date = %record.date,
        lateness_minutes = record.lateness_minutes,
        "check-in recorded"
    );
    Ok(record)
}

/// Administrative entry or correction of a student's daily record.
pub fn set_daily_status(
    conn: &Connection,
    cfg: &GeofenceConfig,
    student_id: &str,
    date: NaiveDate,
    status: DailyStatus,
    arrival_time: Option<NaiveTime>,
) -> Result<DailyAttendance, AttendanceError> {
    if !status.is_known() {
        return Err(AttendanceError::UnknownStatus(status.as_str().to_string()));
    }
    if !roster::student_exists(conn, student_id)? {
        return Err(AttendanceError::NotFound("student"));
    }
    let lateness = arrival_time
        .map(|t| clock::lateness_minutes(t, cfg.scheduled_arrival_time))
        .unwrap_or(0);
    let arrival = arrival_time.map(clock::fmt_time);

    conn.execute(
        "INSERT INTO daily_attendance(id, student_id, date, arrival_time, status,
           lateness_minutes, method)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           arrival_time = excluded.arrival_time,
           status = excluded.status,
           lateness_minutes = excluded.lateness_minutes,
           method = excluded.method",
        (
            Uuid::new_v4().to_string(),
            student_id,
            clock::fmt_date(date),
            &arrival,
            status.as_str(),
            lateness,
            CheckInMethod::Manual.as_str(),
        ),
    )?;
    tracing::info!(student_id, date = %date, status = status.as_str(), "daily attendance set");

    get_daily(conn, student_id, date)?.ok_or(AttendanceError::NotFound("daily attendance"))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRow {
    pub student: roster::Student,
    pub record: Option<DailyAttendance>,
}

/// Every student in the class with their daily record for `date`, if any.
pub fn list_daily_for_class(
    conn: &Connection,
    class_id: &str,
    date: NaiveDate,
) -> Result<Vec<DailyRow>, AttendanceError> {
    if !roster::class_exists(conn, class_id)? {
        return Err(AttendanceError::NotFound("class"));
    }
    let students = roster::list_students(conn, class_id)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM daily_attendance d
         WHERE d.date = ? AND d.student_id IN (SELECT id FROM students WHERE class_id = ?)",
        DAILY_COLUMNS
    ))?;
    let mut by_student: HashMap<String, DailyAttendance> = stmt
        .query_map((clock::fmt_date(date), class_id), daily_from_row)?
        .map(|r| r.map(|d| (d.student_id.clone(), d)))
        .collect::<Result<_, _>>()?;

    Ok(students
        .into_iter()
        .map(|s| {
            let record = by_student.remove(&s.id);
            DailyRow { student: s, record }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::roster::fixtures;

    const SCHOOL: (f64, f64) = (-6.2, 106.816666);

    fn at(s: &str) -> NaiveDateTime {
        clock::parse_datetime(s).expect("datetime")
    }

    fn fenced() -> GeofenceConfig {
        GeofenceConfig {
            school_lat: Some(SCHOOL.0),
            school_lon: Some(SCHOOL.1),
            ..GeofenceConfig::default()
        }
    }

    fn at_school() -> Option<Coordinates> {
        Some(Coordinates {
            lat: SCHOOL.0,
            lon: SCHOOL.1,
        })
    }

    #[test]
    fn late_arrival_is_present_with_lateness() {
        let conn = db::open_in_memory().expect("db");
        let (_, students, _) = fixtures::class_with_slot(&conn, &["A"]);
        let rec = record_check_in(&conn, &fenced(), &students[0], at_school(), at("2026-03-02T07:05:00"))
            .expect("check in");
        assert_eq!(rec.status, DailyStatus::Present);
        assert_eq!(rec.lateness_minutes, 5);
        assert_eq!(rec.method, CheckInMethod::Geo);
        assert_eq!(rec.arrival_time.as_deref(), Some("07:05:00"));
        assert_eq!(rec.latitude, Some(SCHOOL.0));
    }

    #[test]
    fn early_arrival_has_no_lateness() {
        let conn = db::open_in_memory().expect("db");
        let (_, students, _) = fixtures::class_with_slot(&conn, &["A"]);
        let rec = record_check_in(&conn, &fenced(), &students[0], at_school(), at("2026-03-02T06:40:00"))
            .expect("check in");
        assert_eq!(rec.lateness_minutes, 0);
    }

    #[test]
    fn second_check_in_same_day_is_rejected_regardless_of_coordinates() {
        let conn = db::open_in_memory().expect("db");
        let (_, students, _) = fixtures::class_with_slot(&conn, &["A"]);
        let cfg = fenced();
        record_check_in(&conn, &cfg, &students[0], at_school(), at("2026-03-02T07:00:00"))
            .expect("first");
        let far = Some(Coordinates { lat: 0.0, lon: 0.0 });
        for coords in [at_school(), far, None] {
            let second = record_check_in(&conn, &cfg, &students[0], coords, at("2026-03-02T07:30:00"));
            assert!(matches!(second, Err(AttendanceError::AlreadyCheckedIn)));
        }
        // A new day is a new record.
        record_check_in(&conn, &cfg, &students[0], at_school(), at("2026-03-03T07:00:00"))
            .expect("next day");
    }

    #[test]
    fn cutoff_is_exclusive_of_the_cutoff_minute_itself() {
        let conn = db::open_in_memory().expect("db");
        let (_, students, _) = fixtures::class_with_slot(&conn, &["A", "B"]);
        let cfg = GeofenceConfig::default();
        record_check_in(&conn, &cfg, &students[0], None, at("2026-03-02T13:00:00"))
            .expect("exactly at cutoff");
        let late = record_check_in(&conn, &cfg, &students[1], None, at("2026-03-02T13:00:01"));
        assert!(matches!(late, Err(AttendanceError::CheckInWindowClosed { .. })));
    }

    #[test]
    fn out_of_range_reports_rounded_distance_and_writes_nothing() {
        let conn = db::open_in_memory().expect("db");
        let (_, students, _) = fixtures::class_with_slot(&conn, &["A"]);
        let one_km_north = SCHOOL.0 + (1000.0 / crate::geofence::EARTH_RADIUS_METERS).to_degrees();
        let res = record_check_in(
            &conn,
            &fenced(),
            &students[0],
            Some(Coordinates {
                lat: one_km_north,
                lon: SCHOOL.1,
            }),
            at("2026-03-02T07:00:00"),
        );
        match res {
            Err(AttendanceError::OutOfGeofenceRange { distance_meters }) => {
                assert_eq!(distance_meters, 1000)
            }
            other => panic!("unexpected {:?}", other),
        }
        let today = clock::parse_date("2026-03-02").expect("date");
        assert!(get_daily(&conn, &students[0], today).expect("get").is_none());
    }

    #[test]
    fn fenced_school_requires_coordinates() {
        let conn = db::open_in_memory().expect("db");
        let (_, students, _) = fixtures::class_with_slot(&conn, &["A"]);
        let res = record_check_in(&conn, &fenced(), &students[0], None, at("2026-03-02T07:00:00"));
        assert!(matches!(res, Err(AttendanceError::LocationRequired)));
    }

    #[test]
    fn manual_entry_corrects_existing_record() {
        let conn = db::open_in_memory().expect("db");
        let (class_id, students, _) = fixtures::class_with_slot(&conn, &["A", "B"]);
        let cfg = GeofenceConfig::default();
        let day = clock::parse_date("2026-03-02").expect("date");
        record_check_in(&conn, &cfg, &students[0], None, at("2026-03-02T07:10:00")).expect("in");

        let fixed = set_daily_status(&conn, &cfg, &students[0], day, DailyStatus::Sick, None)
            .expect("correct");
        assert_eq!(fixed.status, DailyStatus::Sick);
        assert_eq!(fixed.method, CheckInMethod::Manual);
        assert_eq!(fixed.lateness_minutes, 0);

        let unknown = set_daily_status(
            &conn,
            &cfg,
            &students[1],
            day,
            DailyStatus::canonicalize("Terlambat"),
            None,
        );
        assert!(matches!(unknown, Err(AttendanceError::UnknownStatus(_))));

        let rows = list_daily_for_class(&conn, &class_id, day).expect("list");
        assert_eq!(rows.len(), 2);
        assert!(rows[0].record.is_some());
        assert!(rows[1].record.is_none());
    }

    #[test]
    fn legacy_status_strings_read_back_canonical() {
        let conn = db::open_in_memory().expect("db");
        let (_, students, _) = fixtures::class_with_slot(&conn, &["A"]);
        conn.execute(
            "INSERT INTO daily_attendance(id, student_id, date, status, method)
             VALUES('x', ?, '2026-03-02', 'DL', 'manual')",
            [&students[0]],
        )
        .expect("insert legacy");
        let day = clock::parse_date("2026-03-02").expect("date");
        assert_eq!(
            daily_status(&conn, &students[0], day).expect("status"),
            Some(DailyStatus::OffsiteDuty)
        );
        let map = daily_statuses_for(&conn, &students, day).expect("map");
        assert_eq!(map.get(&students[0]), Some(&DailyStatus::OffsiteDuty));
    }
}
