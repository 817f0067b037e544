use crate::clock;
use crate::error::AttendanceError;
use chrono::{Datelike, NaiveDate, NaiveTime};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub class_id: String,
    pub display_name: String,
    pub active: bool,
    pub sort_order: i64,
}

/// A recurring weekly teaching assignment. `weekday` is 1 (Monday) to 7 (Sunday).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub id: String,
    pub class_id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub weekday: u32,
    #[serde(serialize_with = "ser_time")]
    pub start_time: NaiveTime,
    #[serde(serialize_with = "ser_time")]
    pub end_time: NaiveTime,
}

fn ser_time<S: serde::Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&clock::fmt_time(*t))
}

#[derive(Debug, Clone)]
pub struct NewSlot {
    pub class_id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub weekday: u32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

pub fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, AttendanceError> {
    Ok(conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn create_class(conn: &Connection, name: &str) -> Result<String, AttendanceError> {
    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, name),
    )?;
    Ok(class_id)
}

pub fn create_student(
    conn: &Connection,
    class_id: &str,
    last_name: &str,
    first_name: &str,
    active: bool,
) -> Result<String, AttendanceError> {
    if !class_exists(conn, class_id)? {
        return Err(AttendanceError::NotFound("class"));
    }
    let next_sort: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )?;
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, active, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            class_id,
            last_name,
            first_name,
            active as i64,
            next_sort,
        ),
    )?;
    Ok(student_id)
}

pub fn set_student_active(
    conn: &Connection,
    student_id: &str,
    active: bool,
) -> Result<(), AttendanceError> {
    let changed = conn.execute(
        "UPDATE students SET active = ? WHERE id = ?",
        (active as i64, student_id),
    )?;
    if changed == 0 {
        return Err(AttendanceError::NotFound("student"));
    }
    Ok(())
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, AttendanceError> {
    Ok(conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn list_students(conn: &Connection, class_id: &str) -> Result<Vec<Student>, AttendanceError> {
    let mut stmt = conn.prepare(
        "SELECT id, class_id, last_name, first_name, active, sort_order
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(Student {
                id: r.get(0)?,
                class_id: r.get(1)?,
                display_name: format!("{}, {}", last, first),
                active: r.get::<_, i64>(4)? != 0,
                sort_order: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ids of the students currently enrolled and active in a class, in roster order.
pub fn list_active_students(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<String>, AttendanceError> {
    let mut stmt = conn.prepare(
        "SELECT id FROM students WHERE class_id = ? AND active = 1 ORDER BY sort_order",
    )?;
    let ids = stmt
        .query_map([class_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn create_slot(conn: &Connection, slot: &NewSlot) -> Result<String, AttendanceError> {
    if !class_exists(conn, &slot.class_id)? {
        return Err(AttendanceError::NotFound("class"));
    }
    let slot_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schedule_slots(id, class_id, subject_id, teacher_id, weekday, start_time, end_time)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &slot_id,
            &slot.class_id,
            &slot.subject_id,
            &slot.teacher_id,
            slot.weekday,
            clock::fmt_time(slot.start_time),
            clock::fmt_time(slot.end_time),
        ),
    )?;
    Ok(slot_id)
}

const SLOT_COLUMNS: &str = "id, class_id, subject_id, teacher_id, weekday, start_time, end_time";

fn slot_from_row(r: &Row<'_>) -> rusqlite::Result<ScheduleSlot> {
    let start: String = r.get(5)?;
    let end: String = r.get(6)?;
    Ok(ScheduleSlot {
        id: r.get(0)?,
        class_id: r.get(1)?,
        subject_id: r.get(2)?,
        teacher_id: r.get(3)?,
        weekday: r.get(4)?,
        start_time: parse_stored_time(5, &start)?,
        end_time: parse_stored_time(6, &end)?,
    })
}

pub(crate) fn parse_stored_time(idx: usize, raw: &str) -> rusqlite::Result<NaiveTime> {
    clock::parse_time(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("bad time: {}", raw).into(),
        )
    })
}

pub fn get_slot(conn: &Connection, slot_id: &str) -> Result<ScheduleSlot, AttendanceError> {
    conn.query_row(
        &format!("SELECT {} FROM schedule_slots WHERE id = ?", SLOT_COLUMNS),
        [slot_id],
        slot_from_row,
    )
    .optional()?
    .ok_or(AttendanceError::NotFound("schedule slot"))
}

pub fn list_slots(
    conn: &Connection,
    class_id: Option<&str>,
) -> Result<Vec<ScheduleSlot>, AttendanceError> {
    let slots = match class_id {
        Some(cid) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM schedule_slots WHERE class_id = ? ORDER BY weekday, start_time",
                SLOT_COLUMNS
            ))?;
            let rows = stmt.query_map([cid], slot_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM schedule_slots ORDER BY weekday, start_time",
                SLOT_COLUMNS
            ))?;
            let rows = stmt.query_map([], slot_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(slots)
}

/// Slots that meet on the weekday of `date`.
pub fn slots_on(conn: &Connection, date: NaiveDate) -> Result<Vec<ScheduleSlot>, AttendanceError> {
    let weekday = date.weekday().number_from_monday();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM schedule_slots WHERE weekday = ? ORDER BY start_time, id",
        SLOT_COLUMNS
    ))?;
    let slots = stmt
        .query_map([weekday], slot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(slots)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// One class with the given students (all active) and a Monday 08:00-09:30 slot.
    pub fn class_with_slot(conn: &Connection, names: &[&str]) -> (String, Vec<String>, String) {
        let class_id = create_class(conn, "7A").expect("class");
        let students = names
            .iter()
            .map(|n| create_student(conn, &class_id, n, "Test", true).expect("student"))
            .collect();
        let slot_id = create_slot(
            conn,
            &NewSlot {
                class_id: class_id.clone(),
                subject_id: "math".into(),
                teacher_id: "teacher-1".into(),
                weekday: 1,
                start_time: clock::parse_time("08:00").expect("t"),
                end_time: clock::parse_time("09:30").expect("t"),
            },
        )
        .expect("slot");
        (class_id, students, slot_id)
    }
}
