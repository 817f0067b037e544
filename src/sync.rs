//! Reconciles subject-level attendance with the daily record.
//!
//! Runs lazily, whenever a teacher opens a slot for a date. Rows a teacher has
//! overridden are left untouched; every other row is brought in line with
//! the student's current daily status.

use crate::checkin;
use crate::clock;
use crate::error::{is_unique_violation, AttendanceError};
use crate::roster::{self, ScheduleSlot};
use crate::status::{map_daily_to_subject, DailyStatus, Provenance, SubjectStatus};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectAttendance {
    pub id: String,
    pub slot_id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub start_time: chrono::NaiveTime,
    pub end_time: chrono::NaiveTime,
    pub status: SubjectStatus,
    pub lateness_minutes: Option<i64>,
    pub note: Option<String>,
    pub derived_at: Option<NaiveDateTime>,
    pub provenance: Provenance,
}

impl SubjectAttendance {
    pub fn to_json(&self) -> serde_json::Value {
        let (overridden_by, overridden_at) = match &self.provenance {
            Provenance::Derived => (None, None),
            Provenance::Manual { by, at } => (Some(by.clone()), Some(clock::fmt_datetime(*at))),
        };
        serde_json::json!({
            "id": self.id,
            "slotId": self.slot_id,
            "studentId": self.student_id,
            "date": clock::fmt_date(self.date),
            "startTime": clock::fmt_time(self.start_time),
            "endTime": clock::fmt_time(self.end_time),
            "status": self.status,
            "latenessMinutes": self.lateness_minutes,
            "note": self.note,
            "isOverridden": self.provenance.is_overridden(),
            "source": self.provenance.source(),
            "derivedAt": self.derived_at.map(clock::fmt_datetime),
            "overriddenBy": overridden_by,
            "overriddenAt": overridden_at,
        })
    }
}

pub(crate) const SUBJECT_COLUMNS: &str = "id, slot_id, student_id, date, start_time, end_time,
     status, lateness_minutes, note, derived_at, is_overridden, source, overridden_by, overridden_at";

fn conversion_err(idx: usize, what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("bad {}: {}", what, raw).into(),
    )
}

fn parse_opt_datetime(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDateTime>> {
    raw.map(|s| clock::parse_datetime(&s).ok_or_else(|| conversion_err(idx, "datetime", &s)))
        .transpose()
}

pub(crate) fn subject_from_row(r: &Row<'_>) -> rusqlite::Result<SubjectAttendance> {
    let date: String = r.get(3)?;
    let start: String = r.get(4)?;
    let end: String = r.get(5)?;
    let status: String = r.get(6)?;
    let is_overridden = r.get::<_, i64>(10)? != 0;
    let source: String = r.get(11)?;
    let overridden_by: Option<String> = r.get(12)?;
    let overridden_at = parse_opt_datetime(13, r.get(13)?)?;

    let provenance = Provenance::from_columns(is_overridden, &source, overridden_by, overridden_at)
        .ok_or_else(|| conversion_err(10, "provenance", &source))?;

    Ok(SubjectAttendance {
        id: r.get(0)?,
        slot_id: r.get(1)?,
        student_id: r.get(2)?,
        date: clock::parse_date(&date).ok_or_else(|| conversion_err(3, "date", &date))?,
        start_time: roster::parse_stored_time(4, &start)?,
        end_time: roster::parse_stored_time(5, &end)?,
        status: SubjectStatus::parse(&status).ok_or_else(|| conversion_err(6, "status", &status))?,
        lateness_minutes: r.get(7)?,
        note: r.get(8)?,
        derived_at: parse_opt_datetime(9, r.get(9)?)?,
        provenance,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped_overridden: usize,
    /// Students whose stored daily status is not a recognized value.
    pub unknown_daily: Vec<String>,
}

pub fn list_subject_rows(
    conn: &Connection,
    slot_id: &str,
    date: NaiveDate,
) -> Result<Vec<SubjectAttendance>, AttendanceError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM subject_attendance sa
         JOIN students s ON s.id = sa.student_id
         WHERE sa.slot_id = ? AND sa.date = ?
         ORDER BY s.sort_order",
        SUBJECT_COLUMNS
            .split(',')
            .map(|c| format!("sa.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ")
    ))?;
    let rows = stmt
        .query_map((slot_id, clock::fmt_date(date)), subject_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn existing_rows(
    conn: &Connection,
    slot_id: &str,
    date: NaiveDate,
) -> Result<HashMap<String, SubjectAttendance>, AttendanceError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM subject_attendance WHERE slot_id = ? AND date = ?",
        SUBJECT_COLUMNS
    ))?;
    let rows = stmt
        .query_map((slot_id, clock::fmt_date(date)), subject_from_row)?
        .map(|r| r.map(|row| (row.student_id.clone(), row)))
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

fn row_for(
    tx: &Transaction<'_>,
    slot_id: &str,
    student_id: &str,
    date: NaiveDate,
) -> Result<Option<SubjectAttendance>, AttendanceError> {
    Ok(tx
        .query_row(
            &format!(
                "SELECT {} FROM subject_attendance WHERE slot_id = ? AND student_id = ? AND date = ?",
                SUBJECT_COLUMNS
            ),
            (slot_id, student_id, clock::fmt_date(date)),
            subject_from_row,
        )
        .optional()?)
}

fn insert_derived(
    tx: &Transaction<'_>,
    slot: &ScheduleSlot,
    student_id: &str,
    date: NaiveDate,
    status: SubjectStatus,
    now: NaiveDateTime,
) -> rusqlite::Result<usize> {
    tx.execute(
        "INSERT INTO subject_attendance(id, slot_id, student_id, date, start_time, end_time,
           status, is_overridden, source, derived_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 0, 'derived', ?)",
        (
            Uuid::new_v4().to_string(),
            &slot.id,
            student_id,
            clock::fmt_date(date),
            clock::fmt_time(slot.start_time),
            clock::fmt_time(slot.end_time),
            status.as_str(),
            clock::fmt_datetime(now),
        ),
    )
}

/// Refreshes a derived row. The `is_overridden = 0` guard means a row that was
/// overridden since it was read is left alone; the return value is then 0.
fn update_derived(
    tx: &Transaction<'_>,
    slot: &ScheduleSlot,
    row_id: &str,
    status: SubjectStatus,
    now: NaiveDateTime,
) -> rusqlite::Result<usize> {
    tx.execute(
        "UPDATE subject_attendance
         SET status = ?, start_time = ?, end_time = ?, derived_at = ?
         WHERE id = ? AND is_overridden = 0",
        (
            status.as_str(),
            clock::fmt_time(slot.start_time),
            clock::fmt_time(slot.end_time),
            clock::fmt_datetime(now),
            row_id,
        ),
    )
}

enum Outcome {
    Created,
    Updated,
    Skipped,
}

/// Brings one student's row in line with `status`. A uniqueness failure on
/// insert means another writer created the row first; it is retried once as an
/// update of that row.
fn reconcile_student(
    tx: &Transaction<'_>,
    slot: &ScheduleSlot,
    student_id: &str,
    date: NaiveDate,
    status: SubjectStatus,
    existing: Option<&SubjectAttendance>,
    now: NaiveDateTime,
) -> Result<Outcome, AttendanceError> {
    match existing {
        Some(row) if row.provenance.is_overridden() => Ok(Outcome::Skipped),
        Some(row) => match update_derived(tx, slot, &row.id, status, now) {
            Ok(0) => Ok(Outcome::Skipped),
            Ok(_) => Ok(Outcome::Updated),
            Err(e) => Err(AttendanceError::TransactionAborted(e)),
        },
        None => match insert_derived(tx, slot, student_id, date, status, now) {
            Ok(_) => Ok(Outcome::Created),
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(slot_id = %slot.id, student_id, "subject row created concurrently, retrying as update");
                let conflict = || AttendanceError::PersistenceConflict {
                    student_id: student_id.to_string(),
                };
                let Some(row) = row_for(tx, &slot.id, student_id, date)? else {
                    return Err(conflict());
                };
                if row.provenance.is_overridden() {
                    return Ok(Outcome::Skipped);
                }
                match update_derived(tx, slot, &row.id, status, now) {
                    Ok(0) => Ok(Outcome::Skipped),
                    Ok(_) => Ok(Outcome::Updated),
                    Err(_) => Err(conflict()),
                }
            }
            Err(e) => Err(AttendanceError::TransactionAborted(e)),
        },
    }
}

/// Derives or refreshes one subject attendance row per active student for a
/// slot on `date`. All writes commit together or not at all.
pub fn sync_from_daily(
    conn: &Connection,
    slot_id: &str,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Result<SyncSummary, AttendanceError> {
    let slot = roster::get_slot(conn, slot_id)?;
    let roster = roster::list_active_students(conn, &slot.class_id)?;
    if roster.is_empty() {
        tracing::debug!(slot_id, date = %date, "empty roster, nothing to sync");
        return Ok(SyncSummary::default());
    }

    let daily = checkin::daily_statuses_for(conn, &roster, date)?;
    let existing = existing_rows(conn, slot_id, date)?;

    let mut summary = SyncSummary::default();
    let tx = conn
        .unchecked_transaction()
        .map_err(AttendanceError::TransactionAborted)?;
    for student_id in &roster {
        let daily_status = daily.get(student_id);
        if let Some(DailyStatus::Unknown(raw)) = daily_status {
            tracing::warn!(student_id = %student_id, status = %raw, "unrecognized daily status");
            summary.unknown_daily.push(student_id.clone());
        }
        let status = map_daily_to_subject(daily_status);
        // Dropping `tx` on error rolls the whole batch back.
        match reconcile_student(&tx, &slot, student_id, date, status, existing.get(student_id), now)? {
            Outcome::Created => summary.created += 1,
            Outcome::Updated => summary.updated += 1,
            Outcome::Skipped => summary.skipped_overridden += 1,
        }
    }
    tx.commit().map_err(AttendanceError::TransactionAborted)?;

    tracing::info!(
        slot_id,
        date = %date,
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped_overridden,
        "subject attendance synced"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSync {
    pub slot_id: String,
    #[serde(flatten)]
    pub summary: SyncSummary,
}

/// Syncs every slot that meets on the weekday of `date`.
pub fn sync_date(
    conn: &Connection,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Result<Vec<SlotSync>, AttendanceError> {
    roster::slots_on(conn, date)?
        .into_iter()
        .map(|slot| {
            let summary = sync_from_daily(conn, &slot.id, date, now)?;
            Ok(SlotSync {
                slot_id: slot.id,
                summary,
            })
        })
        .collect()
}
