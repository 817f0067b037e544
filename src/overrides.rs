use crate::checkin;
use crate::error::AttendanceError;
use crate::status::{map_daily_to_subject, Provenance, SubjectStatus};
use crate::sync::{subject_from_row, SubjectAttendance, SUBJECT_COLUMNS};
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension};

/// Setting a row to the status the daily record would give it anyway hands the
/// row back to the synchronizer; anything else pins it as a manual entry.
pub fn resolve_provenance(
    default_status: SubjectStatus,
    new_status: SubjectStatus,
    actor_id: &str,
    now: NaiveDateTime,
) -> Provenance {
    if new_status == default_status {
        Provenance::Derived
    } else {
        Provenance::Manual {
            by: actor_id.to_string(),
            at: now,
        }
    }
}

pub fn get_subject_row(conn: &Connection, row_id: &str) -> Result<SubjectAttendance, AttendanceError> {
    conn.query_row(
        &format!("SELECT {} FROM subject_attendance WHERE id = ?", SUBJECT_COLUMNS),
        [row_id],
        subject_from_row,
    )
    .optional()?
    .ok_or(AttendanceError::NotFound("subject attendance"))
}

#[derive(Debug, Clone)]
pub struct OverrideRequest<'a> {
    pub status: SubjectStatus,
    pub actor_id: &'a str,
    pub lateness_minutes: Option<i64>,
    pub note: Option<String>,
}

pub fn apply_override(
    conn: &Connection,
    row_id: &str,
    req: OverrideRequest<'_>,
    now: NaiveDateTime,
) -> Result<SubjectAttendance, AttendanceError> {
    let mut row = get_subject_row(conn, row_id)?;
    let daily = checkin::daily_status(conn, &row.student_id, row.date)?;
    let default_status = map_daily_to_subject(daily.as_ref());
    // Repeating the same manual entry keeps its original actor and time.
    let provenance = match (resolve_provenance(default_status, req.status, req.actor_id, now), &row.provenance) {
        (Provenance::Manual { by, .. }, Provenance::Manual { by: prev_by, at: prev_at })
            if by == *prev_by && row.status == req.status =>
        {
            Provenance::Manual { by, at: *prev_at }
        }
        (resolved, _) => resolved,
    };

    let (by, at) = match &provenance {
        Provenance::Derived => (None, None),
        Provenance::Manual { by, at } => (Some(by.as_str()), Some(crate::clock::fmt_datetime(*at))),
    };
    conn.execute(
        "UPDATE subject_attendance
         SET status = ?, lateness_minutes = ?, note = ?,
             is_overridden = ?, source = ?, overridden_by = ?, overridden_at = ?
         WHERE id = ?",
        (
            req.status.as_str(),
            req.lateness_minutes,
            &req.note,
            provenance.is_overridden() as i64,
            provenance.source(),
            by,
            &at,
            row_id,
        ),
    )?;

    tracing::info!(
        row_id,
        actor_id = req.actor_id,
        status = req.status.as_str(),
        default_status = default_status.as_str(),
        overridden = provenance.is_overridden(),
        "subject attendance set"
    );

    row.status = req.status;
    row.lateness_minutes = req.lateness_minutes;
    row.note = req.note;
    row.provenance = provenance;
    Ok(row)
}
