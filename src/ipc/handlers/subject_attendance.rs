use crate::ipc::helpers::{
    get_date, get_now, get_optional_i64, get_optional_str, get_required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::overrides::{self, OverrideRequest};
use crate::status::SubjectStatus;
use crate::sync;
use rusqlite::Connection;
use serde_json::{json, Value};

fn subject_sync(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let date = get_date(params, "date")?;
    let now = get_now(params)?;
    let summary = sync::sync_from_daily(conn, &slot_id, date, now)?;
    Ok(json!(summary))
}

fn subject_sync_date(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_date(params, "date")?;
    let now = get_now(params)?;
    let slots = sync::sync_date(conn, date, now)?;
    Ok(json!({ "slots": slots }))
}

/// What the teacher's screen calls: bring rows up to date, then list them.
fn subject_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let date = get_date(params, "date")?;
    let now = get_now(params)?;
    let summary = sync::sync_from_daily(conn, &slot_id, date, now)?;
    let rows: Vec<Value> = sync::list_subject_rows(conn, &slot_id, date)?
        .iter()
        .map(|r| r.to_json())
        .collect();
    Ok(json!({ "sync": summary, "rows": rows }))
}

fn subject_override(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let row_id = get_required_str(params, "rowId")?;
    let raw_status = get_required_str(params, "status")?;
    let status = SubjectStatus::parse(&raw_status)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", raw_status)))?;
    let actor_id = get_required_str(params, "actorId")?;
    let lateness_minutes = get_optional_i64(params, "latenessMinutes")?;
    if lateness_minutes.is_some_and(|m| m < 0) {
        return Err(HandlerErr::bad_params("latenessMinutes must be >= 0"));
    }
    let note = get_optional_str(params, "note")?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let now = get_now(params)?;

    let row = overrides::apply_override(
        conn,
        &row_id,
        OverrideRequest {
            status,
            actor_id: &actor_id,
            lateness_minutes,
            note,
        },
        now,
    )?;
    Ok(json!({ "row": row.to_json() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "subjectAttendance.sync" => Some(with_db(state, req, subject_sync)),
        "subjectAttendance.syncDate" => Some(with_db(state, req, subject_sync_date)),
        "subjectAttendance.open" => Some(with_db(state, req, subject_open)),
        "subjectAttendance.override" => Some(with_db(state, req, subject_override)),
        _ => None,
    }
}
