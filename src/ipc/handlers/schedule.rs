use crate::ipc::helpers::{get_optional_str, get_required_str, get_time, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, NewSlot};
use rusqlite::Connection;
use serde_json::{json, Value};

fn schedule_create_slot(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let weekday = params
        .get("weekday")
        .and_then(|v| v.as_u64())
        .filter(|d| (1..=7).contains(d))
        .ok_or_else(|| HandlerErr::bad_params("weekday must be 1 (Monday) to 7 (Sunday)"))?
        as u32;
    let start_time = get_time(params, "startTime")?;
    let end_time = get_time(params, "endTime")?;
    if end_time <= start_time {
        return Err(HandlerErr::bad_params("endTime must be after startTime"));
    }

    let slot_id = roster::create_slot(
        conn,
        &NewSlot {
            class_id,
            subject_id,
            teacher_id,
            weekday,
            start_time,
            end_time,
        },
    )?;
    Ok(json!({ "slotId": slot_id }))
}

fn schedule_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId")?;
    let slots = roster::list_slots(conn, class_id.as_deref())?;
    Ok(json!({ "slots": slots }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "schedule.createSlot" => Some(with_db(state, req, schedule_create_slot)),
        "schedule.list" => Some(with_db(state, req, schedule_list)),
        _ => None,
    }
}
