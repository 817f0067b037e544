use crate::ipc::helpers::{get_bool, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster;
use rusqlite::Connection;
use serde_json::{json, Value};

fn classes_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id AND s.active = 1) AS active_count,
               (SELECT COUNT(*) FROM schedule_slots ss WHERE ss.class_id = c.id) AS slot_count
             FROM classes c
             ORDER BY c.name",
        )
        .map_err(crate::error::AttendanceError::from)?;
    let classes = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let active_count: i64 = row.get(2)?;
            let slot_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "activeStudentCount": active_count,
                "slotCount": slot_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(crate::error::AttendanceError::from)?;
    Ok(json!({ "classes": classes }))
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class_id = roster::create_class(conn, &name)?;
    Ok(json!({ "classId": class_id, "name": name }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let active = get_bool(params, "active", true)?;
    let student_id = roster::create_student(conn, &class_id, &last_name, &first_name, active)?;
    Ok(json!({ "studentId": student_id }))
}

fn students_set_active(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(active) = params.get("active").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::bad_params("missing active"));
    };
    roster::set_student_active(conn, &student_id, active)?;
    Ok(json!({ "ok": true }))
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !roster::class_exists(conn, &class_id)? {
        return Err(crate::error::AttendanceError::NotFound("class").into());
    }
    let students = roster::list_students(conn, &class_id)?;
    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "classes.list" => classes_list,
        "classes.create" => classes_create,
        "students.create" => students_create,
        "students.setActive" => students_set_active,
        "students.list" => students_list,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
