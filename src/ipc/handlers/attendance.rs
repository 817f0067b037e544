use crate::checkin::{self, Coordinates};
use crate::config;
use crate::ipc::helpers::{
    get_date, get_now, get_optional_f64, get_optional_time, get_required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::status::DailyStatus;
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_coordinates(params: &Value) -> Result<Option<Coordinates>, HandlerErr> {
    match (get_optional_f64(params, "lat")?, get_optional_f64(params, "lon")?) {
        (Some(lat), Some(lon)) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                return Err(HandlerErr::bad_params("lat/lon out of range"));
            }
            Ok(Some(Coordinates { lat, lon }))
        }
        (None, None) => Ok(None),
        _ => Err(HandlerErr::bad_params("lat and lon must be given together")),
    }
}

fn attendance_check_in(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let coords = parse_coordinates(params)?;
    let now = get_now(params)?;
    let cfg = config::load_geofence(conn)?;

    let record = checkin::record_check_in(conn, &cfg, &student_id, coords, now)?;
    Ok(json!({ "record": record }))
}

fn attendance_set_daily(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let date = get_date(params, "date")?;
    let status = DailyStatus::canonicalize(&get_required_str(params, "status")?);
    let arrival_time = get_optional_time(params, "arrivalTime")?;
    let cfg = config::load_geofence(conn)?;

    let record = checkin::set_daily_status(conn, &cfg, &student_id, date, status, arrival_time)?;
    Ok(json!({ "record": record }))
}

fn attendance_daily_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_date(params, "date")?;
    let rows = checkin::list_daily_for_class(conn, &class_id, date)?;
    Ok(json!({ "date": date.to_string(), "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "attendance.checkIn" => Some(with_db(state, req, attendance_check_in)),
        "attendance.setDaily" => Some(with_db(state, req, attendance_set_daily)),
        "attendance.dailyList" => Some(with_db(state, req, attendance_daily_list)),
        _ => None,
    }
}
