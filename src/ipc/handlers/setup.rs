use crate::config;
use crate::ipc::helpers::{get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn setup_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let geofence = config::load_geofence(conn)?;
    Ok(json!({ "geofence": geofence.to_json() }))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section = get_required_str(params, "section")?;
    if section != "geofence" {
        return Err(HandlerErr::bad_params("unknown section"));
    }
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut current = config::load_geofence(conn)?;
    current.apply_patch(patch).map_err(HandlerErr::bad_params)?;
    config::save_geofence(conn, &current)?;
    tracing::info!(
        enforced = current.school_point().is_some(),
        radius_meters = current.radius_meters,
        "geofence settings updated"
    );
    Ok(json!({ "geofence": current.to_json() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_db(state, req, setup_get)),
        "setup.update" => Some(with_db(state, req, setup_update)),
        _ => None,
    }
}
