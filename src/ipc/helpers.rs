use crate::clock;
use crate::error::AttendanceError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use serde_json::Value;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<AttendanceError> for HandlerErr {
    fn from(e: AttendanceError) -> Self {
        match &e {
            AttendanceError::TransactionAborted(_)
            | AttendanceError::PersistenceConflict { .. }
            | AttendanceError::Db(_) => tracing::error!(error = %e, code = e.code(), "request failed"),
            _ if e.is_rejection() => tracing::info!(reason = e.code(), "request rejected"),
            _ => tracing::debug!(error = %e, "request failed"),
        }
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "request failed");
        Self {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

/// Runs `f` against the open workspace database and wraps the outcome in a
/// response envelope.
pub fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be string or null", key))),
    }
}

pub fn get_optional_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_bool(params: &Value, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn get_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    clock::parse_date(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn get_time(params: &Value, key: &str) -> Result<NaiveTime, HandlerErr> {
    let raw = get_required_str(params, key)?;
    clock::parse_time(&raw).ok_or_else(|| HandlerErr::bad_params(format!("{} must be HH:MM", key)))
}

pub fn get_optional_time(params: &Value, key: &str) -> Result<Option<NaiveTime>, HandlerErr> {
    match get_optional_str(params, key)? {
        None => Ok(None),
        Some(raw) => clock::parse_time(&raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be HH:MM", key))),
    }
}

/// The `at` parameter stands in for the current time; absent means now. It
/// gates the check-in cutoff, so only the trusted host may set it.
pub fn get_now(params: &Value) -> Result<NaiveDateTime, HandlerErr> {
    match get_optional_str(params, "at")? {
        None => Ok(clock::now_local()),
        Some(raw) => clock::parse_datetime(&raw)
            .ok_or_else(|| HandlerErr::bad_params("at must be YYYY-MM-DDTHH:MM:SS")),
    }
}
