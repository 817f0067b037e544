use chrono::NaiveTime;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("already checked in today")]
    AlreadyCheckedIn,

    #[error("check-in window closed at {}", .cutoff.format("%H:%M"))]
    CheckInWindowClosed { cutoff: NaiveTime },

    #[error("outside the school area ({distance_meters} m away)")]
    OutOfGeofenceRange { distance_meters: i64 },

    #[error("location is required to check in")]
    LocationRequired,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("unknown attendance status: {0}")]
    UnknownStatus(String),

    #[error("subject attendance for student {student_id} was written concurrently")]
    PersistenceConflict { student_id: String },

    #[error("transaction aborted: {0}")]
    TransactionAborted(#[source] rusqlite::Error),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl AttendanceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyCheckedIn => "already_checked_in",
            Self::CheckInWindowClosed { .. } => "check_in_window_closed",
            Self::OutOfGeofenceRange { .. } => "out_of_geofence_range",
            Self::LocationRequired => "location_required",
            Self::NotFound(_) => "not_found",
            Self::UnknownStatus(_) => "unknown_status",
            Self::PersistenceConflict { .. } => "persistence_conflict",
            Self::TransactionAborted(_) => "transaction_aborted",
            Self::Db(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::CheckInWindowClosed { cutoff } => {
                Some(json!({ "cutoff": cutoff.format("%H:%M").to_string() }))
            }
            Self::OutOfGeofenceRange { distance_meters } => {
                Some(json!({ "distanceMeters": distance_meters }))
            }
            Self::PersistenceConflict { student_id } => Some(json!({ "studentId": student_id })),
            _ => None,
        }
    }

    /// Rejections the user can act on, as opposed to storage failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::AlreadyCheckedIn
                | Self::CheckInWindowClosed { .. }
                | Self::OutOfGeofenceRange { .. }
                | Self::LocationRequired
        )
    }
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
