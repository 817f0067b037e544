use crate::clock;
use crate::db;
use chrono::NaiveTime;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

pub const GEOFENCE_SETTINGS_KEY: &str = "setup.geofence";

pub const DEFAULT_RADIUS_METERS: f64 = 200.0;

/// School location and check-in timing. Read once per request and passed down
/// explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceConfig {
    pub school_lat: Option<f64>,
    pub school_lon: Option<f64>,
    pub radius_meters: f64,
    pub cutoff_time: NaiveTime,
    pub scheduled_arrival_time: NaiveTime,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            school_lat: None,
            school_lon: None,
            radius_meters: DEFAULT_RADIUS_METERS,
            cutoff_time: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or_default(),
            scheduled_arrival_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
        }
    }
}

impl GeofenceConfig {
    /// Both coordinates must be set for location checks to apply.
    pub fn school_point(&self) -> Option<(f64, f64)> {
        match (self.school_lat, self.school_lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "schoolLat": self.school_lat,
            "schoolLon": self.school_lon,
            "radiusMeters": self.radius_meters,
            "cutoffTime": self.cutoff_time.format("%H:%M").to_string(),
            "scheduledArrivalTime": self.scheduled_arrival_time.format("%H:%M").to_string(),
        })
    }

    /// Applies a partial update. Unknown keys and out-of-range values are rejected
    /// and leave `self` unchanged.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        let mut next = self.clone();
        for (k, v) in patch {
            next.apply_field(k, v)?;
        }
        *self = next;
        Ok(())
    }

    fn apply_field(&mut self, key: &str, v: &Value) -> Result<(), String> {
        match key {
            "schoolLat" => self.school_lat = parse_nullable_f64_range(v, key, -90.0, 90.0)?,
            "schoolLon" => self.school_lon = parse_nullable_f64_range(v, key, -180.0, 180.0)?,
            "radiusMeters" => self.radius_meters = parse_f64_range(v, key, 1.0, 100_000.0)?,
            "cutoffTime" => self.cutoff_time = parse_time_value(v, key)?,
            "scheduledArrivalTime" => self.scheduled_arrival_time = parse_time_value(v, key)?,
            _ => return Err(format!("unknown geofence field: {}", key)),
        }
        Ok(())
    }
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_nullable_f64_range(
    v: &Value,
    key: &str,
    min: f64,
    max: f64,
) -> Result<Option<f64>, String> {
    if v.is_null() {
        return Ok(None);
    }
    parse_f64_range(v, key, min, max).map(Some)
}

fn parse_time_value(v: &Value, key: &str) -> Result<NaiveTime, String> {
    v.as_str()
        .and_then(clock::parse_time)
        .ok_or_else(|| format!("{} must be HH:MM", key))
}

/// Defaults overlaid with whatever was saved for the workspace. Saved fields
/// are applied one by one; a bad field keeps its default and the rest still
/// apply, so a valid school point stays enforced.
pub fn load_geofence(conn: &Connection) -> anyhow::Result<GeofenceConfig> {
    let mut cfg = GeofenceConfig::default();
    let Some(saved) = db::settings_get_json(conn, GEOFENCE_SETTINGS_KEY)? else {
        return Ok(cfg);
    };
    let Some(saved_obj) = saved.as_object() else {
        tracing::warn!("saved geofence settings are not an object, using defaults");
        return Ok(cfg);
    };
    for (k, v) in saved_obj {
        if let Err(msg) = cfg.apply_field(k, v) {
            tracing::warn!(field = %k, error = %msg, "ignoring saved geofence field");
        }
    }
    if cfg.school_point().is_none() && (cfg.school_lat.is_some() || cfg.school_lon.is_some()) {
        tracing::warn!("saved geofence has only one school coordinate, location checks are off");
    }
    Ok(cfg)
}

pub fn save_geofence(conn: &Connection, cfg: &GeofenceConfig) -> anyhow::Result<()> {
    db::settings_set_json(conn, GEOFENCE_SETTINGS_KEY, &cfg.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_leave_location_unenforced() {
        let cfg = GeofenceConfig::default();
        assert_eq!(cfg.school_point(), None);
        assert_eq!(cfg.radius_meters, 200.0);
        assert_eq!(cfg.cutoff_time.format("%H:%M").to_string(), "13:00");
        assert_eq!(cfg.scheduled_arrival_time.format("%H:%M").to_string(), "07:00");
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let mut cfg = GeofenceConfig::default();
        let bad = json!({ "schoolLat": -6.2, "radiusMeters": 0 });
        assert!(cfg.apply_patch(bad.as_object().expect("obj")).is_err());
        assert_eq!(cfg, GeofenceConfig::default());

        let good = json!({ "schoolLat": -6.2, "schoolLon": 106.8, "cutoffTime": "12:30" });
        cfg.apply_patch(good.as_object().expect("obj")).expect("apply");
        assert_eq!(cfg.school_point(), Some((-6.2, 106.8)));
        assert_eq!(cfg.cutoff_time.format("%H:%M").to_string(), "12:30");
    }

    #[test]
    fn saved_settings_round_trip_through_the_workspace() {
        let conn = db::open_in_memory().expect("db");
        let mut cfg = GeofenceConfig::default();
        cfg.school_lat = Some(1.5);
        cfg.school_lon = Some(2.5);
        cfg.radius_meters = 150.0;
        save_geofence(&conn, &cfg).expect("save");
        assert_eq!(load_geofence(&conn).expect("load"), cfg);
    }

    #[test]
    fn a_bad_saved_field_does_not_drop_the_school_point() {
        let conn = db::open_in_memory().expect("db");
        db::settings_set_json(
            &conn,
            GEOFENCE_SETTINGS_KEY,
            &json!({
                "schoolLat": -6.2,
                "schoolLon": 106.8,
                "radiusMeters": 0,
                "cutoffTime": "12:15",
                "gpsAccuracy": 30
            }),
        )
        .expect("save raw");

        let cfg = load_geofence(&conn).expect("load");
        assert_eq!(cfg.school_point(), Some((-6.2, 106.8)));
        assert_eq!(cfg.radius_meters, DEFAULT_RADIUS_METERS);
        assert_eq!(cfg.cutoff_time.format("%H:%M").to_string(), "12:15");

        // Far from the school, so location checks must still reject.
        assert!(matches!(
            crate::geofence::validate(-6.3, 106.8, &cfg),
            crate::geofence::GeofenceVerdict::Rejected { .. }
        ));
    }
}
