use crate::config::GeofenceConfig;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Slack for float error in the haversine result; a point placed exactly on
/// the radius must stay admissible.
const BOUNDARY_TOLERANCE_METERS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeofenceVerdict {
    Admissible,
    Rejected { distance_meters: f64 },
}

impl GeofenceVerdict {
    /// Distance shown to the user, in whole meters.
    pub fn rounded_meters(&self) -> Option<i64> {
        match self {
            Self::Admissible => None,
            Self::Rejected { distance_meters } => Some(distance_meters.round() as i64),
        }
    }
}

/// Great-circle distance between two points given in degrees.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Admissible when the school location is not configured, or when the reported
/// point lies within the configured radius (inclusive).
pub fn validate(lat: f64, lon: f64, cfg: &GeofenceConfig) -> GeofenceVerdict {
    let Some((school_lat, school_lon)) = cfg.school_point() else {
        return GeofenceVerdict::Admissible;
    };
    let distance_meters = haversine_meters(lat, lon, school_lat, school_lon);
    if distance_meters <= cfg.radius_meters + BOUNDARY_TOLERANCE_METERS {
        GeofenceVerdict::Admissible
    } else {
        GeofenceVerdict::Rejected { distance_meters }
    }
}
