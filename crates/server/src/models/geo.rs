//! GeoJSON points and spherical distance helpers.
//!
//! Coordinates are always stored `[longitude, latitude]`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Earth radius in miles, used to turn a distance into radians.
pub const EARTH_RADIUS_MI: f64 = 3963.2;

/// Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6378.1;

/// Sphere radius in metres for distance computations.
pub const EARTH_RADIUS_M: f64 = EARTH_RADIUS_KM * 1000.0;

/// Metres to miles.
pub const METERS_TO_MILES: f64 = 0.000621371;

/// Metres to kilometres.
pub const METERS_TO_KM: f64 = 0.001;

const LAT_LNG_MESSAGE: &str = "Please provide latitude and longitude in the format lat,lng.";

fn point_type() -> String {
    "Point".to_string()
}

/// A GeoJSON point with optional description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type", default = "point_type")]
    pub kind: String,
    /// `[lng, lat]`
    pub coordinates: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A stop on a tour's itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "type", default = "point_type")]
    pub kind: String,
    pub coordinates: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<i32>,
}

/// Check a `[lng, lat]` pair.
pub fn validate_coordinates(coordinates: &[f64]) -> Result<(), String> {
    match coordinates {
        [lng, lat] if (-180.0..=180.0).contains(lng) && (-90.0..=90.0).contains(lat) => Ok(()),
        [_, _] => Err("Coordinates are out of range!".to_string()),
        _ => Err("Coordinates must be [longitude, latitude]!".to_string()),
    }
}

impl GeoPoint {
    pub fn validate(&self) -> Result<(), String> {
        if self.kind != "Point" {
            return Err("Location type must be 'Point'!".to_string());
        }
        validate_coordinates(&self.coordinates)
    }
}

impl Location {
    pub fn validate(&self) -> Result<(), String> {
        if self.kind != "Point" {
            return Err("Location type must be 'Point'!".to_string());
        }
        validate_coordinates(&self.coordinates)
    }
}

/// Distance unit in geo routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    /// Convert a distance in this unit into an angle in radians.
    pub fn to_radians(self, distance: f64) -> f64 {
        match self {
            Self::Miles => distance / EARTH_RADIUS_MI,
            Self::Kilometers => distance / EARTH_RADIUS_KM,
        }
    }

    /// Factor converting metres into this unit.
    pub fn meters_multiplier(self) -> f64 {
        match self {
            Self::Miles => METERS_TO_MILES,
            Self::Kilometers => METERS_TO_KM,
        }
    }
}

impl FromStr for DistanceUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mi" => Ok(Self::Miles),
            "km" => Ok(Self::Kilometers),
            other => Err(format!("Unit '{other}' is invalid! Use mi or km.")),
        }
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Miles => "mi",
            Self::Kilometers => "km",
        })
    }
}

/// A parsed `lat,lng` path segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl FromStr for LatLng {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = s.split_once(',').ok_or_else(|| LAT_LNG_MESSAGE.to_string())?;
        let lat: f64 = lat.trim().parse().map_err(|_| LAT_LNG_MESSAGE.to_string())?;
        let lng: f64 = lng.trim().parse().map_err(|_| LAT_LNG_MESSAGE.to_string())?;

        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(LAT_LNG_MESSAGE.to_string());
        }
        Ok(Self { lat, lng })
    }
}

/// SQL for the central angle (radians) between a tour's start location and
/// the point bound at `$lat_param` / `$lng_param`.
pub fn central_angle_sql(lat_param: usize, lng_param: usize) -> String {
    let lng = "(start_location->'coordinates'->>0)::float8";
    let lat = "(start_location->'coordinates'->>1)::float8";
    format!(
        "2 * ASIN(LEAST(1.0, SQRT(\
            POWER(SIN(RADIANS({lat} - ${lat_param}) / 2), 2) + \
            COS(RADIANS(${lat_param})) * COS(RADIANS({lat})) * \
            POWER(SIN(RADIANS({lng} - ${lng_param}) / 2), 2))))"
    )
}

/// Haversine central angle in radians between two points.
pub fn central_angle(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}
