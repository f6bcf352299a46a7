use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BroadcastError;

/// A subscriber's registered place: a display label plus the geocoded point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLocation")]
pub struct Location {
    #[serde(rename = "cityName")]
    city_name: String,
    #[serde(rename = "lat")]
    latitude: f64,
    #[serde(rename = "lon")]
    longitude: f64,
}

#[derive(Deserialize)]
struct RawLocation {
    #[serde(rename = "cityName")]
    city_name: String,
    #[serde(rename = "lat")]
    latitude: f64,
    #[serde(rename = "lon")]
    longitude: f64,
}

impl TryFrom<RawLocation> for Location {
    type Error = BroadcastError;

    fn try_from(raw: RawLocation) -> Result<Self, Self::Error> {
        Location::new(raw.city_name, raw.latitude, raw.longitude)
    }
}

impl Location {
    pub fn new(
        city_name: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, BroadcastError> {
        let city_name = city_name.into();
        if city_name.trim().is_empty() {
            return Err(BroadcastError::InvalidLocation("city name must not be empty".into()));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(BroadcastError::InvalidLocation(format!(
                "latitude {latitude} is outside -90..=90"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(BroadcastError::InvalidLocation(format!(
                "longitude {longitude} is outside -180..=180"
            )));
        }

        Ok(Self { city_name, latitude, longitude })
    }

    pub fn city_name(&self) -> &str {
        &self.city_name
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Hashable form of the exact coordinate. `0.0` and `-0.0` compare equal
    /// as floats, so they map to the same key.
    pub fn coordinate_key(&self) -> (u64, u64) {
        fn bits(v: f64) -> u64 {
            if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() }
        }
        (bits(self.latitude), bits(self.longitude))
    }
}

/// A subscriber. `user_id` is assigned by the messaging platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    #[serde(flatten)]
    location: Location,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(user_id: impl Into<String>, location: Location) -> Self {
        let now = Utc::now();
        Self { user_id: user_id.into(), location, created_at: now, updated_at: now }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn update_location(&mut self, location: Location) {
        self.location = location;
        // Never step backwards, even if the wall clock did.
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

/// Daily summary over the effective weather window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weather {
    max_temp: f64,
    min_temp: f64,
    pop: u8,
}

impl Weather {
    pub fn new(max_temp: f64, min_temp: f64, pop: i64) -> Result<Self, BroadcastError> {
        if !max_temp.is_finite() || !min_temp.is_finite() {
            return Err(BroadcastError::InvalidWeather(format!(
                "temperatures must be finite (max={max_temp}, min={min_temp})"
            )));
        }
        if !(0..=100).contains(&pop) {
            return Err(BroadcastError::InvalidWeather(format!(
                "precipitation probability {pop} is outside 0..=100"
            )));
        }
        if max_temp < min_temp {
            return Err(BroadcastError::InvalidWeather(format!(
                "max temperature {max_temp} is below min temperature {min_temp}"
            )));
        }

        Ok(Self { max_temp, min_temp, pop: pop as u8 })
    }

    pub fn max_temp(&self) -> f64 {
        self.max_temp
    }

    pub fn min_temp(&self) -> f64 {
        self.min_temp
    }

    pub fn pop(&self) -> u8 {
        self.pop
    }
}

/// Provider timestamp, before conversion to the service time zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordTime {
    /// Unix seconds (UTC).
    Epoch(i64),
    /// Wall-clock time already expressed in the service zone.
    Local(NaiveDateTime),
}

/// Per-hour probability of precipitation, in the unit the provider reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrecipitationChance {
    /// 0.0-1.0 (OpenWeather `pop`).
    Fraction(f64),
    /// Whole percent (WeatherAPI `chance_of_rain`). Kept integral so no
    /// float round trip can shift it.
    Percent(u8),
}

impl PrecipitationChance {
    /// Whole percent, floored for fractions.
    pub fn floor_percent(self) -> i64 {
        match self {
            PrecipitationChance::Fraction(f) => (f * 100.0).floor() as i64,
            PrecipitationChance::Percent(p) => i64::from(p),
        }
    }
}

/// One hourly sample, normalized from whatever shape the provider returns.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyRecord {
    pub time: RecordTime,
    pub temperature: f64,
    pub precipitation: Option<PrecipitationChance>,
}

/// A coarse precipitation-probability block (JMA publishes 6-hour blocks).
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityBlock {
    pub starts_at: DateTime<FixedOffset>,
    pub probability: u8,
}

/// JMA forecast-area code pair: the office (prefecture-level forecast
/// issuer) and the class10 sub-area inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaCodes {
    pub office: String,
    pub class10: String,
}
