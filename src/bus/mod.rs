//! The decoded vehicle snapshot and its display accessors.
//!
//! A [`Bus`] is only ever built by [`Bus::from_value`] (or serde, which
//! calls it), the only place its synthesized [`Bus::id`] is assigned.

mod decode;
mod identity;

pub use decode::{DecodeError, decode_buses, parse_dotnet_date, parse_iso8601};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seated-load ratio below which a bus counts as having plenty of room.
const PLENTY_BELOW: f64 = 0.4;
/// Seated-load ratio below which a bus counts as limited; at or above is full.
const LIMITED_BELOW: f64 = 0.85;

const BADGE_MAX_CHARS: usize = 4;

/// One observed vehicle/journey snapshot from the live feed.
///
/// `latitude` and `longitude` are kept as the raw strings the feed sends;
/// use [`Bus::coordinate`] for numeric values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", rename_all = "camelCase")]
pub struct Bus {
    id: String,

    pub route_description: Option<String>,
    pub published_line_name: Option<String>,
    pub line_ref: Option<String>,
    pub direction_ref: Option<String>,
    pub operator_ref: Option<String>,
    pub vehicle_ref: Option<String>,
    pub journey_code: Option<String>,
    pub ticket_machine_service_code: Option<String>,
    pub block_ref: Option<String>,
    pub stop_point_ref: Option<String>,
    pub destination_ref: Option<String>,
    pub visit_number: Option<String>,
    pub timing_status: Option<String>,

    pub destination: Option<String>,
    pub destination_stop_name: Option<String>,
    pub destination_stop_locality: Option<String>,
    pub destination_stop_full_name: Option<String>,
    pub current_stop_name: Option<String>,
    pub current_stop_locality: Option<String>,
    pub current_stop_full_name: Option<String>,
    pub next_stop_name: Option<String>,
    pub next_stop_locality: Option<String>,
    pub next_stop_full_name: Option<String>,

    pub latitude: String,
    pub longitude: String,
    pub bearing: Option<String>,

    pub last_updated: Option<DateTime<Utc>>,
    pub db_created: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
    pub recorded_at_time: Option<DateTime<Utc>>,
    pub valid_until_time: Option<DateTime<Utc>>,

    pub occupancy: Option<Occupancy>,
    pub data_set_id: Option<i64>,
    pub vehicle_at_stop: Option<bool>,
}

/// Live passenger load reported for a vehicle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Occupancy {
    pub seated_capacity: Option<i64>,
    pub seated_occupancy: Option<i64>,
    pub wheelchair_capacity: Option<i64>,
    pub wheelchair_occupancy: Option<i64>,
    pub status: Option<i64>,
}

/// A parsed WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// Coarse seated-load classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyLevel {
    Unknown,
    Plenty,
    Limited,
    Full,
}

impl OccupancyLevel {
    pub fn description(self) -> &'static str {
        match self {
            OccupancyLevel::Unknown => "Occupancy: Unknown",
            OccupancyLevel::Plenty => "Occupancy: Many seats",
            OccupancyLevel::Limited => "Occupancy: Few seats",
            OccupancyLevel::Full => "Occupancy: Full",
        }
    }
}

impl Bus {
    /// Identity that stays the same across refreshes for the same vehicle,
    /// as far as the feed's reference fields allow.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parses the raw coordinate strings. `None` if either one is not a number.
    pub fn coordinate(&self) -> Option<Coordinate> {
        let latitude = self.latitude.parse::<f64>().ok()?;
        let longitude = self.longitude.parse::<f64>().ok()?;
        Some(Coordinate {
            latitude,
            longitude,
        })
    }

    pub fn title(&self) -> &str {
        self.published_line_name
            .as_deref()
            .or(self.line_ref.as_deref())
            .or(self.vehicle_ref.as_deref())
            .unwrap_or("Bus")
    }

    pub fn subtitle(&self) -> &str {
        self.destination_stop_full_name
            .as_deref()
            .or(self.destination_stop_name.as_deref())
            .or(self.current_stop_full_name.as_deref())
            .or(self.current_stop_name.as_deref())
            .unwrap_or("")
    }

    /// Short line label for a map badge: trimmed, at most four characters.
    pub fn line_badge_text(&self) -> Option<String> {
        let name = self
            .published_line_name
            .as_deref()
            .or(self.line_ref.as_deref())?;
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(BADGE_MAX_CHARS).collect())
    }

    /// Trimmed published line name, falling back to the trimmed line ref.
    pub fn route_label(&self) -> Option<&str> {
        [&self.published_line_name, &self.line_ref]
            .into_iter()
            .filter_map(|field| field.as_deref().map(str::trim))
            .find(|label| !label.is_empty())
    }

    pub fn destination_label(&self) -> &str {
        let subtitle = self.subtitle();
        if subtitle.is_empty() {
            self.destination.as_deref().unwrap_or("")
        } else {
            subtitle
        }
    }

    pub fn occupancy_level(&self) -> OccupancyLevel {
        let Some(occupancy) = &self.occupancy else {
            return OccupancyLevel::Unknown;
        };
        let (Some(capacity), Some(seated)) = (occupancy.seated_capacity, occupancy.seated_occupancy)
        else {
            return OccupancyLevel::Unknown;
        };
        if capacity <= 0 {
            return OccupancyLevel::Unknown;
        }

        let ratio = seated as f64 / capacity as f64;
        if ratio < PLENTY_BELOW {
            OccupancyLevel::Plenty
        } else if ratio < LIMITED_BELOW {
            OccupancyLevel::Limited
        } else {
            OccupancyLevel::Full
        }
    }

    pub fn occupancy_description(&self) -> &'static str {
        self.occupancy_level().description()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Bus;
    use serde_json::{Value, json};

    /// A well-formed record; `overrides` replace (or, when `null`, blank) keys.
    pub fn record(overrides: Value) -> Value {
        let mut base = json!({
            "Latitude": "52.1234",
            "Longitude": "-0.1234",
            "VehicleRef": "Vehicle-42",
            "LineRef": "Line 123",
            "PublishedLineName": "  123A  ",
            "DestinationStopFullName": "Central Station",
        });
        if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), overrides) {
            base.extend(extra);
        }
        base
    }

    pub fn make_bus(overrides: Value) -> Bus {
        Bus::from_value(&record(overrides)).expect("fixture record should decode")
    }

    pub fn with_occupancy(capacity: i64, seated: i64) -> Bus {
        make_bus(json!({
            "Occupancy": { "SeatedCapacity": capacity, "SeatedOccupancy": seated }
        }))
    }
}
