//! Tolerant decoding of raw feed records.
//!
//! Only `Latitude` and `Longitude` are mandatory. Every other key is tried on
//! its own and quietly becomes `None` when it is missing, `null`, or of an
//! unexpected type.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{Bus, Occupancy, identity};

/// Why a single feed record could not become a [`Bus`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("bus record is not a JSON object")]
    NotAnObject,
    #[error("bus record is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("bus record field `{0}` is not a string")]
    NotAString(&'static str),
}

/// Decodes a whole feed response. One bad record fails the batch.
///
/// # Errors
///
/// Returns an error if the body is not a JSON array or any element fails
/// [`Bus::from_value`].
pub fn decode_buses(bytes: &[u8]) -> serde_json::Result<Vec<Bus>> {
    serde_json::from_slice(bytes)
}

/// Parses the legacy `"/Date(<millis>)/"` wrapper into a UTC timestamp.
///
/// The number between the first `(` and the first `)` may be fractional.
pub fn parse_dotnet_date(raw: &str) -> Option<DateTime<Utc>> {
    let start = raw.find('(')?;
    let end = raw.find(')')?;
    let millis: f64 = raw.get(start + 1..end)?.parse().ok()?;
    if !millis.is_finite() {
        return None;
    }

    let seconds = millis / 1000.0;
    let whole = seconds.floor();
    let nanos = (((seconds - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Parses an ISO 8601 timestamp such as `2025-10-28T08:41:39.12+00:00`.
///
/// The date and time must be joined by `T` and the seconds must carry a
/// fractional part; anything else is rejected.
pub fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    let bytes = raw.as_bytes();
    if bytes.get(10) != Some(&b'T') || bytes.get(19) != Some(&b'.') {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Borrowed view over one JSON object with lenient per-key getters.
struct Record<'a>(&'a Map<String, Value>);

impl<'a> Record<'a> {
    fn required_str(&self, key: &'static str) -> Result<String, DecodeError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(DecodeError::MissingField(key)),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(DecodeError::NotAString(key)),
        }
    }

    fn string(&self, key: &str) -> Option<String> {
        self.0.get(key)?.as_str().map(str::to_owned)
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.0.get(key)?.as_i64()
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key)?.as_bool()
    }

    fn dotnet_date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.0.get(key)?.as_str().and_then(parse_dotnet_date)
    }

    fn iso_date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.0.get(key)?.as_str().and_then(parse_iso8601)
    }

    fn object(&self, key: &str) -> Option<Record<'a>> {
        self.0.get(key)?.as_object().map(Record)
    }
}

impl Occupancy {
    fn from_record(r: &Record<'_>) -> Self {
        Occupancy {
            seated_capacity: r.int("SeatedCapacity"),
            seated_occupancy: r.int("SeatedOccupancy"),
            wheelchair_capacity: r.int("WheelchairCapacity"),
            wheelchair_occupancy: r.int("WheelchairOccupancy"),
            status: r.int("Status"),
        }
    }
}

impl Bus {
    /// Builds a [`Bus`] from one raw feed record and assigns its identity.
    ///
    /// # Errors
    ///
    /// Fails if `value` is not an object or lacks string `Latitude` and
    /// `Longitude` values.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let r = Record(value.as_object().ok_or(DecodeError::NotAnObject)?);

        let mut bus = Bus {
            id: String::new(),

            route_description: r.string("RouteDescription"),
            published_line_name: r.string("PublishedLineName"),
            line_ref: r.string("LineRef"),
            direction_ref: r.string("DirectionRef"),
            operator_ref: r.string("OperatorRef"),
            vehicle_ref: r.string("VehicleRef"),
            journey_code: r.string("JourneyCode"),
            ticket_machine_service_code: r.string("TicketMachineServiceCode"),
            block_ref: r.string("BlockRef"),
            stop_point_ref: r.string("StopPointRef"),
            destination_ref: r.string("DestinationRef"),
            visit_number: r.string("VisitNumber"),
            timing_status: r.string("TimingStatus"),

            destination: r.string("Destination"),
            destination_stop_name: r.string("DestinationStopName"),
            destination_stop_locality: r.string("DestinationStopLocality"),
            destination_stop_full_name: r.string("DestinationStopFullName"),
            current_stop_name: r.string("CurrentStopName"),
            current_stop_locality: r.string("CurrentStopLocality"),
            current_stop_full_name: r.string("CurrentStopFullName"),
            next_stop_name: r.string("NextStopName"),
            next_stop_locality: r.string("NextStopLocality"),
            next_stop_full_name: r.string("NextStopFullName"),

            latitude: r.required_str("Latitude")?,
            longitude: r.required_str("Longitude")?,
            bearing: r.string("Bearing"),

            last_updated: r.dotnet_date("LastUpdated"),
            db_created: r.dotnet_date("DbCreated"),
            departure_time: r.iso_date("DepartureTime"),
            recorded_at_time: r.iso_date("RecordedAtTime"),
            valid_until_time: r.iso_date("ValidUntilTime"),

            occupancy: r.object("Occupancy").map(|o| Occupancy::from_record(&o)),
            data_set_id: r.int("DataSetId"),
            vehicle_at_stop: r.bool("VehicleAtStop"),
        };

        bus.id = identity::stable_id(&bus);
        Ok(bus)
    }
}

impl TryFrom<Value> for Bus {
    type Error = DecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Bus::from_value(&value)
    }
}
