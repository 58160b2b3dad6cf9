//! Stable identity for feed records, which carry no reliable primary key.
//!
//! Operational references win over positional proxies. Records that only
//! have a position and timestamps get an id that changes as the vehicle
//! moves, and records with nothing at all get a random one.

use super::Bus;

pub(super) fn stable_id(bus: &Bus) -> String {
    if let Some(vehicle) = &bus.vehicle_ref {
        return match &bus.line_ref {
            Some(line) => format!("{vehicle}_{line}"),
            None => vehicle.clone(),
        };
    }

    let reference = [
        &bus.journey_code,
        &bus.ticket_machine_service_code,
        &bus.block_ref,
        &bus.stop_point_ref,
    ]
    .into_iter()
    .flatten()
    .find(|value| !value.is_empty());
    if let Some(reference) = reference {
        return reference.clone();
    }

    let mut parts: Vec<String> = [&bus.latitude, &bus.longitude]
        .into_iter()
        .filter(|s| !s.is_empty())
        .cloned()
        .collect();
    parts.extend(
        [bus.recorded_at_time, bus.valid_until_time]
            .into_iter()
            .flatten()
            .map(|dt| dt.timestamp().to_string()),
    );

    if parts.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        parts.join("_")
    }
}
