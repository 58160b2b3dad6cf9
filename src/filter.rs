//! Route, occupancy and free-text narrowing of a bus collection for display.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::bus::{Bus, OccupancyLevel};

/// Which occupancy levels a filter lets through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OccupancyFilter {
    #[default]
    All,
    ManySeats,
    FewSeats,
    Full,
    Unknown,
}

impl OccupancyFilter {
    pub fn matches(self, level: OccupancyLevel) -> bool {
        match self {
            OccupancyFilter::All => true,
            OccupancyFilter::ManySeats => level == OccupancyLevel::Plenty,
            OccupancyFilter::FewSeats => level == OccupancyLevel::Limited,
            OccupancyFilter::Full => level == OccupancyLevel::Full,
            OccupancyFilter::Unknown => level == OccupancyLevel::Unknown,
        }
    }
}

/// A display filter. The default lets every bus through.
#[derive(Debug, Clone, Default)]
pub struct BusFilter {
    /// Route labels to keep; empty keeps all routes.
    pub routes: HashSet<String>,
    pub occupancy: OccupancyFilter,
    /// Case-insensitive text matched against title, destination and route.
    pub search: String,
}

impl BusFilter {
    pub fn is_active(&self) -> bool {
        !self.routes.is_empty()
            || self.occupancy != OccupancyFilter::All
            || !self.search.trim().is_empty()
    }

    pub fn matches(&self, bus: &Bus) -> bool {
        self.matches_route(bus) && self.occupancy.matches(bus.occupancy_level()) && self.matches_search(bus)
    }

    fn matches_route(&self, bus: &Bus) -> bool {
        if self.routes.is_empty() {
            return true;
        }
        bus.route_label()
            .is_some_and(|route| self.routes.contains(route))
    }

    fn matches_search(&self, bus: &Bus) -> bool {
        let query = self.search.trim();
        if query.is_empty() {
            return true;
        }
        let haystack = [
            bus.title(),
            bus.destination_label(),
            bus.route_label().unwrap_or(""),
        ]
        .join(" ")
        .to_lowercase();
        haystack.contains(&query.to_lowercase())
    }

    /// Matching buses ordered by route, then destination.
    pub fn apply(&self, buses: &[Bus]) -> Vec<Bus> {
        let mut matching: Vec<Bus> = buses.iter().filter(|b| self.matches(b)).cloned().collect();
        matching.sort_by(display_order);
        matching
    }
}

fn display_order(a: &Bus, b: &Bus) -> Ordering {
    let route_a = a.route_label().unwrap_or(a.title()).to_lowercase();
    let route_b = b.route_label().unwrap_or(b.title()).to_lowercase();
    route_a
        .cmp(&route_b)
        .then_with(|| a.destination_label().cmp(b.destination_label()))
}

/// Distinct route labels, sorted case-insensitively.
pub fn route_labels(buses: &[Bus]) -> Vec<String> {
    let mut routes: Vec<String> = buses
        .iter()
        .filter_map(Bus::route_label)
        .collect::<HashSet<_>>()
        .into_iter()
        .map(str::to_owned)
        .collect();
    routes.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));
    routes
}
