//! Seams between the tracker and the outside world.

pub mod bus_feed;
