//! The Go Coach widget API, the only feed this tracker talks to.

mod client;

pub use client::{FeedHttpClient, GoCoachClient};
