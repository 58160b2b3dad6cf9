//! Concrete implementations of the [`crate::services`] traits.

pub mod gocoach;
