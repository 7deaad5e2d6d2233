//! Availability and conflict-resolution engine.
//!
//! `grid`, `occupancy` and `availability` are pure functions of the schedule
//! template and booking state passed in. `guard` and `lifecycle` run inside
//! a store unit. `service` loads state from the store and wires them together.

pub mod availability;
pub mod clock;
pub mod error;
pub mod grid;
pub mod guard;
pub mod lifecycle;
pub mod occupancy;
pub mod service;

pub use availability::AvailabilityMap;
pub use error::BookingError;
pub use service::{BookingOrigin, BookingService};
