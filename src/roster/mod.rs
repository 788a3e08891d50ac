//! Roster: students and the classes they belong to.
//!
//! A student belongs to at most one class; a class's student list is derived
//! from that membership rather than stored twice.

mod handler;
mod routes;
mod store;

pub use routes::routes;
pub use store::*;

pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[("roster_001_schema.sql", include_str!("migrations/001_schema.sql"))]
}
