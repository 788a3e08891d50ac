//! Circulation: the checkout ledger and the copy state transitions it drives.
//!
//! ```text
//! available --checkout--> checked_out --return--> available
//! ```
//!
//! Both transitions write the ledger entry and the copy status in one
//! transaction under the database writer lock, so a copy is lent to at most one
//! student at a time and a failed step leaves neither write behind. Returning an
//! already returned record changes nothing.

mod handler;
mod routes;
mod service;

pub use routes::routes;
pub use service::*;

pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[("circulation_001_schema.sql", include_str!("migrations/001_schema.sql"))]
}
