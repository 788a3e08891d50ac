//! Catalog: bibliographic records and the physical copies behind them.
//!
//! Every book owns at least one [`BookCopy`]. Copy status moves to and from
//! `checked_out` only through the circulation module; the catalog only sets the
//! manual side states (`in_repair`, `lost`) and brings copies back to `available`.

mod handler;
mod routes;
mod store;

pub use routes::routes;
pub use store::*;

pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[("catalog_001_schema.sql", include_str!("migrations/001_schema.sql"))]
}
